use balance_core::EdgeBinding;
use embassy_futures::select::select;
use embassy_stm32::exti::ExtiInput;

/// Decodes one wheel's quadrature lines into its counter.
///
/// The EXTI waits resolve on either edge of either line; the levels are
/// sampled after the wake-up so a missed edge shows up as a double
/// transition instead of a miscount.
#[embassy_executor::task(pool_size = 2)]
pub async fn run(
    binding: EdgeBinding<'static>,
    mut line_a: ExtiInput<'static>,
    mut line_b: ExtiInput<'static>,
) -> ! {
    binding.prime(line_a.is_high(), line_b.is_high());
    defmt::info!("encoder: {} wheel armed", defmt::Display2Format(&binding.side()));

    loop {
        select(line_a.wait_for_any_edge(), line_b.wait_for_any_edge()).await;
        binding.on_edge(line_a.is_high(), line_b.is_high());
    }
}
