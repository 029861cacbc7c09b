use balance_core::config::SERIAL_BAUD;
use balance_core::protocol::MAX_RESPONSE_LEN;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{
    BufferedUart, BufferedUartTx, Config as UartConfig, ConfigError, DataBits, Parity, StopBits,
};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embedded_io_async::Write;
use heapless::String;

const SERIAL_BUFFER_SIZE: usize = 256;

/// Replies waiting for the writer task.
pub const RESPONSE_QUEUE_DEPTH: usize = 8;

pub type ResponseLine = String<MAX_RESPONSE_LEN>;
pub type ResponseQueue = Channel<ThreadModeRawMutex, ResponseLine, RESPONSE_QUEUE_DEPTH>;

static RESPONSES: ResponseQueue = Channel::new();

static mut UART_TX_BUFFER: [u8; SERIAL_BUFFER_SIZE] = [0; SERIAL_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; SERIAL_BUFFER_SIZE] = [0; SERIAL_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Brings up USART5 at the command link baud rate, 8N1.
pub fn open(
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> Result<BufferedUart<'static>, ConfigError> {
    let mut config = UartConfig::default();
    config.baudrate = SERIAL_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    // Only called once from `main`, before any task touches the buffers.
    unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
    }
}

/// Hands a reply to the writer task without waiting for the wire.
///
/// Returns `false` when the queue is full and the reply was dropped.
pub fn queue_response(line: ResponseLine) -> bool {
    match RESPONSES.try_send(line) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => false,
    }
}

/// Drains queued replies onto the UART, one line each.
#[embassy_executor::task]
pub async fn run(mut uart_tx: BufferedUartTx<'static>) -> ! {
    loop {
        let line = RESPONSES.receive().await;
        if uart_tx.write_all(line.as_bytes()).await.is_err()
            || uart_tx.write_all(b"\n").await.is_err()
        {
            defmt::warn!("serial: UART write error");
            continue;
        }
        if uart_tx.flush().await.is_err() {
            defmt::warn!("serial: UART flush error");
        }
    }
}
