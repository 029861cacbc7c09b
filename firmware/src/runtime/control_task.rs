use balance_core::protocol::Response;
use balance_core::telemetry::EventId;
use balance_core::{CycleStatus, MicrosInstant, Supervisor};
use embassy_futures::select::{Either, select};
use embassy_stm32::usart::BufferedUartRx;
use embassy_time::{Duration, Instant, Ticker, Timer};
use embedded_io_async::Read;

use crate::hw::{Mpu6050, PwmBridge};
use crate::telemetry::log_record;

use super::serial_task;

pub type FirmwareSupervisor = Supervisor<'static, Mpu6050, PwmBridge, MicrosInstant>;

const SERIAL_READ_CHUNK: usize = 32;

pub fn now() -> MicrosInstant {
    MicrosInstant::from_micros(Instant::now().as_micros())
}

/// Runs the fixed-rate control loop and serves the command link.
///
/// A tick and pending serial bytes can become ready together; the tick is
/// polled first so bytes received during a period only affect the next cycle.
/// Replies go through the serial writer task, so this loop never waits on
/// the wire.
#[embassy_executor::task]
pub async fn run(
    supervisor: &'static mut FirmwareSupervisor,
    mut uart_rx: BufferedUartRx<'static>,
) -> ! {
    let period = supervisor.config().control_period();
    let period_us = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
    let mut ticker = Ticker::every(Duration::from_micros(period_us));
    let mut cursor = drain_telemetry(supervisor, 0);
    let mut last_status = CycleStatus::Balancing;
    let mut ingress = [0u8; SERIAL_READ_CHUNK];

    defmt::info!(
        "supervisor: control loop at {} Hz",
        supervisor.config().loop_frequency_hz
    );

    loop {
        match select(ticker.next(), uart_rx.read(&mut ingress)).await {
            Either::First(()) => {
                let report = supervisor.cycle(now());
                if report.status != last_status {
                    defmt::info!(
                        "supervisor: {} -> {}",
                        defmt::Debug2Format(&last_status),
                        defmt::Debug2Format(&report.status)
                    );
                    last_status = report.status;
                }
            }
            Either::Second(Ok(count)) => {
                for &byte in &ingress[..count] {
                    if let Some(response) = supervisor.ingest(byte, now()) {
                        send_response(&response);
                    }
                }
            }
            Either::Second(Err(_)) => {
                defmt::warn!("serial: UART read error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
        cursor = drain_telemetry(supervisor, cursor);
    }
}

fn drain_telemetry(supervisor: &FirmwareSupervisor, cursor: EventId) -> EventId {
    let telemetry = supervisor.telemetry();
    for record in telemetry.records_since(cursor) {
        log_record(record);
    }
    telemetry.next_id()
}

fn send_response(response: &Response) {
    let Ok(line) = response.to_line() else {
        defmt::warn!("serial: response did not fit the line buffer");
        return;
    };
    if !serial_task::queue_response(line) {
        defmt::warn!("serial: reply queue full, response dropped");
    }
}
