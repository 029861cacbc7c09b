//! Mirrors core telemetry records into the firmware log.

use core::fmt::Write;

use balance_core::MicrosInstant;
use balance_core::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecord};
use heapless::String;

/// Longest rendered telemetry line; longer lines are truncated.
pub const TELEMETRY_LINE_LEN: usize = 128;

/// Log level a record is emitted at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warn,
}

#[must_use]
pub const fn severity(event: TelemetryEventKind) -> Severity {
    match event {
        TelemetryEventKind::SensorFault
        | TelemetryEventKind::FallDetected
        | TelemetryEventKind::TiltWarning
        | TelemetryEventKind::CalibrationFailed
        | TelemetryEventKind::RequestRejected => Severity::Warn,
        _ => Severity::Info,
    }
}

/// Renders `record` as `#id event details`, without the timestamp.
#[must_use]
pub fn render(record: &TelemetryRecord<MicrosInstant>) -> String<TELEMETRY_LINE_LEN> {
    let mut line = String::new();
    // Overflow only truncates the log line.
    let _ = write!(line, "#{} {}", record.id, record.event);
    let _ = write_payload(&mut line, &record.details);
    line
}

fn write_payload<W: Write>(out: &mut W, payload: &TelemetryPayload) -> core::fmt::Result {
    match payload {
        TelemetryPayload::None => Ok(()),
        TelemetryPayload::Command(command) => {
            write!(out, " depth={}", command.queue_depth)?;
            match command.since_enqueued {
                Some(waited) => write!(out, " waited={}ms", waited.as_millis()),
                None => Ok(()),
            }
        }
        TelemetryPayload::Orientation(sample) => write!(
            out,
            " angle={:.2} rate={:.2}",
            sample.angle_deg, sample.rate_dps
        ),
        TelemetryPayload::Pid(tuning) => write!(
            out,
            " angle={:.2} rate={:.2} out={:.1} err={:.2} p={:.1} i={:.2} d={:.1} int={:.3}",
            tuning.angle_deg,
            tuning.rate_dps,
            tuning.output,
            tuning.terms.error,
            tuning.terms.p,
            tuning.terms.i,
            tuning.terms.d,
            tuning.terms.integral
        ),
        TelemetryPayload::Gains(gains) => write!(
            out,
            " kp={:.3} ki={:.3} kd={:.3}",
            gains.kp, gains.ki, gains.kd
        ),
        TelemetryPayload::Calibration(offset) => write!(out, " offset={offset:.3}"),
        TelemetryPayload::Count(count) => write!(out, " count={count}"),
        TelemetryPayload::Rejected(reason) => write!(out, " reason=\"{reason}\""),
    }
}

/// Emits one record at its [`severity`].
pub fn log_record(record: &TelemetryRecord<MicrosInstant>) {
    let line = render(record);
    emit_log(
        severity(record.event),
        line.as_str(),
        record.timestamp.as_micros(),
    );
}

#[cfg(target_os = "none")]
fn emit_log(severity: Severity, line: &str, timestamp_us: u64) {
    match severity {
        Severity::Info => defmt::info!("telemetry: {} t={}us", line, timestamp_us),
        Severity::Warn => defmt::warn!("telemetry: {} t={}us", line, timestamp_us),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(severity: Severity, line: &str, timestamp_us: u64) {
    match severity {
        Severity::Info => println!("telemetry: {line} t={timestamp_us}us"),
        Severity::Warn => println!("telemetry: WARN {line} t={timestamp_us}us"),
    }
}
