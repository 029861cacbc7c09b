//! Telemetry event catalog and the fixed-size recorder shared by all targets.
//!
//! The core never logs. Every noteworthy transition of the control loop is
//! written here as a typed record, and transports
//! drain new records by id to mirror them to their own log sink (defmt on the
//! MCU, stderr on the emulator).

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::ControlInstant;
use crate::config::PidGains;
use crate::controller::PidTerms;
use crate::protocol::{CommandKind, ProtocolError};

/// Monotonically increasing record identifier.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    SensorFault,
    SensorRecovered,
    FallDetected,
    Recovered,
    TiltWarning,
    CommandQueued(CommandKind),
    CommandStarted(CommandKind),
    CommandCompleted(CommandKind),
    QueueCleared,
    GainsChanged,
    CalibrationComplete,
    CalibrationFailed,
    RequestRejected,
    /// One cycle of a `log` tuning run.
    TuningSample,
    /// A `log` tuning run ended after the carried number of samples.
    TuningFinished,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::SensorFault => f.write_str("sensor-fault"),
            TelemetryEventKind::SensorRecovered => f.write_str("sensor-recovered"),
            TelemetryEventKind::FallDetected => f.write_str("fall-detected"),
            TelemetryEventKind::Recovered => f.write_str("recovered"),
            TelemetryEventKind::TiltWarning => f.write_str("tilt-warning"),
            TelemetryEventKind::CommandQueued(kind) => write!(f, "command-queued {kind}"),
            TelemetryEventKind::CommandStarted(kind) => write!(f, "command-started {kind}"),
            TelemetryEventKind::CommandCompleted(kind) => write!(f, "command-completed {kind}"),
            TelemetryEventKind::QueueCleared => f.write_str("queue-cleared"),
            TelemetryEventKind::GainsChanged => f.write_str("gains-changed"),
            TelemetryEventKind::CalibrationComplete => f.write_str("calibration-complete"),
            TelemetryEventKind::CalibrationFailed => f.write_str("calibration-failed"),
            TelemetryEventKind::RequestRejected => f.write_str("request-rejected"),
            TelemetryEventKind::TuningSample => f.write_str("tuning-sample"),
            TelemetryEventKind::TuningFinished => f.write_str("tuning-finished"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Metadata about queue-backed motion commands.
    Command(CommandTelemetry),
    /// The orientation that triggered the event.
    Orientation(OrientationTelemetry),
    /// Per-cycle controller state while a tuning run is active.
    Pid(TuningTelemetry),
    Gains(PidGains),
    /// New zero offset in degrees.
    Calibration(f32),
    /// Consecutive failures, dropped entries, and similar counts.
    Count(u16),
    Rejected(ProtocolError),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Queue command metadata payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandTelemetry {
    pub queue_depth: u8,
    /// Time since the command was accepted.
    pub since_enqueued: Option<Duration>,
}

impl CommandTelemetry {
    #[must_use]
    pub const fn new(queue_depth: u8, since_enqueued: Option<Duration>) -> Self {
        Self {
            queue_depth,
            since_enqueued,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrientationTelemetry {
    pub angle_deg: f32,
    pub rate_dps: f32,
}

/// Angle, rate, combined output and PID breakdown of one cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TuningTelemetry {
    pub angle_deg: f32,
    pub rate_dps: f32,
    pub output: f32,
    pub terms: PidTerms,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<I>
where
    I: Copy,
{
    pub id: EventId,
    pub timestamp: I,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<I, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<I>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<I, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    I: Copy,
{
    ring: TelemetryRing<I, CAPACITY>,
    next_event_id: EventId,
}

impl<I, const CAPACITY: usize> TelemetryRecorder<I, CAPACITY>
where
    I: ControlInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<I>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<I>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Id the next record will receive. Use it as a drain cursor.
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records with an id at or after `cursor`, oldest first.
    ///
    /// Entries already overwritten by the ring are skipped silently.
    pub fn records_since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord<I>> {
        let pending = self.next_event_id.wrapping_sub(cursor);
        self.oldest_first()
            .filter(move |record| self.next_event_id.wrapping_sub(record.id) <= pending)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: I,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records a command accepted into the queue.
    pub fn record_command_queued(
        &mut self,
        kind: CommandKind,
        queue_depth: usize,
        timestamp: I,
    ) -> EventId {
        let payload =
            TelemetryPayload::Command(CommandTelemetry::new(truncate_depth(queue_depth), None));
        self.record(TelemetryEventKind::CommandQueued(kind), payload, timestamp)
    }

    /// Records the moment a queued command begins execution.
    pub fn record_command_started(
        &mut self,
        kind: CommandKind,
        queue_depth: usize,
        enqueued_at: I,
        timestamp: I,
    ) -> EventId {
        let wait = timestamp.saturating_duration_since(enqueued_at);
        let payload = TelemetryPayload::Command(CommandTelemetry::new(
            truncate_depth(queue_depth),
            Some(wait),
        ));
        self.record(TelemetryEventKind::CommandStarted(kind), payload, timestamp)
    }

    /// Records a command whose completion predicate held.
    pub fn record_command_completed(
        &mut self,
        kind: CommandKind,
        queue_depth: usize,
        enqueued_at: I,
        timestamp: I,
    ) -> EventId {
        let total = timestamp.saturating_duration_since(enqueued_at);
        let payload = TelemetryPayload::Command(CommandTelemetry::new(
            truncate_depth(queue_depth),
            Some(total),
        ));
        self.record(TelemetryEventKind::CommandCompleted(kind), payload, timestamp)
    }

    /// Records an orientation triggered event such as a fall or tilt warning.
    pub fn record_orientation(
        &mut self,
        event: TelemetryEventKind,
        angle_deg: f32,
        rate_dps: f32,
        timestamp: I,
    ) -> EventId {
        let payload = TelemetryPayload::Orientation(OrientationTelemetry {
            angle_deg,
            rate_dps,
        });
        self.record(event, payload, timestamp)
    }
}

impl<I, const CAPACITY: usize> Default for TelemetryRecorder<I, CAPACITY>
where
    I: ControlInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_depth(depth: usize) -> u8 {
    u8::try_from(depth).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MicrosInstant;

    #[test]
    fn records_wait_before_start_with_truncated_depth() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record_command_queued(CommandKind::TurnLeft, 1, MicrosInstant::from_micros(50));

        let id = recorder.record_command_started(
            CommandKind::TurnLeft,
            300,
            MicrosInstant::from_micros(90),
            MicrosInstant::from_micros(500),
        );
        assert_eq!(id, 1);

        let record = recorder.latest().copied().unwrap();
        assert_eq!(
            record.event,
            TelemetryEventKind::CommandStarted(CommandKind::TurnLeft)
        );
        match record.details {
            TelemetryPayload::Command(details) => {
                assert_eq!(details.queue_depth, u8::MAX);
                let wait = details.since_enqueued.expect("missing wait for start");
                assert_eq!(wait.as_micros(), 410);
            }
            _ => panic!("expected command payload"),
        }
    }

    #[test]
    fn drains_by_cursor() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        let t = MicrosInstant::from_micros(1);
        recorder.record(TelemetryEventKind::TiltWarning, TelemetryPayload::none(), t);
        let cursor = recorder.next_id();
        recorder.record(TelemetryEventKind::FallDetected, TelemetryPayload::none(), t);
        recorder.record(TelemetryEventKind::Recovered, TelemetryPayload::none(), t);

        let events: heapless::Vec<TelemetryEventKind, 4> =
            recorder.records_since(cursor).map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[TelemetryEventKind::FallDetected, TelemetryEventKind::Recovered]
        );
        assert_eq!(recorder.records_since(recorder.next_id()).count(), 0);
    }

    #[test]
    fn ring_keeps_newest_records() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        for tick in 0..10 {
            recorder.record(
                TelemetryEventKind::SensorFault,
                TelemetryPayload::Count(tick),
                MicrosInstant::from_micros(u64::from(tick)),
            );
        }

        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> = recorder.records_since(0).map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[6, 7, 8, 9]);
    }
}
