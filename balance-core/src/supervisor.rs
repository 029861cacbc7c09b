//! Fixed-rate control cycle and serial request intake.
//!
//! The supervisor owns every piece of controller state. Transports call
//! [`Supervisor::tick`] with the current instant and feed received bytes
//! through [`Supervisor::ingest`] after the tick of the same period, so a
//! request always takes effect on the following cycle.

use core::ops::Add;
use core::time::Duration;

use libm::fabsf;

use crate::clock::{ControlInstant, PeriodTimer};
use crate::config::{BalanceConfig, ConfigError};
use crate::controller::{BalanceController, PidTerms, WheelOutputs};
use crate::encoder::{PulseCounter, WheelEncoder};
use crate::estimator::{
    CalibrationOutcome, EstimatorError, InertialSensor, OrientationEstimator, OrientationSample,
};
use crate::executor::{CommandError, CommandExecutor, CommandOutcome};
use crate::motor::{HBridge, MotorDriver};
use crate::protocol::{LineAssembler, ProtocolError, Request, Response};
use crate::scheduler::{AdvanceReport, CommandScheduler, MAX_QUEUE_DEPTH};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder, TuningTelemetry};

/// Encoder counter and H-bridge belonging to one wheel.
pub struct WheelChannel<'a, B> {
    pub counter: &'a PulseCounter,
    pub bridge: B,
}

impl<'a, B> WheelChannel<'a, B> {
    pub const fn new(counter: &'a PulseCounter, bridge: B) -> Self {
        Self { counter, bridge }
    }
}

/// How a control cycle ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleStatus {
    /// Full cycle, motors driven from the PID output.
    Balancing,
    /// Sensor read failed; the previous balance output is held under the
    /// current setpoints.
    SensorHeld,
    /// Too many consecutive sensor failures; motors stopped.
    SensorFault,
    /// Tilt beyond the fall threshold; motors stopped.
    Fallen,
}

/// Summary of one control cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub sample: OrientationSample,
    pub outputs: WheelOutputs,
    pub terms: PidTerms,
    pub heading_deg: f32,
    /// Wheel velocities in encoder edges per second.
    pub left_velocity: f32,
    pub right_velocity: f32,
}

pub struct Supervisor<'a, S, B, I, const N: usize = MAX_QUEUE_DEPTH>
where
    S: InertialSensor,
    B: HBridge,
    I: ControlInstant,
{
    config: BalanceConfig,
    sensor: S,
    estimator: OrientationEstimator,
    controller: BalanceController,
    executor: CommandExecutor<I, N>,
    telemetry: TelemetryRecorder<I>,
    left_encoder: WheelEncoder<'a, I>,
    right_encoder: WheelEncoder<'a, I>,
    left_motor: MotorDriver<B>,
    right_motor: MotorDriver<B>,
    timer: PeriodTimer<I>,
    lines: LineAssembler,
    consecutive_faults: u8,
    fallen: bool,
    tilt_warned: bool,
    outputs: WheelOutputs,
    last_report: Option<CycleReport>,
}

impl<'a, S, B, I, const N: usize> Supervisor<'a, S, B, I, N>
where
    S: InertialSensor,
    B: HBridge,
    I: ControlInstant + Add<Duration, Output = I>,
{
    /// Builds a supervisor with both motors stopped.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`BalanceConfig::validate`].
    pub fn new(
        config: BalanceConfig,
        sensor: S,
        left: WheelChannel<'a, B>,
        right: WheelChannel<'a, B>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sensor,
            estimator: OrientationEstimator::new(&config),
            controller: BalanceController::new(&config),
            executor: CommandExecutor::new(&config),
            telemetry: TelemetryRecorder::new(),
            left_encoder: WheelEncoder::new(left.counter),
            right_encoder: WheelEncoder::new(right.counter),
            left_motor: MotorDriver::new(left.bridge, config.max_output),
            right_motor: MotorDriver::new(right.bridge, config.max_output),
            timer: PeriodTimer::new(config.control_period()),
            lines: LineAssembler::new(),
            consecutive_faults: 0,
            fallen: false,
            tilt_warned: false,
            outputs: WheelOutputs::STOPPED,
            last_report: None,
            config,
        })
    }

    /// Runs one control cycle if a period has elapsed since the last one.
    pub fn tick(&mut self, now: I) -> Option<CycleReport> {
        if !self.timer.poll(now) {
            return None;
        }
        Some(self.cycle(now))
    }

    /// Runs one control cycle unconditionally.
    ///
    /// For transports whose own timer already paces the loop.
    pub fn cycle(&mut self, now: I) -> CycleReport {
        let report = self.run_cycle(now);
        self.last_report = Some(report);
        report
    }

    fn run_cycle(&mut self, now: I) -> CycleReport {
        let sample = match self.estimator.update(&mut self.sensor) {
            Ok(sample) => sample,
            Err(_) => return self.sensor_failed(now),
        };
        if self.consecutive_faults > 0 {
            self.telemetry.record(
                TelemetryEventKind::SensorRecovered,
                TelemetryPayload::Count(u16::from(self.consecutive_faults)),
                now,
            );
            self.consecutive_faults = 0;
        }
        self.note_calibration(now);

        let left_velocity = self.left_encoder.velocity(now);
        let right_velocity = self.right_encoder.velocity(now);
        let heading_deg = self.heading();

        self.controller.observe(&sample);
        if !self.controller.is_balanced() {
            self.enter_fallen(&sample, now);
            return self.report(
                CycleStatus::Fallen,
                sample,
                heading_deg,
                left_velocity,
                right_velocity,
            );
        }
        if self.fallen {
            self.fallen = false;
            self.controller.reset();
            self.telemetry.record_orientation(
                TelemetryEventKind::Recovered,
                sample.angle_deg,
                sample.rate_dps,
                now,
            );
        }

        let tilted = fabsf(sample.angle_deg) > self.config.tilt_warning_deg;
        if tilted && !self.tilt_warned {
            self.telemetry.record_orientation(
                TelemetryEventKind::TiltWarning,
                sample.angle_deg,
                sample.rate_dps,
                now,
            );
        }
        self.tilt_warned = tilted;

        let advance = self.executor.advance(now, heading_deg, &mut self.controller);
        self.note_advance(&advance, now);

        let wheel_velocity = 0.5 * (left_velocity + right_velocity);
        let total = self.controller.update(&sample, Some(wheel_velocity));
        let outputs = self.controller.mix(total);
        self.drive(outputs);
        self.note_tuning(&sample, total, now);

        self.report(
            CycleStatus::Balancing,
            sample,
            heading_deg,
            left_velocity,
            right_velocity,
        )
    }

    fn sensor_failed(&mut self, now: I) -> CycleReport {
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        self.telemetry.record(
            TelemetryEventKind::SensorFault,
            TelemetryPayload::Count(u16::from(self.consecutive_faults)),
            now,
        );
        self.note_calibration(now);

        let status = if self.consecutive_faults >= self.config.sensor_fault_limit {
            self.stop_motors();
            CycleStatus::SensorFault
        } else {
            if !self.fallen && self.controller.last_sample().is_some() {
                let outputs = self.controller.mix(self.controller.held_output());
                self.drive(outputs);
            }
            CycleStatus::SensorHeld
        };
        let heading_deg = self.heading();
        self.report(
            status,
            self.estimator.sample(),
            heading_deg,
            self.left_encoder.last_velocity(),
            self.right_encoder.last_velocity(),
        )
    }

    fn enter_fallen(&mut self, sample: &OrientationSample, now: I) {
        self.stop_motors();
        if self.fallen {
            return;
        }
        self.fallen = true;
        let dropped = self.executor.scheduler_mut().clear(&mut self.controller);
        self.note_cleared(dropped, now);
        self.telemetry.record_orientation(
            TelemetryEventKind::FallDetected,
            sample.angle_deg,
            sample.rate_dps,
            now,
        );
    }

    fn report(
        &self,
        status: CycleStatus,
        sample: OrientationSample,
        heading_deg: f32,
        left_velocity: f32,
        right_velocity: f32,
    ) -> CycleReport {
        CycleReport {
            status,
            sample,
            outputs: self.outputs,
            terms: self.controller.terms(),
            heading_deg,
            left_velocity,
            right_velocity,
        }
    }

    fn drive(&mut self, outputs: WheelOutputs) {
        self.left_motor.set_speed(outputs.left);
        self.right_motor.set_speed(outputs.right);
        self.outputs = WheelOutputs {
            left: self.left_motor.speed(),
            right: self.right_motor.speed(),
        };
    }

    /// Releases both H-bridges immediately. Safe to call from any fault path.
    pub fn stop_motors(&mut self) {
        self.left_motor.stop();
        self.right_motor.stop();
        self.outputs = WheelOutputs::STOPPED;
    }

    fn heading(&self) -> f32 {
        self.config
            .geometry
            .heading_change_deg(self.left_encoder.position(), self.right_encoder.position())
    }

    /// Feeds one received byte; returns the response once a line completes.
    pub fn ingest(&mut self, byte: u8, now: I) -> Option<Response> {
        let line = self.lines.push(byte)?;
        Some(match line {
            Ok(line) => match core::str::from_utf8(&line) {
                Ok(text) => self.process_line(text, now),
                Err(_) => self.reject(ProtocolError::Malformed, now),
            },
            Err(error) => self.reject(error, now),
        })
    }

    /// Validates and executes one complete line, producing exactly one response.
    pub fn process_line(&mut self, text: &str, now: I) -> Response {
        let request = match Request::parse(text) {
            Ok(request) => request,
            Err(error) => return self.reject(error, now),
        };

        let result = if self.fallen && request.kind.is_motion() {
            Err(CommandError::Fallen)
        } else {
            self.executor
                .execute(&request, now, &mut self.controller, &mut self.estimator)
        };
        match result {
            Ok(outcome) => {
                self.note_outcome(&outcome, now);
                outcome.into_response()
            }
            Err(error) => {
                self.telemetry.record(
                    TelemetryEventKind::RequestRejected,
                    TelemetryPayload::none(),
                    now,
                );
                Response::error(error)
            }
        }
    }

    fn reject(&mut self, error: ProtocolError, now: I) -> Response {
        self.telemetry.record(
            TelemetryEventKind::RequestRejected,
            TelemetryPayload::Rejected(error),
            now,
        );
        Response::error(error)
    }

    /// Runs a full calibration before the loop starts, calling `pause` between reads.
    ///
    /// # Errors
    ///
    /// Returns the sensor error that aborted the run; the previous offset is kept.
    pub fn calibrate_blocking<F>(
        &mut self,
        samples: u16,
        now: I,
        pause: F,
    ) -> Result<f32, EstimatorError<S::Error>>
    where
        F: FnMut(),
    {
        let result = self.estimator.calibrate(&mut self.sensor, samples, pause);
        self.note_calibration(now);
        result
    }

    fn note_calibration(&mut self, now: I) {
        match self.estimator.take_calibration_outcome() {
            Some(CalibrationOutcome::Completed { offset_deg }) => {
                self.telemetry.record(
                    TelemetryEventKind::CalibrationComplete,
                    TelemetryPayload::Calibration(offset_deg),
                    now,
                );
            }
            Some(CalibrationOutcome::Failed) => {
                self.telemetry.record(
                    TelemetryEventKind::CalibrationFailed,
                    TelemetryPayload::none(),
                    now,
                );
            }
            None => {}
        }
    }

    fn note_cleared(&mut self, dropped: usize, now: I) {
        if dropped > 0 {
            self.telemetry.record(
                TelemetryEventKind::QueueCleared,
                TelemetryPayload::Count(u16::try_from(dropped).unwrap_or(u16::MAX)),
                now,
            );
        }
    }

    fn note_outcome(&mut self, outcome: &CommandOutcome, now: I) {
        match *outcome {
            CommandOutcome::Stopped { dropped } | CommandOutcome::ControllerReset { dropped } => {
                self.note_cleared(dropped, now);
            }
            CommandOutcome::Queued { kind, depth, .. } => {
                self.telemetry.record_command_queued(kind, depth, now);
            }
            CommandOutcome::TuningStopped { logged } => {
                self.telemetry.record(
                    TelemetryEventKind::TuningFinished,
                    TelemetryPayload::Count(logged),
                    now,
                );
            }
            CommandOutcome::GainsUpdated(gains) => {
                self.telemetry.record(
                    TelemetryEventKind::GainsChanged,
                    TelemetryPayload::Gains(gains),
                    now,
                );
            }
            _ => {}
        }
    }

    fn note_tuning(&mut self, sample: &OrientationSample, output: f32, now: I) {
        let Some(remaining) = self.executor.next_tuning_sample() else {
            return;
        };
        self.telemetry.record(
            TelemetryEventKind::TuningSample,
            TelemetryPayload::Pid(TuningTelemetry {
                angle_deg: sample.angle_deg,
                rate_dps: sample.rate_dps,
                output,
                terms: self.controller.terms(),
            }),
            now,
        );
        if remaining == 0 {
            self.telemetry.record(
                TelemetryEventKind::TuningFinished,
                TelemetryPayload::Count(self.executor.tuning_logged()),
                now,
            );
        }
    }

    fn note_advance(&mut self, advance: &AdvanceReport<I>, now: I) {
        let depth = self.executor.scheduler().len();
        if let Some(done) = advance.completed {
            self.telemetry
                .record_command_completed(done.kind, depth, done.enqueued_at, now);
        }
        if let Some(started) = advance.started {
            self.telemetry
                .record_command_started(started.kind, depth, started.enqueued_at, now);
        }
    }

    pub const fn config(&self) -> &BalanceConfig {
        &self.config
    }

    pub const fn controller(&self) -> &BalanceController {
        &self.controller
    }

    pub const fn estimator(&self) -> &OrientationEstimator {
        &self.estimator
    }

    pub fn scheduler(&self) -> &CommandScheduler<I, N> {
        self.executor.scheduler()
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder<I> {
        &self.telemetry
    }

    pub const fn last_report(&self) -> Option<CycleReport> {
        self.last_report
    }

    pub const fn left_motor(&self) -> &MotorDriver<B> {
        &self.left_motor
    }

    pub const fn right_motor(&self) -> &MotorDriver<B> {
        &self.right_motor
    }

    /// Left and right encoder positions in edges.
    pub fn positions(&self) -> (i32, i32) {
        (self.left_encoder.position(), self.right_encoder.position())
    }

    /// `true` while the last observed tilt is beyond the fall threshold.
    pub const fn is_fallen(&self) -> bool {
        self.fallen
    }

    pub const fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}
