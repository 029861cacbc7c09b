//! Request dispatcher.
//!
//! Turns validated protocol requests into controller setpoint changes, queued
//! motion phases, tuning updates or a status snapshot. A failed request leaves
//! the controller, the estimator and the queue exactly as they were.

use core::fmt;
use core::time::Duration;

use heapless::Vec;
use libm::fabsf;

use crate::clock::ControlInstant;
use crate::config::{BalanceConfig, PidGains};
use crate::controller::BalanceController;
use crate::estimator::OrientationEstimator;
use crate::protocol::{CommandKind, Parameters, Request, Response, StatusData, TurnDirection};
use crate::scheduler::{
    AdvanceReport, CommandScheduler, EnqueueError, MAX_PATTERN_PHASES, MAX_QUEUE_DEPTH,
    MotionPhase, QueuedCommand, patterns,
};

/// Turn used by `turn_left`/`turn_right` when no angle is given.
pub const DEFAULT_TURN_DEG: f32 = 90.0;

pub const TURN_AROUND_DEG: f32 = 180.0;

/// Cycles logged by `log` when no `samples` is given.
pub const DEFAULT_TUNING_SAMPLES: u16 = 1_000;

/// Side length of `square` when no `side` is given.
pub const DEFAULT_SIDE: Duration = Duration::from_secs(2);

/// Command execution successes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// Queue and setpoints cleared; `dropped` commands were discarded.
    Stopped { dropped: usize },
    /// A primitive changed the live setpoint.
    SetpointApplied { kind: CommandKind, value: f32 },
    Queued {
        kind: CommandKind,
        phases: usize,
        depth: usize,
    },
    GainsUpdated(PidGains),
    TargetUpdated(f32),
    ControllerReset { dropped: usize },
    CalibrationStarted { samples: u16 },
    /// Per-cycle tuning records will follow for `samples` cycles.
    TuningStarted { samples: u16 },
    /// A running tuning log was cancelled after `logged` cycles.
    TuningStopped { logged: u16 },
    Status(StatusData),
}

impl CommandOutcome {
    /// Wraps the outcome in the single response owed to the sender.
    #[must_use]
    pub fn into_response(self) -> Response {
        match self {
            CommandOutcome::Status(data) => Response::ok(self).with_data(data),
            other => Response::ok(other),
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Stopped { dropped } => write!(f, "stopped ({dropped} dropped)"),
            CommandOutcome::SetpointApplied { kind, value } => write!(f, "{kind} at {value:.1}"),
            CommandOutcome::Queued {
                kind,
                phases,
                depth,
            } => write!(f, "{kind} queued ({phases} phases, depth {depth})"),
            CommandOutcome::GainsUpdated(gains) => write!(
                f,
                "gains kp={:.3} ki={:.3} kd={:.3}",
                gains.kp, gains.ki, gains.kd
            ),
            CommandOutcome::TargetUpdated(angle) => write!(f, "target angle {angle:.2}"),
            CommandOutcome::ControllerReset { dropped } => {
                write!(f, "controller reset ({dropped} dropped)")
            }
            CommandOutcome::CalibrationStarted { samples } => {
                write!(f, "calibrating over {samples} samples")
            }
            CommandOutcome::TuningStarted { samples } => {
                write!(f, "logging {samples} cycles")
            }
            CommandOutcome::TuningStopped { logged } => {
                write!(f, "logging stopped after {logged} cycles")
            }
            CommandOutcome::Status(_) => f.write_str("status"),
        }
    }
}

/// Errors surfaced while executing a validated request.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CommandError {
    Enqueue(EnqueueError),
    /// `set_target` beyond the fall threshold.
    TargetOutOfRange { angle_deg: f32, limit_deg: f32 },
    CalibrationBusy,
    /// Motion refused while the chassis lies beyond the fall threshold.
    Fallen,
}

impl From<EnqueueError> for CommandError {
    fn from(error: EnqueueError) -> Self {
        Self::Enqueue(error)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Enqueue(error) => error.fmt(f),
            CommandError::TargetOutOfRange {
                angle_deg,
                limit_deg,
            } => write!(
                f,
                "target angle {angle_deg:.2} must stay within +/-{limit_deg:.1}"
            ),
            CommandError::CalibrationBusy => f.write_str("calibration already running"),
            CommandError::Fallen => f.write_str("fallen: motion refused until upright"),
        }
    }
}

/// Dispatches requests into the controller and the command scheduler.
pub struct CommandExecutor<I, const N: usize = MAX_QUEUE_DEPTH> {
    scheduler: CommandScheduler<I, N>,
    default_speed: f32,
    max_velocity: f32,
    max_rotation: f32,
    fall_threshold_deg: f32,
    calibration_samples: u16,
    tuning_remaining: u16,
    tuning_logged: u16,
}

impl<I, const N: usize> CommandExecutor<I, N>
where
    I: ControlInstant,
{
    #[must_use]
    pub fn new(config: &BalanceConfig) -> Self {
        Self {
            scheduler: CommandScheduler::new(config.queue_capacity),
            default_speed: config.default_speed,
            max_velocity: config.max_velocity_setpoint,
            max_rotation: config.max_rotation_setpoint,
            fall_threshold_deg: config.fall_threshold_deg,
            calibration_samples: config.calibration_samples,
            tuning_remaining: 0,
            tuning_logged: 0,
        }
    }

    pub fn scheduler(&self) -> &CommandScheduler<I, N> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut CommandScheduler<I, N> {
        &mut self.scheduler
    }

    /// Advances the queued motion by one control cycle.
    pub fn advance(
        &mut self,
        now: I,
        heading_deg: f32,
        controller: &mut BalanceController,
    ) -> AdvanceReport<I> {
        self.scheduler.advance(now, heading_deg, controller)
    }

    /// Counts one cycle against the running tuning log.
    ///
    /// Returns the cycles still owed after this one, or `None` when no log
    /// is running.
    pub fn next_tuning_sample(&mut self) -> Option<u16> {
        if self.tuning_remaining == 0 {
            return None;
        }
        self.tuning_remaining -= 1;
        self.tuning_logged = self.tuning_logged.saturating_add(1);
        Some(self.tuning_remaining)
    }

    #[must_use]
    pub const fn is_tuning(&self) -> bool {
        self.tuning_remaining > 0
    }

    /// Cycles logged by the current or most recent tuning run.
    #[must_use]
    pub const fn tuning_logged(&self) -> u16 {
        self.tuning_logged
    }

    /// Executes one validated request.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] without touching any state.
    #[allow(clippy::too_many_lines)]
    pub fn execute(
        &mut self,
        request: &Request,
        now: I,
        controller: &mut BalanceController,
        estimator: &mut OrientationEstimator,
    ) -> Result<CommandOutcome, CommandError> {
        let params = &request.params;
        let velocity = self.velocity(params);
        let rotation = self.rotation(params);

        match request.kind {
            CommandKind::Stop => {
                let dropped = self.scheduler.clear(controller);
                controller.set_neutral();
                Ok(CommandOutcome::Stopped { dropped })
            }
            CommandKind::MoveForward | CommandKind::MoveBackward => {
                let signed = if request.kind == CommandKind::MoveForward {
                    velocity
                } else {
                    -velocity
                };
                match params.duration_s {
                    Some(seconds) => {
                        let phase = MotionPhase::drive(signed, Duration::from_secs_f32(seconds));
                        self.enqueue(request, &[phase], now)
                    }
                    None => {
                        controller.set_velocity(signed);
                        Ok(CommandOutcome::SetpointApplied {
                            kind: request.kind,
                            value: signed,
                        })
                    }
                }
            }
            CommandKind::RotateClockwise | CommandKind::RotateCounterclockwise => {
                let direction = if request.kind == CommandKind::RotateClockwise {
                    TurnDirection::Right
                } else {
                    TurnDirection::Left
                };
                let signed = rotation * direction.sign();
                match (params.angle_deg, params.duration_s) {
                    (Some(angle), _) => {
                        let phase = patterns::turn(rotation, angle, direction);
                        self.enqueue(request, &[phase], now)
                    }
                    (None, Some(seconds)) => {
                        let phase = MotionPhase::spin_for(signed, Duration::from_secs_f32(seconds));
                        self.enqueue(request, &[phase], now)
                    }
                    (None, None) => {
                        controller.set_rotation(signed);
                        Ok(CommandOutcome::SetpointApplied {
                            kind: request.kind,
                            value: signed,
                        })
                    }
                }
            }
            CommandKind::TurnLeft | CommandKind::TurnRight => {
                let direction = if request.kind == CommandKind::TurnLeft {
                    TurnDirection::Left
                } else {
                    TurnDirection::Right
                };
                let angle = params.angle_deg.unwrap_or(DEFAULT_TURN_DEG);
                let phase = patterns::turn(rotation, angle, direction);
                self.enqueue(request, &[phase], now)
            }
            CommandKind::TurnAround => {
                let phase = patterns::turn(rotation, TURN_AROUND_DEG, TurnDirection::Right);
                self.enqueue(request, &[phase], now)
            }
            CommandKind::Square => {
                let side = params
                    .side_s
                    .map_or(DEFAULT_SIDE, Duration::from_secs_f32);
                let plan = patterns::square(velocity, rotation, side);
                self.enqueue(request, &plan, now)
            }
            CommandKind::Circle => {
                let direction = params.direction.unwrap_or(TurnDirection::Right);
                let plan = patterns::circle(velocity, rotation, direction);
                self.enqueue(request, &plan, now)
            }
            CommandKind::SetGains => {
                let current = controller.gains();
                let gains = PidGains::new(
                    params.kp.unwrap_or(current.kp),
                    params.ki.unwrap_or(current.ki),
                    params.kd.unwrap_or(current.kd),
                );
                controller.set_gains(gains);
                Ok(CommandOutcome::GainsUpdated(gains))
            }
            CommandKind::SetTarget => {
                let angle_deg = params.angle_deg.unwrap_or(controller.target_angle());
                if fabsf(angle_deg) >= self.fall_threshold_deg {
                    return Err(CommandError::TargetOutOfRange {
                        angle_deg,
                        limit_deg: self.fall_threshold_deg,
                    });
                }
                controller.set_target_angle(angle_deg);
                Ok(CommandOutcome::TargetUpdated(angle_deg))
            }
            CommandKind::Reset => {
                let dropped = self.scheduler.clear(controller);
                controller.reset();
                Ok(CommandOutcome::ControllerReset { dropped })
            }
            CommandKind::Calibrate => {
                let samples = params.samples.unwrap_or(self.calibration_samples);
                if !estimator.begin_calibration(samples) {
                    return Err(CommandError::CalibrationBusy);
                }
                Ok(CommandOutcome::CalibrationStarted { samples })
            }
            CommandKind::Log => {
                // A bare `log` toggles; an explicit count always (re)starts.
                if self.is_tuning() && params.samples.is_none() {
                    self.tuning_remaining = 0;
                    return Ok(CommandOutcome::TuningStopped {
                        logged: self.tuning_logged,
                    });
                }
                let samples = params.samples.unwrap_or(DEFAULT_TUNING_SAMPLES);
                self.tuning_remaining = samples;
                self.tuning_logged = 0;
                Ok(CommandOutcome::TuningStarted { samples })
            }
            CommandKind::Status => Ok(CommandOutcome::Status(
                self.status(controller, estimator),
            )),
        }
    }

    /// Snapshot reported by the `status` query.
    #[must_use]
    pub fn status(
        &self,
        controller: &BalanceController,
        estimator: &OrientationEstimator,
    ) -> StatusData {
        let sample = estimator.sample();
        let setpoint = controller.setpoint();
        let gains = controller.gains();
        StatusData {
            angle_deg: sample.angle_deg,
            rate_dps: sample.rate_dps,
            velocity_setpoint: setpoint.velocity,
            rotation_setpoint: setpoint.rotation,
            queue_depth: self.scheduler.len(),
            active: self.scheduler.active().map(|command| command.kind),
            balanced: controller.is_balanced(),
            calibrated: sample.calibrated,
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            target_angle_deg: controller.target_angle(),
        }
    }

    fn velocity(&self, params: &Parameters) -> f32 {
        params.speed.unwrap_or(self.default_speed) * self.max_velocity
    }

    fn rotation(&self, params: &Parameters) -> f32 {
        params.speed.unwrap_or(self.default_speed) * self.max_rotation
    }

    fn enqueue(
        &mut self,
        request: &Request,
        phases: &[MotionPhase],
        now: I,
    ) -> Result<CommandOutcome, CommandError> {
        let mut batch: Vec<QueuedCommand<I>, MAX_PATTERN_PHASES> = Vec::new();
        for phase in phases {
            batch
                .push(QueuedCommand {
                    kind: request.kind,
                    priority: request.priority,
                    phase: *phase,
                    enqueued_at: now,
                })
                .map_err(|_| EnqueueError::QueueFull {
                    capacity: self.scheduler.capacity(),
                })?;
        }
        let depth = self.scheduler.enqueue_all(&batch)?;
        Ok(CommandOutcome::Queued {
            kind: request.kind,
            phases: batch.len(),
            depth,
        })
    }
}
