//! Bounded FIFO of completion-tracked motion commands.
//!
//! The scheduler owns the queue and at most one active command. It is advanced
//! once per control cycle; the head command applies its setpoints when it
//! starts and clears them when its completion predicate holds.

use core::fmt;
use core::time::Duration;

use heapless::Deque;
use libm::fabsf;

use crate::clock::ControlInstant;
use crate::controller::BalanceController;
use crate::protocol::CommandKind;

pub mod patterns;

pub use patterns::{MAX_PATTERN_PHASES, PhasePlan};

/// Compile-time bound on the queue; the configured capacity may be smaller.
pub const MAX_QUEUE_DEPTH: usize = 50;

/// Condition that ends a queued phase.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Completion {
    /// Time since the phase started.
    Elapsed(Duration),
    /// Absolute heading change since the phase started, in degrees.
    Heading(f32),
}

/// Setpoints applied while a phase runs. `None` leaves that component alone.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MotionPhase {
    pub velocity: Option<f32>,
    pub rotation: Option<f32>,
    pub completion: Completion,
}

impl MotionPhase {
    #[must_use]
    pub const fn drive(velocity: f32, duration: Duration) -> Self {
        Self {
            velocity: Some(velocity),
            rotation: None,
            completion: Completion::Elapsed(duration),
        }
    }

    #[must_use]
    pub const fn spin_for(rotation: f32, duration: Duration) -> Self {
        Self {
            velocity: None,
            rotation: Some(rotation),
            completion: Completion::Elapsed(duration),
        }
    }

    #[must_use]
    pub const fn spin_by(rotation: f32, angle_deg: f32) -> Self {
        Self {
            velocity: None,
            rotation: Some(rotation),
            completion: Completion::Heading(angle_deg),
        }
    }

    fn apply(&self, controller: &mut BalanceController) {
        if let Some(velocity) = self.velocity {
            controller.set_velocity(velocity);
        }
        if let Some(rotation) = self.rotation {
            controller.set_rotation(rotation);
        }
    }

    fn release(&self, controller: &mut BalanceController) {
        if self.velocity.is_some() {
            controller.set_velocity(0.0);
        }
        if self.rotation.is_some() {
            controller.set_rotation(0.0);
        }
    }
}

/// Queue entry, stored by value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueuedCommand<I> {
    pub kind: CommandKind,
    pub priority: u8,
    pub phase: MotionPhase,
    pub enqueued_at: I,
}

#[derive(Copy, Clone, Debug)]
struct ActiveCommand<I> {
    command: QueuedCommand<I>,
    started_at: I,
    start_heading: f32,
}

impl<I: ControlInstant> ActiveCommand<I> {
    fn is_complete(&self, now: I, heading_deg: f32) -> bool {
        match self.command.phase.completion {
            Completion::Elapsed(duration) => now.saturating_duration_since(self.started_at) >= duration,
            Completion::Heading(target) => fabsf(heading_deg - self.start_heading) >= target,
        }
    }
}

/// Error surfaced when a command cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnqueueError {
    /// Not enough free slots; nothing was enqueued.
    QueueFull { capacity: usize },
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::QueueFull { capacity } => write!(f, "queue full ({capacity} slots)"),
        }
    }
}

/// What changed during one [`CommandScheduler::advance`] call.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AdvanceReport<I> {
    pub completed: Option<QueuedCommand<I>>,
    pub started: Option<QueuedCommand<I>>,
    /// The queue drained and the controller was returned to neutral.
    pub idle: bool,
}

impl<I> AdvanceReport<I> {
    const fn quiet() -> Self {
        Self {
            completed: None,
            started: None,
            idle: false,
        }
    }
}

pub struct CommandScheduler<I, const N: usize = MAX_QUEUE_DEPTH> {
    queue: Deque<QueuedCommand<I>, N>,
    capacity: usize,
    active: Option<ActiveCommand<I>>,
}

impl<I, const N: usize> CommandScheduler<I, N>
where
    I: ControlInstant,
{
    /// Creates a scheduler that accepts at most `capacity` entries (bounded by `N`).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Deque::new(),
            capacity: capacity.min(N),
            active: None,
        }
    }

    /// Appends one command.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::QueueFull`] leaves the existing entries untouched.
    pub fn enqueue(&mut self, command: QueuedCommand<I>) -> Result<usize, EnqueueError> {
        self.enqueue_all(core::slice::from_ref(&command))
    }

    /// Appends every command or none of them.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::QueueFull`] if the batch does not fit in the free slots.
    pub fn enqueue_all(&mut self, commands: &[QueuedCommand<I>]) -> Result<usize, EnqueueError> {
        if self.queue.len() + commands.len() > self.capacity {
            return Err(EnqueueError::QueueFull {
                capacity: self.capacity,
            });
        }
        for command in commands {
            if self.queue.push_back(*command).is_err() {
                return Err(EnqueueError::QueueFull {
                    capacity: self.capacity,
                });
            }
        }
        Ok(self.queue.len())
    }

    /// Checks the active command and starts the next one when it is done.
    ///
    /// A finished command clears the setpoint components it set. When nothing
    /// is left to run the controller returns to neutral.
    pub fn advance(
        &mut self,
        now: I,
        heading_deg: f32,
        controller: &mut BalanceController,
    ) -> AdvanceReport<I> {
        let mut report = AdvanceReport::quiet();

        if let Some(active) = self.active {
            if !active.is_complete(now, heading_deg) {
                return report;
            }
            active.command.phase.release(controller);
            self.active = None;
            report.completed = Some(active.command);
        }

        if let Some(next) = self.queue.pop_front() {
            next.phase.apply(controller);
            self.active = Some(ActiveCommand {
                command: next,
                started_at: now,
                start_heading: heading_deg,
            });
            report.started = Some(next);
        } else if report.completed.is_some() {
            controller.set_neutral();
            report.idle = true;
        }

        report
    }

    /// Drops the active command and every queued entry, then neutralizes the controller.
    ///
    /// Returns the number of commands discarded.
    pub fn clear(&mut self, controller: &mut BalanceController) -> usize {
        let dropped = self.queue.len() + usize::from(self.active.is_some());
        self.queue.clear();
        self.active = None;
        controller.set_neutral();
        dropped
    }

    /// Queued entries, not counting the active command.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` when nothing is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    #[must_use]
    pub fn active(&self) -> Option<&QueuedCommand<I>> {
        self.active.as_ref().map(|active| &active.command)
    }

    /// Queued entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedCommand<I>> {
        self.queue.iter()
    }
}
