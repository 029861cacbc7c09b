//! Quadrature decoding split across the interrupt and control-loop contexts.
//!
//! [`PulseCounter`] is the only state touched from the edge handler. It is a
//! single-writer register: the handler is the sole writer and the control loop
//! only ever reads it through [`PulseCounter::snapshot`]. Positions and
//! velocities are derived on the loop side by [`WheelEncoder`], which keeps its
//! own origin instead of resetting the shared counter.

use core::sync::atomic::Ordering;

use portable_atomic::{AtomicI32, AtomicU8};

use crate::clock::ControlInstant;
use crate::config::WheelSide;

/// Step applied for each `(previous << 2) | current` A/B transition.
///
/// States encode `(A << 1) | B`. Forward rotation (A leads B) walks
/// `00 -> 10 -> 11 -> 01 -> 00`. Unchanged states and double transitions
/// (both lines flipped between two edges) count as zero.
const TRANSITIONS: [i8; 16] = [
    0, -1, 1, 0, //
    1, 0, 0, -1, //
    -1, 0, 0, 1, //
    0, 1, -1, 0,
];

const fn encode_state(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | (b as u8)
}

/// Signed edge counter written from interrupt context.
#[derive(Debug)]
pub struct PulseCounter {
    position: AtomicI32,
    state: AtomicU8,
}

impl PulseCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: AtomicI32::new(0),
            state: AtomicU8::new(0),
        }
    }

    /// Latches the current line levels without counting a step.
    ///
    /// Call once before edges are delivered so the first edge is decoded
    /// against the real resting state.
    pub fn prime(&self, a: bool, b: bool) {
        self.state.store(encode_state(a, b), Ordering::Relaxed);
    }

    /// Decodes one edge on either channel.
    ///
    /// Runs in bounded time with no locks, no allocation and no floating point.
    /// Only load/store operations are used, which cores without atomic
    /// read-modify-write support still provide natively.
    pub fn on_edge(&self, a: bool, b: bool) {
        let current = encode_state(a, b);
        let previous = self.state.load(Ordering::Relaxed) & 0b11;
        self.state.store(current, Ordering::Relaxed);

        let step = TRANSITIONS[usize::from((previous << 2) | current)];
        if step != 0 {
            let position = self.position.load(Ordering::Relaxed);
            self.position
                .store(position.wrapping_add(i32::from(step)), Ordering::Release);
        }
    }

    /// Tear-free read of the full 32-bit position.
    #[must_use]
    pub fn snapshot(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Ties an edge source to the counter it owns.
///
/// Each wheel's interrupt plumbing holds its own binding, so two encoders can
/// never decode into the same counter through shared global state.
#[derive(Copy, Clone, Debug)]
pub struct EdgeBinding<'a> {
    side: WheelSide,
    counter: &'a PulseCounter,
}

impl<'a> EdgeBinding<'a> {
    #[must_use]
    pub const fn new(side: WheelSide, counter: &'a PulseCounter) -> Self {
        Self { side, counter }
    }

    #[must_use]
    pub const fn side(&self) -> WheelSide {
        self.side
    }

    /// Edge trampoline invoked by the interrupt layer.
    pub fn on_edge(&self, a: bool, b: bool) {
        self.counter.on_edge(a, b);
    }

    pub fn prime(&self, a: bool, b: bool) {
        self.counter.prime(a, b);
    }
}

/// Control-loop view of one wheel encoder.
#[derive(Debug)]
pub struct WheelEncoder<'a, I> {
    counter: &'a PulseCounter,
    origin: i32,
    last_position: i32,
    last_time: Option<I>,
    velocity: f32,
}

impl<'a, I> WheelEncoder<'a, I>
where
    I: ControlInstant,
{
    /// Starts tracking `counter` from its current value.
    #[must_use]
    pub fn new(counter: &'a PulseCounter) -> Self {
        Self {
            counter,
            origin: counter.snapshot(),
            last_position: 0,
            last_time: None,
            velocity: 0.0,
        }
    }

    /// Edges counted since construction or the last [`reset`](Self::reset).
    #[must_use]
    pub fn position(&self) -> i32 {
        self.counter.snapshot().wrapping_sub(self.origin)
    }

    /// Velocity in edges per second since the previous call.
    ///
    /// The first call only seeds the reference point and reports zero. Calls
    /// with no elapsed time return the previous velocity unchanged.
    #[allow(clippy::cast_precision_loss)]
    pub fn velocity(&mut self, now: I) -> f32 {
        let position = self.position();
        match self.last_time {
            None => self.velocity = 0.0,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed.is_zero() {
                    return self.velocity;
                }
                let delta = position.wrapping_sub(self.last_position);
                self.velocity = delta as f32 / elapsed.as_secs_f32();
            }
        }
        self.last_position = position;
        self.last_time = Some(now);
        self.velocity
    }

    /// Most recently derived velocity.
    #[must_use]
    pub const fn last_velocity(&self) -> f32 {
        self.velocity
    }

    /// Moves the origin to the counter's current value.
    pub fn reset(&mut self) {
        self.origin = self.counter.snapshot();
        self.last_position = 0;
        self.last_time = None;
        self.velocity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MicrosInstant;

    const FORWARD: [(bool, bool); 4] = [(true, false), (true, true), (false, true), (false, false)];

    #[test]
    fn forward_cycle_counts_up() {
        let counter = PulseCounter::new();
        for (a, b) in FORWARD {
            counter.on_edge(a, b);
        }
        assert_eq!(counter.snapshot(), 4);
    }

    #[test]
    fn reverse_cycle_counts_down() {
        let counter = PulseCounter::new();
        for (a, b) in FORWARD.iter().rev().skip(1).chain(FORWARD.iter().rev().take(1)) {
            counter.on_edge(*a, *b);
        }
        assert_eq!(counter.snapshot(), -4);
    }

    #[test]
    fn double_transition_and_repeated_state_are_ignored() {
        let counter = PulseCounter::new();
        counter.on_edge(true, true);
        counter.on_edge(true, true);
        assert_eq!(counter.snapshot(), 0);
    }

    #[test]
    fn priming_avoids_a_spurious_first_step() {
        let counter = PulseCounter::new();
        counter.prime(true, true);
        counter.on_edge(false, true);
        assert_eq!(counter.snapshot(), 1);
    }

    #[test]
    fn bindings_keep_wheels_independent() {
        let left = PulseCounter::new();
        let right = PulseCounter::new();
        let left_binding = EdgeBinding::new(WheelSide::Left, &left);
        let right_binding = EdgeBinding::new(WheelSide::Right, &right);

        left_binding.on_edge(true, false);
        left_binding.on_edge(true, true);
        right_binding.on_edge(false, true);

        assert_eq!(left.snapshot(), 2);
        assert_eq!(right.snapshot(), -1);
        assert_eq!(left_binding.side(), WheelSide::Left);
    }

    #[test]
    fn velocity_is_pulled_from_snapshots() {
        let counter = PulseCounter::new();
        let mut encoder = WheelEncoder::new(&counter);

        assert!(encoder.velocity(MicrosInstant::from_millis(0)).abs() < f32::EPSILON);
        for (a, b) in FORWARD {
            counter.on_edge(a, b);
        }
        let velocity = encoder.velocity(MicrosInstant::from_millis(10));
        assert!((velocity - 400.0).abs() < 1e-3, "{velocity}");

        // Same instant again: previous velocity is reported.
        let repeat = encoder.velocity(MicrosInstant::from_millis(10));
        assert!((repeat - 400.0).abs() < 1e-3);
    }

    #[test]
    fn reset_moves_origin_without_clearing_counter() {
        let counter = PulseCounter::new();
        for (a, b) in FORWARD {
            counter.on_edge(a, b);
        }
        let mut encoder: WheelEncoder<'_, MicrosInstant> = WheelEncoder::new(&counter);
        assert_eq!(encoder.position(), 0);

        counter.on_edge(true, false);
        assert_eq!(encoder.position(), 1);

        encoder.reset();
        assert_eq!(encoder.position(), 0);
        assert_eq!(counter.snapshot(), 5);
    }
}
