//! Monotonic time abstractions for the fixed-rate control loop.
//!
//! The core never reads a clock on its own. Callers hand in instants from
//! whatever monotonic source the target provides (`embassy_time::Instant` on the
//! MCU, a simulated clock on the host) wrapped as [`MicrosInstant`].

use core::ops::Add;
use core::time::Duration;

/// Trait implemented by monotonic instant wrappers used by the controller.
pub trait ControlInstant: Copy + Ord {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Microsecond resolution monotonic instant.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MicrosInstant(u64);

impl MicrosInstant {
    /// Instant at the start of the monotonic timeline.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000
    }
}

impl ControlInstant for MicrosInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for MicrosInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

/// Converts a loop frequency into its period, rounding down to whole microseconds.
#[must_use]
pub const fn period_from_hz(frequency_hz: u32) -> Duration {
    if frequency_hz == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(1_000_000 / frequency_hz as u64)
}

/// Fires once per elapsed control period.
///
/// The timer compares elapsed time against the period instead of sleeping, so
/// the caller stays free to service the serial link between ticks. A loop that
/// falls more than one full period behind is re-based on `now` rather than
/// replaying the missed ticks back to back.
#[derive(Copy, Clone, Debug)]
pub struct PeriodTimer<I> {
    period: Duration,
    next_due: Option<I>,
}

impl<I> PeriodTimer<I>
where
    I: ControlInstant + Add<Duration, Output = I>,
{
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    /// Returns the configured control period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Returns the instant at which the next tick becomes due, if armed.
    #[must_use]
    pub const fn next_due(&self) -> Option<I> {
        self.next_due
    }

    /// Returns `true` when a control period has elapsed at `now`.
    ///
    /// The very first poll always fires and arms the timer.
    pub fn poll(&mut self, now: I) -> bool {
        match self.next_due {
            None => {
                self.next_due = Some(now + self.period);
                true
            }
            Some(due) if now >= due => {
                let next = due + self.period;
                self.next_due = Some(if now >= next { now + self.period } else { next });
                true
            }
            Some(_) => false,
        }
    }

    /// Disarms the timer so the next poll fires immediately.
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> MicrosInstant {
        MicrosInstant::from_millis(value)
    }

    #[test]
    fn period_from_hz_matches_loop_rate() {
        assert_eq!(period_from_hz(100), Duration::from_millis(10));
        assert_eq!(period_from_hz(0), Duration::ZERO);
    }

    #[test]
    fn fires_once_per_period() {
        let mut timer = PeriodTimer::new(Duration::from_millis(10));

        assert!(timer.poll(ms(0)));
        assert!(!timer.poll(ms(3)));
        assert!(!timer.poll(ms(9)));
        assert!(timer.poll(ms(10)));
        assert!(!timer.poll(ms(10)));
        assert!(timer.poll(ms(21)));
        assert_eq!(timer.next_due(), Some(ms(30)));
    }

    #[test]
    fn rebases_after_a_long_stall() {
        let mut timer = PeriodTimer::new(Duration::from_millis(10));
        assert!(timer.poll(ms(0)));

        assert!(timer.poll(ms(55)));
        assert_eq!(timer.next_due(), Some(ms(65)));
        assert!(!timer.poll(ms(60)));
    }

    #[test]
    fn instant_addition_saturates() {
        let late = MicrosInstant::from_micros(u64::MAX - 5);
        assert_eq!(
            late + Duration::from_micros(10),
            MicrosInstant::from_micros(u64::MAX)
        );
        assert_eq!(
            ms(5).saturating_duration_since(ms(9)),
            Duration::ZERO
        );
    }
}
