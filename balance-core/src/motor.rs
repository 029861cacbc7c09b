//! Dual-enable H-bridge motor output.

use libm::{fabsf, roundf};

/// Abstraction over one BTS7960-style H-bridge channel.
///
/// The forward and reverse enables are mutually exclusive; [`MotorDriver`]
/// always releases one before asserting the other.
pub trait HBridge {
    fn set_forward_enable(&mut self, asserted: bool);

    fn set_reverse_enable(&mut self, asserted: bool);

    /// Writes the PWM compare value, `0..=max_duty()`.
    fn set_duty(&mut self, duty: u16);

    fn max_duty(&self) -> u16;
}

/// H-bridge that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopBridge;

impl NoopBridge {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HBridge for NoopBridge {
    fn set_forward_enable(&mut self, _: bool) {}

    fn set_reverse_enable(&mut self, _: bool) {}

    fn set_duty(&mut self, _: u16) {}

    fn max_duty(&self) -> u16 {
        u16::MAX
    }
}

/// Direction currently driven onto the bridge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Forward,
    Reverse,
    Stopped,
}

/// Converts signed speed commands into enable lines plus duty cycle.
#[derive(Debug)]
pub struct MotorDriver<B> {
    bridge: B,
    max_speed: f32,
    speed: f32,
}

impl<B> MotorDriver<B>
where
    B: HBridge,
{
    /// Wraps `bridge` and forces it into the stopped state.
    pub fn new(bridge: B, max_speed: f32) -> Self {
        let mut driver = Self {
            bridge,
            max_speed,
            speed: 0.0,
        };
        driver.stop();
        driver
    }

    /// Drives the motor at `speed` in `[-max, max]`; out-of-range input is clamped.
    ///
    /// Zero, and anything that is not a finite number, is a [`stop`](Self::stop).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() || speed == 0.0 {
            self.stop();
            return;
        }

        let speed = speed.clamp(-self.max_speed, self.max_speed);
        // A reversal starts from zero duty, never from the old magnitude.
        if speed * self.speed < 0.0 {
            self.bridge.set_duty(0);
        }
        if speed > 0.0 {
            self.bridge.set_reverse_enable(false);
            self.bridge.set_forward_enable(true);
        } else {
            self.bridge.set_forward_enable(false);
            self.bridge.set_reverse_enable(true);
        }

        let max_duty = self.bridge.max_duty();
        let duty = roundf(fabsf(speed) / self.max_speed * f32::from(max_duty));
        self.bridge.set_duty((duty as u16).min(max_duty));
        self.speed = speed;
    }

    /// Releases both enables and zeroes the duty cycle, whatever the prior state.
    pub fn stop(&mut self) {
        self.bridge.set_forward_enable(false);
        self.bridge.set_reverse_enable(false);
        self.bridge.set_duty(0);
        self.speed = 0.0;
    }

    /// Signed speed last applied after clamping.
    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.speed > 0.0 {
            Direction::Forward
        } else if self.speed < 0.0 {
            Direction::Reverse
        } else {
            Direction::Stopped
        }
    }

    #[must_use]
    pub const fn bridge(&self) -> &B {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Op {
        Forward(bool),
        Reverse(bool),
        Duty(u16),
    }

    #[derive(Default)]
    struct RecordingBridge {
        ops: Vec<Op, 32>,
        forward: bool,
        reverse: bool,
    }

    impl HBridge for RecordingBridge {
        fn set_forward_enable(&mut self, asserted: bool) {
            assert!(!(asserted && self.reverse), "both enables asserted");
            self.forward = asserted;
            self.ops.push(Op::Forward(asserted)).unwrap();
        }

        fn set_reverse_enable(&mut self, asserted: bool) {
            assert!(!(asserted && self.forward), "both enables asserted");
            self.reverse = asserted;
            self.ops.push(Op::Reverse(asserted)).unwrap();
        }

        fn set_duty(&mut self, duty: u16) {
            self.ops.push(Op::Duty(duty)).unwrap();
        }

        fn max_duty(&self) -> u16 {
            1_000
        }
    }

    fn driver() -> MotorDriver<RecordingBridge> {
        let mut driver = MotorDriver::new(RecordingBridge::default(), 255.0);
        driver.bridge.ops.clear();
        driver
    }

    #[test]
    fn forward_releases_reverse_before_asserting() {
        let mut motor = driver();
        motor.set_speed(127.5);

        assert_eq!(
            motor.bridge().ops.as_slice(),
            &[Op::Reverse(false), Op::Forward(true), Op::Duty(500)]
        );
        assert_eq!(motor.direction(), Direction::Forward);
    }

    #[test]
    fn direction_change_never_overlaps_enables() {
        let mut motor = driver();
        motor.set_speed(100.0);
        motor.set_speed(-100.0);

        assert!(!motor.bridge().forward);
        assert!(motor.bridge().reverse);
        assert_eq!(motor.direction(), Direction::Reverse);
    }

    #[test]
    fn reversal_zeroes_duty_before_swapping_enables() {
        let mut motor = driver();
        motor.set_speed(127.5);
        motor.bridge.ops.clear();

        motor.set_speed(-51.0);
        assert_eq!(
            motor.bridge().ops.as_slice(),
            &[
                Op::Duty(0),
                Op::Forward(false),
                Op::Reverse(true),
                Op::Duty(200)
            ]
        );

        motor.bridge.ops.clear();
        motor.set_speed(-102.0);
        assert_eq!(
            motor.bridge().ops.as_slice(),
            &[Op::Forward(false), Op::Reverse(true), Op::Duty(400)]
        );
    }

    #[test]
    fn clamps_to_max_speed() {
        let mut motor = driver();
        motor.set_speed(-900.0);

        assert!((motor.speed() + 255.0).abs() < f32::EPSILON);
        assert_eq!(motor.bridge().ops.last(), Some(&Op::Duty(1_000)));
    }

    #[test]
    fn zero_and_nan_are_stop() {
        let mut motor = driver();
        motor.set_speed(80.0);
        motor.set_speed(0.0);
        assert!(!motor.bridge().forward && !motor.bridge().reverse);
        assert_eq!(motor.bridge().ops.last(), Some(&Op::Duty(0)));

        motor.set_speed(80.0);
        motor.set_speed(f32::NAN);
        assert_eq!(motor.direction(), Direction::Stopped);
        assert_eq!(motor.bridge().ops.last(), Some(&Op::Duty(0)));
    }

    #[test]
    fn stop_is_unconditional() {
        let mut motor = driver();
        motor.stop();
        motor.stop();
        assert_eq!(
            motor.bridge().ops.as_slice(),
            &[
                Op::Forward(false),
                Op::Reverse(false),
                Op::Duty(0),
                Op::Forward(false),
                Op::Reverse(false),
                Op::Duty(0),
            ]
        );
    }
}
