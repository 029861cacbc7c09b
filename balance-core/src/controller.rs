//! PID balance loop with velocity and rotation setpoint overlay.
//!
//! The stabilizing computation runs every cycle in every mode. External motion
//! requests are added on top of its output and never replace it.

use libm::fabsf;

use crate::config::{BalanceConfig, PidGains};
use crate::estimator::OrientationSample;

/// Externally requested motion, both zero when neutral.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Setpoint {
    pub velocity: f32,
    pub rotation: f32,
}

impl Setpoint {
    pub const NEUTRAL: Self = Self {
        velocity: 0.0,
        rotation: 0.0,
    };

    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.velocity == 0.0 && self.rotation == 0.0
    }
}

/// Neutral means both setpoints are zero; the PID runs either way.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerMode {
    Neutral,
    Actuating,
}

/// Per-cycle breakdown kept for tuning telemetry.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PidTerms {
    pub error: f32,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub integral: f32,
}

impl PidTerms {
    #[must_use]
    pub fn output(&self) -> f32 {
        self.p + self.i + self.d
    }
}

/// Commanded speed for each wheel after rotation mixing.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WheelOutputs {
    pub left: f32,
    pub right: f32,
}

impl WheelOutputs {
    pub const STOPPED: Self = Self {
        left: 0.0,
        right: 0.0,
    };
}

#[derive(Clone, Debug)]
pub struct BalanceController {
    gains: PidGains,
    target_angle_deg: f32,
    integral_limit: f32,
    max_output: f32,
    fall_threshold_deg: f32,
    dt: f32,
    integral: f32,
    previous_error: f32,
    last_output: f32,
    terms: PidTerms,
    last_sample: Option<OrientationSample>,
    setpoint: Setpoint,
}

impl BalanceController {
    #[must_use]
    pub fn new(config: &BalanceConfig) -> Self {
        Self {
            gains: config.gains,
            target_angle_deg: config.target_angle_deg,
            integral_limit: config.integral_limit,
            max_output: config.max_output,
            fall_threshold_deg: config.fall_threshold_deg,
            dt: config.dt_seconds(),
            integral: 0.0,
            previous_error: 0.0,
            last_output: 0.0,
            terms: PidTerms::default(),
            last_sample: None,
            setpoint: Setpoint::NEUTRAL,
        }
    }

    /// Runs one PID step and returns the balance output before overlay or clamping.
    ///
    /// The derivative acts on the measured rate, so setpoint changes never
    /// produce a derivative kick.
    pub fn calculate_pid(&mut self, angle_deg: f32, rate_dps: f32) -> f32 {
        let error = angle_deg - self.target_angle_deg;
        let p = self.gains.kp * error;

        self.integral = (self.integral + error * self.dt)
            .clamp(-self.integral_limit, self.integral_limit);
        let i = self.gains.ki * self.integral;

        let d = -self.gains.kd * rate_dps;

        self.previous_error = error;
        self.terms = PidTerms {
            error,
            p,
            i,
            d,
            integral: self.integral,
        };
        p + i + d
    }

    /// Computes the combined output for one cycle.
    ///
    /// `_wheel_velocity` is accepted for a future feed-forward term and is
    /// currently ignored.
    pub fn update(&mut self, sample: &OrientationSample, _wheel_velocity: Option<f32>) -> f32 {
        self.observe(sample);
        let balance = self.calculate_pid(sample.angle_deg, sample.rate_dps);
        let total = self.clamp_output(balance + self.setpoint.velocity);
        self.last_output = total;
        total
    }

    /// Last balance output with the current velocity setpoint overlaid.
    ///
    /// Used on cycles without a fresh sample so a setpoint change still
    /// reaches the wheels.
    #[must_use]
    pub fn held_output(&self) -> f32 {
        self.clamp_output(self.terms.output() + self.setpoint.velocity)
    }

    /// Splits `total` across the wheels with the rotation setpoint applied differentially.
    #[must_use]
    pub fn mix(&self, total: f32) -> WheelOutputs {
        WheelOutputs {
            left: self.clamp_output(total + self.setpoint.rotation),
            right: self.clamp_output(total - self.setpoint.rotation),
        }
    }

    /// Records `sample` for fall detection without producing an output.
    pub fn observe(&mut self, sample: &OrientationSample) {
        self.last_sample = Some(*sample);
    }

    /// `true` while the last observed tilt is within the fall threshold.
    ///
    /// Nothing observed yet counts as not balanced.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.last_sample
            .is_some_and(|sample| fabsf(sample.angle_deg) <= self.fall_threshold_deg)
    }

    pub fn set_velocity(&mut self, velocity: f32) {
        self.setpoint.velocity = velocity;
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.setpoint.rotation = rotation;
    }

    /// Zeroes both setpoints; the integral is kept.
    pub fn set_neutral(&mut self) {
        self.setpoint = Setpoint::NEUTRAL;
    }

    /// Clears integral, previous error, last output and both setpoints.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.last_output = 0.0;
        self.terms = PidTerms::default();
        self.setpoint = Setpoint::NEUTRAL;
    }

    /// Replaces the gains and discards the accumulated error.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    /// Moves the balance zero point and discards the accumulated error.
    pub fn set_target_angle(&mut self, target_angle_deg: f32) {
        self.target_angle_deg = target_angle_deg;
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    #[must_use]
    pub const fn setpoint(&self) -> Setpoint {
        self.setpoint
    }

    #[must_use]
    pub fn mode(&self) -> ControllerMode {
        if self.setpoint.is_neutral() {
            ControllerMode::Neutral
        } else {
            ControllerMode::Actuating
        }
    }

    #[must_use]
    pub const fn gains(&self) -> PidGains {
        self.gains
    }

    #[must_use]
    pub const fn target_angle(&self) -> f32 {
        self.target_angle_deg
    }

    #[must_use]
    pub const fn integral(&self) -> f32 {
        self.integral
    }

    #[must_use]
    pub const fn previous_error(&self) -> f32 {
        self.previous_error
    }

    #[must_use]
    pub const fn terms(&self) -> PidTerms {
        self.terms
    }

    #[must_use]
    pub const fn last_output(&self) -> f32 {
        self.last_output
    }

    #[must_use]
    pub const fn last_sample(&self) -> Option<OrientationSample> {
        self.last_sample
    }

    fn clamp_output(&self, value: f32) -> f32 {
        value.clamp(-self.max_output, self.max_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(kp: f32, ki: f32, kd: f32) -> BalanceController {
        BalanceController::new(&BalanceConfig {
            gains: PidGains::new(kp, ki, kd),
            ..BalanceConfig::DEFAULT
        })
    }

    fn sample(angle_deg: f32, rate_dps: f32) -> OrientationSample {
        OrientationSample {
            angle_deg,
            rate_dps,
            valid: true,
            ..OrientationSample::default()
        }
    }

    #[test]
    fn proportional_only_output() {
        let mut pid = controller(40.0, 0.0, 0.0);
        let output = pid.calculate_pid(5.0, 0.0);
        assert!((output - 200.0).abs() < 1e-4);
    }

    #[test]
    fn derivative_acts_on_measured_rate() {
        let mut pid = controller(0.0, 0.0, 2.0);
        assert!((pid.calculate_pid(0.0, 10.0) + 20.0).abs() < 1e-4);

        // A target change moves the error but not the derivative term.
        pid.set_target_angle(3.0);
        let output = pid.calculate_pid(0.0, 0.0);
        assert!(output.abs() < 1e-6);
        assert!((pid.previous_error() + 3.0).abs() < 1e-6);
    }

    #[test]
    fn integral_is_clamped() {
        let mut pid = controller(0.0, 1.0, 0.0);
        for _ in 0..10_000 {
            pid.calculate_pid(40.0, 0.0);
            assert!(pid.integral().abs() <= 100.0);
        }
        assert!((pid.integral() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn velocity_setpoint_is_overlaid_and_clamped() {
        let mut pid = controller(40.0, 0.0, 0.0);
        pid.set_velocity(60.0);
        let total = pid.update(&sample(5.0, 0.0), None);
        assert!((total - 255.0).abs() < 1e-4);
        assert_eq!(pid.mode(), ControllerMode::Actuating);

        pid.set_velocity(-20.0);
        let total = pid.update(&sample(1.0, 0.0), Some(12.0));
        assert!((total - 20.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_is_mixed_differentially() {
        let mut pid = controller(40.0, 0.0, 0.0);
        pid.set_rotation(30.0);

        let outputs = pid.mix(100.0);
        assert!((outputs.left - 130.0).abs() < 1e-4);
        assert!((outputs.right - 70.0).abs() < 1e-4);

        let saturated = pid.mix(250.0);
        assert!((saturated.left - 255.0).abs() < 1e-4);
        assert!((saturated.right - 220.0).abs() < 1e-4);
    }

    #[test]
    fn fall_detection_uses_threshold() {
        let mut pid = controller(40.0, 0.0, 0.0);
        assert!(!pid.is_balanced());

        pid.observe(&sample(44.9, 0.0));
        assert!(pid.is_balanced());
        pid.observe(&sample(-45.1, 0.0));
        assert!(!pid.is_balanced());
    }

    #[test]
    fn neutral_keeps_integral_and_reset_clears_it() {
        let mut pid = controller(0.0, 1.0, 0.0);
        pid.set_velocity(10.0);
        pid.set_rotation(-5.0);
        pid.calculate_pid(10.0, 0.0);
        let integral = pid.integral();
        assert!(integral > 0.0);

        pid.set_neutral();
        assert!(pid.setpoint().is_neutral());
        assert!((pid.integral() - integral).abs() < f32::EPSILON);
        assert_eq!(pid.mode(), ControllerMode::Neutral);

        pid.set_velocity(10.0);
        pid.reset();
        assert!(pid.setpoint().is_neutral());
        assert!(pid.integral().abs() < f32::EPSILON);
        assert!(pid.last_output().abs() < f32::EPSILON);
    }

    #[test]
    fn gain_change_resets_accumulated_error() {
        let mut pid = controller(0.0, 1.0, 0.0);
        pid.calculate_pid(10.0, 0.0);
        pid.set_gains(PidGains::new(1.0, 2.0, 3.0));

        assert!(pid.integral().abs() < f32::EPSILON);
        assert!(pid.previous_error().abs() < f32::EPSILON);
        assert_eq!(pid.gains(), PidGains::new(1.0, 2.0, 3.0));
    }
}
