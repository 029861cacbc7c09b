//! Static configuration shared by every controller target.
//!
//! All tunables live in [`BalanceConfig`], a `Copy` value supplied once at
//! startup. Runtime changes go through the tuning commands, which update the
//! controller directly and never rewrite this struct.

use core::f32::consts::PI;
use core::fmt;
use core::time::Duration;

use crate::clock::period_from_hz;
use crate::scheduler::MAX_QUEUE_DEPTH;

/// Proportional, integral and derivative gains.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    #[must_use]
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Wheel and chassis dimensions used to turn encoder pulses into motion.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WheelGeometry {
    pub wheel_diameter_m: f32,
    pub wheelbase_m: f32,
    /// Counted quadrature edges per wheel revolution.
    pub pulses_per_revolution: u32,
}

impl WheelGeometry {
    /// Distance covered by the wheel rim per counted edge.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metres_per_pulse(&self) -> f32 {
        PI * self.wheel_diameter_m / self.pulses_per_revolution as f32
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pulses_to_metres(&self, pulses: i32) -> f32 {
        pulses as f32 * self.metres_per_pulse()
    }

    /// Chassis heading change implied by the two wheel positions.
    ///
    /// Clockwise (seen from above) is positive: the left wheel travelling
    /// further than the right one turns the chassis to the right.
    #[must_use]
    pub fn heading_change_deg(&self, left_pulses: i32, right_pulses: i32) -> f32 {
        let arc = self.pulses_to_metres(left_pulses.wrapping_sub(right_pulses));
        (arc / self.wheelbase_m).to_degrees()
    }
}

/// Tunables consumed by the estimator, controller, scheduler and supervisor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BalanceConfig {
    pub loop_frequency_hz: u32,
    pub gains: PidGains,
    /// Zero point of the balance error, in degrees.
    pub target_angle_deg: f32,
    /// Bound applied to the accumulated integral, in degree-seconds.
    pub integral_limit: f32,
    /// Largest magnitude accepted by the motor drivers.
    pub max_output: f32,
    /// Tilt beyond which the vehicle is considered fallen and actuation stops.
    pub fall_threshold_deg: f32,
    /// Tilt that raises a telemetry warning without changing actuation.
    pub tilt_warning_deg: f32,
    /// Complementary filter weight given to gyro integration.
    pub filter_alpha: f32,
    pub calibration_samples: u16,
    pub queue_capacity: usize,
    /// Consecutive sensor failures tolerated before the motors are stopped.
    pub sensor_fault_limit: u8,
    /// Speed fraction used when a motion command omits `speed`.
    pub default_speed: f32,
    /// Velocity setpoint corresponding to a speed fraction of 1.0.
    pub max_velocity_setpoint: f32,
    /// Rotation setpoint corresponding to a speed fraction of 1.0.
    pub max_rotation_setpoint: f32,
    pub geometry: WheelGeometry,
}

impl BalanceConfig {
    pub const DEFAULT: Self = Self {
        loop_frequency_hz: 100,
        gains: PidGains::new(40.0, 0.5, 2.0),
        target_angle_deg: 0.0,
        integral_limit: 100.0,
        max_output: 255.0,
        fall_threshold_deg: 45.0,
        tilt_warning_deg: 30.0,
        filter_alpha: 0.98,
        calibration_samples: 100,
        queue_capacity: 16,
        sensor_fault_limit: 10,
        default_speed: 0.4,
        max_velocity_setpoint: 120.0,
        max_rotation_setpoint: 80.0,
        geometry: WheelGeometry {
            wheel_diameter_m: 0.065,
            wheelbase_m: 0.17,
            pulses_per_revolution: 1_320,
        },
    };

    /// Fixed control period derived from the loop frequency.
    #[must_use]
    pub const fn control_period(&self) -> Duration {
        period_from_hz(self.loop_frequency_hz)
    }

    /// Control period in seconds, the `dt` used by the filter and the PID.
    #[must_use]
    pub fn dt_seconds(&self) -> f32 {
        self.control_period().as_secs_f32()
    }

    /// Checks that the configuration describes a runnable controller.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_frequency_hz == 0 || self.loop_frequency_hz > 1_000_000 {
            return Err(ConfigError::LoopFrequency(self.loop_frequency_hz));
        }

        let positive = [
            ("integral_limit", self.integral_limit),
            ("max_output", self.max_output),
            ("fall_threshold_deg", self.fall_threshold_deg),
            ("tilt_warning_deg", self.tilt_warning_deg),
            ("max_velocity_setpoint", self.max_velocity_setpoint),
            ("max_rotation_setpoint", self.max_rotation_setpoint),
            ("wheel_diameter_m", self.geometry.wheel_diameter_m),
            ("wheelbase_m", self.geometry.wheelbase_m),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive(field));
            }
        }

        let gains = [
            ("kp", self.gains.kp),
            ("ki", self.gains.ki),
            ("kd", self.gains.kd),
        ];
        for (field, value) in gains {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NegativeGain(field));
            }
        }

        if !(self.filter_alpha > 0.0 && self.filter_alpha < 1.0) {
            return Err(ConfigError::FilterAlpha);
        }
        if self.tilt_warning_deg >= self.fall_threshold_deg {
            return Err(ConfigError::WarningAboveFallThreshold);
        }
        if !(self.target_angle_deg.is_finite()
            && self.target_angle_deg > -self.fall_threshold_deg
            && self.target_angle_deg < self.fall_threshold_deg)
        {
            return Err(ConfigError::TargetAngle);
        }
        if !(self.default_speed >= 0.0 && self.default_speed <= 1.0) {
            return Err(ConfigError::DefaultSpeed);
        }
        if self.calibration_samples == 0 {
            return Err(ConfigError::CalibrationSamples);
        }
        if self.geometry.pulses_per_revolution == 0 {
            return Err(ConfigError::NotPositive("pulses_per_revolution"));
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_DEPTH {
            return Err(ConfigError::QueueCapacity {
                requested: self.queue_capacity,
                max: MAX_QUEUE_DEPTH,
            });
        }

        Ok(())
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors reported by [`BalanceConfig::validate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    LoopFrequency(u32),
    NotPositive(&'static str),
    NegativeGain(&'static str),
    FilterAlpha,
    WarningAboveFallThreshold,
    TargetAngle,
    DefaultSpeed,
    CalibrationSamples,
    QueueCapacity { requested: usize, max: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LoopFrequency(hz) => write!(f, "unsupported loop frequency {hz} Hz"),
            ConfigError::NotPositive(field) => write!(f, "`{field}` must be positive"),
            ConfigError::NegativeGain(field) => write!(f, "gain `{field}` must be non-negative"),
            ConfigError::FilterAlpha => f.write_str("filter alpha must lie in (0, 1)"),
            ConfigError::WarningAboveFallThreshold => {
                f.write_str("tilt warning must be below the fall threshold")
            }
            ConfigError::TargetAngle => f.write_str("target angle must be inside the fall threshold"),
            ConfigError::DefaultSpeed => f.write_str("default speed must lie in [0, 1]"),
            ConfigError::CalibrationSamples => f.write_str("calibration needs at least one sample"),
            ConfigError::QueueCapacity { requested, max } => {
                write!(f, "queue capacity {requested} outside 1..={max}")
            }
        }
    }
}

/// Side of the chassis a wheel is mounted on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WheelSide {
    Left,
    Right,
}

impl fmt::Display for WheelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WheelSide::Left => f.write_str("left"),
            WheelSide::Right => f.write_str("right"),
        }
    }
}

/// Board routing for one wheel: encoder inputs plus BTS7960-style H-bridge lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WheelWiring {
    pub side: WheelSide,
    pub encoder_a: &'static str,
    pub encoder_b: &'static str,
    pub pwm: &'static str,
    pub forward_enable: &'static str,
    pub reverse_enable: &'static str,
}

/// Board routing for the inertial sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImuWiring {
    pub scl: &'static str,
    pub sda: &'static str,
    pub address: u8,
}

pub const LEFT_WHEEL: WheelWiring = WheelWiring {
    side: WheelSide::Left,
    encoder_a: "PA0",
    encoder_b: "PA1",
    pwm: "PA6/TIM3_CH1",
    forward_enable: "PA4",
    reverse_enable: "PA5",
};

pub const RIGHT_WHEEL: WheelWiring = WheelWiring {
    side: WheelSide::Right,
    encoder_a: "PB4",
    encoder_b: "PB5",
    pwm: "PA7/TIM3_CH2",
    forward_enable: "PA2",
    reverse_enable: "PA3",
};

pub const IMU: ImuWiring = ImuWiring {
    scl: "PB6",
    sda: "PB7",
    address: 0x68,
};

/// Serial link speed for the command protocol.
pub const SERIAL_BAUD: u32 = 115_200;

/// Both wheels in chassis order.
pub const WHEELS: [WheelWiring; 2] = [LEFT_WHEEL, RIGHT_WHEEL];
