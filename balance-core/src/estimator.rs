//! Pitch estimation from accelerometer tilt and gyroscope rate.
//!
//! Axis convention: `x` points forward, `z` points up through the chassis, and
//! pitch is measured about the wheel axle. A positive angle means the body leans
//! forward, which is the direction the wheels must drive to catch it. A positive
//! gyro rate means the body is pitching forward. Sensor adapters are expected
//! to remap their native axes into this frame.

use core::fmt;

use libm::atan2f;

use crate::config::BalanceConfig;

/// One raw inertial sample in the chassis frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ImuReading {
    /// Specific force along each axis, in any consistent unit.
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    /// Pitch rate in degrees per second.
    pub gyro_pitch_dps: f32,
}

impl ImuReading {
    /// Tilt implied by the accelerometer alone, in degrees.
    #[must_use]
    pub fn accel_angle_deg(&self) -> f32 {
        atan2f(-self.accel_x, self.accel_z).to_degrees()
    }

    fn is_finite(&self) -> bool {
        self.accel_x.is_finite()
            && self.accel_y.is_finite()
            && self.accel_z.is_finite()
            && self.gyro_pitch_dps.is_finite()
    }
}

/// Source of raw inertial samples.
pub trait InertialSensor {
    type Error;

    /// Reads one sample.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the sensor cannot be read.
    fn read(&mut self) -> Result<ImuReading, Self::Error>;
}

/// Latest filtered orientation handed to the controller.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OrientationSample {
    /// Filtered pitch with the calibration offset removed, in degrees.
    pub angle_deg: f32,
    pub rate_dps: f32,
    pub offset_deg: f32,
    /// `false` when the last read failed; the angle must not be acted on.
    pub valid: bool,
    pub calibrated: bool,
}

/// Errors surfaced by [`OrientationEstimator::update`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EstimatorError<E> {
    Sensor(E),
    /// The sensor answered with NaN or infinite values.
    NonFinite,
}

impl<E: fmt::Debug> fmt::Display for EstimatorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorError::Sensor(err) => write!(f, "sensor read failed: {err:?}"),
            EstimatorError::NonFinite => f.write_str("sensor returned a non-finite sample"),
        }
    }
}

/// Progress of a calibration run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CalibrationState {
    Idle,
    Running { collected: u16, target: u16 },
    Complete { offset_deg: f32 },
    Failed,
}

/// Terminal result of a calibration run, latched until taken.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CalibrationOutcome {
    Completed { offset_deg: f32 },
    Failed,
}

/// Complementary filter over accelerometer tilt and integrated gyro rate.
#[derive(Clone, Debug)]
pub struct OrientationEstimator {
    alpha: f32,
    dt: f32,
    filtered_deg: Option<f32>,
    sample: OrientationSample,
    calibration: CalibrationState,
    calibration_sum: f32,
    pending_outcome: Option<CalibrationOutcome>,
}

impl OrientationEstimator {
    #[must_use]
    pub fn new(config: &BalanceConfig) -> Self {
        Self {
            alpha: config.filter_alpha,
            dt: config.dt_seconds(),
            filtered_deg: None,
            sample: OrientationSample::default(),
            calibration: CalibrationState::Idle,
            calibration_sum: 0.0,
            pending_outcome: None,
        }
    }

    /// Reads the sensor and advances the filter by one fixed control period.
    ///
    /// # Errors
    ///
    /// On a failed or non-finite read the sample is marked invalid and any
    /// running calibration is abandoned; the previous filtered angle is kept.
    pub fn update<S>(&mut self, sensor: &mut S) -> Result<OrientationSample, EstimatorError<S::Error>>
    where
        S: InertialSensor,
    {
        let reading = match sensor.read() {
            Ok(reading) if reading.is_finite() => reading,
            Ok(_) => {
                self.invalidate();
                return Err(EstimatorError::NonFinite);
            }
            Err(err) => {
                self.invalidate();
                return Err(EstimatorError::Sensor(err));
            }
        };

        let accel_angle = reading.accel_angle_deg();
        let filtered = match self.filtered_deg {
            // No gyro history yet, start from the accelerometer.
            None => accel_angle,
            Some(previous) => {
                self.alpha * (previous + reading.gyro_pitch_dps * self.dt)
                    + (1.0 - self.alpha) * accel_angle
            }
        };
        self.filtered_deg = Some(filtered);
        self.accumulate_calibration(filtered);

        self.sample = OrientationSample {
            angle_deg: filtered - self.sample.offset_deg,
            rate_dps: reading.gyro_pitch_dps,
            offset_deg: self.sample.offset_deg,
            valid: true,
            calibrated: self.sample.calibrated,
        };
        Ok(self.sample)
    }

    /// Starts averaging the next `samples` filtered angles into a new offset.
    ///
    /// Returns `false` if a run is already in progress or `samples` is zero.
    pub fn begin_calibration(&mut self, samples: u16) -> bool {
        if samples == 0 || self.is_calibrating() {
            return false;
        }
        self.calibration = CalibrationState::Running {
            collected: 0,
            target: samples,
        };
        self.calibration_sum = 0.0;
        self.pending_outcome = None;
        true
    }

    /// Runs a complete calibration in place, calling `pause` between reads.
    ///
    /// # Errors
    ///
    /// Returns the first read failure. The previous offset stays in effect.
    pub fn calibrate<S, F>(
        &mut self,
        sensor: &mut S,
        samples: u16,
        mut pause: F,
    ) -> Result<f32, EstimatorError<S::Error>>
    where
        S: InertialSensor,
        F: FnMut(),
    {
        if !self.begin_calibration(samples) {
            return Ok(self.sample.offset_deg);
        }
        loop {
            self.update(sensor)?;
            if let CalibrationState::Complete { offset_deg } = self.calibration {
                return Ok(offset_deg);
            }
            pause();
        }
    }

    #[must_use]
    pub const fn calibration(&self) -> CalibrationState {
        self.calibration
    }

    /// Samples collected and requested by the running calibration, if any.
    #[must_use]
    pub const fn calibration_progress(&self) -> Option<(u16, u16)> {
        match self.calibration {
            CalibrationState::Running { collected, target } => Some((collected, target)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_calibrating(&self) -> bool {
        matches!(self.calibration, CalibrationState::Running { .. })
    }

    /// Returns the outcome of the last finished run once.
    pub fn take_calibration_outcome(&mut self) -> Option<CalibrationOutcome> {
        self.pending_outcome.take()
    }

    #[must_use]
    pub const fn sample(&self) -> OrientationSample {
        self.sample
    }

    #[must_use]
    pub const fn offset(&self) -> f32 {
        self.sample.offset_deg
    }

    /// Replaces the zero offset; marks the estimator calibrated.
    pub fn set_offset(&mut self, offset_deg: f32) {
        self.sample.offset_deg = offset_deg;
        self.sample.calibrated = true;
        if let Some(filtered) = self.filtered_deg {
            self.sample.angle_deg = filtered - offset_deg;
        }
    }

    fn invalidate(&mut self) {
        self.sample.valid = false;
        if self.is_calibrating() {
            self.calibration = CalibrationState::Failed;
            self.pending_outcome = Some(CalibrationOutcome::Failed);
        }
    }

    fn accumulate_calibration(&mut self, filtered: f32) {
        let CalibrationState::Running { collected, target } = self.calibration else {
            return;
        };

        self.calibration_sum += filtered;
        let collected = collected + 1;
        if collected < target {
            self.calibration = CalibrationState::Running { collected, target };
            return;
        }

        let offset_deg = self.calibration_sum / f32::from(target);
        self.set_offset(offset_deg);
        self.calibration = CalibrationState::Complete { offset_deg };
        self.pending_outcome = Some(CalibrationOutcome::Completed { offset_deg });
    }
}
