//! Simulated chassis: an inverted pendulum riding on two torque-driven wheels.

use std::f32::consts::PI;
use std::fmt;
use std::time::Duration;

use balance_core::EdgeBinding;
use balance_core::WheelGeometry;
use balance_core::estimator::{ImuReading, InertialSensor};
use balance_core::motor::HBridge;

const GRAVITY: f32 = 9.81;

/// Physical constants of the simulated robot.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlantParams {
    /// Height of the centre of mass above the axle.
    pub com_height_m: f32,
    /// Wheel acceleration at full duty.
    pub max_wheel_accel: f32,
    pub max_wheel_speed: f32,
    /// Viscous damping on the pitch axis, per second.
    pub pitch_damping: f32,
    /// Tilt at which the chassis rests on the ground.
    pub ground_angle_deg: f32,
}

impl PlantParams {
    pub const DEFAULT: Self = Self {
        com_height_m: 0.3,
        max_wheel_accel: 2.0,
        max_wheel_speed: 3.0,
        pitch_damping: 10.0,
        ground_angle_deg: 85.0,
    };
}

#[derive(Copy, Clone, Debug, Default)]
struct Wheel {
    speed: f32,
    travel_m: f32,
    emitted_edges: i64,
}

/// Rigid-body state advanced with semi-implicit Euler steps.
#[derive(Clone, Debug)]
pub struct Plant {
    params: PlantParams,
    geometry: WheelGeometry,
    pitch_rad: f32,
    pitch_rate: f32,
    wheels: [Wheel; 2],
    lying: bool,
}

impl Plant {
    #[must_use]
    pub fn new(params: PlantParams, geometry: WheelGeometry, tilt_deg: f32) -> Self {
        let mut plant = Self {
            params,
            geometry,
            pitch_rad: 0.0,
            pitch_rate: 0.0,
            wheels: [Wheel::default(); 2],
            lying: false,
        };
        plant.set_tilt(tilt_deg);
        plant
    }

    /// Places the chassis at `tilt_deg`, at rest; lifts it off the ground if lying.
    pub fn set_tilt(&mut self, tilt_deg: f32) {
        let limit = self.params.ground_angle_deg;
        self.pitch_rad = tilt_deg.clamp(-limit, limit).to_radians();
        self.pitch_rate = 0.0;
        self.lying = tilt_deg.abs() >= limit;
    }

    /// Adds `rate_dps` of pitch rate, as a shove on the chassis would.
    pub fn push(&mut self, rate_dps: f32) {
        if !self.lying {
            self.pitch_rate += rate_dps.to_radians();
        }
    }

    /// Advances by `dt` with each wheel driven at a signed duty fraction.
    ///
    /// Returns the whole quadrature edges each wheel produced during the step.
    #[allow(clippy::cast_possible_truncation)]
    pub fn step(&mut self, dt: Duration, drive: [f32; 2]) -> [i32; 2] {
        let dt = dt.as_secs_f32();
        if dt <= 0.0 || self.lying {
            return [0, 0];
        }

        let mut accel = 0.0;
        for (wheel, duty) in self.wheels.iter_mut().zip(drive) {
            let limit = self.params.max_wheel_speed;
            let speed = (wheel.speed + duty.clamp(-1.0, 1.0) * self.params.max_wheel_accel * dt)
                .clamp(-limit, limit);
            accel += (speed - wheel.speed) / dt / 2.0;
            wheel.speed = speed;
            wheel.travel_m += speed * dt;
        }

        let (sin, cos) = self.pitch_rad.sin_cos();
        let pitch_accel = (GRAVITY * sin - accel * cos) / self.params.com_height_m
            - self.params.pitch_damping * self.pitch_rate;
        self.pitch_rate += pitch_accel * dt;
        self.pitch_rad += self.pitch_rate * dt;

        let ground = self.params.ground_angle_deg.to_radians();
        if self.pitch_rad.abs() >= ground {
            self.pitch_rad = ground.copysign(self.pitch_rad);
            self.pitch_rate = 0.0;
            self.lying = true;
            for wheel in &mut self.wheels {
                wheel.speed = 0.0;
            }
        }

        let edges_per_metre = 1.0 / self.geometry.metres_per_pulse();
        let mut edges = [0; 2];
        for (wheel, out) in self.wheels.iter_mut().zip(&mut edges) {
            let total = (wheel.travel_m * edges_per_metre).floor() as i64;
            *out = i32::try_from(total - wheel.emitted_edges).unwrap_or(0);
            wheel.emitted_edges = total;
        }
        edges
    }

    /// What an ideal IMU strapped to the chassis reads right now, in g and dps.
    #[must_use]
    pub fn reading(&self) -> ImuReading {
        let (sin, cos) = self.pitch_rad.sin_cos();
        ImuReading {
            accel_x: -sin,
            accel_y: 0.0,
            accel_z: cos,
            gyro_pitch_dps: self.pitch_rate.to_degrees(),
        }
    }

    #[must_use]
    pub fn pitch_deg(&self) -> f32 {
        self.pitch_rad.to_degrees()
    }

    #[must_use]
    pub fn pitch_rate_dps(&self) -> f32 {
        self.pitch_rate.to_degrees()
    }

    #[must_use]
    pub fn wheel_speeds(&self) -> [f32; 2] {
        [self.wheels[0].speed, self.wheels[1].speed]
    }

    /// Chassis heading from wheel travel, clockwise positive.
    #[must_use]
    pub fn heading_deg(&self) -> f32 {
        let arc = self.wheels[0].travel_m - self.wheels[1].travel_m;
        (arc / self.geometry.wheelbase_m) * 180.0 / PI
    }

    #[must_use]
    pub const fn is_lying(&self) -> bool {
        self.lying
    }
}

/// Forward sequence of the A/B line levels.
const QUADRATURE: [(bool, bool); 4] = [(false, false), (true, false), (true, true), (false, true)];

/// Replays plant wheel motion as quadrature edges into a counter.
#[derive(Debug)]
pub struct QuadratureOutput<'a> {
    binding: EdgeBinding<'a>,
    phase: usize,
}

impl<'a> QuadratureOutput<'a> {
    #[must_use]
    pub fn new(binding: EdgeBinding<'a>) -> Self {
        let (a, b) = QUADRATURE[0];
        binding.prime(a, b);
        Self { binding, phase: 0 }
    }

    /// Emits `edges` single-line transitions, forward when positive.
    pub fn emit(&mut self, edges: i32) {
        for _ in 0..edges.unsigned_abs() {
            self.phase = if edges > 0 {
                (self.phase + 1) % QUADRATURE.len()
            } else {
                (self.phase + QUADRATURE.len() - 1) % QUADRATURE.len()
            };
            let (a, b) = QUADRATURE[self.phase];
            self.binding.on_edge(a, b);
        }
    }
}

/// Bus error reported while a fault is injected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InjectedFault;

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("injected bus fault")
    }
}

/// IMU fed from the plant, with a countdown of reads that should fail.
#[derive(Clone, Debug, Default)]
pub struct SimImu {
    reading: ImuReading,
    failures_pending: u32,
}

impl SimImu {
    pub fn present(&mut self, reading: ImuReading) {
        self.reading = reading;
    }

    /// Fails the next `reads` reads.
    pub fn inject_failures(&mut self, reads: u32) {
        self.failures_pending = reads;
    }

    #[must_use]
    pub const fn failures_pending(&self) -> u32 {
        self.failures_pending
    }
}

impl InertialSensor for SimImu {
    type Error = InjectedFault;

    fn read(&mut self) -> Result<ImuReading, Self::Error> {
        if self.failures_pending > 0 {
            self.failures_pending -= 1;
            return Err(InjectedFault);
        }
        Ok(self.reading)
    }
}

/// H-bridge whose pin state the plant turns back into a drive fraction.
#[derive(Clone, Debug)]
pub struct SimBridge {
    forward: bool,
    reverse: bool,
    duty: u16,
}

impl SimBridge {
    pub const MAX_DUTY: u16 = 1_000;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            forward: false,
            reverse: false,
            duty: 0,
        }
    }

    /// Signed duty fraction; zero unless exactly one enable is asserted.
    #[must_use]
    pub fn drive(&self) -> f32 {
        let magnitude = f32::from(self.duty) / f32::from(Self::MAX_DUTY);
        match (self.forward, self.reverse) {
            (true, false) => magnitude,
            (false, true) => -magnitude,
            _ => 0.0,
        }
    }
}

impl Default for SimBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HBridge for SimBridge {
    fn set_forward_enable(&mut self, asserted: bool) {
        self.forward = asserted;
    }

    fn set_reverse_enable(&mut self, asserted: bool) {
        self.reverse = asserted;
    }

    fn set_duty(&mut self, duty: u16) {
        self.duty = duty.min(Self::MAX_DUTY);
    }

    fn max_duty(&self) -> u16 {
        Self::MAX_DUTY
    }
}
