#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use balance_core::estimator::{ImuReading, InertialSensor};
use balance_core::motor::HBridge;
use balance_core::{BalanceConfig, MicrosInstant, PulseCounter, Supervisor, WheelChannel};

pub type TestSupervisor<'a> = Supervisor<'a, MockImu, RecordingBridge, MicrosInstant, 16>;

/// Shared handle used by a test to steer what the mock IMU reports.
#[derive(Clone, Default)]
pub struct ImuControl {
    reading: Rc<Cell<Option<ImuReading>>>,
}

impl ImuControl {
    pub fn new(angle_deg: f32) -> Self {
        let control = Self::default();
        control.set(angle_deg, 0.0);
        control
    }

    /// Reports a body tilt of `angle_deg` pitching at `rate_dps`.
    pub fn set(&self, angle_deg: f32, rate_dps: f32) {
        let radians = angle_deg.to_radians();
        self.reading.set(Some(ImuReading {
            accel_x: -radians.sin(),
            accel_y: 0.0,
            accel_z: radians.cos(),
            gyro_pitch_dps: rate_dps,
        }));
    }

    pub fn fail(&self) {
        self.reading.set(None);
    }

    pub fn sensor(&self) -> MockImu {
        MockImu {
            reading: Rc::clone(&self.reading),
        }
    }
}

pub struct MockImu {
    reading: Rc<Cell<Option<ImuReading>>>,
}

impl InertialSensor for MockImu {
    type Error = &'static str;

    fn read(&mut self) -> Result<ImuReading, Self::Error> {
        self.reading.get().ok_or("bus timeout")
    }
}

/// H-bridge that records its pins and flags any overlap of the two enables.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    pub forward: bool,
    pub reverse: bool,
    pub duty: u16,
    pub overlap_seen: bool,
}

impl RecordingBridge {
    fn check(&mut self) {
        self.overlap_seen |= self.forward && self.reverse;
    }
}

impl HBridge for RecordingBridge {
    fn set_forward_enable(&mut self, asserted: bool) {
        self.forward = asserted;
        self.check();
    }

    fn set_reverse_enable(&mut self, asserted: bool) {
        self.reverse = asserted;
        self.check();
    }

    fn set_duty(&mut self, duty: u16) {
        self.duty = duty;
    }

    fn max_duty(&self) -> u16 {
        1_000
    }
}

pub fn at(ms: u64) -> MicrosInstant {
    MicrosInstant::from_millis(ms)
}

pub fn supervisor<'a>(
    config: BalanceConfig,
    imu: &ImuControl,
    left: &'a PulseCounter,
    right: &'a PulseCounter,
) -> TestSupervisor<'a> {
    Supervisor::new(
        config,
        imu.sensor(),
        WheelChannel::new(left, RecordingBridge::default()),
        WheelChannel::new(right, RecordingBridge::default()),
    )
    .expect("valid config")
}

/// Feeds a whole line and returns every response it produced, as JSON text.
pub fn send(supervisor: &mut TestSupervisor<'_>, line: &str, now: MicrosInstant) -> Vec<String> {
    line.bytes()
        .chain(std::iter::once(b'\n'))
        .filter_map(|byte| supervisor.ingest(byte, now))
        .map(|response| response.to_line().expect("response fits").as_str().to_owned())
        .collect()
}

const PHASES: [(bool, bool); 4] = [(false, false), (true, false), (true, true), (false, true)];

/// Emits `edges` quadrature edges, forward when positive.
///
/// Assumes the counter started at rest in state `00` and is only driven here.
pub fn turn_wheel(counter: &PulseCounter, edges: i32) {
    let step = edges.signum();
    for _ in 0..edges.unsigned_abs() {
        let next = (counter.snapshot() + step).rem_euclid(4);
        let (a, b) = PHASES[next as usize];
        counter.on_edge(a, b);
    }
}
