#![no_std]

// Control logic for the two-wheeled balance controller.
//
// Everything here stays allocation free and portable so the STM32 firmware and
// the host emulator drive the exact same supervisor, estimator and command
// pipeline.

pub mod clock;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod estimator;
pub mod executor;
pub mod motor;
pub mod protocol;
pub mod scheduler;
pub mod supervisor;
pub mod telemetry;

pub use clock::{ControlInstant, MicrosInstant, PeriodTimer};
pub use config::{BalanceConfig, ConfigError, PidGains, WheelGeometry};
pub use encoder::{EdgeBinding, PulseCounter};
pub use supervisor::{CycleReport, CycleStatus, Supervisor, WheelChannel};
