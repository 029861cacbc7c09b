//! Board drivers behind the `balance-core` hardware traits.

mod bridge;
mod mpu6050;

pub use bridge::PwmBridge;
pub use mpu6050::Mpu6050;
