use balance_core::estimator::{ImuReading, InertialSensor};
use embassy_stm32::i2c::{Error as I2cError, I2c};
use embassy_stm32::mode::Blocking;

use crate::imu::{self, ImuError};

/// MPU6050 on a blocking I2C bus.
///
/// A full sample is one 14 byte burst, well inside a 10 ms control period at
/// 400 kHz, so the control task reads it inline.
pub struct Mpu6050 {
    i2c: I2c<'static, Blocking>,
}

impl Mpu6050 {
    /// Verifies the part identity and applies [`imu::INIT_SEQUENCE`].
    pub fn init(mut i2c: I2c<'static, Blocking>) -> Result<Self, ImuError<I2cError>> {
        let mut identity = [0u8; 1];
        i2c.blocking_write_read(imu::ADDRESS, &[imu::REG_WHO_AM_I], &mut identity)
            .map_err(ImuError::Bus)?;
        imu::check_identity(identity[0])?;

        for (register, value) in imu::INIT_SEQUENCE {
            i2c.blocking_write(imu::ADDRESS, &[register, value])
                .map_err(ImuError::Bus)?;
        }

        Ok(Self { i2c })
    }
}

impl InertialSensor for Mpu6050 {
    type Error = I2cError;

    fn read(&mut self) -> Result<ImuReading, Self::Error> {
        let mut raw = [0u8; imu::SAMPLE_LEN];
        self.i2c
            .blocking_write_read(imu::ADDRESS, &[imu::REG_ACCEL_XOUT_H], &mut raw)?;
        Ok(imu::decode_sample(&raw))
    }
}
