//! MPU6050 register map and sample decoding.
//!
//! The bus transfers live in `hw::mpu6050`; everything here is plain data so
//! the scaling and axis mapping can be checked on the host.

use core::fmt;

use balance_core::config::IMU;
use balance_core::estimator::ImuReading;

pub const ADDRESS: u8 = IMU.address;

pub const REG_SMPLRT_DIV: u8 = 0x19;
pub const REG_CONFIG: u8 = 0x1A;
pub const REG_GYRO_CONFIG: u8 = 0x1B;
pub const REG_ACCEL_CONFIG: u8 = 0x1C;
pub const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub const REG_PWR_MGMT_1: u8 = 0x6B;
pub const REG_WHO_AM_I: u8 = 0x75;

/// Value reported by `WHO_AM_I` on a genuine part.
pub const IDENTITY: u8 = 0x68;

/// Accelerometer, temperature and gyro registers read in one burst.
pub const SAMPLE_LEN: usize = 14;

/// LSB per g at the ±2 g full-scale range.
pub const ACCEL_LSB_PER_G: f32 = 16_384.0;

/// LSB per degree per second at the ±250 dps full-scale range.
pub const GYRO_LSB_PER_DPS: f32 = 131.0;

/// Register writes applied after the identity check, in order.
///
/// Wakes the part on the X gyro PLL, enables the 44 Hz DLPF, samples at
/// 100 Hz (1 kHz / (1 + 9)) and selects the ±250 dps / ±2 g ranges.
pub const INIT_SEQUENCE: [(u8, u8); 5] = [
    (REG_PWR_MGMT_1, 0x01),
    (REG_CONFIG, 0x03),
    (REG_SMPLRT_DIV, 9),
    (REG_GYRO_CONFIG, 0x00),
    (REG_ACCEL_CONFIG, 0x00),
];

/// Start-up failure of the inertial sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImuError<E> {
    Bus(E),
    /// `WHO_AM_I` answered with something other than [`IDENTITY`].
    Identity(u8),
}

impl<E: fmt::Debug> fmt::Display for ImuError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImuError::Bus(err) => write!(f, "bus error: {err:?}"),
            ImuError::Identity(found) => {
                write!(f, "unexpected WHO_AM_I 0x{found:02x} (want 0x{IDENTITY:02x})")
            }
        }
    }
}

/// Checks the `WHO_AM_I` answer.
///
/// # Errors
///
/// Returns [`ImuError::Identity`] with the value read when it does not match.
pub fn check_identity<E>(who_am_i: u8) -> Result<(), ImuError<E>> {
    if who_am_i == IDENTITY {
        Ok(())
    } else {
        Err(ImuError::Identity(who_am_i))
    }
}

fn word(raw: &[u8; SAMPLE_LEN], offset: usize) -> f32 {
    f32::from(i16::from_be_bytes([raw[offset], raw[offset + 1]]))
}

/// Scales one burst read starting at `ACCEL_XOUT_H` into the chassis frame.
///
/// The board mounts the part with X forward, Y toward the left wheel and Z
/// up, so a forward pitch is a positive rotation about Y.
#[must_use]
pub fn decode_sample(raw: &[u8; SAMPLE_LEN]) -> ImuReading {
    // Bytes 6..8 hold the die temperature.
    ImuReading {
        accel_x: word(raw, 0) / ACCEL_LSB_PER_G,
        accel_y: word(raw, 2) / ACCEL_LSB_PER_G,
        accel_z: word(raw, 4) / ACCEL_LSB_PER_G,
        gyro_pitch_dps: word(raw, 10) / GYRO_LSB_PER_DPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(accel: [i16; 3], gyro: [i16; 3]) -> [u8; SAMPLE_LEN] {
        let mut raw = [0u8; SAMPLE_LEN];
        for (index, value) in accel.iter().enumerate() {
            raw[index * 2..index * 2 + 2].copy_from_slice(&value.to_be_bytes());
        }
        raw[6..8].copy_from_slice(&0x1234_i16.to_be_bytes());
        for (index, value) in gyro.iter().enumerate() {
            let offset = 8 + index * 2;
            raw[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        }
        raw
    }

    #[test]
    fn level_board_reads_one_g_up() {
        let reading = decode_sample(&burst([0, 0, 16_384], [0, 0, 0]));
        assert_eq!(reading.accel_z, 1.0);
        assert_eq!(reading.accel_x, 0.0);
        assert_eq!(reading.gyro_pitch_dps, 0.0);
        assert!(reading.accel_angle_deg().abs() < 1e-6);
    }

    #[test]
    fn pitch_rate_comes_from_the_y_gyro() {
        let reading = decode_sample(&burst([0, 0, 16_384], [-500, 262, 999]));
        assert_eq!(reading.gyro_pitch_dps, 2.0);
    }

    #[test]
    fn forward_lean_gives_positive_angle() {
        // 30 degrees forward: x sees -sin(30) g, z sees cos(30) g.
        let reading = decode_sample(&burst([-8_192, 0, 14_189], [0, 0, 0]));
        let angle = reading.accel_angle_deg();
        assert!((angle - 30.0).abs() < 0.01, "angle was {angle}");
    }

    #[test]
    fn negative_full_scale_decodes() {
        let reading = decode_sample(&burst([i16::MIN, 0, 0], [0, i16::MIN, 0]));
        assert_eq!(reading.accel_x, -2.0);
        assert!((reading.gyro_pitch_dps + 250.137).abs() < 1e-3);
    }

    #[test]
    fn identity_check_reports_what_it_found() {
        assert_eq!(check_identity::<()>(IDENTITY), Ok(()));
        let err = check_identity::<()>(0x70).unwrap_err();
        assert_eq!(err, ImuError::Identity(0x70));
        assert!(err.to_string().contains("0x70"));
    }
}
