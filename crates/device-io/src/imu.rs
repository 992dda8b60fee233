//! MPU-6050 inertial sensor access over a register bus.
//!
//! Each axis is a big-endian register pair. Counts are converted with the
//! power-on full-scale ranges: ±2 g (16384 LSB/g) and ±250 °/s (131 LSB/°/s).

use serde::Serialize;

use crate::types::DeviceError;

pub const MPU6050_ADDRESS: u16 = 0x68;
pub const PWR_MGMT_1: u8 = 0x6B;
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const GYRO_XOUT_H: u8 = 0x43;
pub const WHO_AM_I: u8 = 0x75;
/// Identity register content; fixed regardless of the AD0 address pin.
pub const MPU6050_IDENTITY: u8 = 0x68;

pub const ACCEL_LSB_PER_G: f64 = 16384.0;
pub const GYRO_LSB_PER_DPS: f64 = 131.0;

/// Byte-wide register access on a single bus device.
pub trait RegisterBus: Send {
    fn read_register(&mut self, register: u8) -> Result<u8, DeviceError>;

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), DeviceError>;
}

/// Source of raw inertial samples.
pub trait ImuSource: Send {
    /// Bring the sensor out of sleep. Called once per scan session.
    fn wake(&mut self) -> Result<(), DeviceError>;

    fn read_sample(&mut self) -> Result<RawImuSample, DeviceError>;
}

/// Signed counts for the three accelerometer and three gyroscope axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawImuSample {
    pub accel: [i32; 3],
    pub gyro: [i32; 3],
}

/// Physical-unit reading published to telemetry consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ImuReading {
    #[serde(rename = "Ax")]
    pub ax: f64,
    #[serde(rename = "Ay")]
    pub ay: f64,
    #[serde(rename = "Az")]
    pub az: f64,
    #[serde(rename = "Gx")]
    pub gx: f64,
    #[serde(rename = "Gy")]
    pub gy: f64,
    #[serde(rename = "Gz")]
    pub gz: f64,
}

impl ImuReading {
    pub fn from_raw(raw: &RawImuSample) -> Self {
        let accel = |count: i32| round2(count as f64 / ACCEL_LSB_PER_G);
        let gyro = |count: i32| round2(count as f64 / GYRO_LSB_PER_DPS);
        Self {
            ax: accel(raw.accel[0]),
            ay: accel(raw.accel[1]),
            az: accel(raw.accel[2]),
            gx: gyro(raw.gyro[0]),
            gy: gyro(raw.gyro[1]),
            gz: gyro(raw.gyro[2]),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Combine a register pair into a signed count.
///
/// Only values strictly above 32768 are folded negative; 0x8000 itself stays
/// positive. Deployed firmware and dashboards depend on this exact boundary.
pub fn decode_word(high: u8, low: u8) -> i32 {
    let value = ((high as i32) << 8) | low as i32;
    if value > 32768 { value - 65536 } else { value }
}

/// MPU-6050 driver over any [`RegisterBus`].
pub struct Mpu6050<B> {
    bus: B,
}

impl<B: RegisterBus> Mpu6050<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Wrap `bus` after checking the identity register, so a missing or
    /// foreign device is reported once at open time.
    pub fn identify(mut bus: B) -> Result<Self, DeviceError> {
        let identity = bus
            .read_register(WHO_AM_I)
            .map_err(|err| DeviceError::open("MPU-6050", err))?;
        if identity != MPU6050_IDENTITY {
            return Err(DeviceError::open(
                "MPU-6050",
                format!("WHO_AM_I reads {identity:#04x}, expected {MPU6050_IDENTITY:#04x}"),
            ));
        }
        Ok(Self { bus })
    }

    fn read_word(&mut self, register: u8) -> Result<i32, DeviceError> {
        let high = self.bus.read_register(register)?;
        let low = self.bus.read_register(register + 1)?;
        Ok(decode_word(high, low))
    }
}

impl<B: RegisterBus> ImuSource for Mpu6050<B> {
    fn wake(&mut self) -> Result<(), DeviceError> {
        self.bus.write_register(PWR_MGMT_1, 0)
    }

    fn read_sample(&mut self) -> Result<RawImuSample, DeviceError> {
        let mut sample = RawImuSample::default();
        for axis in 0..3u8 {
            sample.accel[axis as usize] = self.read_word(ACCEL_XOUT_H + axis * 2)?;
        }
        for axis in 0..3u8 {
            sample.gyro[axis as usize] = self.read_word(GYRO_XOUT_H + axis * 2)?;
        }
        Ok(sample)
    }
}

/// Stand-in used when the sensor bus could not be opened at start-up.
/// Every read fails, so a running scan simply never publishes.
pub struct DisconnectedImu {
    reason: String,
}

impl DisconnectedImu {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ImuSource for DisconnectedImu {
    fn wake(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::read("imu", &self.reason))
    }

    fn read_sample(&mut self) -> Result<RawImuSample, DeviceError> {
        Err(DeviceError::read("imu", &self.reason))
    }
}

/// Open an MPU-6050 on a Linux I²C character device such as `/dev/i2c-1`.
#[cfg(target_os = "linux")]
pub fn open_i2c_imu(path: &str, address: u16) -> Result<Box<dyn ImuSource>, DeviceError> {
    let bus = linux::LinuxRegisterBus::open(path, address)?;
    Ok(Box::new(Mpu6050::identify(bus)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open_i2c_imu(path: &str, _address: u16) -> Result<Box<dyn ImuSource>, DeviceError> {
    Err(DeviceError::Unsupported(format!(
        "I2C bus {path} is only available on Linux"
    )))
}

#[cfg(target_os = "linux")]
mod linux {
    use i2cdev::{core::I2CDevice, linux::LinuxI2CDevice};

    use super::RegisterBus;
    use crate::types::DeviceError;

    pub(super) struct LinuxRegisterBus {
        path: String,
        device: LinuxI2CDevice,
    }

    impl LinuxRegisterBus {
        pub(super) fn open(path: &str, address: u16) -> Result<Self, DeviceError> {
            let device = LinuxI2CDevice::new(path, address)
                .map_err(|err| DeviceError::open(format!("{path}@{address:#04x}"), err))?;
            Ok(Self {
                path: path.to_string(),
                device,
            })
        }
    }

    impl RegisterBus for LinuxRegisterBus {
        fn read_register(&mut self, register: u8) -> Result<u8, DeviceError> {
            self.device
                .smbus_read_byte_data(register)
                .map_err(|err| DeviceError::read(&self.path, err))
        }

        fn write_register(&mut self, register: u8, value: u8) -> Result<(), DeviceError> {
            self.device
                .smbus_write_byte_data(register, value)
                .map_err(|err| DeviceError::read(&self.path, err))
        }
    }
}
