//! Hardware edge of the rover: cameras, serial links and the inertial sensor.
//!
//! Every device family sits behind a trait so the control server can swap
//! real hardware for fakes in tests.

pub mod camera;
pub mod imu;
pub mod serial;
mod types;

pub use camera::{CameraBackend, CameraDevice, default_camera_backend, parse_device_index};
pub use imu::{
    DisconnectedImu, ImuReading, ImuSource, Mpu6050, RawImuSample, RegisterBus, decode_word,
    open_i2c_imu,
};
pub use serial::{
    SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT, SerialBackend, SerialLink, default_serial_backend,
};
pub use types::{DeviceError, Frame, FrameFormat};
