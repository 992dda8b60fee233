use std::io;

use thiserror::Error;

/// Raw frame captured from a camera. Pixels are tightly packed rows.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
        }
    }
}

impl Frame {
    /// Number of bytes a frame of this geometry must carry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Bad identifier, busy device or missing permission.
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("no device connected")]
    NotConnected,
    #[error("read from {device} failed: {reason}")]
    Read { device: String, reason: String },
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DeviceError {
    pub fn open(device: impl Into<String>, reason: impl ToString) -> Self {
        DeviceError::Open {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read(device: impl Into<String>, reason: impl ToString) -> Self {
        DeviceError::Read {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}
