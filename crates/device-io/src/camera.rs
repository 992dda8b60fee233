//! Camera access behind a small backend trait.
//!
//! The OpenCV backend is part of the default `with-opencv` feature. Builds with
//! `--no-default-features` get a backend whose every open attempt fails with
//! [`DeviceError::Unsupported`], for hosts without OpenCV.

use std::sync::Arc;

use crate::types::{DeviceError, Frame};

/// Opens cameras by zero-based device index.
pub trait CameraBackend: Send + Sync {
    fn open(&self, index: i32) -> Result<Box<dyn CameraDevice>, DeviceError>;
}

/// One open video source.
pub trait CameraDevice: Send {
    fn index(&self) -> i32;

    fn read_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Release the OS handle. Reads after a release fail.
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Parse a `/dev/videoX` style URI (or a bare index) into the device index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

/// Backend used by the server binary, chosen at compile time.
pub fn default_camera_backend() -> Arc<dyn CameraBackend> {
    #[cfg(feature = "with-opencv")]
    {
        Arc::new(opencv_backend::OpenCvBackend)
    }
    #[cfg(not(feature = "with-opencv"))]
    {
        Arc::new(UnsupportedCameraBackend)
    }
}

#[cfg(not(feature = "with-opencv"))]
struct UnsupportedCameraBackend;

#[cfg(not(feature = "with-opencv"))]
impl CameraBackend for UnsupportedCameraBackend {
    fn open(&self, index: i32) -> Result<Box<dyn CameraDevice>, DeviceError> {
        tracing::debug!("camera #{index} requested but OpenCV support is not compiled in");
        Err(DeviceError::Unsupported(
            "camera support not compiled in (rebuild with the `with-opencv` feature)".into(),
        ))
    }
}

#[cfg(feature = "with-opencv")]
mod opencv_backend {
    use chrono::Utc;
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use tracing::debug;

    use super::{CameraBackend, CameraDevice};
    use crate::types::{DeviceError, Frame, FrameFormat};

    pub(super) struct OpenCvBackend;

    impl CameraBackend for OpenCvBackend {
        fn open(&self, index: i32) -> Result<Box<dyn CameraDevice>, DeviceError> {
            let device = format!("camera #{index}");
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) => {
                        if cap
                            .is_opened()
                            .map_err(|err| DeviceError::open(&device, err))?
                        {
                            return Ok(Box::new(OpenCvCamera {
                                index,
                                cap,
                                scratch: Mat::default(),
                            }));
                        }
                    }
                    Err(err) => {
                        debug!("failed to open {device} with backend {backend}: {err}");
                    }
                }
            }
            Err(DeviceError::open(device, "device not found or busy"))
        }
    }

    struct OpenCvCamera {
        index: i32,
        cap: VideoCapture,
        scratch: Mat,
    }

    impl CameraDevice for OpenCvCamera {
        fn index(&self) -> i32 {
            self.index
        }

        fn read_frame(&mut self) -> Result<Frame, DeviceError> {
            let device = format!("camera #{}", self.index);
            let grabbed = self
                .cap
                .read(&mut self.scratch)
                .map_err(|err| DeviceError::read(&device, err))?;
            if !grabbed {
                return Err(DeviceError::read(&device, "no frame returned"));
            }
            let size = self
                .scratch
                .size()
                .map_err(|err| DeviceError::read(&device, err))?;
            if size.width <= 0 || size.height <= 0 {
                return Err(DeviceError::read(&device, "empty frame"));
            }
            if self.scratch.channels() != 3 {
                return Err(DeviceError::read(
                    &device,
                    format!("unexpected channel count {}", self.scratch.channels()),
                ));
            }
            let data = self
                .scratch
                .data_bytes()
                .map_err(|err| DeviceError::read(&device, err))?
                .to_vec();

            Ok(Frame {
                data,
                width: size.width as u32,
                height: size.height as u32,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            })
        }

        fn release(&mut self) -> Result<(), DeviceError> {
            self.cap
                .release()
                .map_err(|err| DeviceError::Io(std::io::Error::other(err.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_dev_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video3"), Some(3));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://cam/stream"), None);
    }

    #[cfg(feature = "with-opencv")]
    #[test]
    fn default_backend_is_opencv() {
        // Index far past any attached device: OpenCV answers "not found"
        // instead of the stub's "not compiled in".
        let backend = default_camera_backend();
        match backend.open(97) {
            Err(DeviceError::Open { device, .. }) => assert_eq!(device, "camera #97"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("camera #97 should not exist"),
        }
    }

    #[cfg(not(feature = "with-opencv"))]
    #[test]
    fn default_backend_reports_missing_support() {
        let backend = default_camera_backend();
        match backend.open(0) {
            Err(DeviceError::Unsupported(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("camera opened without OpenCV support"),
        }
    }
}
