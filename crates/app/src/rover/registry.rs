//! Enumeration of selectable serial ports and cameras.
//!
//! Camera probing opens each index, reads one frame and releases it again.
//! Results are advisory: a device may vanish or become busy before the
//! caller selects it.

use std::sync::Arc;

use device_io::{CameraBackend, DeviceError, SerialBackend};
use tracing::{debug, warn};

use crate::rover::sessions::CameraSession;

pub(crate) struct DeviceRegistry {
    serial: Arc<dyn SerialBackend>,
    camera: Arc<dyn CameraBackend>,
}

impl DeviceRegistry {
    pub(crate) fn new(serial: Arc<dyn SerialBackend>, camera: Arc<dyn CameraBackend>) -> Self {
        Self { serial, camera }
    }

    pub(crate) fn list_serial_ports(&self) -> Result<Vec<String>, DeviceError> {
        let mut ports = self.serial.list_ports()?;
        ports.sort();
        ports.dedup();
        Ok(ports)
    }

    /// Probe indices `0..max_probe`. The index held by `active` is reported
    /// without probing so the live session is never disturbed.
    pub(crate) fn list_camera_indices(
        &self,
        max_probe: i32,
        active: Option<&CameraSession>,
    ) -> Vec<i32> {
        let in_use = active.and_then(CameraSession::current_index);
        let mut available = Vec::new();
        for index in 0..max_probe.max(0) {
            if in_use == Some(index) {
                available.push(index);
                continue;
            }
            let mut device = match self.camera.open(index) {
                Ok(device) => device,
                Err(err) => {
                    debug!("camera #{index} not available: {err}");
                    continue;
                }
            };
            match device.read_frame() {
                Ok(_) => available.push(index),
                Err(err) => debug!("camera #{index} opened but produced no frame: {err}"),
            }
            if let Err(err) = device.release() {
                warn!("failed to release probed camera #{index}: {err}");
            }
        }
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rover::testing::{FakeCameraBackend, FakeSerialBackend};

    #[test]
    fn lists_sorted_unique_ports() {
        let serial = FakeSerialBackend::new(&["/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyUSB1"]);
        let registry = DeviceRegistry::new(serial, FakeCameraBackend::new(&[]));
        assert_eq!(
            registry.list_serial_ports().unwrap(),
            vec!["/dev/ttyACM0", "/dev/ttyUSB1"]
        );
    }

    #[test]
    fn probes_and_releases_each_live_camera() {
        let camera = FakeCameraBackend::new(&[0, 2, 7]);
        let registry = DeviceRegistry::new(FakeSerialBackend::new(&[]), camera.clone());

        assert_eq!(registry.list_camera_indices(5, None), vec![0, 2]);
        assert_eq!(
            camera.events(),
            vec![
                "open 0",
                "release 0",
                "open-failed 1",
                "open 2",
                "release 2",
                "open-failed 3",
                "open-failed 4"
            ]
        );
    }

    #[test]
    fn cameras_without_frames_are_skipped() {
        let camera = FakeCameraBackend::new(&[0]);
        camera.set_failing_reads(true);
        let registry = DeviceRegistry::new(FakeSerialBackend::new(&[]), camera.clone());

        assert!(registry.list_camera_indices(1, None).is_empty());
        assert_eq!(camera.events(), vec!["open 0", "release 0"]);
    }

    #[test]
    fn active_camera_is_reported_without_reopening() {
        let camera = FakeCameraBackend::new(&[0, 1]);
        let session = CameraSession::new(camera.clone());
        session.open(1).unwrap();
        let registry = DeviceRegistry::new(FakeSerialBackend::new(&[]), camera.clone());

        assert_eq!(registry.list_camera_indices(2, Some(&session)), vec![0, 1]);
        assert_eq!(camera.events(), vec!["open 1", "open 0", "release 0"]);
        assert_eq!(session.current_index(), Some(1));
    }
}
