//! Exclusive ownership of the active serial link and camera.
//!
//! Each session holds at most one open handle. Opening a new device always
//! closes the previous one first, and a failed open leaves the session empty.
//! Concurrent opens serialize on the session lock; the last caller wins.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use device_io::{
    CameraBackend, CameraDevice, DeviceError, Frame, SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT,
    SerialBackend, SerialLink,
};
use tracing::{info, warn};

pub(crate) struct SerialSession {
    backend: Arc<dyn SerialBackend>,
    active: Mutex<Option<Box<dyn SerialLink>>>,
}

impl SerialSession {
    pub(crate) fn new(backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active port with `port`.
    pub(crate) fn open(&self, port: &str) -> Result<(), DeviceError> {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            close_link(previous);
        }

        let available = self
            .backend
            .list_ports()
            .map_err(|err| DeviceError::open(port, err))?;
        if !available.iter().any(|candidate| candidate == port) {
            return Err(DeviceError::open(port, "not an available serial port"));
        }

        let link = self
            .backend
            .open(port, SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT)?;
        info!("opened serial port {port} at {SERIAL_BAUD_RATE} baud");
        *active = Some(link);
        Ok(())
    }

    /// Close the active port. Returns whether one was open.
    pub(crate) fn close(&self) -> bool {
        match self.lock().take() {
            Some(link) => {
                close_link(link);
                true
            }
            None => false,
        }
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> Result<(), DeviceError> {
        match self.lock().as_mut() {
            Some(link) => link.write_all(bytes),
            None => Err(DeviceError::NotConnected),
        }
    }

    pub(crate) fn port_name(&self) -> Option<String> {
        self.lock().as_ref().map(|link| link.port_name().to_string())
    }
}

fn close_link(mut link: Box<dyn SerialLink>) {
    let name = link.port_name().to_string();
    match link.close() {
        Ok(()) => info!("closed serial port {name}"),
        Err(err) => warn!("error while closing serial port {name}: {err}"),
    }
}

pub(crate) struct CameraSession {
    backend: Arc<dyn CameraBackend>,
    active: Mutex<Option<Box<dyn CameraDevice>>>,
}

impl CameraSession {
    pub(crate) fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn CameraDevice>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active camera with device `index`.
    pub(crate) fn open(&self, index: i32) -> Result<(), DeviceError> {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            release_camera(previous);
        }
        if index < 0 {
            return Err(DeviceError::open(
                format!("camera #{index}"),
                "index must not be negative",
            ));
        }

        let device = self.backend.open(index)?;
        info!("opened camera #{index}");
        *active = Some(device);
        Ok(())
    }

    pub(crate) fn close(&self) -> bool {
        match self.lock().take() {
            Some(device) => {
                release_camera(device);
                true
            }
            None => false,
        }
    }

    /// Read one frame from the active camera. A failed read keeps the handle.
    pub(crate) fn read_frame(&self) -> Result<Frame, DeviceError> {
        match self.lock().as_mut() {
            Some(device) => device.read_frame(),
            None => Err(DeviceError::NotConnected),
        }
    }

    pub(crate) fn current_index(&self) -> Option<i32> {
        self.lock().as_ref().map(|device| device.index())
    }
}

fn release_camera(mut device: Box<dyn CameraDevice>) {
    let index = device.index();
    match device.release() {
        Ok(()) => info!("released camera #{index}"),
        Err(err) => warn!("error while releasing camera #{index}: {err}"),
    }
}
