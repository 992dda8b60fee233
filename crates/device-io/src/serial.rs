//! Serial links to the motor/servo controller.

use std::{io::Write, sync::Arc, time::Duration};

use serialport::SerialPort;

use crate::types::DeviceError;

/// Baud rate spoken by the motor controller firmware.
pub const SERIAL_BAUD_RATE: u32 = 9600;
/// Read timeout applied to every opened port.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Enumerates and opens serial ports.
pub trait SerialBackend: Send + Sync {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError>;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, DeviceError>;
}

/// One open serial channel.
pub trait SerialLink: Send {
    fn port_name(&self) -> &str;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Flush pending output ahead of dropping the handle.
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// `serialport`-backed implementation used by the server binary.
pub struct SystemSerialBackend;

pub fn default_serial_backend() -> Arc<dyn SerialBackend> {
    Arc::new(SystemSerialBackend)
}

impl SerialBackend for SystemSerialBackend {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        let ports = serialport::available_ports()
            .map_err(|err| DeviceError::Io(std::io::Error::other(err.to_string())))?;
        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, DeviceError> {
        let handle = serialport::new(port, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|err| DeviceError::open(port, err))?;
        Ok(Box::new(SystemSerialLink {
            name: port.to_string(),
            port: handle,
        }))
    }
}

struct SystemSerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink for SystemSerialLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.port.flush()?;
        Ok(())
    }
}
