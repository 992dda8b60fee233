//! Forwarding of operator commands to the motor/servo controller.
//!
//! Conventional commands are `FORWARD`, `BACKWARD`, `LEFT`, `RIGHT`, `STOP`
//! and `S1:<0-180>` / `S2:<0-180>`. None are enforced here; the firmware
//! rejects what it does not understand.

use std::sync::Arc;

use device_io::DeviceError;
use tracing::info;

use crate::rover::sessions::SerialSession;

pub(crate) struct CommandRouter {
    serial: Arc<SerialSession>,
}

impl CommandRouter {
    pub(crate) fn new(serial: Arc<SerialSession>) -> Self {
        Self { serial }
    }

    /// Write `command` followed by a newline to the active serial port.
    pub(crate) fn send(&self, command: &str) -> Result<(), DeviceError> {
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');
        self.serial.write(line.as_bytes())?;
        info!("sent command {command:?}");
        metrics::counter!("rover_serial_commands_total").increment(1);
        Ok(())
    }
}
