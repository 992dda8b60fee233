//! Rover control server: device sessions, inertial scanning and the
//! annotated video feed, exposed over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `runtime`: Start-up wiring, the server lifetime and shutdown.
//! - `sessions`: Exclusive ownership of the serial link and camera.
//! - `registry`: Serial port and camera enumeration.
//! - `command`: Operator commands forwarded over serial.
//! - `scan`: Inertial scan state machine and polling loop.
//! - `pipeline`: Capture → inference → annotate → encode per frame.
//! - `annotation`: Drawing primitives and JPEG encoding.
//! - `archive`: Persistence of trigger-class crops.
//! - `stream`: Multipart framing and per-client stream workers.
//! - `server`: Actix Web endpoints.
//! - `data`: Shared state read by the request path.

pub use config::{RoverConfig, ServeArgs, parse_address};
pub use runtime::{list_devices, run};

mod annotation;
mod archive;
mod command;
mod config;
mod data;
mod pipeline;
mod registry;
mod runtime;
mod scan;
mod server;
mod sessions;
mod stream;
mod telemetry;
#[cfg(test)]
mod testing;

pub(crate) use telemetry::init_tracing;
