//! Configuration parsing for the rover server.
//!
//! Raw CLI/env arguments are validated once into a `RoverConfig` which the
//! rest of the server consumes without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;

pub(crate) const DEFAULT_TRIGGER_LABEL: &str = "potted plant";

/// Canonical configuration shared by every component of the server.
#[derive(Clone, Debug)]
pub struct RoverConfig {
    /// Address the HTTP server binds to.
    pub bind: String,
    pub port: u16,
    /// Detection endpoint receiving one JPEG per frame.
    pub inference_url: String,
    /// Optional endpoint classifying trigger-class crops.
    pub classify_url: Option<String>,
    pub inference_timeout: Duration,
    /// Directory receiving trigger-class crops.
    pub save_dir: PathBuf,
    pub trigger_label: String,
    /// Detections must score strictly above this to be drawn.
    pub min_score: f32,
    pub jpeg_quality: u8,
    /// Back-off used by stream pipelines when no frame is available.
    pub idle_wait: Duration,
    /// Number of camera indices probed when listing devices.
    pub camera_probe: i32,
    pub i2c_bus: String,
    pub imu_address: u16,
    pub scan_period: Duration,
    /// Serial port opened at start-up.
    pub serial_port: Option<String>,
    /// Camera index opened at start-up.
    pub camera_index: Option<i32>,
    pub scan_on_start: bool,
    pub verbose: bool,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Bind address for the HTTP server.
    #[arg(long, env = "ROVER_BIND", default_value = "0.0.0.0")]
    pub bind: String,
    /// HTTP port.
    #[arg(long, env = "ROVER_PORT", default_value_t = 5000)]
    pub port: u16,
    /// Detection service endpoint.
    #[arg(
        long = "inference-url",
        env = "ROVER_INFERENCE_URL",
        default_value = "http://127.0.0.1:5001/predict"
    )]
    pub inference_url: String,
    /// Disease classification endpoint for trigger-class crops.
    #[arg(long = "classify-url", env = "ROVER_CLASSIFY_URL")]
    pub classify_url: Option<String>,
    /// Per-request inference timeout in milliseconds.
    #[arg(long = "inference-timeout-ms", default_value_t = 2000)]
    pub inference_timeout_ms: u64,
    /// Directory for persisted detection crops.
    #[arg(long = "save-dir", env = "ROVER_SAVE_DIR", default_value = "detected_images")]
    pub save_dir: PathBuf,
    /// Detection class that triggers classification and crop persistence.
    #[arg(long = "trigger-label", default_value = DEFAULT_TRIGGER_LABEL)]
    pub trigger_label: String,
    /// Minimum (exclusive) detection score to annotate.
    #[arg(long = "min-score", default_value_t = 0.5)]
    pub min_score: f32,
    /// JPEG quality for streamed frames (1-100).
    #[arg(long = "jpeg-quality", default_value_t = 85)]
    pub jpeg_quality: i32,
    /// Wait between retries when no camera frame is available, in milliseconds.
    #[arg(long = "idle-wait-ms", default_value_t = 1000)]
    pub idle_wait_ms: u64,
    /// Number of camera indices to probe when listing devices.
    #[arg(long = "camera-probe", default_value_t = 5)]
    pub camera_probe: i32,
    /// I2C character device hosting the inertial sensor.
    #[arg(long = "i2c-bus", env = "ROVER_I2C_BUS", default_value = "/dev/i2c-1")]
    pub i2c_bus: String,
    /// I2C address of the inertial sensor (hex with 0x prefix, or decimal).
    #[arg(long = "imu-address", default_value = "0x68", value_parser = parse_address)]
    pub imu_address: u16,
    /// Inertial polling period in milliseconds.
    #[arg(long = "scan-period-ms", default_value_t = 100)]
    pub scan_period_ms: u64,
    /// Serial port to open at start-up.
    #[arg(long = "serial-port", env = "ROVER_SERIAL_PORT")]
    pub serial_port: Option<String>,
    /// Camera to open at start-up, as an index or a `/dev/videoN` path.
    #[arg(long = "camera-index", env = "ROVER_CAMERA", value_parser = parse_camera)]
    pub camera_index: Option<i32>,
    /// Start inertial polling at start-up.
    #[arg(long = "scan-on-start", action = clap::ArgAction::SetTrue)]
    pub scan_on_start: bool,
    /// Enable debug logging.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

pub fn parse_address(raw: &str) -> std::result::Result<u16, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse::<u16>(),
    };
    match parsed {
        Ok(address) if address <= 0x7F => Ok(address),
        Ok(address) => Err(format!("{address:#x} is outside the 7-bit I2C range")),
        Err(err) => Err(format!("invalid I2C address {raw:?}: {err}")),
    }
}

fn parse_camera(raw: &str) -> std::result::Result<i32, String> {
    device_io::parse_device_index(raw.trim())
        .ok_or_else(|| format!("{raw:?} is neither a camera index nor a /dev/videoN path"))
}

impl TryFrom<ServeArgs> for RoverConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if !(1..=10_000).contains(&args.inference_timeout_ms) {
            bail!("--inference-timeout-ms must be between 1 and 10000");
        }
        if !(0.0..1.0).contains(&args.min_score) {
            bail!("--min-score must be in [0, 1)");
        }
        if args.scan_period_ms == 0 {
            bail!("--scan-period-ms must be at least 1");
        }
        if args.idle_wait_ms == 0 {
            bail!("--idle-wait-ms must be at least 1");
        }
        if args.camera_probe < 0 {
            bail!("--camera-probe must not be negative");
        }
        if args.trigger_label.trim().is_empty() {
            bail!("--trigger-label must not be empty");
        }
        if let Some(index) = args.camera_index {
            if index < 0 {
                bail!("--camera-index must not be negative");
            }
        }

        Ok(Self {
            bind: args.bind,
            port: args.port,
            inference_url: args.inference_url,
            classify_url: args.classify_url.filter(|url| !url.trim().is_empty()),
            inference_timeout: Duration::from_millis(args.inference_timeout_ms),
            save_dir: args.save_dir,
            trigger_label: args.trigger_label.trim().to_string(),
            min_score: args.min_score,
            jpeg_quality: args.jpeg_quality as u8,
            idle_wait: Duration::from_millis(args.idle_wait_ms),
            camera_probe: args.camera_probe,
            i2c_bus: args.i2c_bus,
            imu_address: args.imu_address,
            scan_period: Duration::from_millis(args.scan_period_ms),
            serial_port: args.serial_port,
            camera_index: args.camera_index,
            scan_on_start: args.scan_on_start,
            verbose: args.verbose,
        })
    }
}
