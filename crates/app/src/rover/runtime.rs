//! Process-level wiring: build the backends, open start-up devices, serve
//! until shutdown, then release everything.

use std::sync::Arc;

use actix_web::web;
use anyhow::{Context, Result};
use detect_client::HttpInferenceClient;
use device_io::{
    DisconnectedImu, ImuSource, default_camera_backend, default_serial_backend, open_i2c_imu,
};
use tracing::{info, warn};

use crate::rover::{
    config::RoverConfig,
    registry::DeviceRegistry,
    server::{self, Backends, Rover},
    telemetry,
};

/// Run the server until it receives a shutdown signal.
pub fn run(config: RoverConfig) -> Result<()> {
    let _ = telemetry::init_metrics_recorder();

    // The blocking HTTP client owns an internal runtime, so it is built (and
    // finally dropped) outside the actix system.
    let inference = HttpInferenceClient::new(
        config.inference_url.clone(),
        config.classify_url.clone(),
        config.inference_timeout,
    )
    .context("failed to build inference client")?;
    info!(
        "inference endpoint {} (timeout {} ms)",
        inference.predict_url(),
        config.inference_timeout.as_millis()
    );

    let backends = Backends {
        serial: default_serial_backend(),
        camera: default_camera_backend(),
        imu: open_imu(&config),
        inference: Arc::new(inference),
    };
    let rover = web::Data::new(Rover::new(backends, &config));
    info!(
        "{:?} crops are saved under {}",
        config.trigger_label,
        rover.pipeline.archive.dir().display()
    );
    open_startup_devices(&rover, &config);

    let served = actix_web::rt::System::new().block_on(server::serve(
        rover.clone(),
        &config.bind,
        config.port,
    ));

    rover.shutdown();
    info!("rover server stopped");
    served.with_context(|| format!("HTTP server on {}:{} failed", config.bind, config.port))
}

fn open_imu(config: &RoverConfig) -> Box<dyn ImuSource> {
    match open_i2c_imu(&config.i2c_bus, config.imu_address) {
        Ok(imu) => {
            info!(
                "inertial sensor at {:#04x} on {}",
                config.imu_address, config.i2c_bus
            );
            imu
        }
        Err(err) => {
            warn!("inertial sensor unavailable, scans will publish nothing: {err}");
            Box::new(DisconnectedImu::new(err.to_string()))
        }
    }
}

/// Failures here are logged; the operator can still select devices over HTTP.
fn open_startup_devices(rover: &Rover, config: &RoverConfig) {
    if let Some(port) = &config.serial_port {
        if let Err(err) = rover.serial.open(port) {
            warn!("start-up serial port not opened: {err}");
        }
    }
    if let Some(index) = config.camera_index {
        if let Err(err) = rover.camera.open(index) {
            warn!("start-up camera not opened: {err}");
        }
    }
    if config.scan_on_start {
        match rover.scanner.start() {
            Ok(outcome) => info!("{}", outcome.message()),
            Err(err) => warn!("failed to start inertial scan: {err}"),
        }
    }
}

/// Print enumerable serial ports, live camera indices and the inertial
/// sensor status.
pub fn list_devices(camera_probe: i32, i2c_bus: &str, imu_address: u16) -> Result<()> {
    let registry = DeviceRegistry::new(default_serial_backend(), default_camera_backend());
    let ports = registry
        .list_serial_ports()
        .context("failed to enumerate serial ports")?;
    let cameras = registry.list_camera_indices(camera_probe, None);

    println!("serial ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in &ports {
        println!("  {port}");
    }
    println!("cameras:");
    if cameras.is_empty() {
        println!("  (none)");
    }
    for index in &cameras {
        println!("  #{index}");
    }
    match open_i2c_imu(i2c_bus, imu_address) {
        Ok(_) => println!("inertial sensor: MPU-6050 at {imu_address:#04x} on {i2c_bus}"),
        Err(err) => println!("inertial sensor: unavailable ({err})"),
    }
    Ok(())
}
