//! Actix Web surface for device control, telemetry and the video feed.
//!
//! Handlers never touch hardware on the async workers: device opens, probes,
//! scan joins and serial writes go through `web::block`, and each video
//! client is served by its own worker thread.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use async_stream::stream;
use detect_client::InferenceBackend;
use device_io::{CameraBackend, DeviceError, ImuSource, SerialBackend};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::rover::{
    archive::CropArchive,
    command::CommandRouter,
    config::RoverConfig,
    data::{LatestDetections, TelemetryStore},
    pipeline::{FramePipeline, PipelineContext, PipelineSettings},
    registry::DeviceRegistry,
    scan::{ScanState, Scanner},
    sessions::{CameraSession, SerialSession},
    stream::{STREAM_CONTENT_TYPE, spawn_stream_worker},
    telemetry,
};

/// Hardware and remote collaborators the server is assembled from.
pub(crate) struct Backends {
    pub(crate) serial: Arc<dyn SerialBackend>,
    pub(crate) camera: Arc<dyn CameraBackend>,
    pub(crate) imu: Box<dyn ImuSource>,
    pub(crate) inference: Arc<dyn InferenceBackend>,
}

/// Shared state backing HTTP handlers.
pub(crate) struct Rover {
    pub(crate) serial: Arc<SerialSession>,
    pub(crate) camera: Arc<CameraSession>,
    pub(crate) telemetry: TelemetryStore,
    pub(crate) scanner: Scanner,
    pub(crate) commands: CommandRouter,
    pub(crate) registry: DeviceRegistry,
    pub(crate) pipeline: PipelineContext,
    pub(crate) detections: LatestDetections,
    pub(crate) idle_wait: Duration,
    pub(crate) camera_probe: i32,
}

impl Rover {
    pub(crate) fn new(backends: Backends, config: &RoverConfig) -> Self {
        let serial = Arc::new(SerialSession::new(backends.serial.clone()));
        let camera = Arc::new(CameraSession::new(backends.camera.clone()));
        let telemetry = TelemetryStore::default();
        let detections: LatestDetections = Arc::new(Mutex::new(None));
        let pipeline = PipelineContext {
            camera: camera.clone(),
            inference: backends.inference,
            archive: Arc::new(CropArchive::new(&config.save_dir, &config.trigger_label)),
            detections: detections.clone(),
            frame_counter: Arc::default(),
            settings: PipelineSettings::from(config),
        };

        Self {
            commands: CommandRouter::new(serial.clone()),
            registry: DeviceRegistry::new(backends.serial, backends.camera),
            scanner: Scanner::new(backends.imu, telemetry.clone(), config.scan_period),
            serial,
            camera,
            telemetry,
            pipeline,
            detections,
            idle_wait: config.idle_wait,
            camera_probe: config.camera_probe,
        }
    }

    /// Stop the scan loop and release both devices.
    pub(crate) fn shutdown(&self) {
        if self.scanner.state() == ScanState::Running {
            self.scanner.stop();
            info!(
                "inertial scan stopped after {} snapshot(s)",
                self.telemetry.updates()
            );
        }
        self.camera.close();
        self.serial.close();
    }
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/imu", web::get().to(imu_handler))
        .route("/command", web::post().to(command_handler))
        .route("/set_serial", web::post().to(set_serial_handler))
        .route("/set_camera", web::post().to(set_camera_handler))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/scan/start", web::get().to(scan_start_handler))
        .route("/scan/stop", web::get().to(scan_stop_handler))
        .route("/devices", web::get().to(devices_handler))
        .route("/detections", web::get().to(detections_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Run the HTTP server until the process receives a shutdown signal.
pub(crate) async fn serve(rover: web::Data<Rover>, bind: &str, port: u16) -> io::Result<()> {
    info!("listening on http://{bind}:{port}");
    HttpServer::new(move || App::new().app_data(rover.clone()).configure(routes))
        .bind((bind, port))?
        .run()
        .await
}

#[derive(Deserialize)]
struct CommandRequest {
    cmd: String,
}

#[derive(Deserialize)]
struct SerialRequest {
    port: String,
}

#[derive(Deserialize)]
struct CameraRequest {
    index: i32,
}

#[derive(Serialize)]
struct DeviceList {
    serial_ports: Vec<String>,
    cameras: Vec<i32>,
    active_serial: Option<String>,
    active_camera: Option<i32>,
}

fn connection_status(connected: bool) -> &'static str {
    if connected { "Connected" } else { "Failed" }
}

fn blocking_failed(err: impl std::fmt::Display) -> HttpResponse {
    error!("blocking task failed: {err}");
    HttpResponse::InternalServerError()
        .json(json!({"status": "error", "message": err.to_string()}))
}

/// Latest inertial snapshot, or `{}` before the first successful read.
async fn imu_handler(state: web::Data<Rover>) -> HttpResponse {
    match state.telemetry.latest() {
        Some(reading) => HttpResponse::Ok().json(reading),
        None => HttpResponse::Ok().json(json!({})),
    }
}

async fn command_handler(
    state: web::Data<Rover>,
    body: web::Json<CommandRequest>,
) -> HttpResponse {
    let cmd = body.into_inner().cmd;
    let rover = state.clone();
    let sent = cmd.clone();
    match web::block(move || rover.commands.send(&sent)).await {
        Ok(Ok(())) => HttpResponse::Ok().json(json!({"status": "sent", "cmd": cmd})),
        Ok(Err(DeviceError::NotConnected)) => HttpResponse::Ok()
            .json(json!({"status": "error", "message": "Serial port not connected."})),
        Ok(Err(err)) => {
            warn!("command {cmd:?} not delivered: {err}");
            HttpResponse::Ok().json(json!({"status": "error", "message": err.to_string()}))
        }
        Err(err) => blocking_failed(err),
    }
}

async fn set_serial_handler(
    state: web::Data<Rover>,
    body: web::Json<SerialRequest>,
) -> HttpResponse {
    let port = body.into_inner().port;
    let rover = state.clone();
    let requested = port.clone();
    match web::block(move || rover.serial.open(&requested)).await {
        Ok(result) => {
            if let Err(err) = &result {
                warn!("{err}");
            }
            HttpResponse::Ok()
                .json(json!({"status": connection_status(result.is_ok()), "port": port}))
        }
        Err(err) => blocking_failed(err),
    }
}

async fn set_camera_handler(
    state: web::Data<Rover>,
    body: web::Json<CameraRequest>,
) -> HttpResponse {
    let index = body.into_inner().index;
    let rover = state.clone();
    match web::block(move || rover.camera.open(index)).await {
        Ok(result) => {
            if let Err(err) = &result {
                warn!("{err}");
            }
            HttpResponse::Ok()
                .json(json!({"status": connection_status(result.is_ok()), "index": index}))
        }
        Err(err) => blocking_failed(err),
    }
}

async fn scan_start_handler(state: web::Data<Rover>) -> HttpResponse {
    let rover = state.clone();
    match web::block(move || rover.scanner.start()).await {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(json!({"status": outcome.message()})),
        Ok(Err(err)) => {
            error!("failed to spawn scan thread: {err}");
            HttpResponse::InternalServerError()
                .json(json!({"status": "error", "message": err.to_string()}))
        }
        Err(err) => blocking_failed(err),
    }
}

async fn scan_stop_handler(state: web::Data<Rover>) -> HttpResponse {
    let rover = state.clone();
    match web::block(move || rover.scanner.stop()).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({"status": outcome.message()})),
        Err(err) => blocking_failed(err),
    }
}

async fn devices_handler(state: web::Data<Rover>) -> HttpResponse {
    let rover = state.clone();
    let listed = web::block(move || {
        let serial_ports = rover.registry.list_serial_ports().unwrap_or_else(|err| {
            warn!("failed to enumerate serial ports: {err}");
            Vec::new()
        });
        let cameras = rover
            .registry
            .list_camera_indices(rover.camera_probe, Some(rover.camera.as_ref()));
        DeviceList {
            serial_ports,
            cameras,
            active_serial: rover.serial.port_name(),
            active_camera: rover.camera.current_index(),
        }
    })
    .await;
    match listed {
        Ok(devices) => HttpResponse::Ok().json(devices),
        Err(err) => blocking_failed(err),
    }
}

/// Most recent pipeline result, or 204 before any frame was annotated.
async fn detections_handler(state: web::Data<Rover>) -> HttpResponse {
    let report = state
        .detections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match report {
        Some(report) => HttpResponse::Ok().json(report),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// Stream annotated frames as `multipart/x-mixed-replace` until the client
/// disconnects.
async fn video_feed_handler(state: web::Data<Rover>) -> HttpResponse {
    let pipeline = FramePipeline::new(state.pipeline.clone());
    let (mut segments, _worker) = match spawn_stream_worker(pipeline, state.idle_wait) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!("failed to spawn stream worker: {err}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let stream = stream! {
        while let Some(segment) = segments.recv().await {
            yield Ok::<Bytes, actix_web::Error>(segment);
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONTENT_TYPE, STREAM_CONTENT_TYPE))
        .streaming(stream)
}
