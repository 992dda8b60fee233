//! One capture -> inference -> annotate -> encode iteration of the video
//! stream.
//!
//! Each stream client drives its own `FramePipeline`. The camera lock is held
//! only for the frame read, so clients interleave at frame granularity.
//! Inference failures fail open: the raw frame is streamed unannotated.

use std::{
    sync::{
        Arc, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use chrono::Local;
use detect_client::{Detection, InferenceBackend};
use device_io::DeviceError;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rover::{
    annotation::{crop_region, draw_detection, encode_jpeg, frame_to_rgb},
    archive::CropArchive,
    config::RoverConfig,
    data::{DetectionReport, LatestDetections},
    sessions::CameraSession,
};

/// Why an iteration produced no frame. The caller waits and retries.
#[derive(Debug, Error)]
pub(crate) enum Stall {
    #[error("no camera is open")]
    NoCamera,
    #[error(transparent)]
    Read(DeviceError),
    #[error("frame conversion failed: {0}")]
    Encode(anyhow::Error),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PipelineSettings {
    pub(crate) min_score: f32,
    pub(crate) jpeg_quality: u8,
}

impl From<&RoverConfig> for PipelineSettings {
    fn from(config: &RoverConfig) -> Self {
        Self {
            min_score: config.min_score,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Collaborators shared by every stream client.
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub(crate) camera: Arc<CameraSession>,
    pub(crate) inference: Arc<dyn InferenceBackend>,
    pub(crate) archive: Arc<CropArchive>,
    pub(crate) detections: LatestDetections,
    pub(crate) frame_counter: Arc<AtomicU64>,
    pub(crate) settings: PipelineSettings,
}

pub(crate) struct FramePipeline {
    ctx: PipelineContext,
    inference_down: bool,
}

impl FramePipeline {
    pub(crate) fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            inference_down: false,
        }
    }

    /// Produce the next JPEG to stream.
    pub(crate) fn step(&mut self) -> Result<Vec<u8>, Stall> {
        let frame = match self.ctx.camera.read_frame() {
            Ok(frame) => frame,
            Err(DeviceError::NotConnected) => return Err(Stall::NoCamera),
            Err(err) => return Err(Stall::Read(err)),
        };
        let quality = self.ctx.settings.jpeg_quality;
        let original = frame_to_rgb(&frame).map_err(Stall::Encode)?;
        let raw_jpeg = encode_jpeg(&original, quality).map_err(Stall::Encode)?;

        let started = Instant::now();
        let detections = match self.ctx.inference.detect(&raw_jpeg) {
            Ok(detections) => {
                metrics::histogram!("rover_inference_seconds")
                    .record(started.elapsed().as_secs_f64());
                if self.inference_down {
                    info!("inference service answering again");
                    self.inference_down = false;
                }
                detections
            }
            Err(err) => {
                metrics::counter!("rover_inference_failures_total").increment(1);
                if self.inference_down {
                    debug!("inference unavailable: {err}");
                } else {
                    warn!("inference unavailable, streaming raw frames: {err}");
                    self.inference_down = true;
                }
                return Ok(raw_jpeg);
            }
        };

        let mut annotated = original.clone();
        let mut reported = Vec::new();
        for mut detection in detections
            .into_iter()
            .filter(|detection| detection.is_reportable(self.ctx.settings.min_score))
        {
            if self.ctx.archive.is_trigger(&detection.label) {
                self.handle_trigger(&original, &mut detection);
            }
            draw_detection(&mut annotated, &detection);
            reported.push(detection);
        }

        let frame_number = self.ctx.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let report = DetectionReport {
            timestamp_ms: frame.timestamp_ms,
            frame_number,
            detections: reported,
        };
        *self
            .ctx
            .detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);

        encode_jpeg(&annotated, quality).map_err(Stall::Encode)
    }

    /// Classify and persist the crop of a trigger-class detection.
    fn handle_trigger(&self, original: &RgbImage, detection: &mut Detection) {
        let Some(crop) = crop_region(original, detection.bbox) else {
            debug!("skipping empty crop for box {:?}", detection.bbox);
            return;
        };
        let crop_jpeg = match encode_jpeg(&crop, self.ctx.settings.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to encode crop: {err:#}");
                return;
            }
        };

        if detection.disease.is_none() {
            match self.ctx.inference.classify(&crop_jpeg) {
                Ok(prediction) => detection.disease = prediction,
                Err(err) => warn!("crop classification failed: {err}"),
            }
        }

        match self.ctx.archive.persist(&crop_jpeg, Local::now()) {
            Ok(path) => {
                metrics::counter!("rover_crops_saved_total").increment(1);
                info!("saved {} crop to {}", detection.label, path.display());
            }
            Err(err) => {
                metrics::counter!("rover_crop_save_failures_total").increment(1);
                warn!("{err}");
            }
        }
    }
}
