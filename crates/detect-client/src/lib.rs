//! Client side of the remote detection service.
//!
//! The service takes one JPEG per request and answers with a list of
//! detections. Detections of the trigger class may carry a nested
//! plant-disease classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
pub mod labels;

pub use http::HttpInferenceClient;

/// One object found in a frame. Coordinates are source-frame pixels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: [i32; 4],
    pub label: String,
    pub class_id: Option<u32>,
    pub score: f32,
    pub disease: Option<DiseasePrediction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiseasePrediction {
    pub class_id: u32,
    pub confidence: f32,
    pub disease_key: String,
    #[serde(alias = "label")]
    pub disease_name: String,
}

impl Detection {
    /// Score strictly above `min_score` and a class the service is known to report.
    pub fn is_reportable(&self, min_score: f32) -> bool {
        self.score > min_score && self.class_id.and_then(labels::class_name).is_some()
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request timed out")]
    Timeout,
    #[error("inference transport error: {0}")]
    Transport(String),
    #[error("inference service returned status {0}")]
    Status(u16),
    #[error("inference service error: {0}")]
    Remote(String),
    #[error("malformed inference response: {0}")]
    Decode(String),
    #[error("failed to build inference request: {0}")]
    Encode(String),
}

/// Narrow interface the streaming pipeline depends on.
pub trait InferenceBackend: Send + Sync {
    /// Detect objects in one JPEG-encoded frame.
    fn detect(&self, jpeg: &[u8]) -> Result<Vec<Detection>, InferenceError>;

    /// Classify a JPEG-encoded crop. `Ok(None)` when no classifier is configured.
    fn classify(&self, _crop_jpeg: &[u8]) -> Result<Option<DiseasePrediction>, InferenceError> {
        Ok(None)
    }
}

#[derive(Deserialize)]
struct WireDetection {
    #[serde(alias = "object_label")]
    label: String,
    bbox: [f64; 4],
    score: f32,
    #[serde(default)]
    class_id: Option<u32>,
    #[serde(default, rename = "plant_disease_prediction")]
    disease: Option<DiseasePrediction>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Detections(Vec<WireDetection>),
    Failure { error: String },
}

/// Decode a `/predict` response body.
pub fn decode_detections(body: &[u8]) -> Result<Vec<Detection>, InferenceError> {
    let response: PredictResponse =
        serde_json::from_slice(body).map_err(|err| InferenceError::Decode(err.to_string()))?;
    match response {
        PredictResponse::Failure { error } => Err(InferenceError::Remote(error)),
        PredictResponse::Detections(items) => Ok(items
            .into_iter()
            .map(|wire| {
                let label = labels::normalize_label(&wire.label).to_string();
                let class_id = wire.class_id.or_else(|| labels::class_id(&label));
                Detection {
                    bbox: wire.bbox.map(|v| v.round() as i32),
                    label,
                    class_id,
                    score: wire.score,
                    disease: wire.disease,
                }
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(score: f32, class_id: Option<u32>) -> Detection {
        Detection {
            bbox: [0, 0, 10, 10],
            label: "person".into(),
            class_id,
            score,
            disease: None,
        }
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!detection(0.50, Some(1)).is_reportable(0.5));
        assert!(detection(0.51, Some(1)).is_reportable(0.5));
    }

    #[test]
    fn unknown_classes_are_not_reportable() {
        assert!(!detection(0.9, Some(2)).is_reportable(0.5));
        assert!(!detection(0.9, None).is_reportable(0.5));
    }

    #[test]
    fn decodes_service_payload() {
        let body = br#"[
            {"object_label": "potted plant: 0.91", "bbox": [10, 20, 110, 220.6], "score": 0.91,
             "plant_disease_prediction": {"class_id": 17, "confidence": 0.8,
               "disease_key": "Tomato_leaf", "disease_name": "Tomato___healthy"}},
            {"label": "person", "bbox": [1, 2, 3, 4], "score": 0.6, "class_id": 1}
        ]"#;
        let detections = decode_detections(body).unwrap();
        assert_eq!(detections.len(), 2);

        let plant = &detections[0];
        assert_eq!(plant.label, "potted plant");
        assert_eq!(plant.class_id, Some(64));
        assert_eq!(plant.bbox, [10, 20, 110, 221]);
        let disease = plant.disease.as_ref().unwrap();
        assert_eq!(disease.disease_key, "Tomato_leaf");
        assert_eq!(disease.class_id, 17);

        assert_eq!(detections[1].class_id, Some(1));
        assert!(detections[1].disease.is_none());
    }

    #[test]
    fn error_object_is_a_remote_failure() {
        let err = decode_detections(br#"{"error": "bad image"}"#).unwrap_err();
        assert!(matches!(err, InferenceError::Remote(msg) if msg == "bad image"));
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        assert!(matches!(
            decode_detections(b"<html>"),
            Err(InferenceError::Decode(_))
        ));
    }
}
