use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use detect_client::Detection;
use device_io::ImuReading;
use serde::Serialize;

/// Latest inertial reading. Writers replace the whole value under the lock,
/// so readers never see axes from two different samples.
#[derive(Clone, Default)]
pub(crate) struct TelemetryStore {
    latest: Arc<Mutex<Option<ImuReading>>>,
    updates: Arc<AtomicU64>,
}

impl TelemetryStore {
    pub(crate) fn publish(&self, reading: ImuReading) {
        let mut guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(reading);
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn latest(&self) -> Option<ImuReading> {
        match self.latest.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }

    /// Number of snapshots published since start-up.
    pub(crate) fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Serialize)]
pub(crate) struct DetectionReport {
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) detections: Vec<Detection>,
}

pub(crate) type LatestDetections = Arc<Mutex<Option<DetectionReport>>>;
