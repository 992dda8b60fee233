//! In-memory stand-ins for hardware and the inference service.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use detect_client::{Detection, DiseasePrediction, InferenceBackend, InferenceError};
use device_io::{
    CameraBackend, CameraDevice, DeviceError, Frame, FrameFormat, ImuSource, RawImuSample,
    SerialBackend, SerialLink,
};

use crate::rover::config::RoverConfig;

type EventLog = Arc<Mutex<Vec<String>>>;

fn record(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

pub(crate) struct FakeSerialBackend {
    ports: Vec<String>,
    failing_opens: Mutex<HashSet<String>>,
    failing_closes: Arc<Mutex<HashSet<String>>>,
    events: EventLog,
    writes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl FakeSerialBackend {
    pub(crate) fn new(ports: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            failing_opens: Mutex::new(HashSet::new()),
            failing_closes: Arc::new(Mutex::new(HashSet::new())),
            events: EventLog::default(),
            writes: Arc::default(),
        })
    }

    pub(crate) fn fail_open(&self, port: &str) {
        self.failing_opens.lock().unwrap().insert(port.to_string());
    }

    pub(crate) fn fail_close(&self, port: &str) {
        self.failing_closes.lock().unwrap().insert(port.to_string());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

impl SerialBackend for FakeSerialBackend {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.ports.clone())
    }

    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, DeviceError> {
        if self.failing_opens.lock().unwrap().contains(port) {
            record(&self.events, format!("open-failed {port}"));
            return Err(DeviceError::open(port, "device busy"));
        }
        record(&self.events, format!("open {port}"));
        Ok(Box::new(FakeSerialLink {
            name: port.to_string(),
            events: self.events.clone(),
            writes: self.writes.clone(),
            failing_closes: self.failing_closes.clone(),
        }))
    }
}

struct FakeSerialLink {
    name: String,
    events: EventLog,
    writes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    failing_closes: Arc<Mutex<HashSet<String>>>,
}

impl SerialLink for FakeSerialLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.writes
            .lock()
            .unwrap()
            .push((self.name.clone(), bytes.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        record(&self.events, format!("close {}", self.name));
        if self.failing_closes.lock().unwrap().contains(&self.name) {
            return Err(DeviceError::Io(std::io::Error::other("flush failed")));
        }
        Ok(())
    }
}

pub(crate) struct FakeCameraBackend {
    live: HashSet<i32>,
    failing_reads: Arc<AtomicBool>,
    size: (u32, u32),
    events: EventLog,
}

impl FakeCameraBackend {
    pub(crate) fn new(live: &[i32]) -> Arc<Self> {
        Self::with_size(live, 32, 24)
    }

    pub(crate) fn with_size(live: &[i32], width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            live: live.iter().copied().collect(),
            failing_reads: Arc::new(AtomicBool::new(false)),
            size: (width, height),
            events: EventLog::default(),
        })
    }

    pub(crate) fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl CameraBackend for FakeCameraBackend {
    fn open(&self, index: i32) -> Result<Box<dyn CameraDevice>, DeviceError> {
        if !self.live.contains(&index) {
            record(&self.events, format!("open-failed {index}"));
            return Err(DeviceError::open(format!("camera #{index}"), "not found"));
        }
        record(&self.events, format!("open {index}"));
        Ok(Box::new(FakeCamera {
            index,
            size: self.size,
            released: false,
            failing_reads: self.failing_reads.clone(),
            events: self.events.clone(),
        }))
    }
}

struct FakeCamera {
    index: i32,
    size: (u32, u32),
    released: bool,
    failing_reads: Arc<AtomicBool>,
    events: EventLog,
}

impl CameraDevice for FakeCamera {
    fn index(&self) -> i32 {
        self.index
    }

    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.released || self.failing_reads.load(Ordering::SeqCst) {
            return Err(DeviceError::read(format!("camera #{}", self.index), "eof"));
        }
        Ok(test_frame(self.size.0, self.size.1))
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.released = true;
        record(&self.events, format!("release {}", self.index));
        Ok(())
    }
}

/// BGR frame with a horizontal blue ramp and constant red channel.
pub(crate) fn test_frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x * 255 / width.max(1)) as u8, 16, 200]);
        }
    }
    Frame {
        data,
        width,
        height,
        timestamp_ms: 1_700_000_000_000,
        format: FrameFormat::Bgr8,
    }
}

/// IMU returning a fixed sample, optionally failing every `fail_every`-th read.
pub(crate) struct FakeImu {
    sample: RawImuSample,
    fail_every: Option<usize>,
    reads: Arc<AtomicUsize>,
    wakes: Arc<AtomicUsize>,
}

impl FakeImu {
    pub(crate) fn new(sample: RawImuSample) -> Self {
        Self {
            sample,
            fail_every: None,
            reads: Arc::new(AtomicUsize::new(0)),
            wakes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing_every(mut self, nth: usize) -> Self {
        self.fail_every = Some(nth);
        self
    }

    pub(crate) fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub(crate) fn wake_counter(&self) -> Arc<AtomicUsize> {
        self.wakes.clone()
    }
}

impl ImuSource for FakeImu {
    fn wake(&mut self) -> Result<(), DeviceError> {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<RawImuSample, DeviceError> {
        let count = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_every {
            Some(nth) if count % nth == 0 => Err(DeviceError::read("imu", "bus nack")),
            _ => Ok(self.sample),
        }
    }
}

/// Inference service answering every frame with the same detections.
#[derive(Default)]
pub(crate) struct FakeInference {
    detections: Mutex<Option<Vec<Detection>>>,
    classification: Mutex<Option<DiseasePrediction>>,
    detect_calls: AtomicUsize,
    classify_calls: AtomicUsize,
}

impl FakeInference {
    pub(crate) fn answering(detections: Vec<Detection>) -> Arc<Self> {
        let fake = Self::default();
        *fake.detections.lock().unwrap() = Some(detections);
        Arc::new(fake)
    }

    /// Every request fails as if the service were down.
    pub(crate) fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_classification(&self, prediction: DiseasePrediction) {
        *self.classification.lock().unwrap() = Some(prediction);
    }

    pub(crate) fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for FakeInference {
    fn detect(&self, _jpeg: &[u8]) -> Result<Vec<Detection>, InferenceError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.detections
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| InferenceError::Transport("connection refused".into()))
    }

    fn classify(&self, _crop_jpeg: &[u8]) -> Result<Option<DiseasePrediction>, InferenceError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.classification.lock().unwrap().clone())
    }
}

pub(crate) fn detection(label: &str, class_id: u32, score: f32, bbox: [i32; 4]) -> Detection {
    Detection {
        bbox,
        label: label.to_string(),
        class_id: Some(class_id),
        score,
        disease: None,
    }
}

/// Server configuration with short waits and crops under `save_dir`.
pub(crate) fn test_config(save_dir: &Path) -> RoverConfig {
    RoverConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        inference_url: "http://127.0.0.1:9/predict".into(),
        classify_url: None,
        inference_timeout: Duration::from_millis(100),
        save_dir: save_dir.to_path_buf(),
        trigger_label: "potted plant".into(),
        min_score: 0.5,
        jpeg_quality: 75,
        idle_wait: Duration::from_millis(20),
        camera_probe: 4,
        i2c_bus: "/dev/null".into(),
        imu_address: 0x68,
        scan_period: Duration::from_millis(5),
        serial_port: None,
        camera_index: None,
        scan_on_start: false,
        verbose: false,
    }
}
