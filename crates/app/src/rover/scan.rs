//! Inertial scan state machine and polling loop.
//!
//! `Idle -> start -> Running -> stop -> Idle`. Only a start from `Idle`
//! spawns the loop and only a stop from `Running` signals it; stop joins the
//! loop thread before returning, so no snapshot is published afterwards.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use device_io::{ImuReading, ImuSource};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::rover::{data::TelemetryStore, telemetry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub(crate) enum ScanState {
    Idle,
    Running,
}

/// Outcome of a start/stop request. Redundant requests are no-ops, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanTransition {
    Started,
    AlreadyActive,
    Stopped,
    NotActive,
}

impl ScanTransition {
    pub(crate) fn message(self) -> &'static str {
        match self {
            ScanTransition::Started => "Scan started",
            ScanTransition::AlreadyActive => "Scan already active",
            ScanTransition::Stopped => "Scan stopped",
            ScanTransition::NotActive => "No active scan",
        }
    }
}

struct ScanWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub(crate) struct Scanner {
    source: Arc<Mutex<Box<dyn ImuSource>>>,
    store: TelemetryStore,
    period: Duration,
    worker: Mutex<Option<ScanWorker>>,
}

impl Scanner {
    pub(crate) fn new(source: Box<dyn ImuSource>, store: TelemetryStore, period: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            store,
            period,
            worker: Mutex::new(None),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<ScanWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ScanState {
        if self.lock_worker().is_some() {
            ScanState::Running
        } else {
            ScanState::Idle
        }
    }

    pub(crate) fn start(&self) -> io::Result<ScanTransition> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Ok(ScanTransition::AlreadyActive);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let source = self.source.clone();
        let store = self.store.clone();
        let period = self.period;
        let handle = telemetry::spawn_thread("imu-scan", move || {
            scan_loop(source, store, period, stop_rx)
        })?;
        *worker = Some(ScanWorker { stop_tx, handle });
        info!("inertial scan started ({} ms period)", period.as_millis());
        Ok(ScanTransition::Started)
    }

    /// Signal the loop and block until its thread has exited.
    pub(crate) fn stop(&self) -> ScanTransition {
        let mut worker = self.lock_worker();
        let Some(ScanWorker { stop_tx, handle }) = worker.take() else {
            return ScanTransition::NotActive;
        };
        let _ = stop_tx.send(());
        if handle.join().is_err() {
            error!("inertial scan thread panicked");
        }
        info!("inertial scan stopped");
        ScanTransition::Stopped
    }
}

fn scan_loop(
    source: Arc<Mutex<Box<dyn ImuSource>>>,
    store: TelemetryStore,
    period: Duration,
    stop_rx: Receiver<()>,
) {
    let span = tracing::info_span!("imu.scan", period_ms = period.as_millis() as u64);
    let _span_guard = span.enter();

    let mut imu = source.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(err) = imu.wake() {
        warn!("failed to wake inertial sensor: {err}");
    }

    let mut failures: u64 = 0;
    loop {
        match imu.read_sample() {
            Ok(raw) => {
                if failures > 0 {
                    info!("inertial sensor recovered after {failures} failed read(s)");
                    failures = 0;
                }
                store.publish(ImuReading::from_raw(&raw));
                metrics::counter!("rover_imu_samples_total").increment(1);
            }
            Err(err) => {
                failures += 1;
                metrics::counter!("rover_imu_read_failures_total").increment(1);
                if failures == 1 {
                    warn!("inertial read failed, retrying next tick: {err}");
                } else {
                    debug!("inertial read failed ({failures} in a row): {err}");
                }
            }
        }

        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("inertial scan loop exited");
}
