//! Multipart MJPEG framing and the per-client stream worker.
//!
//! Every `/video_feed` client gets its own worker thread running a
//! `FramePipeline`. Segments go through a two-slot channel so a slow client
//! back-pressures its own worker instead of buffering frames; the worker exits
//! once the receiving side is dropped.

use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use actix_web::web::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rover::{
    pipeline::{FramePipeline, Stall},
    telemetry,
};

pub(crate) const BOUNDARY: &str = "frame";
pub(crate) const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const SEGMENT_BUFFER: usize = 2;
const IDLE_SLICE: Duration = Duration::from_millis(50);

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// Wrap one JPEG in a multipart part: boundary line, content type, blank line,
/// payload, line terminator.
pub(crate) fn multipart_segment(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StreamStats {
    pub(crate) segments: u64,
    pub(crate) stalls: u64,
}

pub(crate) fn spawn_stream_worker(
    pipeline: FramePipeline,
    idle_wait: Duration,
) -> io::Result<(mpsc::Receiver<Bytes>, JoinHandle<StreamStats>)> {
    let (tx, rx) = mpsc::channel(SEGMENT_BUFFER);
    let client = NEXT_CLIENT.fetch_add(1, Ordering::Relaxed);
    let handle = telemetry::spawn_thread(format!("stream-{client}"), move || {
        run_stream(client, pipeline, tx, idle_wait)
    })?;
    Ok((rx, handle))
}

fn run_stream(
    client: u64,
    mut pipeline: FramePipeline,
    tx: mpsc::Sender<Bytes>,
    idle_wait: Duration,
) -> StreamStats {
    let span = tracing::info_span!("stream.client", client);
    let _span_guard = span.enter();
    metrics::gauge!("rover_stream_clients").increment(1.0);
    debug!("stream client attached");

    let mut stats = StreamStats::default();
    let mut stalled = false;
    while !tx.is_closed() {
        match pipeline.step() {
            Ok(jpeg) => {
                if stalled {
                    info!("stream resumed after {} stalled iteration(s)", stats.stalls);
                    stalled = false;
                }
                if tx.blocking_send(multipart_segment(&jpeg)).is_err() {
                    break;
                }
                stats.segments += 1;
                metrics::counter!("rover_stream_segments_total").increment(1);
            }
            Err(stall) => {
                stats.stalls += 1;
                metrics::counter!("rover_stream_stalls_total").increment(1);
                match (&stall, stalled) {
                    (_, true) => debug!("stream still stalled: {stall}"),
                    (Stall::NoCamera, false) => info!("stream waiting: {stall}"),
                    (_, false) => warn!("stream stalled: {stall}"),
                }
                stalled = true;
                idle(&tx, idle_wait);
            }
        }
    }

    metrics::gauge!("rover_stream_clients").decrement(1.0);
    debug!(
        "stream client detached after {} segment(s), {} stall(s)",
        stats.segments, stats.stalls
    );
    stats
}

/// Sleep for `wait`, returning early once the client has gone away.
fn idle(tx: &mpsc::Sender<Bytes>, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        let now = Instant::now();
        if now >= deadline || tx.is_closed() {
            return;
        }
        thread::sleep((deadline - now).min(IDLE_SLICE));
    }
}
