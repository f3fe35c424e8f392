use super::SessionMetrics;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Inbound push-channel events, decoupled from the network connection so the
/// handling logic is testable without one.
pub trait PushSink: Send + Sync {
    fn on_open(&self);
    fn on_frame(&self, data: &str);
    fn on_error(&self, detail: &str);
}

/// Default sink: frames feed the session's counters. The push channel is
/// best-effort telemetry, so a protocol error in a frame is logged and a
/// frame that fails to parse is counted and otherwise ignored.
pub struct MetricsSink {
    index: usize,
    metrics: Arc<SessionMetrics>,
    verbose: bool,
}

impl MetricsSink {
    pub fn new(index: usize, metrics: Arc<SessionMetrics>, verbose: bool) -> Self {
        Self {
            index,
            metrics,
            verbose,
        }
    }
}

impl PushSink for MetricsSink {
    fn on_open(&self) {
        self.metrics.connected.store(true, Ordering::Relaxed);
    }

    fn on_frame(&self, data: &str) {
        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(payload) => {
                if let Some(error) = payload.get("error") {
                    warn!("[client {}] push channel error response: {}", self.index, error);
                }
            }
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                if self.verbose {
                    debug!("[client {}] push frame parse error: {}", self.index, e);
                }
            }
        }
    }

    fn on_error(&self, detail: &str) {
        self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
        if self.verbose {
            debug!("[client {}] push channel error: {}", self.index, detail);
        }
    }
}

/// Incremental splitter for the `data: ` frame lines of an event stream.
/// Frames may arrive split across chunks; partial lines are buffered until
/// the terminating newline shows up.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data: ") {
                frames.push(data.to_owned());
            }
        }
        frames
    }
}

/// Consumes the push channel until it ends or breaks, feeding every complete
/// frame to the sink. Stream termination is terminal for the session's
/// connected flag.
pub async fn run_listener<S, B, E>(mut stream: S, sink: impl PushSink, metrics: Arc<SessionMetrics>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut frames = FrameBuffer::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for data in frames.push_chunk(bytes.as_ref()) {
                    sink.on_frame(&data);
                }
            }
            Err(e) => {
                sink.on_error(&e.to_string());
                break;
            }
        }
    }

    metrics.connected.store(false, Ordering::Relaxed);
}
