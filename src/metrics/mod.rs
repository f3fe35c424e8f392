use crate::session::Session;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::info;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

/// Point-in-time aggregate over all sessions. Always recomputed by summing
/// the live per-session counters; there is no separate running total to
/// drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub decode_errors: u64,
    pub connected: usize,
    pub established: usize,
    pub elapsed_secs: f64,
}

impl RunSnapshot {
    pub fn collect(sessions: &[Arc<Session>], elapsed: Duration) -> Self {
        let mut snapshot = Self {
            successes: 0,
            failures: 0,
            decode_errors: 0,
            connected: 0,
            established: 0,
            elapsed_secs: elapsed.as_secs_f64(),
        };

        for session in sessions {
            let metrics = session.metrics();
            snapshot.successes += metrics.successes.load(Ordering::Relaxed);
            snapshot.failures += metrics.failures.load(Ordering::Relaxed);
            snapshot.decode_errors += metrics.decode_errors.load(Ordering::Relaxed);
            if session.connected() {
                snapshot.connected += 1;
            }
            if session.has_session() {
                snapshot.established += 1;
            }
        }

        snapshot
    }

    pub fn total_calls(&self) -> u64 {
        self.successes + self.failures
    }

    /// `None` when no call has completed yet.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total_calls();
        if total == 0 {
            return None;
        }
        Some(self.successes as f64 / total as f64)
    }

    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.successes as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Logs an aggregate progress line every snapshot period until `shutdown`
/// fires.
pub fn spawn_reporter(
    sessions: Vec<Arc<Session>>,
    started: Instant,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(
            time::Instant::now() + SNAPSHOT_INTERVAL,
            SNAPSHOT_INTERVAL,
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = RunSnapshot::collect(&sessions, started.elapsed());
            info!(
                "[{:.0}s] connected: {} | success: {} | failed: {} | rate: {:.1}/s",
                snapshot.elapsed_secs,
                snapshot.connected,
                snapshot.successes,
                snapshot.failures,
                snapshot.throughput()
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_sessions(count: usize) -> Vec<Arc<Session>> {
        let config: Config = toml::from_str(
            r#"
            [target]
            url = "http://127.0.0.1:9/mcp"
            access_token = "test-token"

            [load]
            clients = 1
            duration_secs = 1
            call_interval_ms = 100
            "#,
        )
        .unwrap();

        (1..=count)
            .map(|index| Arc::new(Session::new(index, &config, reqwest::Client::new())))
            .collect()
    }

    #[test]
    fn sums_counters_across_sessions() {
        let sessions = test_sessions(3);
        sessions[0].metrics().successes.store(5, Ordering::Relaxed);
        sessions[0].metrics().failures.store(1, Ordering::Relaxed);
        sessions[1].metrics().successes.store(2, Ordering::Relaxed);
        sessions[1].metrics().decode_errors.store(4, Ordering::Relaxed);
        sessions[2].metrics().connected.store(true, Ordering::Relaxed);

        let snapshot = RunSnapshot::collect(&sessions, Duration::from_secs(10));

        assert_eq!(snapshot.successes, 7);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.decode_errors, 4);
        assert_eq!(snapshot.connected, 1);
        assert_eq!(snapshot.established, 0);
        assert_eq!(snapshot.total_calls(), 8);
    }

    #[test]
    fn success_rate_is_undefined_without_calls() {
        let sessions = test_sessions(2);
        let snapshot = RunSnapshot::collect(&sessions, Duration::from_secs(1));
        assert_eq!(snapshot.success_rate(), None);
    }

    #[test]
    fn derived_rates() {
        let sessions = test_sessions(1);
        sessions[0].metrics().successes.store(30, Ordering::Relaxed);
        sessions[0].metrics().failures.store(10, Ordering::Relaxed);

        let snapshot = RunSnapshot::collect(&sessions, Duration::from_secs(10));
        assert_eq!(snapshot.success_rate(), Some(0.75));
        assert!((snapshot.throughput() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_elapsed_throughput_is_zero() {
        let sessions = test_sessions(1);
        sessions[0].metrics().successes.store(9, Ordering::Relaxed);
        let snapshot = RunSnapshot::collect(&sessions, Duration::ZERO);
        assert_eq!(snapshot.throughput(), 0.0);
    }
}
