use crate::session::Session;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

pub struct CallScheduler {
    period: Duration,
    tool: String,
    arguments: Value,
    verbose: bool,
}

impl CallScheduler {
    pub fn new(period: Duration, tool: String, arguments: Value, verbose: bool) -> Self {
        Self {
            period,
            tool,
            arguments,
            verbose,
        }
    }

    /// Starts one independent call loop per session. Loops stop as soon as
    /// `shutdown` fires; a call already in flight completes naturally and
    /// its outcome still counts.
    pub fn start(
        &self,
        sessions: &[Arc<Session>],
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        sessions
            .iter()
            .map(|session| {
                let session = session.clone();
                let period = self.period;
                let tool = self.tool.clone();
                let arguments = self.arguments.clone();
                let verbose = self.verbose;
                let shutdown = shutdown.clone();
                tokio::spawn(drive_session(
                    session, period, tool, arguments, verbose, shutdown,
                ))
            })
            .collect()
    }
}

async fn drive_session(
    session: Arc<Session>,
    period: Duration,
    tool: String,
    arguments: Value,
    verbose: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    // First tick one period after start, matching the steady cadence.
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        // A disconnected session skips its tick; it is not an error.
        if !session.connected() {
            continue;
        }

        let params = json!({ "name": tool, "arguments": arguments });
        match session.call("tools/call", params).await {
            Ok(_) => {
                if verbose {
                    debug!("[client {}] tool call ok", session.index());
                }
            }
            Err(e) => warn!("[client {}] tool call failed: {}", session.index(), e),
        }
    }
}
