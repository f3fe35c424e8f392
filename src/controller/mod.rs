use crate::config::Config;
use crate::metrics::{self, RunSnapshot};
use crate::pool::SessionPool;
use crate::scheduler::CallScheduler;
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    SettingUp,
    Running,
    TearingDown,
    Reporting,
    Done,
}

/// Sequences exactly one run: pool setup, scheduler + reporter start, the
/// timed wait, coordinated teardown, final snapshot. The only component
/// aware of the wall-clock test duration.
pub struct RunController {
    config: Config,
    phase: RunPhase,
}

impl RunController {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            phase: RunPhase::Idle,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("run phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn run(mut self) -> Result<RunSnapshot> {
        // Failing here, before any session exists, is the one error allowed
        // to abort the whole run.
        let http = reqwest::Client::builder().build()?;
        let started = Instant::now();

        self.enter(RunPhase::SettingUp);
        info!(
            "connecting {} clients in parallel",
            self.config.load.clients
        );
        let pool = SessionPool::setup(&self.config, &http).await;
        info!(
            "setup complete: {}/{} clients connected in {:.2}s",
            pool.connected_count(),
            self.config.load.clients,
            started.elapsed().as_secs_f64()
        );

        // A partially-connected run still runs; disconnected sessions just
        // skip their ticks.
        self.enter(RunPhase::Running);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = CallScheduler::new(
            Duration::from_millis(self.config.load.call_interval_ms),
            self.config.load.tool.clone(),
            self.config.load.arguments.clone(),
            self.config.verbose,
        );
        let workers = scheduler.start(pool.sessions(), &shutdown_rx);
        let reporter = metrics::spawn_reporter(pool.sessions().to_vec(), started, shutdown_rx);

        time::sleep(Duration::from_secs(self.config.load.duration_secs)).await;

        self.enter(RunPhase::TearingDown);
        info!("stopping test");
        shutdown_tx.send(true).ok();
        for session in pool.sessions() {
            session.detach().await;
        }
        for worker in workers {
            worker.await.ok();
        }
        reporter.await.ok();

        self.enter(RunPhase::Reporting);
        let snapshot = RunSnapshot::collect(pool.sessions(), started.elapsed());

        self.enter(RunPhase::Done);
        Ok(snapshot)
    }
}
