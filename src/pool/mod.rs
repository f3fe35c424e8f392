use crate::config::Config;
use crate::session::{Session, SessionError};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct SessionPool {
    sessions: Vec<Arc<Session>>,
}

impl SessionPool {
    /// Builds the configured number of sessions and drives handshake +
    /// attach for all of them in parallel. A session that fails to connect
    /// stays in the pool so the connected-count statistic sees it; no
    /// individual failure aborts setup.
    pub async fn setup(config: &Config, http: &reqwest::Client) -> Self {
        let sessions: Vec<Arc<Session>> = (1..=config.load.clients)
            .map(|index| Arc::new(Session::new(index, config, http.clone())))
            .collect();

        let mut tasks = JoinSet::new();
        for session in &sessions {
            let session = session.clone();
            tasks.spawn(async move {
                match connect(&session).await {
                    Ok(()) => info!("[client {}] connected", session.index()),
                    Err(e) => warn!("[client {}] setup failed: {}", session.index(), e),
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        Self { sessions }
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.connected()).count()
    }
}

async fn connect(session: &Session) -> Result<(), SessionError> {
    session.handshake().await?;
    session.attach().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_sessions_stay_in_the_pool() {
        // Nothing listens here; every handshake fails with a network error.
        let config: Config = toml::from_str(
            r#"
            [target]
            url = "http://127.0.0.1:9/mcp"
            access_token = "test-token"

            [load]
            clients = 3
            duration_secs = 1
            call_interval_ms = 100
            "#,
        )
        .unwrap();

        let pool = SessionPool::setup(&config, &reqwest::Client::new()).await;

        assert_eq!(pool.sessions().len(), 3);
        assert_eq!(pool.connected_count(), 0);
        let indexes: Vec<usize> = pool.sessions().iter().map(|s| s.index()).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }
}
