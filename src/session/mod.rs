use crate::config::Config;
use crate::decoder::{self, DecodeError, Envelope};
use self::push::{MetricsSink, PushSink, run_listener};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

pub mod push;

const ATTACH_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session token in response header or body")]
    NoTokenFound,

    #[error("push channel requires a completed handshake")]
    NoToken,

    #[error("push channel did not open within {}s", ATTACH_TIMEOUT.as_secs())]
    AttachTimeout,

    #[error("no session established")]
    NoSession,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Per-session counters. Only the owning session's call path writes the call
/// counters and only its push listener writes the decode-error counter, so
/// relaxed atomics are enough; the aggregator just reads.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub decode_errors: AtomicU64,
    pub connected: AtomicBool,
}

/// One independent client session: handshake-derived token, push channel,
/// sequential call timeline with its own monotonically increasing call ids.
pub struct Session {
    index: usize,
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    verbose: bool,
    token: OnceLock<String>,
    call_counter: AtomicU64,
    push_task: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<SessionMetrics>,
}

impl Session {
    pub fn new(index: usize, config: &Config, http: reqwest::Client) -> Self {
        Self {
            index,
            http,
            endpoint: config.target.url.clone(),
            access_token: config.target.access_token.clone(),
            verbose: config.verbose,
            token: OnceLock::new(),
            call_counter: AtomicU64::new(0),
            push_task: Mutex::new(None),
            metrics: Arc::new(SessionMetrics::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn connected(&self) -> bool {
        self.metrics.connected.load(Ordering::Relaxed)
    }

    /// True once a handshake has produced a session token.
    pub fn has_session(&self) -> bool {
        self.token.get().is_some()
    }

    fn next_id(&self) -> u64 {
        self.call_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Sends the protocol `initialize` call and extracts the session token,
    /// preferring the transport header over the body fields. Calling again
    /// after a successful handshake is a no-op returning the stored token.
    pub async fn handshake(&self) -> Result<String, SessionError> {
        if let Some(token) = self.token.get() {
            return Ok(token.clone());
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": format!("surge-client-{}", self.index),
                    "version": "1.0.0",
                },
            },
        });

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.as_str())])
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(TransportError::Network)?;

        let header_token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_kind = content_kind(response.headers());
        let raw = response.text().await.map_err(TransportError::Network)?;

        // An unparseable body is tolerated here: the header token can still
        // carry the handshake.
        let parsed = match decoder::decode_value(&raw, content_kind.as_deref()) {
            Ok(value) => Some(value),
            Err(e) => {
                if self.verbose {
                    debug!("[client {}] handshake body unparseable: {}", self.index, e);
                }
                None
            }
        };

        let token = extract_session_token(header_token.as_deref(), parsed.as_ref())
            .ok_or(SessionError::NoTokenFound)?;

        debug!("[client {}] session created: {}", self.index, token);
        Ok(self.token.get_or_init(|| token).clone())
    }

    /// Opens the long-lived push channel, presenting the session token as a
    /// header credential, and spawns the frame listener once the channel
    /// signals open.
    pub async fn attach(&self) -> Result<(), SessionError> {
        let token = self.token.get().cloned().ok_or(SessionError::NoToken)?;

        let request = self
            .http
            .get(&self.endpoint)
            .query(&[("access_token", self.access_token.as_str())])
            .header(SESSION_HEADER, &token)
            .header(ACCEPT, "text/event-stream");

        // Open failures are not always signaled by the transport, so the
        // bound is enforced here.
        let response = match time::timeout(ATTACH_TIMEOUT, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TransportError::Network(e).into()),
            Err(_) => return Err(SessionError::AttachTimeout),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::NonSuccessStatus {
                status: status.as_u16(),
                body: String::new(),
            }
            .into());
        }

        let sink = MetricsSink::new(self.index, self.metrics.clone(), self.verbose);
        sink.on_open();

        let metrics = self.metrics.clone();
        let handle = tokio::spawn(run_listener(
            Box::pin(response.bytes_stream()),
            sink,
            metrics,
        ));
        *self.push_task.lock().await = Some(handle);

        Ok(())
    }

    /// Issues one JSON-RPC call on this session's timeline and decodes the
    /// response regardless of which wire encoding carried it. Counts the
    /// outcome against this session.
    pub async fn call(&self, method: &str, params: Value) -> Result<Envelope, SessionError> {
        let token = self.token.get().cloned().ok_or(SessionError::NoSession)?;
        let id = self.next_id();

        let result = self.dispatch(&token, id, method, params).await;
        match &result {
            Ok(_) => {
                self.metrics.successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        token: &str,
        id: u64,
        method: &str,
        params: Value,
    ) -> Result<Envelope, SessionError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.as_str())])
            .header(SESSION_HEADER, token)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(TransportError::Network)?;

        let status = response.status();
        let content_kind = content_kind(response.headers());
        let raw = response.text().await.map_err(TransportError::Network)?;

        if !status.is_success() {
            return Err(TransportError::NonSuccessStatus {
                status: status.as_u16(),
                body: raw,
            }
            .into());
        }

        Ok(decoder::decode(&raw, content_kind.as_deref())?)
    }

    /// Closes the push channel and clears the connected flag. Safe to call
    /// repeatedly or on a session that never attached.
    pub async fn detach(&self) {
        if let Some(handle) = self.push_task.lock().await.take() {
            handle.abort();
        }
        self.metrics.connected.store(false, Ordering::Relaxed);
    }
}

fn content_kind(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Token source priority: header, body `sessionId`, `result.sessionId`,
/// `result._meta.sessionId`. First non-empty value wins.
fn extract_session_token(header: Option<&str>, body: Option<&Value>) -> Option<String> {
    let from_body = |path: &[&str]| -> Option<&str> {
        let mut node = body?;
        for key in path {
            node = node.get(key)?;
        }
        node.as_str()
    };
    let non_empty = |token: &&str| !token.is_empty();

    header
        .filter(non_empty)
        .or_else(|| from_body(&["sessionId"]).filter(non_empty))
        .or_else(|| from_body(&["result", "sessionId"]).filter(non_empty))
        .or_else(|| from_body(&["result", "_meta", "sessionId"]).filter(non_empty))
        .map(str::to_owned)
}
