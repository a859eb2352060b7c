//! HTTP client for the relay (spec §4.1, §6 "Relay HTTP (consumed)").
//!
//! The relay is a black-box dependency: a small HTTP server that lists live
//! sessions and accepts fire-and-forget prompt injections. This module only
//! consumes that interface; it never implements it.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// A session as reported by `GET /session`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub time: Option<SessionTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTime {
    pub created: Option<i64>,
}

impl SessionInfo {
    pub fn created_at_ms(&self) -> Option<i64> {
        self.time.as_ref().and_then(|t| t.created)
    }
}

/// Errors the relay client surfaces to callers (spec §4.1).
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection error or non-2xx response from `GET /session`, or a 5xx /
    /// timeout / connection error from `POST .../prompt_async`.
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// `POST .../prompt_async` returned 404: the session is gone.
    #[error("session not found on relay")]
    NotFound,
}

/// The relay's two operations (spec §4.1). A trait so the daemon's pipeline
/// can be driven by a `MockRelayClient` in tests without a live HTTP server.
pub trait RelayClient: Send + Sync {
    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionInfo>, RelayError>> + Send + '_>>;

    fn inject(
        &self,
        session_id: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;
}

/// Production relay client backed by `reqwest`.
pub struct HttpRelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: format!("http://{host}:{port}"),
            http,
        }
    }
}

impl RelayClient for HttpRelayClient {
    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionInfo>, RelayError>> + Send + '_>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(format!("{}/session", self.base_url))
                .send()
                .await
                .map_err(|e| RelayError::Unavailable(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(RelayError::Unavailable(format!(
                    "GET /session returned {}",
                    resp.status()
                )));
            }

            resp.json::<Vec<SessionInfo>>()
                .await
                .map_err(|e| RelayError::Unavailable(e.to_string()))
        })
    }

    fn inject(
        &self,
        session_id: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let session_id = session_id.to_string();
        let text = text.to_string();
        Box::pin(async move {
            let resp = self
                .http
                .post(format!(
                    "{}/session/{}/prompt_async",
                    self.base_url, session_id
                ))
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await
                .map_err(|e| RelayError::Unavailable(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(RelayError::NotFound);
            }
            if !resp.status().is_success() {
                return Err(RelayError::Unavailable(format!(
                    "POST prompt_async returned {}",
                    resp.status()
                )));
            }
            Ok(())
        })
    }
}

/// Ensure the relay is reachable, spawning it if configured and not already
/// running (spec §4.1, `ensure_relay_running`).
///
/// Returns once `list_sessions` first succeeds, or an error after
/// `max_wait` if it never does — callers map this to exit code 3 (spec §6).
pub async fn ensure_relay_running(
    client: &dyn RelayClient,
    spawn_command: Option<&(String, Vec<String>)>,
    max_wait: Duration,
) -> Result<(), RelayError> {
    if client.list_sessions().await.is_ok() {
        return Ok(());
    }

    if let Some((program, args)) = spawn_command {
        info!(%program, "relay not reachable, spawning it");
        let spawn_result = std::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        if let Err(e) = spawn_result {
            warn!(error = %e, "failed to spawn relay process");
        }
    }

    let deadline = tokio::time::Instant::now() + max_wait;
    let mut backoff = Duration::from_millis(100);
    loop {
        if client.list_sessions().await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RelayError::Unavailable(
                "relay did not become reachable within the bounded wait".to_string(),
            ));
        }
        tokio::time::sleep(backoff.min(deadline.saturating_duration_since(tokio::time::Instant::now())))
            .await;
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_info_reads_created_at() {
        let json = r#"{"id":"s1","title":"alice-1","directory":"/tmp","time":{"created":1000}}"#;
        let s: SessionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(s.created_at_ms(), Some(1000));
    }

    #[test]
    fn session_info_optional_fields_default() {
        let json = r#"{"id":"s1"}"#;
        let s: SessionInfo = serde_json::from_str(json).unwrap();
        assert!(s.title.is_none());
        assert_eq!(s.created_at_ms(), None);
    }
}
