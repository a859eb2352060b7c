//! Client for the daemon's read-only introspection socket (spec §4.12).
//!
//! `brokerd` listens on a Unix domain socket at `{BROKER_HOME}/daemon/broker.sock`.
//! The protocol is newline-delimited JSON, one request line and one response
//! line per connection:
//!
//! ```json
//! // Request
//! {"version":1,"request_id":"req-1","command":"list-agents","payload":{}}
//! // Response
//! {"version":1,"request_id":"req-1","status":"ok","payload":{"agents":[...]}}
//! ```
//!
//! # Platform Notes
//!
//! Unix domain sockets are only available on Unix platforms. On non-Unix
//! platforms, every query function returns `Ok(None)` without attempting a
//! connection.
//!
//! # Graceful Fallback
//!
//! All public functions return `Ok(None)` when the daemon is not running, the
//! socket cannot be reached, or the response cannot be parsed. This mirrors
//! the socket server itself: binding or serving a connection is never fatal
//! to the daemon (spec §4.12), and querying it is never fatal to the CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Protocol version for the socket JSON protocol (spec §4.12).
pub const PROTOCOL_VERSION: u32 = 1;

/// A request sent from the CLI to the daemon over the Unix socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketRequest {
    pub version: u32,
    pub request_id: String,
    /// One of `"list-agents"`, `"list-sessions"`, `"thread-status"`.
    pub command: String,
    pub payload: serde_json::Value,
}

/// A response received from the daemon over the Unix socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketResponse {
    pub version: u32,
    pub request_id: String,
    /// `"ok"` on success, `"error"` on failure.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SocketError>,
}

impl SocketResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Error details returned by the daemon on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketError {
    pub code: String,
    pub message: String,
}

/// One entry of the `list-agents` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub session_id: Option<String>,
    pub last_seen_at: i64,
}

/// One entry of the `list-sessions` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub slug: Option<String>,
    pub oriented: bool,
    pub agent_id: Option<String>,
}

/// The `thread-status` response payload for a single thread id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadStatus {
    pub thread_id: String,
    pub participants: Vec<String>,
    pub last_activity_at: i64,
    pub closed: bool,
}

/// Compute the well-known socket path, `{BROKER_HOME}/daemon/broker.sock`.
pub fn daemon_socket_path() -> anyhow::Result<PathBuf> {
    let home = crate::home::get_home_dir()?;
    Ok(home.join("daemon/broker.sock"))
}

/// Send a single request to the daemon and return the parsed response.
///
/// Returns `Ok(None)` when the daemon is not running or the socket cannot be
/// reached. Returns `Err` only for I/O errors after a connection has been
/// established and a request has been written.
#[allow(unused_variables)]
pub fn query_daemon(request: &SocketRequest) -> anyhow::Result<Option<SocketResponse>> {
    #[cfg(unix)]
    {
        query_daemon_unix(request)
    }

    #[cfg(not(unix))]
    {
        Ok(None)
    }
}

/// Query the daemon for every tracked agent (spec §4.12 `list-agents`).
pub fn query_list_agents() -> anyhow::Result<Option<Vec<AgentSummary>>> {
    let response = match send(new_request("list-agents", serde_json::json!({})))? {
        Some(r) => r,
        None => return Ok(None),
    };
    Ok(extract(response, "agents"))
}

/// Query the daemon for every known relay session (spec §4.12 `list-sessions`).
pub fn query_list_sessions() -> anyhow::Result<Option<Vec<SessionSummary>>> {
    let response = match send(new_request("list-sessions", serde_json::json!({})))? {
        Some(r) => r,
        None => return Ok(None),
    };
    Ok(extract(response, "sessions"))
}

/// Query the daemon for the status of one thread (spec §4.12 `thread-status`).
pub fn query_thread_status(thread_id: &str) -> anyhow::Result<Option<ThreadStatus>> {
    let response = match send(new_request(
        "thread-status",
        serde_json::json!({ "thread_id": thread_id }),
    ))? {
        Some(r) => r,
        None => return Ok(None),
    };

    if !response.is_ok() {
        return Ok(None);
    }
    match response.payload {
        Some(p) => Ok(serde_json::from_value(p).ok()),
        None => Ok(None),
    }
}

fn new_request(command: &str, payload: serde_json::Value) -> SocketRequest {
    SocketRequest {
        version: PROTOCOL_VERSION,
        request_id: new_request_id(),
        command: command.to_string(),
        payload,
    }
}

fn send(request: SocketRequest) -> anyhow::Result<Option<SocketResponse>> {
    query_daemon(&request)
}

fn extract<T: serde::de::DeserializeOwned>(response: SocketResponse, key: &str) -> Option<Vec<T>> {
    if !response.is_ok() {
        return None;
    }
    let payload = response.payload?;
    serde_json::from_value(payload.get(key)?.clone()).ok()
}

/// Generate a short, process-unique request id (no UUID dependency in this crate).
fn new_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let id = std::process::id();
    format!("req-{id}-{nanos}")
}

#[cfg(unix)]
fn query_daemon_unix(request: &SocketRequest) -> anyhow::Result<Option<SocketResponse>> {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    let socket_path = daemon_socket_path()?;

    let stream = match UnixStream::connect(&socket_path) {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };

    let timeout = Duration::from_millis(500);
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();

    let request_line = serde_json::to_string(request)?;

    {
        let mut writer = std::io::BufWriter::new(&stream);
        writer.write_all(request_line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    match reader.read_line(&mut response_line) {
        Ok(0) | Err(_) => return Ok(None),
        Ok(_) => {}
    }

    let response: SocketResponse = match serde_json::from_str(response_line.trim()) {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };

    Ok(Some(response))
}
