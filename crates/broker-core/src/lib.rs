//! Core types and shared infrastructure for the agent broker.
//!
//! This crate provides the data model (spec §3), the on-disk state store,
//! the relay HTTP client, and the ambient infrastructure (config
//! resolution, structured logging, the JSONL event log, atomic file I/O)
//! shared by `brokerd` and the `broker` CLI.
//!
//! Schema types are designed to:
//! - Preserve unknown fields on host-settings documents for forward compatibility
//! - Use proper serde configuration for camelCase ↔ snake_case
//! - Support round-trip serialization without data loss

pub mod config;
pub mod context;
pub mod daemon_client;
pub mod event_log;
pub mod home;
pub mod io;
pub mod logging;
pub mod relay;
pub mod schema;
pub mod state;
pub mod text;

pub use schema::{Agent, HostSettings, Message, MessagePriority, MessageType, Session, Thread};
pub use state::StateStore;

// Re-export toml for plugin config access
pub use toml;
