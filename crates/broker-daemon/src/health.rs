//! Shared per-component health, consumed by the Status Writer (spec §4.11).

use std::collections::HashMap;
use std::sync::RwLock;

/// One component's last-known health, as the Status Writer reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Running,
    Error(String),
    Disabled,
}

/// Shared registry plugins report their health into; read by [`crate::plugins::status_writer::StatusWriterPlugin`].
pub struct ComponentHealth {
    entries: RwLock<HashMap<String, ComponentState>>,
}

impl ComponentHealth {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn report_running(&self, name: &str) {
        self.entries
            .write()
            .unwrap()
            .insert(name.to_string(), ComponentState::Running);
    }

    pub fn report_error(&self, name: &str, error: impl Into<String>) {
        self.entries
            .write()
            .unwrap()
            .insert(name.to_string(), ComponentState::Error(error.into()));
    }

    pub fn report_disabled(&self, name: &str) {
        self.entries
            .write()
            .unwrap()
            .insert(name.to_string(), ComponentState::Disabled);
    }

    pub fn snapshot(&self) -> HashMap<String, ComponentState> {
        self.entries.read().unwrap().clone()
    }
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self::new()
    }
}
