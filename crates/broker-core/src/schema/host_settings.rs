//! Host settings (`.claude/settings.json`), used only for the preflight MCP
//! check (spec §6, "Preflight"): the daemon refuses to start unless the
//! agent-hub MCP is present in the relay host's configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subset of `.claude/settings.json` relevant to the broker: the configured
/// MCP servers. Unknown top-level fields are preserved for forward
/// compatibility but otherwise ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpServerEntry>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl HostSettings {
    pub fn has_mcp_server(&self, name: &str) -> bool {
        self.mcp_servers.contains_key(name)
    }
}

/// A single entry under `mcpServers`. Only the fields the preflight check
/// cares about are modeled; the rest round-trips via `unknown_fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}
