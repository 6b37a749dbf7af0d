//! Session specification types.
//!
//! A `SessionSpec` is what a caller supplies to create a session; the
//! persisted `session_config.json` is the spec plus server-assigned
//! timestamps. Credentials are consumed at provider-build time and are
//! never written to disk.

use crate::provider::{ProviderKind, ProviderSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Specification for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Unique session id (required).
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub display_name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Which model backend drives this session.
    #[serde(default)]
    pub model_provider: ProviderKind,

    /// Provider connection settings.
    #[serde(default)]
    pub provider_settings: ProviderSettings,

    /// Agent behavior settings.
    #[serde(default)]
    pub agent_settings: AgentSettings,

    /// Tool servers attached to this session.
    #[serde(default)]
    pub tool_servers: Vec<ToolServerSpec>,

    /// Arbitrary user metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Agent behavior settings for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// The system instruction, always first in the context.
    #[serde(default = "default_instruction")]
    pub system_instruction: String,

    /// Maximum iterations per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// How many recent messages are included when assembling a prompt.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    /// Hard cap on stored history; the oldest non-system messages are
    /// dropped beyond it.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Whether memory recall augments the system prompt.
    #[serde(default = "default_true")]
    pub memory_enabled: bool,

    /// How many top-ranked memories are injected per turn.
    #[serde(default = "default_memory_context_size")]
    pub memory_context_size: usize,
}

fn default_instruction() -> String {
    "You are a helpful AI assistant.".into()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_max_context_messages() -> usize {
    50
}
fn default_max_messages() -> usize {
    200
}
fn default_memory_context_size() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_instruction: default_instruction(),
            max_iterations: default_max_iterations(),
            max_context_messages: default_max_context_messages(),
            max_messages: default_max_messages(),
            memory_enabled: default_true(),
            memory_context_size: default_memory_context_size(),
        }
    }
}

/// How a tool server is launched and addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "launch", rename_all = "snake_case")]
pub enum ToolServerSpec {
    /// A child process speaking MCP over stdin/stdout.
    Subprocess {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },

    /// An in-process server built from the service-type registry.
    InProcess {
        name: String,
        factory_id: String,
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl ToolServerSpec {
    /// The server's name in the pool (tool-name prefix).
    pub fn name(&self) -> &str {
        match self {
            ToolServerSpec::Subprocess { name, .. } => name,
            ToolServerSpec::InProcess { name, .. } => name,
        }
    }
}

/// The persisted form of a session: the spec plus server-assigned fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub spec: SessionSpec,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionConfig {
    pub fn new(spec: SessionSpec) -> Self {
        let now = Utc::now();
        Self {
            spec,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A summary row returned by session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether the session is currently live in memory.
    pub live: bool,
}

/// Which population a session listing draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    /// Currently-live sessions only.
    Memory,
    /// All session directories on disk.
    File,
    /// The union of both.
    #[default]
    All,
}

impl std::str::FromStr for ListSource {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(ListSource::Memory),
            "file" => Ok(ListSource::File),
            "all" => Ok(ListSource::All),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown list source '{other}' (expected memory, file, or all)"
            ))),
        }
    }
}
