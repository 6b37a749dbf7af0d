//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and stream the
//! response back as a uniform sequence of [`ProviderEvent`]s. The
//! iteration engine never inspects message content to find tool calls;
//! the adapter is responsible for emitting structured
//! `ToolCallBegin / ToolCallArgumentsDelta / ToolCallEnd` events.
//!
//! Implementations: OpenAI-compatible, Anthropic, local HTTP endpoints.

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chat request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4-20250514")
    pub model: String,

    /// The assembled prompt messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call, already qualified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

pub fn default_temperature() -> f32 {
    0.7
}

/// One event in a provider's response stream.
///
/// Content and tool calls may interleave; tool-call argument fragments
/// arrive incrementally between `ToolCallBegin` and `ToolCallEnd`.
/// Every stream ends with exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// A fragment of assistant text.
    ContentDelta { text: String },

    /// A tool call has started; its id and name are now known.
    ToolCallBegin { id: String, name: String },

    /// A fragment of the JSON arguments for an in-flight tool call.
    ToolCallArgumentsDelta { id: String, delta: String },

    /// The tool call's arguments are complete.
    ToolCallEnd { id: String },

    /// The response is complete.
    Done,
}

/// Connection settings consumed by every provider variant.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    /// Model name.
    pub model: String,

    /// Base URL of the endpoint. Empty = the variant's default.
    #[serde(default)]
    pub base_url: String,

    /// API key. Optional for local providers; never persisted to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token cap per response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Which provider variant a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI and any server exposing the same wire API.
    #[default]
    OpenaiCompat,
    /// Anthropic's native Messages API.
    Anthropic,
    /// A self-hosted service exposing a similar chat+stream endpoint.
    LocalHttp,
}

impl ProviderKind {
    /// Environment variable consulted for credentials when the session
    /// config carries none.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenaiCompat => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::LocalHttp => None,
        }
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Provider({})", self.name())
    }
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The iteration engine calls
/// `chat_stream()` without knowing which provider is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai_compat").
    fn name(&self) -> &str;

    /// Send a request and receive a stream of response events.
    ///
    /// The returned channel yields events in provider order and ends
    /// after `Done` (or an `Err`, which terminates the stream).
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ProviderEvent, ProviderError>>,
        ProviderError,
    >;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_event_roundtrip() {
        let events = vec![
            ProviderEvent::ContentDelta { text: "hi".into() },
            ProviderEvent::ToolCallBegin {
                id: "call_1".into(),
                name: "calc__add".into(),
            },
            ProviderEvent::ToolCallArgumentsDelta {
                id: "call_1".into(),
                delta: r#"{"a":"#.into(),
            },
            ProviderEvent::ToolCallEnd { id: "call_1".into() },
            ProviderEvent::Done,
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: ProviderEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn api_key_never_serialized() {
        let settings = ProviderSettings {
            model: "gpt-4o".into(),
            base_url: String::new(),
            api_key: Some("sk-secret".into()),
            temperature: 0.7,
            max_tokens: None,
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn provider_kind_env_lookup() {
        assert_eq!(
            ProviderKind::OpenaiCompat.api_key_env(),
            Some("OPENAI_API_KEY")
        );
        assert_eq!(ProviderKind::LocalHttp.api_key_env(), None);
    }
}
