//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any server exposing the same
//! `/v1/chat/completions` wire API (OpenRouter, vLLM, Ollama, Together,
//! Fireworks, ...).
//!
//! Streaming responses arrive as SSE `data:` lines; tool calls arrive
//! as incremental deltas keyed by index and are re-emitted as
//! structured `ToolCallBegin / ToolCallArgumentsDelta / ToolCallEnd`
//! events.

use agentd_core::error::ProviderError;
use agentd_core::message::{Message, Role};
use agentd_core::provider::{ChatRequest, Provider, ProviderEvent};
use agentd_core::tool::ToolDescriptor;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::named("openai_compat", base_url, api_key)
    }

    pub fn named(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");

        let base_url = base_url.into();
        let base_url = if base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };

        Self {
            name: name.into(),
            base_url,
            api_key,
            client,
        }
    }

    /// Convert our Message types to the OpenAI wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ProviderEvent, ProviderError>>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(provider = %self.name, model = %request.model, "sending streaming request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut tracker = ToolCallTracker::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        if tracker.finish(&tx).await.is_err() {
                            return;
                        }
                        let _ = tx.send(Ok(ProviderEvent::Done)).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(parsed) => {
                            if emit_chunk(&parsed, &mut tracker, &tx).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE].
            if tracker.finish(&tx).await.is_err() {
                return;
            }
            let _ = tx.send(Ok(ProviderEvent::Done)).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Tracks in-flight tool calls across stream deltas (keyed by index).
#[derive(Default)]
struct ToolCallTracker {
    /// index -> (id, began)
    calls: Vec<(u32, String, bool)>,
}

impl ToolCallTracker {
    fn entry(&mut self, index: u32) -> &mut (u32, String, bool) {
        if let Some(pos) = self.calls.iter().position(|(i, _, _)| *i == index) {
            &mut self.calls[pos]
        } else {
            self.calls.push((index, String::new(), false));
            self.calls.last_mut().unwrap()
        }
    }

    /// Emit `ToolCallEnd` for every call that began, in index order.
    async fn finish(
        &mut self,
        tx: &mpsc::Sender<Result<ProviderEvent, ProviderError>>,
    ) -> Result<(), ()> {
        self.calls.sort_by_key(|(i, _, _)| *i);
        for (_, id, began) in &self.calls {
            if *began {
                tx.send(Ok(ProviderEvent::ToolCallEnd { id: id.clone() }))
                    .await
                    .map_err(|_| ())?;
            }
        }
        self.calls.clear();
        Ok(())
    }
}

async fn emit_chunk(
    parsed: &StreamResponse,
    tracker: &mut ToolCallTracker,
    tx: &mpsc::Sender<Result<ProviderEvent, ProviderError>>,
) -> Result<(), ()> {
    let Some(choice) = parsed.choices.first() else {
        return Ok(());
    };
    let delta = &choice.delta;

    if let Some(content) = &delta.content {
        if !content.is_empty() {
            tx.send(Ok(ProviderEvent::ContentDelta {
                text: content.clone(),
            }))
            .await
            .map_err(|_| ())?;
        }
    }

    if let Some(tool_deltas) = &delta.tool_calls {
        for tc in tool_deltas {
            let entry = tracker.entry(tc.index);
            if let Some(id) = &tc.id {
                entry.1 = id.clone();
            }
            let call_id = entry.1.clone();

            if let Some(function) = &tc.function {
                if let Some(name) = &function.name {
                    if !entry.2 && !call_id.is_empty() {
                        entry.2 = true;
                        tx.send(Ok(ProviderEvent::ToolCallBegin {
                            id: call_id.clone(),
                            name: name.clone(),
                        }))
                        .await
                        .map_err(|_| ())?;
                    }
                }
                if let Some(arguments) = &function.arguments {
                    if !arguments.is_empty() && !call_id.is_empty() {
                        tx.send(Ok(ProviderEvent::ToolCallArgumentsDelta {
                            id: call_id,
                            delta: arguments.clone(),
                        }))
                        .await
                        .map_err(|_| ())?;
                    }
                }
            }
        }
    }

    Ok(())
}

// --- OpenAI wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::message::MessageToolCall;

    #[test]
    fn base_url_defaults_and_trims() {
        let p = OpenAiCompatProvider::new("", None);
        assert_eq!(p.base_url, DEFAULT_BASE_URL);
        let p = OpenAiCompatProvider::new("http://localhost:8000/v1/", None);
        assert_eq!(p.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("be brief"), Message::user("hello")];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_calls(
            "thinking",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "calc__add".into(),
                arguments: r#"{"a":1}"#.into(),
            }],
        );
        let api = OpenAiCompatProvider::to_api_messages(&[msg]);
        let calls = api[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "calc__add");
        assert_eq!(calls[0].r#type, "function");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "calc__add", "result data", false);
        let api = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api[0].role, "tool");
        assert_eq!(api[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDescriptor {
            name: "calc__add".into(),
            description: "Add".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let api = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api[0].function.name, "calc__add");
    }

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"calc__add","arguments":""}}]},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let tc = &parsed.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(tc.id.as_deref(), Some("call_abc"));
    }

    async fn collect_events(chunks: Vec<&str>) -> Vec<ProviderEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let mut tracker = ToolCallTracker::default();
        for chunk in chunks {
            let parsed: StreamResponse = serde_json::from_str(chunk).unwrap();
            emit_chunk(&parsed, &mut tracker, &tx).await.unwrap();
        }
        tracker.finish(&tx).await.unwrap();
        tx.send(Ok(ProviderEvent::Done)).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn delta_sequence_becomes_structured_events() {
        let events = collect_events(vec![
            r#"{"choices":[{"delta":{"content":"let me "},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc__add","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1,"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"b\":2}"}}]},"finish_reason":null}]}"#,
        ])
        .await;

        assert_eq!(
            events,
            vec![
                ProviderEvent::ContentDelta {
                    text: "let me ".into()
                },
                ProviderEvent::ToolCallBegin {
                    id: "call_1".into(),
                    name: "calc__add".into()
                },
                ProviderEvent::ToolCallArgumentsDelta {
                    id: "call_1".into(),
                    delta: "{\"a\":1,".into()
                },
                ProviderEvent::ToolCallArgumentsDelta {
                    id: "call_1".into(),
                    delta: "\"b\":2}".into()
                },
                ProviderEvent::ToolCallEnd {
                    id: "call_1".into()
                },
                ProviderEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn parallel_tool_calls_tracked_by_index() {
        let events = collect_events(vec![
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":"{}"}},{"index":1,"id":"call_b","function":{"name":"calc","arguments":"{}"}}]},"finish_reason":null}]}"#,
        ])
        .await;

        let ends: Vec<&ProviderEvent> = events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::ToolCallEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 2);
        assert!(matches!(
            ends[0],
            ProviderEvent::ToolCallEnd { id } if id == "call_a"
        ));
        assert!(matches!(
            ends[1],
            ProviderEvent::ToolCallEnd { id } if id == "call_b"
        ));
    }
}
