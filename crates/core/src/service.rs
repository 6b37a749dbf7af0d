//! In-process MCP service trait.
//!
//! An `McpService` is a tool server hosted inside the agent process. The
//! in-process transport adapts it to the same JSON-RPC surface a
//! subprocess server speaks, so the pool treats both identically.

use crate::error::ServiceError;
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;

/// A tool server hosted in-process.
#[async_trait]
pub trait McpService: Send + Sync {
    /// The service's self-reported name.
    fn name(&self) -> &str;

    /// The service's version string.
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// The tools this service exposes (unqualified names).
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool. The returned value is the MCP `result` object
    /// (normally a `content` list).
    async fn call_tool(&self, tool: &str, arguments: Value)
        -> std::result::Result<Value, ServiceError>;
}

impl std::fmt::Debug for dyn McpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "McpService({})", self.name())
    }
}

/// Build a standard MCP text result: `{"content":[{"type":"text","text":...}]}`.
pub fn text_result(text: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{ "type": "text", "text": text.into() }]
    })
}

/// Build an MCP result carrying a JSON payload rendered as text.
pub fn json_result(value: &Value) -> Value {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text_result(rendered)
}

/// Extract the concatenated text of an MCP result's content list, if any.
pub fn result_text(result: &Value) -> Option<String> {
    let items = result.get("content")?.as_array()?;
    let parts: Vec<&str> = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_result_shape() {
        let result = text_result("hello");
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[test]
    fn result_text_concatenates() {
        let result = serde_json::json!({
            "content": [
                { "type": "text", "text": "a" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "b" }
            ]
        });
        assert_eq!(result_text(&result).as_deref(), Some("a\nb"));
        assert_eq!(result_text(&serde_json::json!({})), None);
    }
}
