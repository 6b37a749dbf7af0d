//! Turn-level streaming events.
//!
//! `TurnEvent` is the discriminated union emitted while a turn runs.
//! The gateway forwards each event to clients as one SSE record; the
//! serialized form below *is* the wire format, so the serde layout is
//! load-bearing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by the iteration engine during a turn.
///
/// Every turn produces an ordered, finite stream terminated by exactly
/// one `Complete` or one `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A new iteration of the self-driving loop has started.
    Iteration { current: u32, max: u32 },

    /// Partial assistant text from the model.
    Content { content: String },

    /// The model requested a tool invocation.
    ToolCall { tool: String, arguments: Value },

    /// A tool invocation finished.
    ToolResult {
        tool: String,
        success: bool,
        result: Value,
    },

    /// The turn finished normally.
    Complete {
        final_response: String,
        iterations: u32,
    },

    /// The turn failed; the stream ends here.
    Error { error: String },
}

impl TurnEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Complete { .. } | TurnEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_match_protocol() {
        let event = TurnEvent::Iteration { current: 1, max: 10 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"iteration","current":1,"max":10}"#);

        let event = TurnEvent::Content {
            content: "hi".into(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"content","content":"hi"}"#
        );

        let event = TurnEvent::ToolResult {
            tool: "calc__add".into(),
            success: true,
            result: serde_json::json!({"sum": 3}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""success":true"#));

        let event = TurnEvent::Complete {
            final_response: "done".into(),
            iterations: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""final_response":"done""#));
        assert!(json.contains(r#""iterations":2"#));
    }

    #[test]
    fn roundtrip_all_variants() {
        let events = vec![
            TurnEvent::Iteration { current: 2, max: 5 },
            TurnEvent::Content {
                content: "chunk".into(),
            },
            TurnEvent::ToolCall {
                tool: "srv__tool".into(),
                arguments: serde_json::json!({"x": 1}),
            },
            TurnEvent::ToolResult {
                tool: "srv__tool".into(),
                success: false,
                result: Value::String("boom".into()),
            },
            TurnEvent::Complete {
                final_response: "bye".into(),
                iterations: 3,
            },
            TurnEvent::Error {
                error: "cancelled".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: TurnEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn terminal_detection() {
        assert!(TurnEvent::Complete {
            final_response: String::new(),
            iterations: 0
        }
        .is_terminal());
        assert!(TurnEvent::Error {
            error: String::new()
        }
        .is_terminal());
        assert!(!TurnEvent::Iteration { current: 1, max: 1 }.is_terminal());
    }
}
