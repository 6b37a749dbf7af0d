//! Tool descriptors and qualified-name routing.
//!
//! Every tool exposed to the model is addressed by a *qualified name*
//! `"<server>__<tool>"`. The separator disambiguates tools across the
//! multiple MCP servers attached to a session; the split is the engine's
//! routing table.

use serde::{Deserialize, Serialize};

/// Separator between server name and tool name in a qualified tool name.
pub const QUALIFIED_SEPARATOR: &str = "__";

/// A tool exposed by an MCP server, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name. Qualified (`server__tool`) once it leaves the pool.
    pub name: String,

    /// Description of what the tool does (sent to the LLM).
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's input.
    #[serde(default = "empty_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Return a copy of this descriptor with the server prefix applied.
    pub fn qualified(&self, server: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: qualify(server, &self.name),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Join a server name and tool name into a qualified name.
pub fn qualify(server: &str, tool: &str) -> String {
    format!("{server}{QUALIFIED_SEPARATOR}{tool}")
}

/// Split a qualified name back into `(server, tool)`.
///
/// Returns `None` when the name carries no separator; such a name cannot
/// be routed.
pub fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once(QUALIFIED_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualify_and_split() {
        let name = qualify("calc", "add");
        assert_eq!(name, "calc__add");
        assert_eq!(split_qualified(&name), Some(("calc", "add")));
    }

    #[test]
    fn split_uses_first_separator() {
        // Tool names may themselves contain double underscores.
        assert_eq!(
            split_qualified("srv__tool__variant"),
            Some(("srv", "tool__variant"))
        );
        assert_eq!(split_qualified("plain"), None);
    }

    #[test]
    fn descriptor_qualification() {
        let desc = ToolDescriptor {
            name: "add".into(),
            description: "Add two numbers".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            }),
        };
        let qualified = desc.qualified("calc");
        assert_eq!(qualified.name, "calc__add");
        assert_eq!(qualified.description, desc.description);
    }

    #[test]
    fn descriptor_deserializes_wire_field() {
        let json = r#"{"name":"add","description":"Add","inputSchema":{"type":"object"}}"#;
        let desc: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.input_schema["type"], "object");
    }
}
