//! Memory service — the session memory operations exposed as MCP tools.

use agentd_core::error::ServiceError;
use agentd_core::memory::{MemoryKind, MemoryQuery, MemoryRecord, MemoryStore, MemoryUpdate};
use agentd_core::service::{json_result, text_result, McpService};
use agentd_core::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Default record cap; the forgetting pass runs when a store exceeds it.
const DEFAULT_MAX_RECORDS: usize = 1000;

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    max_records: usize,
}

impl MemoryService {
    pub fn new(store: Arc<dyn MemoryStore>, config: Value) -> Self {
        let max_records = config
            .get("max_records")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RECORDS);
        Self { store, max_records }
    }

    async fn memory_store(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let content = arguments
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServiceError::InvalidArguments("'content' is required".into()))?;

        let kind = parse_kind_field(arguments.get("kind"))?.unwrap_or(MemoryKind::ShortTerm);
        let importance = arguments
            .get("importance")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);

        let mut record = MemoryRecord::new(kind, content, importance);
        if let Some(metadata) = arguments.get("metadata").and_then(Value::as_object) {
            record.metadata = metadata.clone().into_iter().collect();
        }

        let id = self
            .store
            .store(record)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        // Forgetting runs on-write once the cap is exceeded.
        let count = self
            .store
            .count()
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        if count > self.max_records {
            let _ = self.store.forget(self.max_records).await;
        }

        Ok(text_result(format!("Stored memory {id}")))
    }

    async fn memory_search(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let text = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::InvalidArguments("'query' is required".into()))?;

        let mut query = MemoryQuery::new(text);
        if let Some(limit) = arguments.get("limit").and_then(Value::as_u64) {
            query.limit = limit as usize;
        }
        if let Some(min) = arguments.get("min_importance").and_then(Value::as_f64) {
            query.min_importance = min;
        }
        query.kinds = parse_kinds_field(arguments.get("kinds"))?;

        let hits = self
            .store
            .search(query)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(json_result(&serde_json::json!({
            "count": hits.len(),
            "results": hits,
        })))
    }

    async fn memory_get_recent(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let kinds = parse_kinds_field(arguments.get("kinds"))?;
        let records = self
            .store
            .recent(limit, &kinds)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(json_result(&serde_json::json!({
            "count": records.len(),
            "memories": records,
        })))
    }

    async fn memory_get_important(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let min_importance = arguments
            .get("min_importance")
            .and_then(Value::as_f64)
            .unwrap_or(0.7);
        let kinds = parse_kinds_field(arguments.get("kinds"))?;
        let records = self
            .store
            .important(limit, min_importance, &kinds)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(json_result(&serde_json::json!({
            "count": records.len(),
            "memories": records,
        })))
    }

    async fn memory_update(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let id = arguments
            .get("memory_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::InvalidArguments("'memory_id' is required".into()))?;

        let update = MemoryUpdate {
            content: arguments
                .get("content")
                .and_then(Value::as_str)
                .map(String::from),
            importance: arguments.get("importance").and_then(Value::as_f64),
            metadata: arguments
                .get("metadata")
                .and_then(Value::as_object)
                .map(|m| m.clone().into_iter().collect()),
        };

        match self
            .store
            .update(id, update)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?
        {
            Some(record) => Ok(json_result(&serde_json::to_value(record).unwrap_or_default())),
            None => Err(ServiceError::ExecutionFailed(format!(
                "memory '{id}' not found"
            ))),
        }
    }

    async fn memory_delete(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let id = arguments
            .get("memory_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::InvalidArguments("'memory_id' is required".into()))?;

        let deleted = self
            .store
            .delete(id)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        if deleted {
            Ok(text_result(format!("Deleted memory {id}")))
        } else {
            Err(ServiceError::ExecutionFailed(format!(
                "memory '{id}' not found"
            )))
        }
    }

    async fn memory_consolidate(&self) -> Result<Value, ServiceError> {
        let promoted = self
            .store
            .consolidate()
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(text_result(format!(
            "Promoted {promoted} short-term memories to long-term"
        )))
    }

    async fn memory_stats(&self) -> Result<Value, ServiceError> {
        let stats = self
            .store
            .stats()
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(json_result(&serde_json::to_value(stats).unwrap_or_default()))
    }
}

#[async_trait]
impl McpService for MemoryService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let kind_schema = serde_json::json!({
            "type": "array",
            "items": {
                "type": "string",
                "enum": ["short_term", "long_term", "episodic", "semantic"]
            },
            "description": "Restrict to these memory kinds"
        });

        vec![
            ToolDescriptor {
                name: "memory_store".into(),
                description: "Store a memory record".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "content": { "type": "string", "description": "Memory content" },
                        "kind": {
                            "type": "string",
                            "enum": ["short_term", "long_term", "episodic", "semantic"],
                            "description": "Memory kind (default short_term)"
                        },
                        "importance": {
                            "type": "number",
                            "description": "Importance in [0, 1] (default 0.5)"
                        },
                        "metadata": { "type": "object" }
                    },
                    "required": ["content"]
                }),
            },
            ToolDescriptor {
                name: "memory_search".into(),
                description: "Keyword search over stored memories".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "limit": { "type": "integer" },
                        "min_importance": { "type": "number" },
                        "kinds": kind_schema
                    },
                    "required": ["query"]
                }),
            },
            ToolDescriptor {
                name: "memory_get_recent".into(),
                description: "Most recently created memories".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer" },
                        "kinds": kind_schema
                    }
                }),
            },
            ToolDescriptor {
                name: "memory_get_important".into(),
                description: "Highest-importance memories".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer" },
                        "min_importance": { "type": "number" },
                        "kinds": kind_schema
                    }
                }),
            },
            ToolDescriptor {
                name: "memory_update".into(),
                description: "Update a memory record".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "memory_id": { "type": "string" },
                        "content": { "type": "string" },
                        "importance": { "type": "number" },
                        "metadata": { "type": "object" }
                    },
                    "required": ["memory_id"]
                }),
            },
            ToolDescriptor {
                name: "memory_delete".into(),
                description: "Delete a memory record".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "memory_id": { "type": "string" } },
                    "required": ["memory_id"]
                }),
            },
            ToolDescriptor {
                name: "memory_consolidate".into(),
                description: "Promote qualifying short-term memories to long-term".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolDescriptor {
                name: "memory_stats".into(),
                description: "Aggregate statistics over the memory store".into(),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ServiceError> {
        match tool {
            "memory_store" => self.memory_store(&arguments).await,
            "memory_search" => self.memory_search(&arguments).await,
            "memory_get_recent" => self.memory_get_recent(&arguments).await,
            "memory_get_important" => self.memory_get_important(&arguments).await,
            "memory_update" => self.memory_update(&arguments).await,
            "memory_delete" => self.memory_delete(&arguments).await,
            "memory_consolidate" => self.memory_consolidate().await,
            "memory_stats" => self.memory_stats().await,
            other => Err(ServiceError::UnknownTool(other.to_string())),
        }
    }
}

fn parse_kind_field(value: Option<&Value>) -> Result<Option<MemoryKind>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|_| ServiceError::InvalidArguments(format!("invalid memory kind: {v}"))),
    }
}

fn parse_kinds_field(value: Option<&Value>) -> Result<Vec<MemoryKind>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| ServiceError::InvalidArguments(format!("invalid memory kinds: {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::service::result_text;
    use agentd_memory::InMemoryStore;

    fn service() -> (MemoryService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            MemoryService::new(store.clone(), Value::Null),
            store,
        )
    }

    #[tokio::test]
    async fn store_and_search() {
        let (service, _store) = service();
        service
            .call_tool(
                "memory_store",
                serde_json::json!({"content": "user prefers dark mode", "importance": 0.8}),
            )
            .await
            .unwrap();

        let result = service
            .call_tool("memory_search", serde_json::json!({"query": "dark mode"}))
            .await
            .unwrap();
        let text = result_text(&result).unwrap();
        assert!(text.contains("dark mode"));
        assert!(text.contains(r#""count": 1"#));
    }

    #[tokio::test]
    async fn store_requires_content() {
        let (service, _store) = service();
        let err = service
            .call_tool("memory_store", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn invalid_kind_rejected() {
        let (service, _store) = service();
        let err = service
            .call_tool(
                "memory_store",
                serde_json::json!({"content": "x", "kind": "eternal"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn consolidate_reports_promotions() {
        let (service, store) = service();
        store
            .store(MemoryRecord::new(MemoryKind::ShortTerm, "vital", 0.95))
            .await
            .unwrap();

        let result = service
            .call_tool("memory_consolidate", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result_text(&result).unwrap().contains("Promoted 1"));
    }

    #[tokio::test]
    async fn cap_triggers_forgetting() {
        let store = Arc::new(InMemoryStore::new());
        let service =
            MemoryService::new(store.clone(), serde_json::json!({"max_records": 3}));

        for i in 0..5 {
            service
                .call_tool(
                    "memory_store",
                    serde_json::json!({"content": format!("note {i}"), "importance": 0.1}),
                )
                .await
                .unwrap();
        }

        assert!(store.count().await.unwrap() <= 3);
    }

    #[tokio::test]
    async fn stats_and_delete_roundtrip() {
        let (service, store) = service();
        let id = store
            .store(MemoryRecord::new(MemoryKind::Semantic, "fact", 0.5))
            .await
            .unwrap();

        let stats = service.call_tool("memory_stats", serde_json::json!({})).await.unwrap();
        assert!(result_text(&stats).unwrap().contains("total_records"));

        service
            .call_tool("memory_delete", serde_json::json!({"memory_id": id}))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
