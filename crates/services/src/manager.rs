//! The built-in service manager — a meta-MCP server.
//!
//! Attached to every session's pool under a fixed name, it exposes
//! tools that create, inspect, and invoke *further* in-process MCP
//! services. Instances it creates are registered into the owning pool
//! under their service id, so their tools appear to the model as
//! `"<service_id>__<tool>"` alongside a direct `service_call` path.

use crate::{ServiceContext, ServiceRegistry};
use agentd_core::error::ServiceError;
use agentd_core::service::{text_result, McpService};
use agentd_core::tool::ToolDescriptor;
use agentd_mcp::ToolSessionPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::info;

/// The fixed pool name of the built-in manager.
pub const SERVICE_MANAGER_NAME: &str = "mcp_service_manager";

struct Instance {
    service_type: String,
    config: Value,
    created_at: DateTime<Utc>,
    service: Arc<dyn McpService>,
}

pub struct ServiceManager {
    registry: Arc<ServiceRegistry>,
    ctx: ServiceContext,
    /// The owning pool; weak because the pool owns *us* via the
    /// in-process server session.
    pool: Weak<ToolSessionPool>,
    instances: RwLock<HashMap<String, Instance>>,
}

impl ServiceManager {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        ctx: ServiceContext,
        pool: &Arc<ToolSessionPool>,
    ) -> Self {
        Self {
            registry,
            ctx,
            pool: Arc::downgrade(pool),
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn pool(&self) -> Result<Arc<ToolSessionPool>, ServiceError> {
        self.pool
            .upgrade()
            .ok_or_else(|| ServiceError::ExecutionFailed("owning pool is gone".into()))
    }

    async fn service_list(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let show_instances = arguments
            .get("show_instances")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut output = String::from("Available service types:\n");
        for (name, description) in self.registry.types() {
            output.push_str(&format!("\n- {name}: {description}"));
        }

        if show_instances {
            output.push_str("\n\nActive service instances:");
            let instances = self.instances.read().await;
            if instances.is_empty() {
                output.push_str("\n(none)");
            } else {
                let mut ids: Vec<&String> = instances.keys().collect();
                ids.sort();
                for id in ids {
                    let info = &instances[id];
                    output.push_str(&format!(
                        "\n- {id} (type: {}, created: {})",
                        info.service_type,
                        info.created_at.to_rfc3339()
                    ));
                }
            }
        }

        Ok(text_result(output))
    }

    async fn service_create(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let service_type = required_str(arguments, "service_type")?;
        let service_id = required_str(arguments, "service_id")?;
        let config = arguments.get("config").cloned().unwrap_or(Value::Null);

        if !self.registry.contains(service_type) {
            return Err(ServiceError::UnknownServiceType(service_type.to_string()));
        }
        if self.instances.read().await.contains_key(service_id) {
            return Err(ServiceError::InstanceExists(service_id.to_string()));
        }

        let pool = self.pool()?;
        if pool.contains(service_id).await {
            return Err(ServiceError::InstanceExists(service_id.to_string()));
        }

        let service = self
            .registry
            .create(service_type, &self.ctx, config.clone())?;

        pool.add_in_process(service_id, service.clone())
            .await
            .map_err(|e| ServiceError::ExecutionFailed(e.to_string()))?;

        self.instances.write().await.insert(
            service_id.to_string(),
            Instance {
                service_type: service_type.to_string(),
                config,
                created_at: Utc::now(),
                service,
            },
        );

        info!(service_id, service_type, "service instance created");
        Ok(text_result(format!(
            "Service instance '{service_id}' (type: {service_type}) created"
        )))
    }

    async fn service_delete(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let service_id = required_str(arguments, "service_id")?;

        let removed = self.instances.write().await.remove(service_id);
        let Some(instance) = removed else {
            return Err(ServiceError::InstanceNotFound(service_id.to_string()));
        };

        self.pool()?.remove(service_id).await;

        info!(service_id, "service instance deleted");
        Ok(text_result(format!(
            "Service instance '{service_id}' (type: {}) deleted",
            instance.service_type
        )))
    }

    async fn service_info(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let service_id = required_str(arguments, "service_id")?;
        let instances = self.instances.read().await;
        let instance = instances
            .get(service_id)
            .ok_or_else(|| ServiceError::InstanceNotFound(service_id.to_string()))?;

        let tool_count = instance.service.list_tools().await.len();
        let mut output = format!(
            "Service instance: {service_id}\ntype: {}\ncreated: {}\ntools: {tool_count}",
            instance.service_type,
            instance.created_at.to_rfc3339()
        );
        if !instance.config.is_null() {
            output.push_str(&format!(
                "\nconfig: {}",
                serde_json::to_string_pretty(&instance.config).unwrap_or_default()
            ));
        }
        Ok(text_result(output))
    }

    async fn service_list_tools(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let service_id = required_str(arguments, "service_id")?;
        let instances = self.instances.read().await;
        let instance = instances
            .get(service_id)
            .ok_or_else(|| ServiceError::InstanceNotFound(service_id.to_string()))?;

        let mut output = format!("Tools of service '{service_id}':\n");
        for tool in instance.service.list_tools().await {
            output.push_str(&format!("\n- {}: {}", tool.name, tool.description));
        }
        Ok(text_result(output))
    }

    async fn service_call(&self, arguments: &Value) -> Result<Value, ServiceError> {
        let service_id = required_str(arguments, "service_id")?;
        let tool_name = required_str(arguments, "tool_name")?;
        let tool_args = arguments
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        let service = {
            let instances = self.instances.read().await;
            instances
                .get(service_id)
                .ok_or_else(|| ServiceError::InstanceNotFound(service_id.to_string()))?
                .service
                .clone()
        };

        let mut result = service.call_tool(tool_name, tool_args).await?;

        // Tag text content with the originating instance.
        if let Some(items) = result.get_mut("content").and_then(Value::as_array_mut) {
            for item in items {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        let tagged = format!("[{service_id}] {text}");
                        item["text"] = Value::String(tagged);
                    }
                }
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl McpService for ServiceManager {
    fn name(&self) -> &str {
        SERVICE_MANAGER_NAME
    }

    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let type_names: Vec<String> =
            self.registry.types().into_iter().map(|(n, _)| n).collect();

        vec![
            ToolDescriptor {
                name: "service_list".into(),
                description: "List available MCP service types and active instances".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "show_instances": {
                            "type": "boolean",
                            "description": "Include active instances (default true)"
                        }
                    }
                }),
            },
            ToolDescriptor {
                name: "service_create".into(),
                description: "Create a new MCP service instance".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "service_type": {
                            "type": "string",
                            "enum": type_names,
                            "description": "Service type"
                        },
                        "service_id": {
                            "type": "string",
                            "description": "Unique identifier for the instance"
                        },
                        "config": {
                            "type": "object",
                            "description": "Service configuration (optional)"
                        }
                    },
                    "required": ["service_type", "service_id"]
                }),
            },
            ToolDescriptor {
                name: "service_delete".into(),
                description: "Delete an MCP service instance".into(),
                input_schema: id_only_schema(),
            },
            ToolDescriptor {
                name: "service_info".into(),
                description: "Get details of a service instance".into(),
                input_schema: id_only_schema(),
            },
            ToolDescriptor {
                name: "service_list_tools".into(),
                description: "List the tools of a service instance".into(),
                input_schema: id_only_schema(),
            },
            ToolDescriptor {
                name: "service_call".into(),
                description: "Invoke a tool on a specific service instance".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "service_id": {
                            "type": "string",
                            "description": "Unique identifier of the instance"
                        },
                        "tool_name": {
                            "type": "string",
                            "description": "Tool to invoke"
                        },
                        "arguments": {
                            "type": "object",
                            "description": "Tool arguments"
                        }
                    },
                    "required": ["service_id", "tool_name"]
                }),
            },
        ]
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ServiceError> {
        match tool {
            "service_list" => self.service_list(&arguments).await,
            "service_create" => self.service_create(&arguments).await,
            "service_delete" => self.service_delete(&arguments).await,
            "service_info" => self.service_info(&arguments).await,
            "service_list_tools" => self.service_list_tools(&arguments).await,
            "service_call" => self.service_call(&arguments).await,
            other => Err(ServiceError::UnknownTool(other.to_string())),
        }
    }
}

fn id_only_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "service_id": {
                "type": "string",
                "description": "Unique identifier of the instance"
            }
        },
        "required": ["service_id"]
    })
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
    use crate::test_util;
    use agentd_core::service::result_text;
    use agentd_mcp::PoolLimits;
    use tempfile::tempdir;

    async fn manager_with_pool() -> (Arc<ServiceManager>, Arc<ToolSessionPool>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let pool = ToolSessionPool::new(PoolLimits::default());
        let manager = Arc::new(ServiceManager::new(
            Arc::new(ServiceRegistry::with_builtins()),
            test_util::context(&dir),
            &pool,
        ));
        pool.add_in_process(SERVICE_MANAGER_NAME, manager.clone() as Arc<dyn McpService>)
            .await
            .unwrap();
        (manager, pool, dir)
    }

    #[tokio::test]
    async fn list_shows_types_and_instances() {
        let (manager, _pool, _dir) = manager_with_pool().await;
        let result = manager
            .call_tool("service_list", serde_json::json!({}))
            .await
            .unwrap();
        let text = result_text(&result).unwrap();
        assert!(text.contains("python"));
        assert!(text.contains("graph"));
        assert!(text.contains("memory"));
        assert!(text.contains("(none)"));
    }

    #[tokio::test]
    async fn create_registers_tools_in_pool() {
        let (manager, pool, _dir) = manager_with_pool().await;

        manager
            .call_tool(
                "service_create",
                serde_json::json!({"service_type": "memory", "service_id": "mem1"}),
            )
            .await
            .unwrap();

        let tools = pool.list_tools().await;
        assert!(tools.iter().any(|t| t.name == "mem1__memory_store"));
        assert!(tools.iter().any(|t| t.name.starts_with("mcp_service_manager__")));
    }

    #[tokio::test]
    async fn duplicate_instance_rejected() {
        let (manager, _pool, _dir) = manager_with_pool().await;
        let args = serde_json::json!({"service_type": "memory", "service_id": "mem1"});
        manager.call_tool("service_create", args.clone()).await.unwrap();
        let err = manager.call_tool("service_create", args).await.unwrap_err();
        assert!(matches!(err, ServiceError::InstanceExists(_)));
    }

    #[tokio::test]
    async fn delete_unregisters_from_pool() {
        let (manager, pool, _dir) = manager_with_pool().await;
        manager
            .call_tool(
                "service_create",
                serde_json::json!({"service_type": "memory", "service_id": "mem1"}),
            )
            .await
            .unwrap();

        manager
            .call_tool("service_delete", serde_json::json!({"service_id": "mem1"}))
            .await
            .unwrap();

        assert!(!pool.contains("mem1").await);
        let err = manager
            .call_tool("service_delete", serde_json::json!({"service_id": "mem1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn service_call_delegates_and_tags() {
        let (manager, _pool, _dir) = manager_with_pool().await;
        manager
            .call_tool(
                "service_create",
                serde_json::json!({"service_type": "memory", "service_id": "mem1"}),
            )
            .await
            .unwrap();

        let result = manager
            .call_tool(
                "service_call",
                serde_json::json!({
                    "service_id": "mem1",
                    "tool_name": "memory_store",
                    "arguments": {"content": "the sky is blue"}
                }),
            )
            .await
            .unwrap();
        let text = result_text(&result).unwrap();
        assert!(text.starts_with("[mem1]"));
    }

    #[tokio::test]
    async fn info_reports_tool_count() {
        let (manager, _pool, _dir) = manager_with_pool().await;
        manager
            .call_tool(
                "service_create",
                serde_json::json!({"service_type": "graph", "service_id": "g1"}),
            )
            .await
            .unwrap();

        let result = manager
            .call_tool("service_info", serde_json::json!({"service_id": "g1"}))
            .await
            .unwrap();
        let text = result_text(&result).unwrap();
        assert!(text.contains("type: graph"));
        assert!(text.contains("tools:"));
    }

    #[tokio::test]
    async fn unknown_service_type_rejected() {
        let (manager, _pool, _dir) = manager_with_pool().await;
        let err = manager
            .call_tool(
                "service_create",
                serde_json::json!({"service_type": "sql", "service_id": "db"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownServiceType(_)));
    }
}
