//! In-process MCP services for agentd.
//!
//! A *service type* is a named factory that builds fresh
//! [`McpService`] instances from a config map. The process-wide
//! [`ServiceRegistry`] is populated once at startup (no import-time
//! registration, no reflection) and read lock-free thereafter.
//!
//! The [`ServiceManager`] is itself an `McpService` — a meta-MCP server
//! attached to every session's pool under `"mcp_service_manager"` —
//! whose tools let the running agent instantiate further services.

pub mod graph;
pub mod manager;
pub mod memory_service;
pub mod python;

pub use graph::GraphService;
pub use manager::{ServiceManager, SERVICE_MANAGER_NAME};
pub use memory_service::MemoryService;
pub use python::PythonSandboxService;

use agentd_core::error::ServiceError;
use agentd_core::memory::MemoryStore;
use agentd_core::service::McpService;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything a service factory may need from the owning session.
#[derive(Clone)]
pub struct ServiceContext {
    /// Per-service persistent data root (the session's `mcp/` dir).
    pub data_dir: PathBuf,
    /// Graph document store (the session's `graphs/` dir).
    pub graphs_dir: PathBuf,
    /// The session's memory store.
    pub memory: Arc<dyn MemoryStore>,
    /// Default wall-clock cap for sandboxed code execution.
    pub sandbox_timeout: Duration,
}

type ServiceFactory =
    Arc<dyn Fn(&ServiceContext, Value) -> Result<Arc<dyn McpService>, ServiceError> + Send + Sync>;

struct ServiceType {
    description: String,
    factory: ServiceFactory,
}

/// The process-wide catalog of instantiable service types.
///
/// Write-once: built before the engine accepts traffic, shared as
/// `Arc<ServiceRegistry>` afterwards.
pub struct ServiceRegistry {
    types: BTreeMap<String, ServiceType>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// The standard catalog: `python`, `graph`, `memory`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "python",
            "Sandboxed Python file management and code execution",
            |ctx, config| Ok(Arc::new(PythonSandboxService::new(ctx, config)?) as Arc<dyn McpService>),
        );
        registry.register(
            "graph",
            "Workflow graph document management and execution",
            |ctx, _config| Ok(Arc::new(GraphService::new(ctx.graphs_dir.clone())) as Arc<dyn McpService>),
        );
        registry.register(
            "memory",
            "Session memory storage, search, and consolidation",
            |ctx, config| Ok(Arc::new(MemoryService::new(ctx.memory.clone(), config)) as Arc<dyn McpService>),
        );
        registry
    }

    pub fn register<F>(&mut self, name: &str, description: &str, factory: F)
    where
        F: Fn(&ServiceContext, Value) -> Result<Arc<dyn McpService>, ServiceError>
            + Send
            + Sync
            + 'static,
    {
        self.types.insert(
            name.to_string(),
            ServiceType {
                description: description.to_string(),
                factory: Arc::new(factory),
            },
        );
    }

    /// Instantiate a service of the named type.
    pub fn create(
        &self,
        type_name: &str,
        ctx: &ServiceContext,
        config: Value,
    ) -> Result<Arc<dyn McpService>, ServiceError> {
        let service_type = self
            .types
            .get(type_name)
            .ok_or_else(|| ServiceError::UnknownServiceType(type_name.to_string()))?;
        (service_type.factory)(ctx, config)
    }

    /// `(name, description)` pairs of every registered type.
    pub fn types(&self) -> Vec<(String, String)> {
        self.types
            .iter()
            .map(|(name, t)| (name.clone(), t.description.clone()))
            .collect()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use agentd_memory::InMemoryStore;
    use tempfile::TempDir;

    /// A throwaway context rooted in a temp dir.
    pub fn context(dir: &TempDir) -> ServiceContext {
        ServiceContext {
            data_dir: dir.path().join("mcp"),
            graphs_dir: dir.path().join("graphs"),
            memory: Arc::new(InMemoryStore::new()),
            sandbox_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_catalog_contents() {
        let registry = ServiceRegistry::with_builtins();
        let names: Vec<String> = registry.types().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["graph", "memory", "python"]);
        assert!(registry.contains("python"));
        assert!(!registry.contains("sql"));
    }

    #[tokio::test]
    async fn create_unknown_type_fails() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::with_builtins();
        let err = registry
            .create("sql", &test_util::context(&dir), Value::Null)
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownServiceType(_)));
    }

    #[tokio::test]
    async fn create_builtin_graph() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::with_builtins();
        let service = registry
            .create("graph", &test_util::context(&dir), Value::Null)
            .unwrap();
        assert_eq!(service.name(), "graph");
        assert!(!service.list_tools().await.is_empty());
    }
}
