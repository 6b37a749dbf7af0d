//! The tool session pool — one per session.
//!
//! Owns every tool server attached to a session, aggregates their tool
//! catalogues under qualified names, and routes calls by prefix. Server
//! failure never fails the pool: calls to a dead or reconnecting server
//! report an error outcome that the engine feeds back to the model.

use crate::session::{PoolLimits, ServerLaunch, ServerSession, ServerState};
use agentd_core::error::McpError;
use agentd_core::service::McpService;
use agentd_core::tool::{self, ToolDescriptor};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The outcome of a routed tool call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub ok: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl CallOutcome {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            result,
            error: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            ok: false,
            result: Value::String(message.clone()),
            error: Some(message),
        }
    }
}

/// All tool servers belonging to one session.
pub struct ToolSessionPool {
    limits: PoolLimits,
    servers: RwLock<Vec<Arc<ServerSession>>>,
}

impl ToolSessionPool {
    pub fn new(limits: PoolLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            servers: RwLock::new(Vec::new()),
        })
    }

    /// Attach and start a subprocess server.
    pub async fn add_subprocess(
        &self,
        name: &str,
        command: &str,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<(), McpError> {
        let session = ServerSession::new(
            name,
            ServerLaunch::Subprocess {
                command: command.to_string(),
                args,
                env,
            },
            self.limits.clone(),
        );
        self.register(session).await
    }

    /// Attach and start an in-process server.
    pub async fn add_in_process(
        &self,
        name: &str,
        service: Arc<dyn McpService>,
    ) -> Result<(), McpError> {
        let session = ServerSession::new(
            name,
            ServerLaunch::InProcess { service },
            self.limits.clone(),
        );
        self.register(session).await
    }

    async fn register(&self, session: Arc<ServerSession>) -> Result<(), McpError> {
        {
            let servers = self.servers.read().await;
            if servers.iter().any(|s| s.name() == session.name()) {
                return Err(McpError::Transport {
                    server: session.name().to_string(),
                    message: "a server with this name is already attached".into(),
                });
            }
        }

        // Startup failure leaves the entry in place as Dead so calls
        // fail fast instead of "tool not found".
        if let Err(err) = session.start().await {
            warn!(server = %session.name(), error = %err, "server failed to start");
        } else {
            info!(server = %session.name(), "server attached");
        }

        self.servers.write().await.push(session);
        Ok(())
    }

    /// Detach a server, terminating it. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let session = {
            let mut servers = self.servers.write().await;
            match servers.iter().position(|s| s.name() == name) {
                Some(index) => servers.remove(index),
                None => return false,
            }
        };
        session.shutdown().await;
        info!(server = %name, "server detached");
        true
    }

    /// Whether a server with this name is attached.
    pub async fn contains(&self, name: &str) -> bool {
        self.servers.read().await.iter().any(|s| s.name() == name)
    }

    /// Aggregate tool catalogue under qualified names.
    ///
    /// Deduplicated by qualified name; on collision the first-registered
    /// server wins and a warning is logged.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let servers = self.servers.read().await.clone();
        let mut seen: HashSet<String> = HashSet::new();
        let mut tools = Vec::new();

        for server in servers {
            for descriptor in server.tools().await {
                let qualified = descriptor.qualified(server.name());
                if seen.insert(qualified.name.clone()) {
                    tools.push(qualified);
                } else {
                    warn!(tool = %qualified.name, "duplicate qualified tool name, first wins");
                }
            }
        }

        tools
    }

    /// Route a call by qualified name.
    pub async fn call(&self, qualified_name: &str, arguments: Value) -> CallOutcome {
        match self.try_call(qualified_name, arguments).await {
            Ok(result) => CallOutcome::success(result),
            Err(err) => CallOutcome::failure(err.to_string()),
        }
    }

    async fn try_call(&self, qualified_name: &str, arguments: Value) -> Result<Value, McpError> {
        let (server_name, tool_name) = tool::split_qualified(qualified_name)
            .ok_or_else(|| McpError::ToolNotFound(qualified_name.to_string()))?;

        let server = {
            let servers = self.servers.read().await;
            servers
                .iter()
                .find(|s| s.name() == server_name)
                .cloned()
                .ok_or_else(|| McpError::ToolNotFound(qualified_name.to_string()))?
        };

        server.call(tool_name, arguments).await
    }

    /// Current state of every attached server.
    pub async fn server_states(&self) -> HashMap<String, ServerState> {
        let servers = self.servers.read().await.clone();
        let mut states = HashMap::new();
        for server in servers {
            states.insert(server.name().to_string(), server.state().await);
        }
        states
    }

    /// Terminate every server: EOF, grace period, kill stragglers.
    pub async fn shutdown(&self) {
        let servers: Vec<_> = self.servers.write().await.drain(..).collect();
        for server in servers {
            server.shutdown().await;
        }
    }
}
