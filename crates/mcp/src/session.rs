//! Per-server connection lifecycle.
//!
//! Each server attached to a pool is tracked by a `ServerSession` whose
//! state walks `Spawning → Initializing → Ready → Reconnecting → Dead`.
//! Subprocess servers that die while `Ready` are respawned with
//! exponential backoff; in-process servers cannot be respawned and go
//! straight to `Dead`.

use crate::local::spawn_in_process;
use crate::peer::McpPeer;
use crate::rpc::{
    METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, NOTIFICATION_INITIALIZED,
    PROTOCOL_VERSION,
};
use crate::stdio::{spawn_subprocess, SubprocessHandle};
use agentd_core::error::McpError;
use agentd_core::service::McpService;
use agentd_core::tool::ToolDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Connection state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Spawning,
    Initializing,
    Ready,
    Reconnecting,
    Dead,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerState::Spawning => "spawning",
            ServerState::Initializing => "initializing",
            ServerState::Ready => "ready",
            ServerState::Reconnecting => "reconnecting",
            ServerState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// How a server is brought up.
pub enum ServerLaunch {
    Subprocess {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    InProcess {
        service: Arc<dyn McpService>,
    },
}

/// Timeouts and retry policy shared by every server in a pool.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Time allowed from spawn to `Ready`.
    pub startup_timeout: Duration,
    /// Per-call timeout for `tools/call`.
    pub call_timeout: Duration,
    /// Respawn attempts before a server is declared dead.
    pub reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
    /// Grace period between stdin EOF and SIGKILL at shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            reconnect_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

impl PoolLimits {
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

/// One server attached to a pool.
pub struct ServerSession {
    name: String,
    launch: ServerLaunch,
    limits: PoolLimits,
    state: RwLock<ServerState>,
    peer: RwLock<Option<Arc<McpPeer>>>,
    subprocess: Mutex<Option<Arc<SubprocessHandle>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    shutting_down: AtomicBool,
}

impl ServerSession {
    pub fn new(name: impl Into<String>, launch: ServerLaunch, limits: PoolLimits) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            launch,
            limits,
            state: RwLock::new(ServerState::Spawning),
            peer: RwLock::new(None),
            subprocess: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Bring the server up and start watching for disconnects.
    ///
    /// On failure the server is left `Dead`; the pool keeps the entry so
    /// calls fail fast rather than panicking.
    pub async fn start(self: &Arc<Self>) -> Result<(), McpError> {
        match self.connect_once().await {
            Ok(peer) => {
                self.watch_disconnect(peer);
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = ServerState::Dead;
                Err(err)
            }
        }
    }

    /// Cached tool descriptors (unqualified), refreshed on each `Ready`
    /// transition.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    /// Invoke a tool on this server.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        let state = self.state().await;
        if state != ServerState::Ready {
            return Err(McpError::Unavailable {
                server: self.name.clone(),
                state: state.to_string(),
            });
        }

        let peer = self
            .peer
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::Unavailable {
                server: self.name.clone(),
                state: "no connection".into(),
            })?;

        let params = serde_json::json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
        });

        match tokio::time::timeout(self.limits.call_timeout, peer.request(METHOD_TOOLS_CALL, params))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: self.name.clone(),
                timeout_secs: self.limits.call_timeout.as_secs(),
            }),
        }
    }

    /// Tear the server down: EOF, grace period, kill.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        *self.state.write().await = ServerState::Dead;
        self.peer.write().await.take();

        let handle = self.subprocess.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown(self.limits.shutdown_grace).await;
        }
    }

    /// Spawn the transport and run the MCP handshake.
    async fn connect_once(self: &Arc<Self>) -> Result<Arc<McpPeer>, McpError> {
        *self.state.write().await = ServerState::Spawning;

        let peer = match &self.launch {
            ServerLaunch::Subprocess { command, args, env } => {
                let (peer, handle) = spawn_subprocess(&self.name, command, args, env).await?;
                *self.subprocess.lock().await = Some(handle);
                peer
            }
            ServerLaunch::InProcess { service } => spawn_in_process(&self.name, service.clone()),
        };

        *self.state.write().await = ServerState::Initializing;

        let handshake = async {
            let params = serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {},
            });
            peer.request(METHOD_INITIALIZE, params).await?;
            peer.notify(NOTIFICATION_INITIALIZED, serde_json::json!({})).await?;
            peer.request(METHOD_TOOLS_LIST, serde_json::json!({})).await
        };

        let list_result = match tokio::time::timeout(self.limits.startup_timeout, handshake).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                self.kill_subprocess().await;
                return Err(err);
            }
            Err(_) => {
                self.kill_subprocess().await;
                return Err(McpError::Timeout {
                    server: self.name.clone(),
                    timeout_secs: self.limits.startup_timeout.as_secs(),
                });
            }
        };

        let tools = parse_tool_list(&list_result);
        debug!(server = %self.name, tools = tools.len(), "server initialized");

        *self.tools.write().await = tools;
        *self.peer.write().await = Some(peer.clone());
        *self.state.write().await = ServerState::Ready;

        Ok(peer)
    }

    async fn kill_subprocess(&self) {
        let handle = self.subprocess.lock().await.take();
        if let Some(handle) = handle {
            handle.kill().await;
        }
    }

    /// Watch the peer's closed signal; drive reconnects while the
    /// session is not shutting down.
    fn watch_disconnect(self: &Arc<Self>, peer: Arc<McpPeer>) {
        let session = Arc::clone(self);
        let mut closed = peer.closed();
        drop(peer);

        tokio::spawn(async move {
            loop {
                if closed.wait_for(|c| *c).await.is_err() {
                    return;
                }
                if session.shutting_down.load(Ordering::SeqCst) {
                    return;
                }

                warn!(server = %session.name, "connection lost");
                session.peer.write().await.take();

                // In-process servers cannot be respawned.
                if matches!(session.launch, ServerLaunch::InProcess { .. }) {
                    *session.state.write().await = ServerState::Dead;
                    return;
                }

                *session.state.write().await = ServerState::Reconnecting;

                let mut reconnected = None;
                for attempt in 1..=session.limits.reconnect_attempts {
                    tokio::time::sleep(session.limits.backoff_delay(attempt)).await;
                    if session.shutting_down.load(Ordering::SeqCst) {
                        return;
                    }
                    info!(server = %session.name, attempt, "reconnecting");
                    match session.connect_once().await {
                        Ok(peer) => {
                            reconnected = Some(peer);
                            break;
                        }
                        Err(err) => {
                            warn!(server = %session.name, attempt, error = %err, "reconnect failed");
                        }
                    }
                }

                match reconnected {
                    Some(peer) => {
                        info!(server = %session.name, "reconnected");
                        closed = peer.closed();
                    }
                    None => {
                        warn!(server = %session.name, "reconnect attempts exhausted");
                        *session.state.write().await = ServerState::Dead;
                        return;
                    }
                }
            }
        });
    }
}

fn parse_tool_list(result: &Value) -> Vec<ToolDescriptor> {
    result
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| serde_json::from_value(tool.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::error::ServiceError;
    use agentd_core::service::text_result;
    use async_trait::async_trait;

    struct CalcService;

    #[async_trait]
    impl McpService for CalcService {
        fn name(&self) -> &str {
            "calc"
        }

        async fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
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
            }]
        }

        async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ServiceError> {
            match tool {
                "add" => {
                    let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                    let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                    Ok(text_result(format!("{}", a + b)))
                }
                other => Err(ServiceError::UnknownTool(other.into())),
            }
        }
    }

    fn in_process(service: Arc<dyn McpService>) -> Arc<ServerSession> {
        ServerSession::new(
            "calc",
            ServerLaunch::InProcess { service },
            PoolLimits::default(),
        )
    }

    #[tokio::test]
    async fn lifecycle_reaches_ready() {
        let session = in_process(Arc::new(CalcService));
        session.start().await.unwrap();
        assert_eq!(session.state().await, ServerState::Ready);

        let tools = session.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");
    }

    #[tokio::test]
    async fn call_roundtrip() {
        let session = in_process(Arc::new(CalcService));
        session.start().await.unwrap();

        let result = session
            .call("add", serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "3");
    }

    #[tokio::test]
    async fn call_before_ready_fails_fast() {
        let session = in_process(Arc::new(CalcService));
        let err = session.call("add", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn shutdown_marks_dead() {
        let session = in_process(Arc::new(CalcService));
        session.start().await.unwrap();
        session.shutdown().await;
        assert_eq!(session.state().await, ServerState::Dead);

        let err = session.call("add", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn failed_subprocess_start_is_dead() {
        let session = ServerSession::new(
            "ghost",
            ServerLaunch::Subprocess {
                command: "/nonexistent/not-a-server".into(),
                args: vec![],
                env: HashMap::new(),
            },
            PoolLimits::default(),
        );
        assert!(session.start().await.is_err());
        assert_eq!(session.state().await, ServerState::Dead);
    }

    #[tokio::test]
    async fn subprocess_that_exits_immediately_fails_startup() {
        // `true` exits without answering initialize; startup must fail
        // within the timeout, not hang.
        let session = ServerSession::new(
            "flaky",
            ServerLaunch::Subprocess {
                command: "true".into(),
                args: vec![],
                env: HashMap::new(),
            },
            PoolLimits {
                startup_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );
        assert!(session.start().await.is_err());
        assert_eq!(session.state().await, ServerState::Dead);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let limits = PoolLimits::default();
        assert_eq!(limits.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(limits.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(limits.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(limits.backoff_delay(10), Duration::from_secs(2));
    }

    #[test]
    fn parse_tool_list_tolerates_garbage() {
        let tools = parse_tool_list(&serde_json::json!({
            "tools": [
                { "name": "ok", "description": "fine", "inputSchema": {"type": "object"} },
                { "not_a_tool": true },
            ]
        }));
        // The malformed entry still deserializes via defaults only if it
        // has a name; without one it is dropped.
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ok");
    }
}
