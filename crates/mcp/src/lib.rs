//! MCP client plumbing for agentd.
//!
//! Implements the Model Context Protocol from the client side:
//! JSON-RPC 2.0 over newline-delimited JSON, carried either over a
//! child process's stdin/stdout or over an in-process paired queue.
//! The [`ToolSessionPool`] owns every server attached to a session and
//! is the engine's single entry point for tool discovery and dispatch.

pub mod local;
pub mod peer;
pub mod pool;
pub mod rpc;
pub mod session;
pub mod stdio;

pub use local::spawn_in_process;
pub use peer::McpPeer;
pub use pool::{CallOutcome, ToolSessionPool};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use session::{PoolLimits, ServerLaunch, ServerSession, ServerState};
