//! # agentd Core
//!
//! Domain types, traits, and error definitions for the agentd agent
//! runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod service;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, McpError, MemoryError, ProviderError, Result, ServiceError};
pub use memory::{MemoryHit, MemoryKind, MemoryQuery, MemoryRecord, MemoryStats, MemoryStore};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ChatRequest, Provider, ProviderEvent, ProviderKind, ProviderSettings};
pub use service::McpService;
pub use session::{
    AgentSettings, ListSource, SessionConfig, SessionSpec, SessionSummary, ToolServerSpec,
};
pub use tool::{qualify, split_qualified, ToolDescriptor};
