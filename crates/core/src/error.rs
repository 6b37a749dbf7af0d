//! Error types for the agentd domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level `Error`
//! mirrors the runtime's user-facing taxonomy (NotFound, AlreadyExists,
//! Busy, InvalidInput, ...).

use thiserror::Error;

/// The top-level error type for all agentd operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A session, tool, or service does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation (session id or service id already taken).
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A turn is already running on this session.
    #[error("Session busy: {0}")]
    Busy(String),

    /// A required field is missing or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A tool server is dead or reconnecting.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    // --- Bounded context errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] McpError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Cooperative cancellation.
    #[error("cancelled")]
    Cancelled,

    // --- Configuration ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- I/O (session directories, config files) ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation — a bug, not an expected condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors from MCP transports and tool servers.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn server '{server}': {source}")]
    Spawn {
        server: String,
        source: std::io::Error,
    },

    #[error("Transport error on server '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("Server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("Server '{server}' is unavailable ({state})")]
    Unavailable { server: String, state: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool call timed out on server '{server}' after {timeout_secs}s")]
    Timeout { server: String, timeout_secs: u64 },

    #[error("Server '{server}' terminated with requests in flight")]
    Terminated { server: String },

    #[error("Invalid JSON on connection to '{server}': {source}")]
    InvalidJson {
        server: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Errors from in-process MCP services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),

    #[error("Service instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Service instance already exists: {0}")]
    InstanceExists(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Map to the JSON-RPC error code the MCP wire protocol expects.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ServiceError::UnknownTool(_) => -32601,
            ServiceError::InvalidArguments(_) => -32602,
            _ => -32000,
        }
    }
}
