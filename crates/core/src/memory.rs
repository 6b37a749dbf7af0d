//! Memory trait — the per-session knowledge store.
//!
//! The memory system lets the agent remember facts across turns. Records
//! carry a kind (short-term, long-term, episodic, semantic), an
//! importance score, and access statistics. Short-term records are
//! promoted to long-term by consolidation; a forgetting pass evicts the
//! lowest-scoring records when a cap is exceeded.

use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ShortTerm,
    LongTerm,
    Episodic,
    Semantic,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryKind::ShortTerm => "short_term",
            MemoryKind::LongTerm => "long_term",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
        };
        f.write_str(s)
    }
}

/// A single memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this record
    pub id: String,

    /// Record kind
    pub kind: MemoryKind,

    /// The content of the memory
    pub content: String,

    /// Importance score, clamped to [0, 1]
    pub importance: f64,

    /// When this record was created
    pub created_at: DateTime<Utc>,

    /// When this record was last read by a search or get
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// How many times this record has been accessed
    #[serde(default)]
    pub access_count: u32,

    /// Arbitrary metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryRecord {
    /// Create a new record with a clamped importance score.
    pub fn new(kind: MemoryKind, content: impl Into<String>, importance: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Record an access.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Some(Utc::now());
    }
}

/// A query against the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Keyword query text
    pub text: String,

    /// Restrict to these kinds (empty = all)
    #[serde(default)]
    pub kinds: Vec<MemoryKind>,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum importance threshold
    #[serde(default)]
    pub min_importance: f64,
}

fn default_limit() -> usize {
    10
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kinds: Vec::new(),
            limit: default_limit(),
            min_importance: 0.0,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A search hit: the record plus its combined ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    /// `relevance * importance * recency_weight`
    pub score: f64,
}

/// Aggregate statistics over a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_records: usize,
    pub by_kind: HashMap<String, usize>,
    pub average_importance: f64,
    pub total_access_count: u64,
}

/// Fields updatable on an existing record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// The core MemoryStore trait.
///
/// Implementations: JSONL file store (per-session persistence) and an
/// in-memory store for tests.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Store a record, returning its id.
    async fn store(&self, record: MemoryRecord) -> std::result::Result<String, MemoryError>;

    /// Keyword search ranked by `relevance * importance * recency`.
    /// Matching records have their access statistics updated.
    async fn search(&self, query: MemoryQuery)
        -> std::result::Result<Vec<MemoryHit>, MemoryError>;

    /// Get a record by id, updating its access statistics.
    async fn get(&self, id: &str) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    /// Most recently created records, optionally filtered by kind.
    async fn recent(
        &self,
        limit: usize,
        kinds: &[MemoryKind],
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Highest-importance records at or above a threshold.
    async fn important(
        &self,
        limit: usize,
        min_importance: f64,
        kinds: &[MemoryKind],
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Apply a partial update to a record.
    async fn update(
        &self,
        id: &str,
        update: MemoryUpdate,
    ) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Promote short-term records to long-term where
    /// `access_count >= 3` or `importance >= 0.8`. Returns the number
    /// of promotions.
    async fn consolidate(&self) -> std::result::Result<usize, MemoryError>;

    /// Evict the lowest-scoring records so that at most `max_records`
    /// remain. Returns the number of evictions.
    async fn forget(&self, max_records: usize) -> std::result::Result<usize, MemoryError>;

    /// Aggregate statistics.
    async fn stats(&self) -> std::result::Result<MemoryStats, MemoryError>;

    /// Total record count.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;

    /// Remove every record.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}
