//! Memory store implementations for agentd.
//!
//! Two backends implement [`agentd_core::MemoryStore`]:
//! - [`FileStore`] — JSONL persistence under a session's `memory/`
//!   directory. Loaded on open, flushed on every mutation.
//! - [`InMemoryStore`] — volatile store used in tests and for sessions
//!   with persistence disabled.
//!
//! Both share the same ranking and lifecycle rules:
//! - search score = `relevance * importance * recency_weight`
//! - consolidation promotes short-term records with `access_count >= 3`
//!   or `importance >= 0.8` to long-term
//! - forgetting evicts the lowest `importance/access/age` composite
//!   scores when a cap is exceeded

mod bank;
mod file_store;
mod in_memory;

pub use file_store::FileStore;
pub use in_memory::InMemoryStore;
