//! Shared record-set operations used by both store backends.

use agentd_core::memory::{
    MemoryHit, MemoryKind, MemoryQuery, MemoryRecord, MemoryStats, MemoryUpdate,
};
use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

/// An in-memory set of records plus the ranking/lifecycle rules.
#[derive(Default)]
pub(crate) struct MemoryBank {
    pub records: Vec<MemoryRecord>,
}

impl MemoryBank {
    pub fn new(records: Vec<MemoryRecord>) -> Self {
        Self { records }
    }

    pub fn store(&mut self, mut record: MemoryRecord) -> String {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        record.importance = record.importance.clamp(0.0, 1.0);
        let id = record.id.clone();
        self.records.push(record);
        id
    }

    pub fn search(&mut self, query: &MemoryQuery) -> Vec<MemoryHit> {
        let mut hits: Vec<MemoryHit> = Vec::new();

        for record in &mut self.records {
            if !query.kinds.is_empty() && !query.kinds.contains(&record.kind) {
                continue;
            }
            if record.importance < query.min_importance {
                continue;
            }
            let relevance = relevance(&query.text, &record.content);
            if relevance <= 0.0 {
                continue;
            }
            record.touch();
            let score = relevance * record.importance * recency_weight(record);
            hits.push(MemoryHit {
                record: record.clone(),
                score,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.limit);
        hits
    }

    pub fn get(&mut self, id: &str) -> Option<MemoryRecord> {
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        record.touch();
        Some(record.clone())
    }

    pub fn recent(&self, limit: usize, kinds: &[MemoryKind]) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| kinds.is_empty() || kinds.contains(&r.kind))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    pub fn important(
        &self,
        limit: usize,
        min_importance: f64,
        kinds: &[MemoryKind],
    ) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| kinds.is_empty() || kinds.contains(&r.kind))
            .filter(|r| r.importance >= min_importance)
            .cloned()
            .collect();
        // Importance dominates; access count breaks ties.
        records.sort_by(|a, b| {
            let sa = a.importance * 0.7 + (f64::from(a.access_count) / 100.0).min(0.3);
            let sb = b.importance * 0.7 + (f64::from(b.access_count) / 100.0).min(0.3);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        records.truncate(limit);
        records
    }

    pub fn update(&mut self, id: &str, update: MemoryUpdate) -> Option<MemoryRecord> {
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        if let Some(content) = update.content {
            record.content = content;
        }
        if let Some(importance) = update.importance {
            record.importance = importance.clamp(0.0, 1.0);
        }
        if let Some(metadata) = update.metadata {
            record.metadata.extend(metadata);
        }
        Some(record.clone())
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() < before
    }

    /// Promote short-term records that have proven themselves.
    pub fn consolidate(&mut self) -> usize {
        let mut promoted = 0;
        for record in &mut self.records {
            if record.kind == MemoryKind::ShortTerm
                && (record.access_count >= 3 || record.importance >= 0.8)
            {
                record.kind = MemoryKind::LongTerm;
                promoted += 1;
            }
        }
        if promoted > 0 {
            debug!(promoted, "consolidated short-term memories");
        }
        promoted
    }

    /// Evict the lowest-scoring records so at most `max_records` remain.
    pub fn forget(&mut self, max_records: usize) -> usize {
        if self.records.len() <= max_records {
            return 0;
        }
        let excess = self.records.len() - max_records;
        let mut scored: Vec<(usize, f64)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, retention_score(r)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut doomed: Vec<usize> = scored.into_iter().take(excess).map(|(i, _)| i).collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for index in doomed {
            self.records.remove(index);
        }
        debug!(evicted = excess, "forgot low-scoring memories");
        excess
    }

    pub fn stats(&self) -> MemoryStats {
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut total_importance = 0.0;
        let mut total_access: u64 = 0;
        for record in &self.records {
            *by_kind.entry(record.kind.to_string()).or_default() += 1;
            total_importance += record.importance;
            total_access += u64::from(record.access_count);
        }
        MemoryStats {
            total_records: self.records.len(),
            by_kind,
            average_importance: if self.records.is_empty() {
                0.0
            } else {
                total_importance / self.records.len() as f64
            },
            total_access_count: total_access,
        }
    }
}

/// Keyword relevance: exact substring wins, otherwise word overlap.
pub(crate) fn relevance(query: &str, content: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let content_lower = content.to_lowercase();

    if query_lower.trim().is_empty() {
        return 0.0;
    }
    if content_lower.contains(&query_lower) {
        return 1.0;
    }

    let query_words: std::collections::HashSet<&str> = query_lower.split_whitespace().collect();
    let content_words: std::collections::HashSet<&str> = content_lower.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let common = query_words.intersection(&content_words).count();
    common as f64 / query_words.len() as f64
}

/// Newer records rank higher: `1 / (1 + age_days / 30)`.
pub(crate) fn recency_weight(record: &MemoryRecord) -> f64 {
    let age_days = (Utc::now() - record.created_at).num_seconds().max(0) as f64 / 86_400.0;
    1.0 / (1.0 + age_days / 30.0)
}

/// Composite retention score used by the forgetting pass.
fn retention_score(record: &MemoryRecord) -> f64 {
    let age_days = (Utc::now() - record.created_at).num_seconds().max(0) as f64 / 86_400.0;
    record.importance * 0.4
        + (f64::from(record.access_count) / 100.0).min(0.3)
        + (1.0 - age_days / 365.0).max(0.0) * 0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: MemoryKind, content: &str, importance: f64) -> MemoryRecord {
        MemoryRecord::new(kind, content, importance)
    }

    #[test]
    fn relevance_exact_match() {
        assert_eq!(relevance("rust", "I love Rust programming"), 1.0);
    }

    #[test]
    fn relevance_word_overlap() {
        let score = relevance("rust memory safety", "memory is managed safely");
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn relevance_no_match() {
        assert_eq!(relevance("python", "Rust only here"), 0.0);
    }

    #[test]
    fn search_ranks_by_importance() {
        let mut bank = MemoryBank::default();
        bank.store(record(MemoryKind::ShortTerm, "rust is fast", 0.2));
        bank.store(record(MemoryKind::ShortTerm, "rust is safe", 0.9));

        let hits = bank.search(&MemoryQuery::new("rust"));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.content, "rust is safe");
        assert_eq!(hits[0].record.access_count, 1);
    }

    #[test]
    fn consolidate_promotes_on_access_count() {
        let mut bank = MemoryBank::default();
        let id = bank.store(record(MemoryKind::ShortTerm, "frequently used", 0.1));
        for _ in 0..3 {
            bank.get(&id);
        }
        assert_eq!(bank.consolidate(), 1);
        assert_eq!(bank.get(&id).unwrap().kind, MemoryKind::LongTerm);
    }

    #[test]
    fn consolidate_promotes_on_importance() {
        let mut bank = MemoryBank::default();
        bank.store(record(MemoryKind::ShortTerm, "crucial fact", 0.9));
        bank.store(record(MemoryKind::ShortTerm, "trivia", 0.1));
        assert_eq!(bank.consolidate(), 1);
    }

    #[test]
    fn forget_respects_cap_and_importance() {
        let mut bank = MemoryBank::default();
        for i in 0..10 {
            bank.store(record(
                MemoryKind::Episodic,
                &format!("event {i}"),
                if i < 2 { 0.95 } else { 0.1 },
            ));
        }
        let evicted = bank.forget(4);
        assert_eq!(evicted, 6);
        assert_eq!(bank.records.len(), 4);
        // The two high-importance records survive.
        assert!(bank.records.iter().filter(|r| r.importance > 0.9).count() == 2);
    }

    #[test]
    fn forget_noop_under_cap() {
        let mut bank = MemoryBank::default();
        bank.store(record(MemoryKind::Semantic, "fact", 0.5));
        assert_eq!(bank.forget(10), 0);
    }

    #[test]
    fn stats_aggregate() {
        let mut bank = MemoryBank::default();
        bank.store(record(MemoryKind::ShortTerm, "a", 0.2));
        bank.store(record(MemoryKind::LongTerm, "b", 0.8));
        let stats = bank.stats();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.by_kind["short_term"], 1);
        assert!((stats.average_importance - 0.5).abs() < 1e-9);
    }
}
