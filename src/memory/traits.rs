use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a memory entry records.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryKind {
    /// A dispatched action (one entry per attempt).
    Action,
    /// A failed outcome, with the error text as content.
    Error,
    /// A successful outcome.
    Success,
    /// A terminal loop transition (objective summary).
    Decision,
    /// Free-form observation (screenshots, state notes).
    Observation,
}

/// A single memory entry. The embedding is derived deterministically from
/// `content`; the store only ever takes cosine distance over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub kind: MemoryKind,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Input to `Memory::store` — everything but the id/embedding/timestamp,
/// which the store derives.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub content: String,
    pub kind: MemoryKind,
    pub metadata: BTreeMap<String, String>,
}

impl MemoryDraft {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A recalled entry with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

/// Content-addressable recall by meaning, not by exact key.
#[async_trait]
pub trait Memory: Send + Sync {
    fn name(&self) -> &str;

    /// Embed and insert. Fails only on embedding/backend errors, which
    /// propagate — a broken store must never degrade into silent no-ops.
    async fn store(&self, draft: MemoryDraft) -> Result<MemoryEntry, MemoryError>;

    /// Rank all entries (or the `kind`-filtered subset) by cosine similarity
    /// descending, ties broken by most-recent `created_at`. An empty store
    /// yields an empty vec, never an error.
    async fn recall(
        &self,
        query: &str,
        limit: usize,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<RecallHit>, MemoryError>;

    async fn similar_successes(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecallHit>, MemoryError> {
        self.recall(query, limit, Some(MemoryKind::Success)).await
    }

    async fn similar_errors(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecallHit>, MemoryError> {
        self.recall(query, limit, Some(MemoryKind::Error)).await
    }

    async fn count(&self) -> Result<usize, MemoryError>;

    /// Flat snapshot of every entry, for offline inspection.
    async fn export(&self) -> Result<Vec<MemoryEntry>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            MemoryKind::Action,
            MemoryKind::Error,
            MemoryKind::Success,
            MemoryKind::Decision,
            MemoryKind::Observation,
        ] {
            let rendered = kind.to_string();
            assert_eq!(MemoryKind::from_str(&rendered).unwrap(), kind);
        }
    }

    #[test]
    fn draft_builder_collects_metadata() {
        let draft = MemoryDraft::new(MemoryKind::Error, "ERROR: shell failed")
            .with_meta("tool", "shell")
            .with_meta("attempted_fixes", "argument_correction");
        assert_eq!(draft.metadata.len(), 2);
        assert_eq!(draft.metadata["tool"], "shell");
    }
}
