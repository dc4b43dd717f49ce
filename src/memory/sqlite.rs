use super::embeddings::EmbeddingProvider;
use super::traits::{Memory, MemoryDraft, MemoryEntry, MemoryKind, RecallHit};
use super::vector;
use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// SQLite-backed semantic memory.
///
/// Writes serialize on the connection; recall is served from an in-memory
/// index behind a `RwLock`, hydrated from disk at open. Entries persist
/// across process restarts.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
    index: RwLock<Vec<MemoryEntry>>,
    db_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteMemory {
    pub fn open(
        state_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, MemoryError> {
        let db_path = state_dir.join("memory").join("agent.db");

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::BackendUnavailable(e.to_string()))?;
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Self::init_schema(&conn)?;
        let index = Self::load_index(&conn)?;
        tracing::debug!(
            entries = index.len(),
            path = %db_path.display(),
            "memory index hydrated"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            index: RwLock::new(index),
            db_path,
            embedder,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), MemoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                id         TEXT PRIMARY KEY,
                content    TEXT NOT NULL,
                kind       TEXT NOT NULL,
                metadata   TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries(kind);
            CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);",
        )?;
        Ok(())
    }

    fn load_index(conn: &Connection) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut stmt = conn.prepare(
            "SELECT id, content, kind, metadata, embedding, created_at
             FROM entries ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let content: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let metadata: String = row.get(3)?;
            let embedding: Vec<u8> = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok((id, content, kind, metadata, embedding, created_at))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, content, kind, metadata, embedding, created_at) = row?;
            let kind = MemoryKind::from_str(&kind)
                .map_err(|_| MemoryError::Query(format!("unknown memory kind '{kind}'")))?;
            let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
                .map_err(|e| MemoryError::Query(format!("metadata decode failed: {e}")))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| MemoryError::Query(format!("timestamp decode failed: {e}")))?
                .with_timezone(&Utc);
            entries.push(MemoryEntry {
                id,
                content,
                embedding: vector::blob_to_embedding(&embedding),
                kind,
                metadata,
                created_at,
            });
        }
        Ok(entries)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl Memory for SqliteMemory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, draft: MemoryDraft) -> Result<MemoryEntry, MemoryError> {
        let embedding = self
            .embedder
            .embed_one(&draft.content)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                got: embedding.len(),
            });
        }

        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            content: draft.content,
            embedding,
            kind: draft.kind,
            metadata: draft.metadata,
            created_at: Utc::now(),
        };

        let metadata_json = serde_json::to_string(&entry.metadata)
            .map_err(|e| MemoryError::Query(format!("metadata encode failed: {e}")))?;

        {
            let conn = self
                .conn
                .lock()
                .map_err(|_| MemoryError::BackendUnavailable("connection poisoned".into()))?;
            conn.execute(
                "INSERT INTO entries (id, content, kind, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id,
                    entry.content,
                    entry.kind.to_string(),
                    metadata_json,
                    vector::embedding_to_blob(&entry.embedding),
                    entry.created_at.to_rfc3339(),
                ],
            )?;
        }

        self.index.write().await.push(entry.clone());
        tracing::debug!(id = %entry.id, kind = %entry.kind, "memory stored");
        Ok(entry)
    }

    async fn recall(
        &self,
        query: &str,
        limit: usize,
        kind: Option<MemoryKind>,
    ) -> Result<Vec<RecallHit>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // An empty store answers before the embedder is consulted. The
        // read lock is held only while scoring, never across the embed.
        {
            let index = self.index.read().await;
            if index.is_empty() {
                return Ok(Vec::new());
            }
        }

        let query_embedding = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let index = self.index.read().await;
        let mut hits: Vec<RecallHit> = index
            .iter()
            .filter(|entry| kind.is_none_or(|k| entry.kind == k))
            .map(|entry| RecallHit {
                similarity: vector::cosine_similarity(&query_embedding, &entry.embedding),
                entry: entry.clone(),
            })
            .collect();

        // Similarity descending; equal scores break toward the more recent entry.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.index.read().await.len())
    }

    async fn export(&self) -> Result<Vec<MemoryEntry>, MemoryError> {
        Ok(self.index.read().await.clone())
    }
}
