pub mod embeddings;
pub mod sqlite;
pub mod traits;
pub mod vector;

pub use sqlite::SqliteMemory;
pub use traits::{Memory, MemoryDraft, MemoryEntry, MemoryKind, RecallHit};

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use std::path::Path;
use std::sync::Arc;

/// Factory: create the configured memory backend. Unknown backends and
/// providers are hard errors, not fallbacks.
pub fn create_memory(
    config: &MemoryConfig,
    state_dir: &Path,
    api_key: Option<&str>,
) -> Result<Box<dyn Memory>, MemoryError> {
    let embedder: Arc<dyn embeddings::EmbeddingProvider> =
        Arc::from(embeddings::create_embedding_provider(
            &config.embedding_provider,
            api_key,
            &config.embedding_model,
            config.embedding_dimensions,
        )
        .map_err(|e| MemoryError::Embedding(e.to_string()))?);

    match config.backend.as_str() {
        "sqlite" => Ok(Box::new(SqliteMemory::open(state_dir, embedder)?)),
        other => Err(MemoryError::BackendUnavailable(format!(
            "unknown memory backend '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn factory_sqlite() {
        let tmp = TempDir::new().unwrap();
        let cfg = MemoryConfig::default();
        let mem = create_memory(&cfg, tmp.path(), None).unwrap();
        assert_eq!(mem.name(), "sqlite");
    }

    #[test]
    fn factory_unknown_backend_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let cfg = MemoryConfig {
            backend: "redis".into(),
            ..MemoryConfig::default()
        };
        assert!(create_memory(&cfg, tmp.path(), None).is_err());
    }

    #[test]
    fn factory_unknown_embedding_provider_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let cfg = MemoryConfig {
            embedding_provider: "cohere".into(),
            ..MemoryConfig::default()
        };
        assert!(create_memory(&cfg, tmp.path(), None).is_err());
    }
}
