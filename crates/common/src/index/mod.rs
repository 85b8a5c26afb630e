//! Vector index adapter
//!
//! Upserts, deletes and searches embedded chunks in an external
//! similarity index. The index's internal search algorithm is opaque;
//! this module owns the contract: idempotent collection bootstrap,
//! all-or-nothing batch upserts, descending-score search with stable
//! tie-breaks, and best-effort deletes.

mod memory;
mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Distance metric for the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
}

/// Typed payload stored alongside each vector.
///
/// Core fields are structural; arbitrary extras go through the explicit
/// `extra` map instead of being blended into the payload dynamically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub chapter_id: String,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChunkPayload {
    /// Look up a payload field by name, covering both the fixed fields
    /// and the extension map.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "doc_id" => Some(Value::String(self.doc_id.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "content" => Some(Value::String(self.content.clone())),
            "chapter_id" => Some(Value::String(self.chapter_id.clone())),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// A chunk with its embedding, ready for upsert.
///
/// Owned by the index once upserted; the id is unique within a
/// collection and never reused after deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// One search result. Transient, produced per query, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Equality predicates, all of which must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub must: Vec<FieldMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    pub value: Value,
}

impl Filter {
    pub fn equals(key: &str, value: impl Into<Value>) -> Self {
        Self {
            must: vec![FieldMatch {
                key: key.to_string(),
                value: value.into(),
            }],
        }
    }

    pub fn chapter(chapter_id: &str) -> Self {
        Self::equals("chapter_id", chapter_id)
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.must
            .iter()
            .all(|m| payload.field(&m.key).as_ref() == Some(&m.value))
    }
}

/// Vector index contract
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent create-or-verify. Creates the collection if absent,
    /// no-op when an identical one exists, `SchemaMismatch` when an
    /// existing collection has a different dimension.
    async fn ensure_collection(&self, dimension: usize, metric: Distance) -> Result<()>;

    /// All-or-nothing batch upsert, returning ids in input order. On
    /// failure callers must not assume any entry was persisted; the
    /// content-derived ids make retries safe.
    async fn upsert_batch(&self, entries: Vec<EmbeddedChunk>) -> Result<Vec<Uuid>>;

    /// Nearest-neighbor search, descending score. Score ties break
    /// stably by ascending insertion order.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>>;

    /// Best-effort delete by id; missing ids are not errors
    async fn delete(&self, ids: &[Uuid]) -> Result<()>;

    /// Best-effort delete of everything matching the filter
    async fn delete_by_filter(&self, filter: &Filter) -> Result<()>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Content-derived point id: SHA-256 of the chunk identity folded into a
/// UUID. Re-ingesting the same content yields the same id, so upsert
/// retries and repeated ingestion are idempotent on the vector side.
pub fn chunk_point_id(source_id: &str, sequence_index: usize, text: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0]);
    hasher.update(sequence_index.to_le_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Cosine similarity in [-1, 1]; zero vectors score 0
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Create a vector index based on configuration
pub fn create_index(config: &crate::config::IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "qdrant" => Ok(Arc::new(QdrantIndex::new(
            config.url.clone(),
            config.api_key.clone(),
            config.collection_name.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown index provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_point_id_is_stable() {
        let a = chunk_point_id("ch1", 0, "ROS 2 is a middleware");
        let b = chunk_point_id("ch1", 0, "ROS 2 is a middleware");
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_point_id_varies_by_identity() {
        let base = chunk_point_id("ch1", 0, "text");
        assert_ne!(base, chunk_point_id("ch1", 1, "text"));
        assert_ne!(base, chunk_point_id("ch2", 0, "text"));
        assert_ne!(base, chunk_point_id("ch1", 0, "other"));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_filter_matches_fixed_and_extra_fields() {
        let mut extra = serde_json::Map::new();
        extra.insert("page_url".to_string(), Value::String("/ch1".to_string()));
        let payload = ChunkPayload {
            doc_id: "d1".to_string(),
            title: "Intro".to_string(),
            content: "body".to_string(),
            chapter_id: "ch1".to_string(),
            extra,
        };

        assert!(Filter::chapter("ch1").matches(&payload));
        assert!(!Filter::chapter("ch2").matches(&payload));
        assert!(Filter::equals("page_url", "/ch1").matches(&payload));
        assert!(!Filter::equals("missing", "x").matches(&payload));
    }
}
