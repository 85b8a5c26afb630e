//! In-process vector index
//!
//! Implements the full `VectorIndex` contract over a cosine scan. Used
//! by tests and the `memory` provider. Ties on score break stably by
//! ascending insertion order, which keeps ranked output deterministic.

use super::{cosine_similarity, Distance, EmbeddedChunk, Filter, SearchHit, VectorIndex};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoredPoint {
    id: Uuid,
    vector: Vec<f32>,
    payload: super::ChunkPayload,
    insertion_seq: u64,
}

#[derive(Default)]
struct Inner {
    dimension: Option<usize>,
    points: Vec<StoredPoint>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<Inner>,
    search_calls: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of search calls issued so far. Lets tests assert that the
    /// selected-text path never touches retrieval.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.points.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, dimension: usize, _metric: Distance) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.dimension {
            Some(existing) if existing != dimension => Err(AppError::SchemaMismatch {
                expected: dimension,
                actual: existing,
            }),
            Some(_) => Ok(()),
            None => {
                inner.dimension = Some(dimension);
                Ok(())
            }
        }
    }

    async fn upsert_batch(&self, entries: Vec<EmbeddedChunk>) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write().await;

        // Validate the whole batch before touching state: all-or-nothing.
        if let Some(dimension) = inner.dimension {
            for entry in &entries {
                if entry.vector.len() != dimension {
                    return Err(AppError::UpsertFailed {
                        message: format!(
                            "vector dimension {} does not match collection dimension {}",
                            entry.vector.len(),
                            dimension
                        ),
                    });
                }
            }
        }

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(entry.id);
            if let Some(existing) = inner.points.iter_mut().find(|p| p.id == entry.id) {
                // Same id means same content hash: refresh in place,
                // keeping the original insertion order.
                existing.vector = entry.vector;
                existing.payload = entry.payload;
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.points.push(StoredPoint {
                    id: entry.id,
                    vector: entry.vector,
                    payload: entry.payload,
                    insertion_seq: seq,
                });
            }
        }
        Ok(ids)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;

        let mut scored: Vec<(f32, u64, SearchHit)> = inner
            .points
            .iter()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|p| {
                let score = cosine_similarity(vector, &p.vector);
                (
                    score,
                    p.insertion_seq,
                    SearchHit {
                        id: p.id,
                        score,
                        payload: p.payload.clone(),
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        Ok(scored.into_iter().take(top_k).map(|(_, _, h)| h).collect())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.points.retain(|p| !ids.contains(&p.id));
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.points.retain(|p| !filter.matches(&p.payload));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
