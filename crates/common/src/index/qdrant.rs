//! Qdrant REST adapter
//!
//! Talks to a Qdrant-compatible HTTP API: collection bootstrap, batched
//! point upserts, filtered nearest-neighbor search, and deletes by id or
//! filter.

use super::{ChunkPayload, Distance, EmbeddedChunk, Filter, SearchHit, VectorIndex};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct PointStruct<'a> {
    id: Uuid,
    vector: &'a [f32],
    payload: &'a ChunkPayload,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Uuid,
    score: f32,
    payload: ChunkPayload,
}

impl QdrantIndex {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        collection: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    fn collection_path(&self, suffix: &str) -> String {
        format!("/collections/{}{}", self.collection, suffix)
    }

    fn filter_body(filter: &Filter) -> Value {
        let must: Vec<Value> = filter
            .must
            .iter()
            .map(|m| json!({ "key": m.key, "match": { "value": m.value } }))
            .collect();
        json!({ "must": must })
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::IndexUnavailable {
                message: format!("{} request failed: {}", what, e),
            })?;
        Ok(response)
    }

    async fn expect_success(&self, response: reqwest::Response, what: &str) -> Result<()> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::IndexUnavailable {
                message: format!("{} failed with {}: {}", what, status, body),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dimension: usize, metric: Distance) -> Result<()> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, &self.collection_path("")),
                "collection info",
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(collection = %self.collection, dimension, "Creating collection");

            let distance = match metric {
                Distance::Cosine => "Cosine",
            };
            let body = json!({
                "vectors": { "size": dimension, "distance": distance }
            });
            let response = self
                .send(
                    self.request(reqwest::Method::PUT, &self.collection_path(""))
                        .json(&body),
                    "collection create",
                )
                .await?;
            return self.expect_success(response, "collection create").await;
        }

        self.ok_or_index_error(&response)?;

        let info: CollectionInfoResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::IndexUnavailable {
                    message: format!("Failed to parse collection info: {}", e),
                })?;

        let actual = info.result.config.params.vectors.size;
        if actual != dimension {
            return Err(AppError::SchemaMismatch {
                expected: dimension,
                actual,
            });
        }

        tracing::info!(collection = %self.collection, dimension, "Collection already exists");
        Ok(())
    }

    async fn upsert_batch(&self, entries: Vec<EmbeddedChunk>) -> Result<Vec<Uuid>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
        let points: Vec<PointStruct> = entries
            .iter()
            .map(|e| PointStruct {
                id: e.id,
                vector: &e.vector,
                payload: &e.payload,
            })
            .collect();

        // wait=true makes the write durable before we report ids back;
        // a non-success status means callers must assume nothing stuck.
        let response = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &self.collection_path("/points?wait=true"),
                )
                .json(&json!({ "points": points })),
                "upsert",
            )
            .await
            .map_err(|e| AppError::UpsertFailed {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpsertFailed {
                message: format!("upsert failed with {}: {}", status, body),
            });
        }

        Ok(ids)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = Self::filter_body(filter);
        }

        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &self.collection_path("/points/search"),
                )
                .json(&body),
                "search",
            )
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::IndexUnavailable {
                message: format!("search failed with {}: {}", status, text),
            });
        }

        let parsed: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::IndexUnavailable {
                    message: format!("Failed to parse search response: {}", e),
                })?;

        Ok(parsed
            .result
            .into_iter()
            .map(|p| SearchHit {
                id: p.id,
                score: p.score,
                payload: p.payload,
            })
            .collect())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &self.collection_path("/points/delete?wait=true"),
                )
                .json(&json!({ "points": ids })),
                "delete",
            )
            .await?;
        self.expect_success(response, "delete").await
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<()> {
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &self.collection_path("/points/delete?wait=true"),
                )
                .json(&json!({ "filter": Self::filter_body(filter) })),
                "delete by filter",
            )
            .await?;
        self.expect_success(response, "delete by filter").await
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, "/collections"),
                "ping",
            )
            .await?;
        self.expect_success(response, "ping").await
    }
}

impl QdrantIndex {
    fn ok_or_index_error(&self, response: &reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(AppError::IndexUnavailable {
                message: format!("collection info failed with {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_body_shape() {
        let filter = Filter::chapter("ch1");
        let body = QdrantIndex::filter_body(&filter);
        assert_eq!(body["must"][0]["key"], "chapter_id");
        assert_eq!(body["must"][0]["match"]["value"], "ch1");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let index = QdrantIndex::new(
            "http://localhost:6333/".to_string(),
            None,
            "book_content".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(index.base_url, "http://localhost:6333");
        assert_eq!(index.collection_path("/points"), "/collections/book_content/points");
    }
}
