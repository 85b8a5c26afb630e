//! Search handlers

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use bookchat_common::errors::{AppError, Result};

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    pub chapter_id: Option<String>,
}

fn default_top_k() -> usize {
    5
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<SearchResultItem>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchResultItem {
    pub id: Uuid,
    pub score: f32,
    pub title: String,
    pub chapter_id: String,
    pub content: String,
}

/// Raw similarity search over the book content
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let hits = state
        .engine
        .search(&request.query, request.top_k, request.chapter_id.as_deref())
        .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        query = %request.query,
        results = hits.len(),
        latency_ms = processing_time_ms,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        query: request.query,
        total_results: hits.len(),
        results: hits
            .into_iter()
            .map(|hit| SearchResultItem {
                id: hit.id,
                score: hit.score,
                title: hit.payload.title,
                chapter_id: hit.payload.chapter_id,
                content: hit.payload.content,
            })
            .collect(),
        processing_time_ms,
    }))
}
