//! Chat handlers

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use bookchat_common::{
    context::SourceRef,
    errors::{AppError, Result},
    rag::ChatInput,
};

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    pub session_id: Option<Uuid>,

    /// Passage the reader highlighted; overrides retrieval when present
    #[validate(length(max = 10000))]
    pub selected_text: Option<String>,

    /// Restrict retrieval to one chapter
    pub chapter_id: Option<String>,
}

/// Chat response
#[derive(Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: Uuid,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

/// Answer one chat message
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if request.message.trim().is_empty() {
        return Err(AppError::Validation {
            message: "message must not be blank".to_string(),
            field: Some("message".to_string()),
        });
    }

    let outcome = state
        .engine
        .chat(ChatInput {
            message: request.message,
            session_id: request.session_id,
            selected_text: request.selected_text,
            chapter_id: request.chapter_id,
        })
        .await?;

    Ok(Json(ChatResponse {
        response: outcome.response,
        session_id: outcome.session_id,
        sources: outcome.sources,
        confidence: outcome.confidence,
    }))
}

/// Chapter summary response
#[derive(Serialize)]
pub struct SummaryResponse {
    pub chapter_id: String,
    pub summary: String,
}

/// Summarize one chapter from its indexed content
pub async fn chapter_summary(
    State(state): State<AppState>,
    Path(chapter_id): Path<String>,
) -> Result<Json<SummaryResponse>> {
    let summary = state.engine.summarize_chapter(&chapter_id).await?;
    Ok(Json(SummaryResponse {
        chapter_id,
        summary,
    }))
}
