//! Document ingestion handler

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use bookchat_common::{
    errors::{AppError, Result},
    rag::IngestDocument,
};

/// Ingestion request: a batch of pre-chunked documents
#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 1, max = 500))]
    pub documents: Vec<IngestDocument>,
}

/// Ingestion response
#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub documents_processed: usize,
    pub new_records: usize,
    pub vector_ids: Vec<Uuid>,
}

/// Embed and index a document batch
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("documents".to_string()),
    })?;

    for (i, doc) in request.documents.iter().enumerate() {
        if doc.content.trim().is_empty() {
            return Err(AppError::Validation {
                message: format!("document {} has empty content", i),
                field: Some("documents".to_string()),
            });
        }
    }

    let receipt = state.engine.ingest(request.documents).await?;

    Ok(Json(IngestResponse {
        status: "success",
        documents_processed: receipt.documents,
        new_records: receipt.new_records,
        vector_ids: receipt.vector_ids,
    }))
}
