//! Conversation history handlers

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use bookchat_common::db::TurnRecord;
use bookchat_common::errors::Result;

/// History response
#[derive(Serialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub messages: Vec<TurnRecord>,
}

/// Clear response
#[derive(Serialize)]
pub struct ClearResponse {
    pub session_id: Uuid,
    pub deleted: u64,
}

/// Full history for a session, oldest first. Unknown sessions come back
/// empty rather than as 404, so clients can poll before the first turn.
pub async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>> {
    let messages = state.engine.store().history(session_id, None).await?;
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

/// Delete all turns for a session. The session itself survives so the
/// client can keep chatting under the same id.
pub async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ClearResponse>> {
    let deleted = state.engine.store().clear_history(session_id).await?;
    tracing::info!(session_id = %session_id, deleted, "History cleared");
    Ok(Json(ClearResponse {
        session_id,
        deleted,
    }))
}
