//! SeaORM-backed conversation store
//!
//! Repository implementing `ConversationStore` over Postgres.

use super::models::*;
use super::{ConversationStore, DbPool, DocumentRecord, NewTurn, TurnRecord};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for conversation data access
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }
}

#[async_trait]
impl ConversationStore for Repository {
    // ========================================================================
    // Session Operations
    // ========================================================================

    async fn ensure_session(&self, id: Option<Uuid>) -> Result<Uuid> {
        if let Some(id) = id {
            if SessionEntity::find_by_id(id).one(self.conn()).await?.is_some() {
                return Ok(id);
            }
            // Caller-supplied id with no row: recreate the session under
            // that id so a client holding a stale id keeps working.
            let session = SessionActiveModel {
                id: Set(id),
                created_at: Set(Utc::now().into()),
            };
            session.insert(self.conn()).await?;
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let session = SessionActiveModel {
            id: Set(id),
            created_at: Set(Utc::now().into()),
        };
        session.insert(self.conn()).await?;
        Ok(id)
    }

    async fn find_session(&self, id: Uuid) -> Result<bool> {
        Ok(SessionEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .is_some())
    }

    // ========================================================================
    // Turn Operations
    // ========================================================================

    async fn append_turn(&self, session_id: Uuid, turn: NewTurn) -> Result<()> {
        let message = MessageActiveModel {
            session_id: Set(session_id),
            role: Set(turn.role.as_str().to_string()),
            content: Set(turn.content),
            context: Set(turn.context),
            meta: Set(turn.meta),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };
        message.insert(self.conn()).await?;
        Ok(())
    }

    async fn history(&self, session_id: Uuid, limit: Option<usize>) -> Result<Vec<TurnRecord>> {
        // Most recent N, fetched newest-first then flipped so callers
        // always see ascending insertion order.
        let mut query = MessageEntity::find()
            .filter(MessageColumn::SessionId.eq(session_id))
            .order_by_desc(MessageColumn::Id);
        if let Some(n) = limit {
            query = query.limit(n as u64);
        }
        let mut rows = query.all(self.conn()).await?;
        rows.reverse();

        rows.into_iter()
            .map(|row| {
                Ok(TurnRecord {
                    role: row.role.parse()?,
                    content: row.content,
                    created_at: row.created_at.with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn clear_history(&self, session_id: Uuid) -> Result<u64> {
        let result = MessageEntity::delete_many()
            .filter(MessageColumn::SessionId.eq(session_id))
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected)
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    async fn record_document(&self, document: DocumentRecord) -> Result<bool> {
        let existing = DocumentEntity::find()
            .filter(DocumentColumn::VectorId.eq(document.vector_id))
            .one(self.conn())
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let row = DocumentActiveModel {
            title: Set(document.title),
            chapter_id: Set(document.chapter_id),
            url: Set(document.url),
            vector_id: Set(document.vector_id),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };
        row.insert(self.conn()).await?;
        Ok(true)
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
