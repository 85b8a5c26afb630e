//! Conversation store
//!
//! Durable record of chat sessions, their turns, and ingested document
//! metadata. Backed by Postgres through SeaORM in production and by an
//! in-process store in tests.

pub mod models;

mod memory;
mod repository;

pub use memory::MemoryStore;
pub use repository::Repository;

use crate::chat::Role;
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// One conversation turn as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A turn to append. Context and meta are kept for audit; they never
/// feed back into prompts.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    pub context: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl NewTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            context: None,
            meta: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            context: None,
            meta: None,
        }
    }
}

/// Metadata row for an ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub title: String,
    pub chapter_id: String,
    pub url: Option<String>,
    pub vector_id: Uuid,
}

/// Persistence contract for sessions, turns and document metadata
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Resolve a session id: reuse an existing session, recreate a
    /// session under a caller-supplied id, or mint a fresh one.
    async fn ensure_session(&self, id: Option<Uuid>) -> Result<Uuid>;

    /// Whether the session exists
    async fn find_session(&self, id: Uuid) -> Result<bool>;

    /// Append one turn to a session
    async fn append_turn(&self, session_id: Uuid, turn: NewTurn) -> Result<()>;

    /// Turns for a session in ascending insertion order. Unknown
    /// sessions yield an empty history, not an error. `limit` keeps
    /// the most recent turns.
    async fn history(&self, session_id: Uuid, limit: Option<usize>) -> Result<Vec<TurnRecord>>;

    /// Delete all turns for a session, keeping the session row so the
    /// id stays valid. Returns the number of turns removed.
    async fn clear_history(&self, session_id: Uuid) -> Result<u64>;

    /// Record metadata for an ingested document. Returns false when the
    /// vector id is already recorded (the duplicate is skipped).
    async fn record_document(&self, document: DocumentRecord) -> Result<bool>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Database ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Create a conversation store from configuration
pub async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn ConversationStore>> {
    if config.url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = DbPool::new(config).await?;
    Ok(Arc::new(Repository::new(pool)))
}
