//! bookchat Common Library
//!
//! Shared code for the bookchat services including:
//! - Text chunking for retrieval
//! - Embedding client abstraction
//! - Vector index adapter
//! - Context assembly and prompt construction
//! - Conversation store (sessions, messages, document ledger)
//! - Error types, configuration, metrics

pub mod chat;
pub mod chunker;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod rag;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::ConversationStore;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndex;
pub use rag::RagEngine;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model (all-MiniLM-L6-v2 compatible endpoint)
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
