//! Retrieval-augmented answering engine
//!
//! Orchestrates the full pipeline: session resolution, context
//! assembly, answer generation and conversation logging on the chat
//! side; chunk embedding and index upserts on the ingestion side.

use crate::chat::ChatModel;
use crate::config::RetrievalConfig;
use crate::context::{ContextAssembler, RetrievalContext, SourceRef};
use crate::db::{ConversationStore, DocumentRecord, NewTurn, TurnRecord};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{chunk_point_id, ChunkPayload, EmbeddedChunk, Filter, SearchHit, VectorIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Chunks considered when summarizing a chapter
const SUMMARY_TOP_K: usize = 10;

/// Character cap on the material handed to the summarizer
const SUMMARY_MAX_CHARS: usize = 20_000;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are an expert at summarizing technical content.
Create a clear, structured summary of the chapter content provided.
Cover the key concepts, definitions and takeaways in order.
";

/// One chat request after HTTP-level validation
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub session_id: Option<Uuid>,
    pub selected_text: Option<String>,
    pub chapter_id: Option<String>,
}

/// Answer plus the provenance that produced it
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub session_id: Uuid,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

/// One pre-chunked document submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Defaults to the document id when absent
    pub chapter_id: Option<String>,
    pub url: Option<String>,
}

impl IngestDocument {
    fn chapter(&self) -> &str {
        self.chapter_id.as_deref().unwrap_or(&self.id)
    }
}

/// What an ingestion batch produced
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    /// Vector ids in input order
    pub vector_ids: Vec<Uuid>,
    /// Documents in the batch
    pub documents: usize,
    /// Metadata rows newly written (duplicates are skipped)
    pub new_records: usize,
}

/// The answering and ingestion pipeline
pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    store: Arc<dyn ConversationStore>,
    assembler: ContextAssembler,
    settings: RetrievalConfig,
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        store: Arc<dyn ConversationStore>,
        settings: RetrievalConfig,
    ) -> Self {
        let assembler =
            ContextAssembler::new(embedder.clone(), index.clone(), settings.clone());
        Self {
            embedder,
            index,
            chat,
            store,
            assembler,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Readiness check: store and index must both answer
    pub async fn ready(&self) -> Result<()> {
        self.store.ping().await?;
        self.index.ping().await
    }

    /// Answer one chat message.
    ///
    /// Resolves the session, assembles context, generates the answer,
    /// then logs both turns. Turns are only written after generation
    /// succeeds, so a failed request leaves the conversation unchanged.
    #[instrument(skip_all, fields(chapter_id = input.chapter_id.as_deref().unwrap_or("-")))]
    pub async fn chat(&self, input: ChatInput) -> Result<ChatOutcome> {
        if input.message.trim().is_empty() {
            return Err(AppError::Validation {
                message: "message must not be blank".to_string(),
                field: Some("message".to_string()),
            });
        }

        let start = Instant::now();

        let session_id = self.store.ensure_session(input.session_id).await?;

        let history = self
            .store
            .history(session_id, Some(self.settings.history_turns))
            .await?;
        let history: Vec<_> = history.iter().map(turn_to_message).collect();

        let context = self
            .assembler
            .assemble(
                &input.message,
                input.selected_text.as_deref(),
                input.chapter_id.as_deref(),
            )
            .await?;

        let messages = self
            .assembler
            .build_messages(&input.message, &context, &history);
        let response = self.chat.generate(&messages).await?;

        self.log_turns(session_id, &input.message, &response, &context)
            .await?;

        let grounded = input
            .selected_text
            .as_deref()
            .map_or(true, |s| s.trim().is_empty());
        crate::metrics::record_chat(start.elapsed().as_secs_f64(), grounded);

        info!(
            session_id = %session_id,
            confidence = context.confidence,
            sources = context.sources.len(),
            "Chat turn answered"
        );

        Ok(ChatOutcome {
            response,
            session_id,
            sources: context.sources,
            confidence: context.confidence,
        })
    }

    async fn log_turns(
        &self,
        session_id: Uuid,
        question: &str,
        answer: &str,
        context: &RetrievalContext,
    ) -> Result<()> {
        self.store
            .append_turn(session_id, NewTurn::user(question))
            .await?;

        let mut assistant = NewTurn::assistant(answer);
        assistant.context = Some(context.context_text.clone());
        assistant.meta = Some(json!({
            "sources": context.sources,
            "confidence": context.confidence,
        }));
        self.store.append_turn(session_id, assistant).await
    }

    /// Ingest a batch of pre-chunked documents.
    ///
    /// Embeds all contents in one order-preserving pass, upserts the
    /// batch with content-derived ids, then records metadata rows,
    /// skipping vectors already on file. The upsert is all-or-nothing;
    /// a failure means nothing from this batch landed in the index.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn ingest(&self, documents: Vec<IngestDocument>) -> Result<IngestReceipt> {
        if documents.is_empty() {
            return Err(AppError::Validation {
                message: "ingestion batch must not be empty".to_string(),
                field: Some("documents".to_string()),
            });
        }

        let start = Instant::now();

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let entries: Vec<EmbeddedChunk> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                let mut extra = serde_json::Map::new();
                if let Some(ref url) = doc.url {
                    extra.insert("page_url".to_string(), json!(url));
                }
                EmbeddedChunk {
                    id: chunk_point_id(&doc.id, 0, &doc.content),
                    vector,
                    payload: ChunkPayload {
                        doc_id: doc.id.clone(),
                        title: doc.title.clone(),
                        content: doc.content.clone(),
                        chapter_id: doc.chapter().to_string(),
                        extra,
                    },
                }
            })
            .collect();

        let vector_ids = self.index.upsert_batch(entries).await?;

        let mut new_records = 0;
        for (doc, vector_id) in documents.iter().zip(&vector_ids) {
            let inserted = self
                .store
                .record_document(DocumentRecord {
                    title: doc.title.clone(),
                    chapter_id: doc.chapter().to_string(),
                    url: doc.url.clone(),
                    vector_id: *vector_id,
                })
                .await?;
            if inserted {
                new_records += 1;
            }
        }

        crate::metrics::record_ingestion(
            start.elapsed().as_secs_f64(),
            documents.len(),
            vector_ids.len(),
        );

        info!(
            documents = documents.len(),
            new_records, "Ingestion batch complete"
        );

        Ok(IngestReceipt {
            documents: documents.len(),
            new_records,
            vector_ids,
        })
    }

    /// Raw similarity search, exposed for diagnostics
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        chapter_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(query).await?;
        let filter = chapter_id.map(Filter::chapter);
        self.index.search(&vector, top_k, filter.as_ref()).await
    }

    /// Summarize one chapter from its highest-ranked chunks
    #[instrument(skip(self))]
    pub async fn summarize_chapter(&self, chapter_id: &str) -> Result<String> {
        let hits = self
            .search("chapter overview key concepts summary", SUMMARY_TOP_K, Some(chapter_id))
            .await?;
        if hits.is_empty() {
            return Err(AppError::NotFound {
                resource_type: "chapter".to_string(),
                id: chapter_id.to_string(),
            });
        }

        let mut material = String::new();
        for hit in &hits {
            if material.len() + hit.payload.content.len() + 1 > SUMMARY_MAX_CHARS {
                break;
            }
            material.push_str(&hit.payload.content);
            material.push('\n');
        }

        let messages = vec![
            crate::chat::ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            crate::chat::ChatMessage::user(format!(
                "Summarize this chapter content:\n\n{}",
                material
            )),
        ];
        self.chat.generate(&messages).await
    }
}

fn turn_to_message(turn: &TurnRecord) -> crate::chat::ChatMessage {
    crate::chat::ChatMessage {
        role: turn.role,
        content: turn.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatModel;
    use crate::db::MemoryStore;
    use crate::embeddings::MockEmbedder;
    use crate::index::{Distance, MemoryIndex};

    fn docs() -> Vec<IngestDocument> {
        vec![
            IngestDocument {
                id: "intro-ros2".to_string(),
                title: "Introduction to ROS 2 - Part 1".to_string(),
                content: "ROS 2 is a middleware for robot software.".to_string(),
                chapter_id: Some("ch1".to_string()),
                url: Some("/docs/intro-ros2".to_string()),
            },
            IngestDocument {
                id: "urdf".to_string(),
                title: "URDF Basics - Part 1".to_string(),
                content: "URDF describes a robot's kinematic structure.".to_string(),
                chapter_id: Some("ch2".to_string()),
                url: None,
            },
        ]
    }

    async fn engine() -> (RagEngine, Arc<MemoryIndex>, Arc<MemoryStore>) {
        let index = Arc::new(MemoryIndex::new());
        index
            .ensure_collection(16, Distance::Cosine)
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let engine = RagEngine::new(
            Arc::new(MockEmbedder::new(16)),
            index.clone(),
            Arc::new(MockChatModel::new("Here is the answer.")),
            store.clone(),
            RetrievalConfig::default(),
        );
        (engine, index, store)
    }

    #[tokio::test]
    async fn test_ingest_then_chat() {
        let (engine, index, _store) = engine().await;

        let receipt = engine.ingest(docs()).await.unwrap();
        assert_eq!(receipt.documents, 2);
        assert_eq!(receipt.vector_ids.len(), 2);
        assert_eq!(receipt.new_records, 2);
        assert_eq!(index.len().await, 2);

        let outcome = engine
            .chat(ChatInput {
                message: "What is ROS 2?".to_string(),
                session_id: None,
                selected_text: None,
                chapter_id: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.response, "Here is the answer.");
        assert!(!outcome.sources.is_empty());
        assert!(outcome.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let (engine, index, _store) = engine().await;

        let first = engine.ingest(docs()).await.unwrap();
        let second = engine.ingest(docs()).await.unwrap();

        assert_eq!(first.vector_ids, second.vector_ids);
        assert_eq!(second.new_records, 0);
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (engine, _, _) = engine().await;
        let err = engine.ingest(Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let (engine, _, store) = engine().await;

        let err = engine
            .chat(ChatInput {
                message: "   ".to_string(),
                session_id: None,
                selected_text: None,
                chapter_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation { .. }));
        // Rejected before any session is minted.
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_chat_logs_two_turns() {
        let (engine, _, store) = engine().await;

        let outcome = engine
            .chat(ChatInput {
                message: "hello".to_string(),
                session_id: None,
                selected_text: None,
                chapter_id: None,
            })
            .await
            .unwrap();

        let history = store.history(outcome.session_id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "Here is the answer.");

        let meta = store.last_turn_meta(outcome.session_id).await.unwrap();
        assert!(meta["confidence"].is_number());
    }

    #[tokio::test]
    async fn test_selected_text_bypasses_index() {
        let (engine, index, _) = engine().await;

        let outcome = engine
            .chat(ChatInput {
                message: "explain".to_string(),
                session_id: None,
                selected_text: Some("A quaternion encodes rotation.".to_string()),
                chapter_id: None,
            })
            .await
            .unwrap();

        assert_eq!(index.search_calls(), 0);
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_chapter_filter_restricts_sources() {
        let (engine, _, _) = engine().await;
        engine.ingest(docs()).await.unwrap();

        let hits = engine.search("robot", 5, Some("ch2")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.chapter_id, "ch2");
    }

    #[tokio::test]
    async fn test_summarize_unknown_chapter_is_not_found() {
        let (engine, _, _) = engine().await;
        let err = engine.summarize_chapter("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_summarize_chapter_uses_chunks() {
        let (engine, _, _) = engine().await;
        engine.ingest(docs()).await.unwrap();

        let summary = engine.summarize_chapter("ch1").await.unwrap();
        assert_eq!(summary, "Here is the answer.");
    }
}
