//! Context assembly
//!
//! Turns a query, optional selected text, optional chapter filter and
//! recent conversation history into a character-bounded prompt context
//! with a provenance list and a confidence score.
//!
//! Policy: explicit user-provided context always overrides retrieval.
//! When `selected_text` is present it is the sole context source and the
//! vector index is never consulted.

use crate::chat::ChatMessage;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::{Filter, SearchHit, VectorIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Marker inserted when retrieval returns nothing usable
pub const NO_RELEVANT_CONTENT: &str =
    "No relevant content was found in the book for this question.";

/// System prompt for the book tutor
pub const SYSTEM_PROMPT: &str = "\
You are an expert AI tutor for Physical AI and Humanoid Robotics.
Your role is to help students understand concepts from the textbook.

Guidelines:
1. Provide clear, accurate answers based on the given context
2. If the context doesn't contain the answer, say so honestly
3. Use examples and analogies to clarify complex concepts
4. Encourage deeper understanding by asking follow-up questions when appropriate
5. Be concise but thorough
6. Use technical terms correctly and define them when necessary
7. Reference specific sections or chapters when relevant

When answering:
- Start with a direct answer
- Provide supporting details from the context
- Include code examples if relevant
- Suggest related topics to explore
";

/// Provenance entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SelectedText,
    Chunk,
}

/// Record of a source that informed an answer. Content is truncated to
/// a fixed preview length for display; the budget is enforced on the
/// context text, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub content: String,
}

/// Ephemeral output of context assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub context_text: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

/// Assembles bounded prompt context from retrieval and selection
pub struct ContextAssembler {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    settings: RetrievalConfig,
}

impl ContextAssembler {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        settings: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    /// Build a `RetrievalContext` for the query.
    ///
    /// Non-empty `selected_text` short-circuits retrieval entirely with
    /// confidence 1.0 and a single selected-text provenance entry.
    /// Otherwise the query is embedded, the index searched (optionally
    /// filtered by chapter) and hits are packed greedily in rank order
    /// until the character budget would be exceeded.
    pub async fn assemble(
        &self,
        query: &str,
        selected_text: Option<&str>,
        chapter_filter: Option<&str>,
    ) -> Result<RetrievalContext> {
        let max_chars = self.settings.max_context_chars;

        if let Some(selected) = selected_text.filter(|s| !s.trim().is_empty()) {
            return Ok(RetrievalContext {
                context_text: truncate_chars(selected, max_chars).to_string(),
                sources: vec![SourceRef {
                    kind: SourceKind::SelectedText,
                    title: None,
                    chapter_id: None,
                    score: None,
                    content: preview(selected, self.settings.preview_chars),
                }],
                confidence: 1.0,
            });
        }

        let query_vector = self.embedder.embed(query).await?;
        let filter = chapter_filter.map(Filter::chapter);
        let hits = self
            .index
            .search(&query_vector, self.settings.top_k, filter.as_ref())
            .await?;

        crate::metrics::record_retrieval(hits.len());
        debug!(
            hit_count = hits.len(),
            chapter_filter = chapter_filter.unwrap_or("-"),
            "Retrieval complete"
        );

        let context_text = pack_context(&hits, max_chars);
        let sources = hits
            .iter()
            .map(|hit| SourceRef {
                kind: SourceKind::Chunk,
                title: Some(hit.payload.title.clone()),
                chapter_id: Some(hit.payload.chapter_id.clone()),
                score: Some(hit.score),
                content: preview(&hit.payload.content, self.settings.preview_chars),
            })
            .collect();

        Ok(RetrievalContext {
            context_text,
            sources,
            confidence: confidence_from(&hits),
        })
    }

    /// Assemble the full message list for the chat model: system prompt,
    /// the last N conversation turns (a separate prompt slot, never
    /// counted against the context budget), then the user turn carrying
    /// the context block and the question.
    pub fn build_messages(
        &self,
        query: &str,
        context: &RetrievalContext,
        history: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));

        let keep = self.settings.history_turns.min(history.len());
        messages.extend_from_slice(&history[history.len() - keep..]);

        messages.push(ChatMessage::user(format!(
            "Context from the textbook:\n```\n{}\n```\n\nQuestion: {}\n",
            context.context_text, query
        )));

        messages
    }
}

/// Greedy rank-order packing: each hit is rendered with its title as a
/// heading and appended whole. The first block that would exceed the
/// budget stops the scan; later, smaller hits are not attempted, which
/// preserves ranking order in the context. The budget is measured in
/// characters, not bytes.
pub fn pack_context(hits: &[SearchHit], max_chars: usize) -> String {
    if hits.is_empty() {
        return truncate_chars(NO_RELEVANT_CONTENT, max_chars).to_string();
    }

    let mut context = String::new();
    let mut used = 0;
    for hit in hits {
        let block = format!("**{}**\n{}\n\n", hit.payload.title, hit.payload.content);
        let block_chars = block.chars().count();
        if used + block_chars > max_chars {
            break;
        }
        used += block_chars;
        context.push_str(&block);
    }

    if context.is_empty() {
        // Even the top hit overflowed the budget.
        return truncate_chars(NO_RELEVANT_CONTENT, max_chars).to_string();
    }
    context
}

/// Confidence is the top hit's score clamped to [0, 1]; zero hits mean
/// zero confidence. Not a calibrated probability.
pub fn confidence_from(hits: &[SearchHit]) -> f32 {
    hits.first().map_or(0.0, |hit| hit.score.clamp(0.0, 1.0))
}

/// Prefix of at most `max_chars` characters
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Display preview: truncated content with an ellipsis when shortened
fn preview(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use crate::index::{chunk_point_id, ChunkPayload, Distance, EmbeddedChunk, MemoryIndex};

    fn hit(title: &str, content: &str, score: f32) -> SearchHit {
        SearchHit {
            id: chunk_point_id(title, 0, content),
            score,
            payload: ChunkPayload {
                doc_id: title.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                chapter_id: "ch1".to_string(),
                extra: serde_json::Map::new(),
            },
        }
    }

    fn assembler(index: Arc<MemoryIndex>, max_context_chars: usize) -> ContextAssembler {
        ContextAssembler::new(
            Arc::new(MockEmbedder::new(16)),
            index,
            RetrievalConfig {
                max_context_chars,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_pack_respects_budget() {
        let hits = vec![
            hit("A", &"a".repeat(50), 0.9),
            hit("B", &"b".repeat(50), 0.8),
            hit("C", &"c".repeat(50), 0.7),
        ];
        for budget in [10, 60, 120, 500] {
            let packed = pack_context(&hits, budget);
            assert!(packed.chars().count() <= budget, "budget {} violated", budget);
        }
    }

    #[test]
    fn test_pack_budget_counts_characters_not_bytes() {
        // Block is 48 characters but 88 bytes; a 50-char budget fits it.
        let hits = vec![hit("A", &"é".repeat(40), 0.9)];
        let packed = pack_context(&hits, 50);
        assert!(packed.contains("ééé"));
        assert!(packed.chars().count() <= 50);
    }

    #[test]
    fn test_pack_stops_at_first_overflow() {
        // Second hit overflows; the smaller third hit must not slip in.
        let hits = vec![
            hit("A", &"a".repeat(20), 0.9),
            hit("B", &"b".repeat(500), 0.8),
            hit("C", "tiny", 0.7),
        ];
        let packed = pack_context(&hits, 100);
        assert!(packed.contains("**A**"));
        assert!(!packed.contains("**B**"));
        assert!(!packed.contains("tiny"));
    }

    #[test]
    fn test_pack_never_truncates_mid_chunk() {
        let hits = vec![hit("A", &"a".repeat(200), 0.9)];
        let packed = pack_context(&hits, 100);
        // The whole chunk did not fit, so none of it appears.
        assert!(!packed.contains("aaa"));
        assert_eq!(packed, NO_RELEVANT_CONTENT);
    }

    #[test]
    fn test_empty_hits_marker() {
        let packed = pack_context(&[], 1000);
        assert_eq!(packed, NO_RELEVANT_CONTENT);
        assert_eq!(confidence_from(&[]), 0.0);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(confidence_from(&[hit("A", "x", 1.7)]), 1.0);
        assert_eq!(confidence_from(&[hit("A", "x", -0.3)]), 0.0);
        let mid = confidence_from(&[hit("A", "x", 0.42)]);
        assert!((mid - 0.42).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_selected_text_skips_retrieval() {
        let index = Arc::new(MemoryIndex::new());
        let assembler = assembler(index.clone(), 24_000);

        let ctx = assembler
            .assemble("explain this", Some("ROS 2 is a middleware"), None)
            .await
            .unwrap();

        assert_eq!(index.search_calls(), 0);
        assert_eq!(ctx.confidence, 1.0);
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.sources[0].kind, SourceKind::SelectedText);
        assert_eq!(ctx.context_text, "ROS 2 is a middleware");
    }

    #[tokio::test]
    async fn test_blank_selected_text_falls_through_to_retrieval() {
        let index = Arc::new(MemoryIndex::new());
        index
            .ensure_collection(16, Distance::Cosine)
            .await
            .unwrap();
        let assembler = assembler(index.clone(), 24_000);

        let ctx = assembler
            .assemble("what is ros", Some("   "), None)
            .await
            .unwrap();

        assert_eq!(index.search_calls(), 1);
        assert_eq!(ctx.confidence, 0.0);
        assert!(ctx.context_text.contains("No relevant content"));
    }

    #[tokio::test]
    async fn test_retrieval_sources_preserve_rank_order() {
        let embedder = MockEmbedder::new(16);
        let index = Arc::new(MemoryIndex::new());
        index
            .ensure_collection(16, Distance::Cosine)
            .await
            .unwrap();

        let texts = ["ROS 2 basics", "URDF modeling", "Gazebo simulation"];
        let mut entries = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            entries.push(EmbeddedChunk {
                id: chunk_point_id("ch1", i, text),
                vector: embedder.embed(text).await.unwrap(),
                payload: ChunkPayload {
                    doc_id: format!("d{}", i),
                    title: format!("T{}", i),
                    content: text.to_string(),
                    chapter_id: "ch1".to_string(),
                    extra: serde_json::Map::new(),
                },
            });
        }
        index.upsert_batch(entries).await.unwrap();

        let assembler = assembler(index, 24_000);
        let ctx = assembler
            .assemble("ROS 2 basics", None, None)
            .await
            .unwrap();

        assert_eq!(ctx.sources.len(), 3);
        // The exact query text should rank its own chunk first.
        assert_eq!(ctx.sources[0].content, "ROS 2 basics");
        let scores: Vec<f32> = ctx.sources.iter().map(|s| s.score.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_build_messages_bounds_history() {
        let assembler = assembler(Arc::new(MemoryIndex::new()), 1000);
        let history: Vec<ChatMessage> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();
        let ctx = RetrievalContext {
            context_text: "ctx".to_string(),
            sources: vec![],
            confidence: 0.5,
        };

        let messages = assembler.build_messages("next question", &ctx, &history);
        // system + 5 history turns + user turn
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[0].role, crate::chat::Role::System);
        assert_eq!(messages[1].content, "a3");
        assert_eq!(messages[5].content, "a7");
        let last = messages.last().unwrap();
        assert!(last.content.contains("ctx"));
        assert!(last.content.contains("next question"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "héllo wörld, this is a longer string";
        let p = preview(text, 10);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 13);
        assert!(p.starts_with("héllo wörl"));
    }
}
