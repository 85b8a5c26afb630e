//! In-process conversation store
//!
//! Implements the full `ConversationStore` contract over hash maps.
//! Used by tests and the `memory` database URL.

use super::{ConversationStore, DocumentRecord, NewTurn, TurnRecord};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

struct StoredTurn {
    record: TurnRecord,
    #[allow(dead_code)]
    context: Option<String>,
    meta: Option<serde_json::Value>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Vec<StoredTurn>>,
    documents: Vec<DocumentRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded document metadata, in insertion order
    pub async fn documents(&self) -> Vec<DocumentRecord> {
        self.inner.lock().await.documents.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Meta JSON of the last turn in a session, if any
    pub async fn last_turn_meta(&self, session_id: Uuid) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&session_id)
            .and_then(|turns| turns.last())
            .and_then(|turn| turn.meta.clone())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn ensure_session(&self, id: Option<Uuid>) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        let id = id.unwrap_or_else(Uuid::new_v4);
        inner.sessions.entry(id).or_default();
        Ok(id)
    }

    async fn find_session(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.lock().await.sessions.contains_key(&id))
    }

    async fn append_turn(&self, session_id: Uuid, turn: NewTurn) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .entry(session_id)
            .or_default()
            .push(StoredTurn {
                record: TurnRecord {
                    role: turn.role,
                    content: turn.content,
                    created_at: Utc::now(),
                },
                context: turn.context,
                meta: turn.meta,
            });
        Ok(())
    }

    async fn history(&self, session_id: Uuid, limit: Option<usize>) -> Result<Vec<TurnRecord>> {
        let inner = self.inner.lock().await;
        let turns = match inner.sessions.get(&session_id) {
            Some(turns) => turns,
            None => return Ok(Vec::new()),
        };
        let skip = limit.map_or(0, |n| turns.len().saturating_sub(n));
        Ok(turns.iter().skip(skip).map(|t| t.record.clone()).collect())
    }

    async fn clear_history(&self, session_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&session_id) {
            Some(turns) => {
                let removed = turns.len() as u64;
                turns.clear();
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    async fn record_document(&self, document: DocumentRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner
            .documents
            .iter()
            .any(|d| d.vector_id == document.vector_id)
        {
            return Ok(false);
        }
        inner.documents.push(document);
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_session_mints_and_reuses() {
        let store = MemoryStore::new();
        let id = store.ensure_session(None).await.unwrap();
        assert!(store.find_session(id).await.unwrap());

        let same = store.ensure_session(Some(id)).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_session_recreates_stale_id() {
        let store = MemoryStore::new();
        let stale = Uuid::new_v4();
        let id = store.ensure_session(Some(stale)).await.unwrap();
        assert_eq!(id, stale);
        assert!(store.find_session(stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_ascending_with_limit() {
        let store = MemoryStore::new();
        let id = store.ensure_session(None).await.unwrap();
        for i in 0..6 {
            store
                .append_turn(id, NewTurn::user(format!("m{}", i)))
                .await
                .unwrap();
        }

        let all = store.history(id, None).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].content, "m0");

        let recent = store.history(id, Some(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m4");
        assert_eq!(recent[1].content, "m5");
    }

    #[tokio::test]
    async fn test_history_of_unknown_session_is_empty() {
        let store = MemoryStore::new();
        let turns = store.history(Uuid::new_v4(), None).await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn test_clear_history_keeps_session() {
        let store = MemoryStore::new();
        let id = store.ensure_session(None).await.unwrap();
        store.append_turn(id, NewTurn::user("hi")).await.unwrap();
        store
            .append_turn(id, NewTurn::assistant("hello"))
            .await
            .unwrap();

        let removed = store.clear_history(id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.find_session(id).await.unwrap());
        assert!(store.history(id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_document_skips_duplicates() {
        let store = MemoryStore::new();
        let doc = DocumentRecord {
            title: "Intro".to_string(),
            chapter_id: "ch1".to_string(),
            url: Some("/docs/intro".to_string()),
            vector_id: Uuid::new_v4(),
        };
        assert!(store.record_document(doc.clone()).await.unwrap());
        assert!(!store.record_document(doc).await.unwrap());
        assert_eq!(store.documents().await.len(), 1);
    }
}
