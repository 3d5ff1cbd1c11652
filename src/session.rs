//! The session aggregate: documents, queries, and id-keyed mutation.
//!
//! Uses `Vec` behind `std::sync::RwLock`; insertion order is chronological.
//! Every mutation is an identifier-keyed update applied to the latest state
//! under the lock, never to a captured copy, so interleaved async work
//! cannot clobber fields it does not own. The lock is only held across
//! synchronous sections.

use std::sync::RwLock;

use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

use crate::client::{SessionSnapshot, StoredQuery};
use crate::models::{DocResult, DocStatus, DocumentRef, Query, QueryStatus};

/// Single source of truth for the current session. The orchestrator and
/// aggregator mutate it; the presentation layer reads it.
pub struct SessionStore {
    inner: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    session_id: Option<String>,
    documents: Vec<DocumentRef>,
    queries: Vec<Query>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SessionState::default()),
        }
    }

    /// Applies the one-shot hydration snapshot: documents replace the
    /// current set and stored queries are replayed under one synthesized
    /// "restored" batch id.
    pub fn hydrate(&self, snapshot: SessionSnapshot) {
        let mut state = self.inner.write().unwrap();
        state.session_id = snapshot.session_id;
        state.documents = snapshot.documents;
        let batch_id = Uuid::new_v4().to_string();
        let documents = state.documents.clone();
        state.queries = snapshot
            .queries
            .into_iter()
            .map(|stored| restored_query(stored, &batch_id, &documents))
            .collect();
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.read().unwrap().session_id.clone()
    }

    pub fn documents(&self) -> Vec<DocumentRef> {
        self.inner.read().unwrap().documents.clone()
    }

    pub fn document(&self, id: &str) -> Option<DocumentRef> {
        self.inner
            .read()
            .unwrap()
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.inner.read().unwrap().queries.clone()
    }

    pub fn query(&self, id: &str) -> Option<Query> {
        self.inner
            .read()
            .unwrap()
            .queries
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    /// Queries with a result row for the given document, in insertion order.
    pub fn queries_touching(&self, document_id: &str) -> Vec<Query> {
        self.inner
            .read()
            .unwrap()
            .queries
            .iter()
            .filter(|q| q.touches(document_id))
            .cloned()
            .collect()
    }

    /// Inserts a new query or replaces the entry with the same id.
    pub fn upsert_query(&self, query: Query) {
        let mut state = self.inner.write().unwrap();
        match state.queries.iter_mut().find(|q| q.id == query.id) {
            Some(slot) => *slot = query,
            None => state.queries.push(query),
        }
    }

    /// Mutates one query in place under the lock. Returns false when the id
    /// is unknown.
    pub fn update_query(&self, id: &str, f: impl FnOnce(&mut Query)) -> bool {
        let mut state = self.inner.write().unwrap();
        match state.queries.iter_mut().find(|q| q.id == id) {
            Some(query) => {
                f(query);
                true
            }
            None => false,
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps one persisted wire query onto the engine's model. A stored result
/// string fans out to every current document as a completed row, matching
/// the engine's own one-answer-per-query shape; queries stored without
/// results hydrate with pending rows.
fn restored_query(stored: StoredQuery, batch_id: &str, documents: &[DocumentRef]) -> Query {
    let submitted_at = stored
        .timestamp
        .as_deref()
        .and_then(|t| t.parse::<NaiveDateTime>().ok())
        .map(|n| n.and_utc())
        .unwrap_or_else(Utc::now);

    let mut results: Vec<DocResult> = documents.iter().map(DocResult::pending).collect();
    let status = match stored.results {
        Some(text) => {
            for row in &mut results {
                row.text = text.clone();
                row.status = DocStatus::Completed;
                row.progress = 100;
            }
            QueryStatus::Completed
        }
        None => QueryStatus::Processing,
    };

    Query {
        id: stored.id,
        text: stored.text,
        status,
        batch_id: batch_id.to_string(),
        submitted_at,
        results,
        summary: None,
        summary_progress: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    fn doc(id: &str) -> DocumentRef {
        DocumentRef {
            id: id.into(),
            name: format!("{id}.pdf"),
            media: MediaKind::Document,
            size_bytes: 0,
            uploaded_at: None,
            transcribing: false,
            transcription_percent: None,
        }
    }

    #[test]
    fn hydration_fans_stored_results_over_documents() {
        let store = SessionStore::new();
        store.hydrate(SessionSnapshot {
            session_id: Some("s1".into()),
            documents: vec![doc("d1"), doc("d2")],
            queries: vec![StoredQuery {
                id: "q1".into(),
                text: "What is the term?".into(),
                status: Some("completed".into()),
                timestamp: Some("2025-03-14T09:30:00".into()),
                results: Some("Two years.".into()),
            }],
        });

        let queries = store.queries();
        assert_eq!(queries.len(), 1);
        let q = &queries[0];
        assert_eq!(q.status, QueryStatus::Completed);
        assert_eq!(q.results.len(), 2);
        assert!(q.results.iter().all(|r| {
            r.status == DocStatus::Completed && r.text == "Two years." && r.progress == 100
        }));
    }

    #[test]
    fn upsert_replaces_by_id_and_keeps_order() {
        let store = SessionStore::new();
        store.hydrate(SessionSnapshot {
            documents: vec![doc("d1")],
            ..Default::default()
        });
        let a = Query::submitted("first", "b1", &store.documents());
        let b = Query::submitted("second", "b1", &store.documents());
        store.upsert_query(a.clone());
        store.upsert_query(b.clone());

        let mut replacement = a.clone();
        replacement.text = "first, edited".into();
        store.upsert_query(replacement);

        let queries = store.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].text, "first, edited");
        assert_eq!(queries[1].id, b.id);
    }

    #[test]
    fn update_query_mutates_latest_state() {
        let store = SessionStore::new();
        store.hydrate(SessionSnapshot {
            documents: vec![doc("d1")],
            ..Default::default()
        });
        let q = Query::submitted("q", "b1", &store.documents());
        let id = q.id.clone();
        store.upsert_query(q);

        assert!(store.update_query(&id, |q| q.results[0].text.push_str("part one")));
        assert!(store.update_query(&id, |q| q.results[0].text.push_str(", part two")));
        assert!(!store.update_query("missing", |_| {}));

        assert_eq!(
            store.query(&id).unwrap().results[0].text,
            "part one, part two"
        );
    }
}
