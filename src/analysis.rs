//! Cross-query combined analysis per document.
//!
//! A document is eligible once every query touching it has a completed row
//! for it, no summary for it exists yet, and no generation for it is already
//! in flight. The in-flight set lives here, not in the session store, so a
//! pending generation blocks duplicates even though the summary slot is
//! still empty. Outcomes, success or failure, are materialized into the
//! summary slot of the first touching query without one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::join_all;

use crate::client::{AnalysisPair, QueryService};
use crate::models::{AnalysisSummary, DocStatus, DocumentRef};
use crate::notify::{Notice, NoticeSink};
use crate::session::SessionStore;

pub struct Aggregator {
    service: Arc<dyn QueryService>,
    store: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
    /// Document id to target query id, held for the duration of one call.
    in_flight: RwLock<HashMap<String, String>>,
}

impl Aggregator {
    pub fn new(
        service: Arc<dyn QueryService>,
        store: Arc<SessionStore>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            service,
            store,
            notices,
            in_flight: RwLock::new(HashMap::new()),
        }
    }

    pub fn eligible(&self, document_id: &str) -> bool {
        let in_flight = self.in_flight.read().unwrap();
        self.free_target(document_id, &in_flight).is_some()
    }

    /// Documents a generation could start for right now.
    pub fn eligible_documents(&self) -> Vec<DocumentRef> {
        let in_flight = self.in_flight.read().unwrap();
        self.store
            .documents()
            .into_iter()
            .filter(|doc| self.free_target(&doc.id, &in_flight).is_some())
            .collect()
    }

    /// The stored summary for a document, wherever it resides.
    pub fn summary_for(&self, document_id: &str) -> Option<AnalysisSummary> {
        self.store
            .queries()
            .into_iter()
            .find_map(|q| q.summary.filter(|s| s.document_id == document_id))
    }

    /// Runs one combined analysis for `document_id`.
    ///
    /// Returns false without calling the service when the document is not
    /// eligible; the check and the in-flight claim happen under one lock, so
    /// a second call for the same document while the first is pending is a
    /// no-op. Returns true once an outcome, the synthesis text or a
    /// human-readable error, has been written into the summary slot.
    pub async fn generate_one(&self, document_id: &str) -> bool {
        let target_id = {
            let mut in_flight = self.in_flight.write().unwrap();
            let Some(target_id) = self.free_target(document_id, &in_flight) else {
                return false;
            };
            in_flight.insert(document_id.to_string(), target_id.clone());
            target_id
        };
        let pairs = self.completed_pairs(document_id);
        self.store
            .update_query(&target_id, |q| q.summary_progress = Some(10));

        let outcome = self.service.combined_analysis(document_id, &pairs).await;

        let summary = match &outcome {
            Ok(text) => AnalysisSummary {
                document_id: document_id.to_string(),
                text: text.clone(),
                failed: false,
            },
            Err(err) => AnalysisSummary {
                document_id: document_id.to_string(),
                text: format!("Combined analysis failed: {err:#}"),
                failed: true,
            },
        };
        let message = summary.text.clone();
        self.store.update_query(&target_id, |q| {
            q.summary = Some(summary);
            q.summary_progress = None;
        });
        // Clear the claim only after the summary landed, so the document is
        // never simultaneously summary-free and claim-free mid-generation.
        self.in_flight.write().unwrap().remove(document_id);

        match outcome {
            Ok(_) => {
                let document_name = self
                    .store
                    .document(document_id)
                    .map(|d| d.name)
                    .unwrap_or_else(|| document_id.to_string());
                self.notices.notify(Notice::AnalysisReady {
                    document_id: document_id.to_string(),
                    document_name,
                });
            }
            Err(_) => self.notices.notify(Notice::AnalysisFailed {
                document_id: document_id.to_string(),
                message,
            }),
        }
        true
    }

    /// Starts a generation for every currently eligible document and waits
    /// for all of them. Returns how many summaries were written.
    pub async fn generate_all(&self) -> usize {
        let documents = self.eligible_documents();
        let runs = documents.iter().map(|doc| self.generate_one(&doc.id));
        join_all(runs).await.into_iter().filter(|ran| *ran).count()
    }

    /// Picks the summary slot a generation for `document_id` would write to,
    /// or None when the document is not eligible. A slot already claimed by
    /// another in-flight generation does not count as free.
    fn free_target(
        &self,
        document_id: &str,
        in_flight: &HashMap<String, String>,
    ) -> Option<String> {
        if in_flight.contains_key(document_id) {
            return None;
        }
        let touching = self.store.queries_touching(document_id);
        if touching.is_empty() {
            return None;
        }
        let all_completed = touching.iter().all(|q| {
            q.result_for(document_id)
                .map_or(false, |r| r.status == DocStatus::Completed)
        });
        if !all_completed {
            return None;
        }
        let already_summarized = touching.iter().any(|q| {
            q.summary
                .as_ref()
                .map_or(false, |s| s.document_id == document_id)
        });
        if already_summarized {
            return None;
        }
        touching
            .iter()
            .find(|q| q.summary.is_none() && !in_flight.values().any(|claimed| claimed == &q.id))
            .map(|q| q.id.clone())
    }

    /// Question/answer pairs for the service: completed rows with non-empty
    /// text only.
    fn completed_pairs(&self, document_id: &str) -> Vec<AnalysisPair> {
        self.store
            .queries_touching(document_id)
            .into_iter()
            .filter_map(|q| {
                let result = q.result_for(document_id)?;
                if result.status != DocStatus::Completed || result.text.trim().is_empty() {
                    return None;
                }
                Some(AnalysisPair {
                    question: q.text.clone(),
                    answer: result.text.clone(),
                })
            })
            .collect()
    }
}
