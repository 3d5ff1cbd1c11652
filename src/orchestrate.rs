//! Batch orchestration: extraction, validation, fan-out, join.
//!
//! A batch fans out into independent execution units, one per non-empty
//! question, all running concurrently with no ordering dependency. The
//! batch-complete notice fires only after every unit has observed a terminal
//! state for every document.

use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use uuid::Uuid;

use crate::client::QueryService;
use crate::models::{Query, Question};
use crate::notify::{Notice, NoticeSink};
use crate::session::SessionStore;
use crate::unit::run_unit;

/// Questions substituted when extraction fails, so the user is never
/// blocked on the extraction service.
pub const DEFAULT_QUESTIONS: [&str; 4] = [
    "What are the key facts surrounding the incident in question?",
    "What evidence supports the defendant's claims in this case?",
    "Are there any procedural issues that could affect the outcome?",
    "What precedents are most relevant to this legal matter?",
];

/// Outcome of one submitted batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: String,
    pub query_ids: Vec<String>,
}

pub struct Orchestrator {
    service: Arc<dyn QueryService>,
    store: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn QueryService>,
        store: Arc<SessionStore>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            service,
            store,
            notices,
        }
    }

    /// Decomposes a free-text prompt into questions. Falls back to
    /// [`DEFAULT_QUESTIONS`] with a degraded-mode notice when the service
    /// fails or returns nothing; never errors.
    pub async fn extract_questions(&self, prompt: &str) -> Vec<Question> {
        match self.service.extract(prompt).await {
            Ok(questions) if !questions.is_empty() => questions,
            Ok(_) => {
                self.degraded("extraction returned no questions");
                default_questions()
            }
            Err(err) => {
                self.degraded(&err.to_string());
                default_questions()
            }
        }
    }

    /// Extraction followed by [`submit`](Orchestrator::submit). The
    /// no-documents refusal fires before extraction, so a doomed prompt
    /// never contacts the service.
    pub async fn submit_prompt(&self, prompt: &str) -> Result<BatchReport> {
        if self.store.documents().is_empty() {
            return Err(
                self.validation("no documents uploaded; add documents before submitting queries")
            );
        }
        let questions = self.extract_questions(prompt).await;
        self.submit(questions).await
    }

    /// Submits a batch of questions as concurrent execution units and joins
    /// them. Refused with a validation notice, before any network call, when
    /// the session has no documents or the batch has no non-empty question.
    pub async fn submit(&self, questions: Vec<Question>) -> Result<BatchReport> {
        let questions: Vec<Question> = questions
            .into_iter()
            .filter(|q| !q.text.trim().is_empty())
            .collect();

        let documents = self.store.documents();
        if documents.is_empty() {
            return Err(
                self.validation("no documents uploaded; add documents before submitting queries")
            );
        }
        if questions.is_empty() {
            return Err(self.validation("no questions to submit"));
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut query_ids = Vec::with_capacity(questions.len());
        for question in &questions {
            let query = Query::submitted(question.text.clone(), &batch_id, &documents);
            query_ids.push(query.id.clone());
            self.store.upsert_query(query);
        }

        join_all(query_ids.iter().map(|id| {
            run_unit(
                self.service.as_ref(),
                self.store.as_ref(),
                self.notices.as_ref(),
                id,
            )
        }))
        .await;

        self.notices.notify(Notice::BatchComplete {
            batch_id: batch_id.clone(),
            queries: query_ids.len(),
        });
        Ok(BatchReport {
            batch_id,
            query_ids,
        })
    }

    fn degraded(&self, reason: &str) {
        self.notices.notify(Notice::ExtractionDegraded {
            reason: reason.to_string(),
        });
    }

    fn validation(&self, message: &str) -> anyhow::Error {
        self.notices.notify(Notice::Validation {
            message: message.to_string(),
        });
        anyhow::anyhow!("{message}")
    }
}

fn default_questions() -> Vec<Question> {
    DEFAULT_QUESTIONS
        .iter()
        .enumerate()
        .map(|(i, text)| Question::numbered(i as u32 + 1, *text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_set_is_usable_as_is() {
        let questions = default_questions();
        assert!(questions.len() >= 2);
        assert_eq!(questions[0].number, Some(1));
        assert!(questions.iter().all(|q| !q.text.trim().is_empty()));
        let mut ids: Vec<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), questions.len());
    }
}
