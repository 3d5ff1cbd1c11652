//! Pending questions and AI-assisted swap with one-level undo.
//!
//! The manager owns the unsubmitted question set plus three id-keyed
//! structures: `swapping` (transient busy flags serializing swap calls per
//! question), `swapped` (persistent markers the presentation layer uses to
//! offer undo), and `records` (the pre-swap text, depth exactly one).
//! Precondition misses are no-ops, not errors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::Result;

use crate::client::QueryService;
use crate::models::Question;
use crate::notify::{Notice, NoticeSink};

pub struct SwapManager {
    service: Arc<dyn QueryService>,
    notices: Arc<dyn NoticeSink>,
    state: RwLock<BoardState>,
}

#[derive(Default)]
struct BoardState {
    questions: Vec<Question>,
    /// Free-text prompt that produced the current batch, if any.
    context: Option<String>,
    swapping: HashSet<String>,
    swapped: HashSet<String>,
    records: HashMap<String, String>,
}

impl SwapManager {
    pub fn new(service: Arc<dyn QueryService>, notices: Arc<dyn NoticeSink>) -> Self {
        Self {
            service,
            notices,
            state: RwLock::new(BoardState::default()),
        }
    }

    /// Replaces the pending set with a new batch and remembers the prompt
    /// that produced it. All flags and records reset.
    pub fn load(&self, questions: Vec<Question>, context: Option<String>) {
        let mut state = self.state.write().unwrap();
        *state = BoardState {
            questions,
            context,
            ..BoardState::default()
        };
    }

    /// Adds one manual question. Blank input is ignored.
    pub fn add(&self, text: &str) -> Option<Question> {
        if text.trim().is_empty() {
            return None;
        }
        let question = Question::manual(text);
        self.state
            .write()
            .unwrap()
            .questions
            .push(question.clone());
        Some(question)
    }

    /// Rewrites one question's text. Returns false for unknown ids.
    pub fn edit(&self, id: &str, text: &str) -> bool {
        let mut state = self.state.write().unwrap();
        match state.questions.iter_mut().find(|q| q.id == id) {
            Some(question) => {
                question.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Removes one question together with its flags and swap record.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let before = state.questions.len();
        state.questions.retain(|q| q.id != id);
        state.swapping.remove(id);
        state.swapped.remove(id);
        state.records.remove(id);
        state.questions.len() != before
    }

    /// Empties the board for submission; flags and records go with it.
    pub fn take_all(&self) -> Vec<Question> {
        let mut state = self.state.write().unwrap();
        let questions = std::mem::take(&mut state.questions);
        *state = BoardState::default();
        questions
    }

    pub fn questions(&self) -> Vec<Question> {
        self.state.read().unwrap().questions.clone()
    }

    pub fn question(&self, id: &str) -> Option<Question> {
        self.state
            .read()
            .unwrap()
            .questions
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    pub fn is_swapping(&self, id: &str) -> bool {
        self.state.read().unwrap().swapping.contains(id)
    }

    pub fn was_swapped(&self, id: &str) -> bool {
        self.state.read().unwrap().swapped.contains(id)
    }

    pub fn can_undo(&self, id: &str) -> bool {
        self.state.read().unwrap().records.contains_key(id)
    }

    /// Requests one contextual replacement for the question's text.
    ///
    /// No-op (`Ok(false)`) when the question is unknown, its text is empty,
    /// or a swap for the same id is already in flight. The busy flag is
    /// checked and set under one lock, so a concurrent second call never
    /// reaches the service. On success the text is replaced, the pre-swap
    /// text recorded (undo depth one), and the id marked swapped. On service
    /// failure the text stays unchanged, the busy flag clears, and an error
    /// notice is emitted alongside the returned error.
    pub async fn swap(&self, id: &str) -> Result<bool> {
        let (text, context, siblings) = {
            let mut state = self.state.write().unwrap();
            let Some(question) = state.questions.iter().find(|q| q.id == id) else {
                return Ok(false);
            };
            let text = question.text.clone();
            if text.trim().is_empty() || !state.swapping.insert(id.to_string()) {
                return Ok(false);
            }
            let siblings: Vec<String> = state
                .questions
                .iter()
                .filter(|q| q.id != id)
                .map(|q| q.text.clone())
                .collect();
            let context = state
                .context
                .clone()
                .filter(|c| !c.trim().is_empty())
                .or_else(|| siblings.iter().find(|s| !s.trim().is_empty()).cloned())
                .unwrap_or_default();
            (text, context, siblings)
        };

        let outcome = self.service.swap_question(&text, &context, &siblings).await;

        let mut state = self.state.write().unwrap();
        state.swapping.remove(id);
        match outcome {
            Ok(replacement) => {
                // The question may have been removed while the call was in
                // flight.
                let Some(idx) = state.questions.iter().position(|q| q.id == id) else {
                    return Ok(false);
                };
                let previous = std::mem::replace(&mut state.questions[idx].text, replacement);
                state.records.insert(id.to_string(), previous);
                state.swapped.insert(id.to_string());
                Ok(true)
            }
            Err(err) => {
                drop(state);
                self.notices.notify(Notice::SwapFailed {
                    question_id: id.to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Restores the pre-swap text. No-op without a record; clears both the
    /// swapped flag and the record.
    pub fn undo(&self, id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        let Some(previous) = state.records.remove(id) else {
            return false;
        };
        if let Some(question) = state.questions.iter_mut().find(|q| q.id == id) {
            question.text = previous;
        }
        state.swapped.remove(id);
        true
    }
}
