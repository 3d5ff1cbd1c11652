//! Core data models for the query engine.
//!
//! These types represent the documents, questions, queries, and per-document
//! results that flow through submission, streaming, and combined analysis.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One uploaded file the engine can target with queries.
///
/// Owned by the upload collaborator; the engine never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub media: MediaKind,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(rename = "uploadedAt", default)]
    pub uploaded_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub transcribing: bool,
    #[serde(default)]
    pub transcription_percent: Option<u8>,
}

impl DocumentRef {
    /// Formats the byte size the way the upload service displays it.
    pub fn human_size(&self) -> String {
        const UNITS: [&str; 3] = ["KB", "MB", "GB"];
        if self.size_bytes < 1024 {
            return format!("{} B", self.size_bytes);
        }
        let mut size = self.size_bytes as f64;
        let mut unit = "B";
        for u in UNITS {
            size /= 1024.0;
            unit = u;
            if size < 1024.0 {
                break;
            }
        }
        format!("{size:.1} {unit}")
    }
}

/// Media kind reported by the upload collaborator. The wire tag `pdf` folds
/// into `Document`; unrecognized kinds parse as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[serde(alias = "pdf")]
    #[default]
    Document,
    Image,
    Audio,
    Video,
    #[serde(other)]
    Unknown,
}

/// Unsubmitted candidate query text, manually entered or machine-extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// Sequential 1-based number, present on extracted questions.
    pub number: Option<u32>,
    pub category: Option<String>,
}

impl Question {
    pub fn manual(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            number: None,
            category: None,
        }
    }

    pub fn numbered(number: u32, text: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            ..Self::manual(text)
        }
    }
}

/// Coarse overall status of a submitted query. Terminal detail lives on the
/// per-document results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Processing,
    Completed,
}

/// Per-document answer status. Transitions are restricted to the table in
/// [`DocStatus::allowed_transitions`]; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    Pending,
    Processing,
    /// Verification pass running against the draft answer.
    AntiHallucination,
    /// Resubmission after a low-confidence verification.
    Retrying,
    Completed,
    Failed,
}

impl DocStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocStatus::Completed | DocStatus::Failed)
    }

    /// States reachable from `self` in one step. The generation/verification
    /// loop may cycle between `Processing`, `AntiHallucination`, and
    /// `Retrying` until the service settles on a terminal state.
    pub fn allowed_transitions(self) -> &'static [DocStatus] {
        use DocStatus::*;
        match self {
            Pending => &[Processing, Completed, Failed],
            Processing => &[AntiHallucination, Retrying, Completed, Failed],
            AntiHallucination => &[Processing, Retrying, Completed, Failed],
            Retrying => &[Processing, AntiHallucination, Completed, Failed],
            Completed | Failed => &[],
        }
    }
}

/// Validates a single status transition against the table.
pub fn validate_transition(from: DocStatus, to: DocStatus) -> Result<()> {
    if from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        bail!("illegal status transition: {from:?} -> {to:?}");
    }
}

/// A submitted question with one result row per document.
///
/// The result list is fixed at submission time: exactly one entry per
/// document present in the session, in document order. Individual rows
/// mutate as stream events arrive but the list never grows or shrinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub status: QueryStatus,
    /// Groups queries submitted together, for chronological display.
    pub batch_id: String,
    pub submitted_at: DateTime<Utc>,
    pub results: Vec<DocResult>,
    /// Result-or-error slot for one document's combined analysis.
    pub summary: Option<AnalysisSummary>,
    /// Set while a combined analysis targeting this query is running.
    pub summary_progress: Option<u8>,
}

impl Query {
    /// Creates a freshly submitted query with a pending row per document.
    pub fn submitted(text: impl Into<String>, batch_id: &str, documents: &[DocumentRef]) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            status: QueryStatus::Processing,
            batch_id: batch_id.to_string(),
            submitted_at: Utc::now(),
            results: documents.iter().map(DocResult::pending).collect(),
            summary: None,
            summary_progress: None,
        }
    }

    pub fn touches(&self, document_id: &str) -> bool {
        self.results.iter().any(|r| r.document_id == document_id)
    }

    pub fn result_for(&self, document_id: &str) -> Option<&DocResult> {
        self.results.iter().find(|r| r.document_id == document_id)
    }

    /// True once every per-document row has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.results.iter().all(|r| r.status.is_terminal())
    }
}

/// One document's answer state under one query.
///
/// `progress`, `message`, and `attempt` are advisory display fields; control
/// flow depends only on `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocResult {
    pub document_id: String,
    pub document_name: String,
    /// Accumulated answer text; replaced by the final text on completion.
    pub text: String,
    pub status: DocStatus,
    pub progress: u8,
    pub message: Option<String>,
    /// Observed format "attempt/maxAttempts", e.g. "2/3".
    pub attempt: Option<String>,
}

impl DocResult {
    pub fn pending(doc: &DocumentRef) -> Self {
        Self {
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
            text: String::new(),
            status: DocStatus::Pending,
            progress: 0,
            message: None,
            attempt: None,
        }
    }
}

/// Combined-analysis outcome for one document, resident on the first query
/// that had a free slot when generation finished. Holds either the synthesis
/// text or a human-readable error; `failed` says which.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub document_id: String,
    pub text: String,
    pub failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_reject_all_transitions() {
        for to in [
            DocStatus::Pending,
            DocStatus::Processing,
            DocStatus::AntiHallucination,
            DocStatus::Retrying,
            DocStatus::Completed,
            DocStatus::Failed,
        ] {
            assert!(validate_transition(DocStatus::Completed, to).is_err());
            assert!(validate_transition(DocStatus::Failed, to).is_err());
        }
    }

    #[test]
    fn verification_loop_can_cycle() {
        assert!(validate_transition(DocStatus::Pending, DocStatus::Processing).is_ok());
        assert!(validate_transition(DocStatus::Processing, DocStatus::AntiHallucination).is_ok());
        assert!(validate_transition(DocStatus::AntiHallucination, DocStatus::Retrying).is_ok());
        assert!(validate_transition(DocStatus::Retrying, DocStatus::Processing).is_ok());
        assert!(validate_transition(DocStatus::Processing, DocStatus::Completed).is_ok());
    }

    #[test]
    fn pending_cannot_skip_into_verification() {
        assert!(validate_transition(DocStatus::Pending, DocStatus::AntiHallucination).is_err());
        assert!(validate_transition(DocStatus::Pending, DocStatus::Retrying).is_err());
    }

    #[test]
    fn media_kind_parses_wire_tags() {
        let kind: MediaKind = serde_json::from_str("\"pdf\"").unwrap();
        assert_eq!(kind, MediaKind::Document);
        let kind: MediaKind = serde_json::from_str("\"audio\"").unwrap();
        assert_eq!(kind, MediaKind::Audio);
        let kind: MediaKind = serde_json::from_str("\"spreadsheet\"").unwrap();
        assert_eq!(kind, MediaKind::Unknown);
    }

    #[test]
    fn human_size_matches_upload_display() {
        let mut doc = DocumentRef {
            id: "d1".into(),
            name: "contract.pdf".into(),
            media: MediaKind::Document,
            size_bytes: 512,
            uploaded_at: None,
            transcribing: false,
            transcription_percent: None,
        };
        assert_eq!(doc.human_size(), "512 B");
        doc.size_bytes = 1536;
        assert_eq!(doc.human_size(), "1.5 KB");
        doc.size_bytes = 5 * 1024 * 1024;
        assert_eq!(doc.human_size(), "5.0 MB");
    }
}
