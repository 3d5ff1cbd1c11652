//! User-visible notices from the engine.
//!
//! The engine's required observable side effects (retry warnings, completion
//! confidence, degraded-mode fallback, validation refusals) are emitted as
//! typed notices through a sink, so the presentation layer decides rendering.
//! The bundled sinks write to **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;
use std::sync::Mutex;

use anyhow::{bail, Result};

/// How strongly a notice should be surfaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single user-visible notice.
#[derive(Clone, Debug)]
pub enum Notice {
    /// Verification confidence was too low; the service is retrying.
    RetryingAnswer {
        query_id: String,
        message: String,
        attempt: Option<String>,
    },
    /// A query's answer finalized, with the verifier's confidence.
    AnswerVerified {
        query_id: String,
        confidence: f64,
        verified: bool,
    },
    /// A query reached the failed state.
    AnswerFailed { query_id: String, message: String },
    /// Question extraction failed; the fixed default set was substituted.
    ExtractionDegraded { reason: String },
    /// A precondition rejected the action before any network call.
    Validation { message: String },
    /// Every unit in the batch reached a terminal state.
    BatchComplete { batch_id: String, queries: usize },
    /// Combined analysis finished for a document.
    AnalysisReady {
        document_id: String,
        document_name: String,
    },
    /// Combined analysis failed for a document.
    AnalysisFailed { document_id: String, message: String },
    /// A question swap could not be completed; the text is unchanged.
    SwapFailed { question_id: String, message: String },
}

impl Notice {
    pub fn severity(&self) -> Severity {
        match self {
            Notice::RetryingAnswer { .. } => Severity::Warning,
            Notice::AnswerVerified { .. } => Severity::Success,
            Notice::AnswerFailed { .. } => Severity::Error,
            Notice::ExtractionDegraded { .. } => Severity::Warning,
            Notice::Validation { .. } => Severity::Warning,
            Notice::BatchComplete { .. } => Severity::Info,
            Notice::AnalysisReady { .. } => Severity::Success,
            Notice::AnalysisFailed { .. } => Severity::Error,
            Notice::SwapFailed { .. } => Severity::Error,
        }
    }
}

/// Receives engine notices. Implementations must tolerate concurrent calls.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn human_line(notice: &Notice) -> String {
    match notice {
        Notice::RetryingAnswer {
            query_id,
            message,
            attempt,
        } => match attempt {
            Some(attempt) => format!("query {}  retry {}  {}\n", short(query_id), attempt, message),
            None => format!("query {}  retrying  {}\n", short(query_id), message),
        },
        Notice::AnswerVerified {
            query_id,
            confidence,
            verified,
        } => {
            let tag = if *verified { "verified" } else { "unverified" };
            format!(
                "query {}  completed  {} (confidence {:.2})\n",
                short(query_id),
                tag,
                confidence
            )
        }
        Notice::AnswerFailed { query_id, message } => {
            format!("query {}  failed  {}\n", short(query_id), message)
        }
        Notice::ExtractionDegraded { reason } => {
            format!("extract  using default questions  ({})\n", reason)
        }
        Notice::Validation { message } => format!("validation  {}\n", message),
        Notice::BatchComplete { batch_id, queries } => {
            format!("batch {}  complete  {} queries\n", short(batch_id), queries)
        }
        Notice::AnalysisReady { document_name, .. } => {
            format!("analysis {}  ready\n", document_name)
        }
        Notice::AnalysisFailed {
            document_id,
            message,
        } => format!("analysis {}  failed  {}\n", short(document_id), message),
        Notice::SwapFailed {
            question_id,
            message,
        } => format!("swap {}  failed  {}\n", short(question_id), message),
    }
}

fn json_object(notice: &Notice) -> serde_json::Value {
    let base = match notice {
        Notice::RetryingAnswer {
            query_id,
            message,
            attempt,
        } => serde_json::json!({
            "kind": "retrying_answer",
            "query_id": query_id,
            "message": message,
            "attempt": attempt,
        }),
        Notice::AnswerVerified {
            query_id,
            confidence,
            verified,
        } => serde_json::json!({
            "kind": "answer_verified",
            "query_id": query_id,
            "confidence": confidence,
            "verified": verified,
        }),
        Notice::AnswerFailed { query_id, message } => serde_json::json!({
            "kind": "answer_failed",
            "query_id": query_id,
            "message": message,
        }),
        Notice::ExtractionDegraded { reason } => serde_json::json!({
            "kind": "extraction_degraded",
            "reason": reason,
        }),
        Notice::Validation { message } => serde_json::json!({
            "kind": "validation",
            "message": message,
        }),
        Notice::BatchComplete { batch_id, queries } => serde_json::json!({
            "kind": "batch_complete",
            "batch_id": batch_id,
            "queries": queries,
        }),
        Notice::AnalysisReady {
            document_id,
            document_name,
        } => serde_json::json!({
            "kind": "analysis_ready",
            "document_id": document_id,
            "document_name": document_name,
        }),
        Notice::AnalysisFailed {
            document_id,
            message,
        } => serde_json::json!({
            "kind": "analysis_failed",
            "document_id": document_id,
            "message": message,
        }),
        Notice::SwapFailed {
            question_id,
            message,
        } => serde_json::json!({
            "kind": "swap_failed",
            "question_id": question_id,
            "message": message,
        }),
    };
    let mut obj = base;
    if let Some(map) = obj.as_object_mut() {
        map.insert("event".into(), "notice".into());
        map.insert("severity".into(), notice.severity().as_str().into());
    }
    obj
}

/// Human-friendly notices on stderr.
pub struct StderrNotices;

impl NoticeSink for StderrNotices {
    fn notify(&self, notice: Notice) {
        let line = human_line(&notice);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable notices: one JSON object per line on stderr.
pub struct JsonNotices;

impl NoticeSink for JsonNotices {
    fn notify(&self, notice: Notice) {
        if let Ok(line) = serde_json::to_string(&json_object(&notice)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op sink when notices are disabled.
pub struct NoNotices;

impl NoticeSink for NoNotices {
    fn notify(&self, _notice: Notice) {}
}

/// Captures notices in memory so tests can assert on observable behavior.
#[derive(Default)]
pub struct MemoryNotices {
    seen: Mutex<Vec<Notice>>,
}

impl MemoryNotices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.seen.lock().unwrap().clone()
    }
}

impl NoticeSink for MemoryNotices {
    fn notify(&self, notice: Notice) {
        self.seen.lock().unwrap().push(notice);
    }
}

/// Notice mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoticeMode {
    Off,
    Human,
    Json,
}

impl NoticeMode {
    /// Default: human notices when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            NoticeMode::Human
        } else {
            NoticeMode::Off
        }
    }

    /// Resolves a config string ("auto" respects the TTY default).
    pub fn from_config(mode: &str) -> Result<Self> {
        Ok(match mode {
            "auto" => Self::default_for_tty(),
            "off" => NoticeMode::Off,
            "human" => NoticeMode::Human,
            "json" => NoticeMode::Json,
            other => bail!("unknown notices mode: '{other}'"),
        })
    }

    /// Build a sink for this mode. Caller passes it to the engine components.
    pub fn sink(&self) -> Box<dyn NoticeSink> {
        match self {
            NoticeMode::Off => Box::new(NoNotices),
            NoticeMode::Human => Box::new(StderrNotices),
            NoticeMode::Json => Box::new(JsonNotices),
        }
    }
}
