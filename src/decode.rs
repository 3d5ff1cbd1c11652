//! Incremental decoder for the streaming answer protocol.
//!
//! The query service delivers answers as a server-sent event stream:
//! newline-delimited records where each data record is the fixed marker
//! `data:` followed by a JSON payload. Network chunk boundaries never align
//! with record boundaries, so the decoder buffers any trailing partial record
//! and prepends it to the next chunk before re-splitting. Buffering happens
//! at the byte level; a chunk boundary inside a multi-byte character must not
//! change the decoded output.
//!
//! A single record may carry several event shapes at once (a text delta
//! usually arrives with a progress percentage, a completion carries its own
//! final progress), so [`StreamDecoder::feed`] returns a vector. Records that
//! fail to parse are logged and dropped without aborting the stream.
//!
//! The decoder knows nothing about queries or sessions; it is pure protocol.

use serde::Deserialize;

/// Status tag attached to progress records by the query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTag {
    AnalyzingDocuments,
    Generating,
    /// Verification pass against the draft answer.
    Verifying,
    /// Resubmission after a low-confidence verification.
    Retrying,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// Advisory progress: percentage and/or status tag, optional
    /// human-readable message, optional attempt counter ("2/3").
    Progress {
        percent: Option<u8>,
        status: Option<StatusTag>,
        message: Option<String>,
        attempt: Option<String>,
    },
    /// A fragment of answer text to append.
    TextDelta(String),
    /// The finalized answer. Replaces any accumulated draft text.
    Completed {
        final_text: String,
        confidence: f64,
        verified: bool,
    },
    /// Service-reported failure, message verbatim.
    Error(String),
}

/// Raw record payload. Every field is optional and several may be present
/// on the same record.
#[derive(Debug, Deserialize)]
struct RawRecord {
    progress: Option<f64>,
    status: Option<StatusTag>,
    message: Option<String>,
    attempt: Option<String>,
    text: Option<String>,
    final_text: Option<String>,
    confidence: Option<f64>,
    is_verified: Option<bool>,
    error: Option<String>,
}

impl RawRecord {
    /// Expands the record into events, in fixed order: progress, text delta,
    /// completion, error.
    fn into_events(self) -> Vec<AnswerEvent> {
        let mut events = Vec::new();
        if self.progress.is_some() || self.status.is_some() {
            events.push(AnswerEvent::Progress {
                percent: self.progress.map(|p| p.clamp(0.0, 100.0) as u8),
                status: self.status,
                message: self.message,
                attempt: self.attempt,
            });
        }
        if let Some(text) = self.text {
            if !text.is_empty() {
                events.push(AnswerEvent::TextDelta(text));
            }
        }
        if let Some(final_text) = self.final_text {
            events.push(AnswerEvent::Completed {
                final_text,
                confidence: self.confidence.unwrap_or(0.0),
                verified: self.is_verified.unwrap_or(false),
            });
        }
        if let Some(error) = self.error {
            events.push(AnswerEvent::Error(error));
        }
        events
    }
}

/// Stateful record decoder. One instance per stream; it is not resumable
/// across streams.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every event it completed.
    ///
    /// Lines without the `data:` marker (blank keep-alives, other SSE
    /// fields) are skipped silently. A data record whose payload is not
    /// valid JSON is logged and dropped; the stream continues.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AnswerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let payload = match line.trim().strip_prefix("data:") {
                Some(rest) => rest.trim_start(),
                None => continue,
            };
            if payload.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(payload) {
                Ok(record) => events.extend(record.into_events()),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed stream record");
                }
            }
        }
        events
    }

    /// True if a partial record is still waiting for its newline.
    pub fn has_partial(&self) -> bool {
        !self.buffer.iter().all(|&b| b == b'\n' || b == b'\r' || b == b' ')
    }
}
