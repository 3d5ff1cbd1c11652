//! Query execution unit: one submitted query's stream lifecycle.
//!
//! A unit opens the answer stream, decodes it, and applies events to its
//! query's per-document rows. There is one logical answer per query, fanned
//! out uniformly: every event mutates all rows identically, and the unit
//! tracks that uniform status once. Each query is owned by exactly one unit,
//! so no two units ever write the same query's fields.
//!
//! Failures are absorbed here and become terminal `failed` rows with the
//! error text as message; nothing propagates past the unit boundary.

use futures_util::StreamExt;

use crate::client::QueryService;
use crate::decode::{AnswerEvent, StatusTag, StreamDecoder};
use crate::models::{validate_transition, DocStatus, QueryStatus};
use crate::notify::{Notice, NoticeSink};
use crate::session::SessionStore;

/// Message attached when the transport closes without a completion event.
const CLOSED_EARLY: &str = "stream ended before a final answer was delivered";

/// Drives one submitted query to a terminal state. Never returns an error;
/// the failure surface is the query's own rows plus a notice.
pub async fn run_unit(
    service: &dyn QueryService,
    store: &SessionStore,
    notices: &dyn NoticeSink,
    query_id: &str,
) {
    let text = match store.query(query_id) {
        Some(query) => query.text,
        None => return,
    };

    let mut stream = match service.stream_answer(&text).await {
        Ok(stream) => stream,
        Err(err) => {
            fail_query(store, notices, query_id, &err.to_string());
            return;
        }
    };

    let mut decoder = StreamDecoder::new();
    let mut state = DocStatus::Pending;
    let mut finished = false;

    'stream: while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                fail_query(store, notices, query_id, &err.to_string());
                return;
            }
        };
        for event in decoder.feed(&chunk) {
            if apply_event(store, notices, query_id, &mut state, event) {
                finished = true;
                break 'stream;
            }
        }
    }

    if decoder.has_partial() {
        tracing::warn!(query = query_id, "stream closed with a partial record buffered");
    }
    if !finished {
        fail_query(store, notices, query_id, CLOSED_EARLY);
    }
}

/// Maps wire status tags onto the per-document machine. Terminal tags inside
/// progress records are advisory only; terminal transitions are driven by
/// completion/error events or by stream close.
fn map_status_tag(tag: StatusTag) -> Option<DocStatus> {
    match tag {
        StatusTag::AnalyzingDocuments | StatusTag::Generating | StatusTag::Unknown => {
            Some(DocStatus::Processing)
        }
        StatusTag::Verifying => Some(DocStatus::AntiHallucination),
        StatusTag::Retrying => Some(DocStatus::Retrying),
        StatusTag::Completed | StatusTag::Failed => None,
    }
}

/// Applies one decoded event to the query's rows. Returns true once the
/// query is terminal.
fn apply_event(
    store: &SessionStore,
    notices: &dyn NoticeSink,
    query_id: &str,
    state: &mut DocStatus,
    event: AnswerEvent,
) -> bool {
    match event {
        AnswerEvent::Progress {
            percent,
            status,
            message,
            attempt,
        } => {
            let mut transitioned = false;
            if let Some(next) = status.and_then(map_status_tag) {
                if next != *state {
                    match validate_transition(*state, next) {
                        Ok(()) => {
                            *state = next;
                            transitioned = true;
                        }
                        Err(err) => {
                            tracing::warn!(query = query_id, error = %err, "ignoring status event");
                        }
                    }
                }
            }
            let uniform = *state;
            store.update_query(query_id, |q| {
                for row in &mut q.results {
                    if transitioned {
                        row.status = uniform;
                    }
                    if let Some(percent) = percent {
                        row.progress = percent;
                    }
                    if let Some(message) = &message {
                        row.message = Some(message.clone());
                    }
                    if let Some(attempt) = &attempt {
                        row.attempt = Some(attempt.clone());
                    }
                }
            });
            if transitioned && uniform == DocStatus::Retrying {
                notices.notify(Notice::RetryingAnswer {
                    query_id: query_id.to_string(),
                    message: message.unwrap_or_else(|| "low confidence, retrying".to_string()),
                    attempt,
                });
            }
            false
        }

        AnswerEvent::TextDelta(delta) => {
            // Draft text before any progress event still means generation
            // has started.
            let entered_processing = *state == DocStatus::Pending
                && validate_transition(*state, DocStatus::Processing).is_ok();
            if entered_processing {
                *state = DocStatus::Processing;
            }
            let uniform = *state;
            store.update_query(query_id, |q| {
                for row in &mut q.results {
                    if entered_processing {
                        row.status = uniform;
                    }
                    row.text.push_str(&delta);
                }
            });
            false
        }

        AnswerEvent::Completed {
            final_text,
            confidence,
            verified,
        } => match validate_transition(*state, DocStatus::Completed) {
            Ok(()) => {
                *state = DocStatus::Completed;
                store.update_query(query_id, |q| {
                    q.status = QueryStatus::Completed;
                    for row in &mut q.results {
                        row.status = DocStatus::Completed;
                        row.text = final_text.clone();
                        row.progress = 100;
                    }
                });
                notices.notify(Notice::AnswerVerified {
                    query_id: query_id.to_string(),
                    confidence,
                    verified,
                });
                true
            }
            Err(err) => {
                tracing::warn!(query = query_id, error = %err, "ignoring duplicate completion");
                false
            }
        },

        AnswerEvent::Error(message) => {
            fail_query(store, notices, query_id, &message);
            true
        }
    }
}

/// Terminal failure: every non-terminal row goes to `failed` with the error
/// text as message and progress pinned at 100.
fn fail_query(store: &SessionStore, notices: &dyn NoticeSink, query_id: &str, message: &str) {
    store.update_query(query_id, |q| {
        q.status = QueryStatus::Completed;
        for row in &mut q.results {
            if validate_transition(row.status, DocStatus::Failed).is_ok() {
                row.status = DocStatus::Failed;
                row.message = Some(message.to_string());
                row.progress = 100;
            }
        }
    });
    notices.notify(Notice::AnswerFailed {
        query_id: query_id.to_string(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionSnapshot;
    use crate::models::{DocumentRef, MediaKind, Query};
    use crate::notify::MemoryNotices;

    fn seeded() -> (SessionStore, String) {
        let store = SessionStore::new();
        store.hydrate(SessionSnapshot {
            documents: vec![
                DocumentRef {
                    id: "d1".into(),
                    name: "lease.pdf".into(),
                    media: MediaKind::Document,
                    size_bytes: 0,
                    uploaded_at: None,
                    transcribing: false,
                    transcription_percent: None,
                },
                DocumentRef {
                    id: "d2".into(),
                    name: "deed.pdf".into(),
                    media: MediaKind::Document,
                    size_bytes: 0,
                    uploaded_at: None,
                    transcribing: false,
                    transcription_percent: None,
                },
            ],
            ..Default::default()
        });
        let query = Query::submitted("What is the term?", "b1", &store.documents());
        let id = query.id.clone();
        store.upsert_query(query);
        (store, id)
    }

    #[test]
    fn progress_with_terminal_tag_does_not_complete() {
        let (store, id) = seeded();
        let notices = MemoryNotices::new();
        let mut state = DocStatus::Pending;

        let terminal = apply_event(
            &store,
            &notices,
            &id,
            &mut state,
            AnswerEvent::Progress {
                percent: Some(100),
                status: Some(StatusTag::Completed),
                message: None,
                attempt: None,
            },
        );

        assert!(!terminal);
        assert_eq!(state, DocStatus::Pending);
        let q = store.query(&id).unwrap();
        assert!(q.results.iter().all(|r| r.status == DocStatus::Pending));
        assert!(q.results.iter().all(|r| r.progress == 100));
    }

    #[test]
    fn retrying_transition_emits_warning_on_all_rows() {
        let (store, id) = seeded();
        let notices = MemoryNotices::new();
        let mut state = DocStatus::Pending;

        for (tag, pct) in [
            (StatusTag::Generating, 30),
            (StatusTag::Verifying, 80),
            (StatusTag::Retrying, 33),
        ] {
            apply_event(
                &store,
                &notices,
                &id,
                &mut state,
                AnswerEvent::Progress {
                    percent: Some(pct),
                    status: Some(tag),
                    message: Some("Low confidence (40%), retrying...".into()),
                    attempt: Some("2/3".into()),
                },
            );
        }

        assert_eq!(state, DocStatus::Retrying);
        let q = store.query(&id).unwrap();
        assert!(q.results.iter().all(|r| r.status == DocStatus::Retrying));
        assert!(q.results.iter().all(|r| r.attempt.as_deref() == Some("2/3")));

        let warnings: Vec<_> = notices
            .snapshot()
            .into_iter()
            .filter(|n| matches!(n, Notice::RetryingAnswer { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn completion_replaces_draft_text_and_notifies() {
        let (store, id) = seeded();
        let notices = MemoryNotices::new();
        let mut state = DocStatus::Pending;

        apply_event(
            &store,
            &notices,
            &id,
            &mut state,
            AnswerEvent::TextDelta("draft answer ".into()),
        );
        assert_eq!(state, DocStatus::Processing);

        let terminal = apply_event(
            &store,
            &notices,
            &id,
            &mut state,
            AnswerEvent::Completed {
                final_text: "The term is two years.".into(),
                confidence: 0.91,
                verified: true,
            },
        );

        assert!(terminal);
        let q = store.query(&id).unwrap();
        assert_eq!(q.status, QueryStatus::Completed);
        assert!(q
            .results
            .iter()
            .all(|r| r.text == "The term is two years." && r.progress == 100));
        assert!(notices
            .snapshot()
            .iter()
            .any(|n| matches!(n, Notice::AnswerVerified { confidence, .. } if *confidence > 0.9)));
    }

    #[test]
    fn error_event_fails_every_row_verbatim() {
        let (store, id) = seeded();
        let notices = MemoryNotices::new();
        let mut state = DocStatus::Processing;

        let terminal = apply_event(
            &store,
            &notices,
            &id,
            &mut state,
            AnswerEvent::Error("model unavailable".into()),
        );

        assert!(terminal);
        let q = store.query(&id).unwrap();
        assert!(q.results.iter().all(|r| {
            r.status == DocStatus::Failed
                && r.message.as_deref() == Some("model unavailable")
                && r.progress == 100
        }));
    }
}
