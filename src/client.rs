//! Boundary to the external query service.
//!
//! The engine consumes five logical operations, expressed as the
//! [`QueryService`] trait so tests and embedders can substitute their own
//! transport:
//!
//! | Operation           | Route                     | Returns                    |
//! |---------------------|---------------------------|----------------------------|
//! | `extract`           | POST /api/extract-queries | numbered [`Question`]s     |
//! | `stream_answer`     | POST /api/query/stream    | raw byte stream (SSE)      |
//! | `swap_question`     | POST /api/swap-query      | one replacement text       |
//! | `combined_analysis` | POST /api/combined-analysis | synthesis text           |
//! | `session`           | GET /api/session          | [`SessionSnapshot`]        |
//!
//! Transport policy: the four non-streaming calls carry the configured
//! request timeout and are retried exactly once on network failure (HTTP
//! error statuses are not retried). The answer stream is long-lived, so it
//! only gets the connect timeout and is never retried here; answer-level
//! retries are the service's own job, reported through `retrying` events.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::models::{DocumentRef, Question};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Raw bytes of one answer stream. Chunk boundaries carry no meaning.
pub type AnswerStream = BoxStream<'static, Result<Bytes>>;

/// One completed question/answer pair fed into combined analysis.
///
/// Field names on the wire are the service's: `text` and `results`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisPair {
    #[serde(rename = "text")]
    pub question: String,
    #[serde(rename = "results")]
    pub answer: String,
}

/// Hydration payload returned by the session operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, rename = "files")]
    pub documents: Vec<DocumentRef>,
    #[serde(default)]
    pub queries: Vec<StoredQuery>,
}

/// A query record persisted by the service, replayed at hydration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredQuery {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub results: Option<String>,
}

/// The five operations the engine needs from the outside world.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Decomposes free text into discrete numbered questions.
    async fn extract(&self, text: &str) -> Result<Vec<Question>>;

    /// Opens the long-lived answer stream for one submitted question.
    /// Must support being opened repeatedly, one stream per query.
    async fn stream_answer(&self, text: &str) -> Result<AnswerStream>;

    /// Returns one replacement for `text`. `context` anchors the topic;
    /// `siblings` lists the other pending questions so the replacement
    /// avoids duplicating them.
    async fn swap_question(&self, text: &str, context: &str, siblings: &[String])
        -> Result<String>;

    /// Synthesizes one cross-query narrative for a document.
    async fn combined_analysis(&self, document_id: &str, pairs: &[AnalysisPair])
        -> Result<String>;

    /// One-shot session hydration at startup.
    async fn session(&self) -> Result<SessionSnapshot>;
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP implementation
// ═══════════════════════════════════════════════════════════════════════

/// Production implementation speaking HTTP+JSON to the query service.
pub struct HttpQueryService {
    base_url: String,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl HttpQueryService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        // No total timeout: a verification loop can hold the stream open for
        // minutes while staying healthy.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build streaming HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            stream_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues one non-streaming call with the retry-once-on-network-failure
    /// policy. HTTP error statuses fail immediately with the service's
    /// `error` field surfaced verbatim.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = self.url(path);
        let mut last_err = None;

        for attempt in 0..=1 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .context("Failed to decode service response");
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Service error {}: {}", status, service_error_text(&body_text));
                }
                Err(e) => {
                    last_err =
                        Some(anyhow::Error::from(e).context(format!("{method} {url} failed")));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{method} {url} failed")))
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn extract(&self, text: &str) -> Result<Vec<Question>> {
        let value = self
            .call(
                Method::POST,
                "/api/extract-queries",
                Some(&serde_json::json!({ "text": text })),
            )
            .await?;
        let resp: ExtractResponse =
            serde_json::from_value(value).context("Malformed extraction response")?;
        Ok(numbered_questions(resp.queries))
    }

    async fn stream_answer(&self, text: &str) -> Result<AnswerStream> {
        let url = self.url("/api/query/stream");
        let response = self
            .stream_client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Service error {}: {}", status, service_error_text(&body_text));
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed())
    }

    async fn swap_question(
        &self,
        text: &str,
        context: &str,
        siblings: &[String],
    ) -> Result<String> {
        let value = self
            .call(
                Method::POST,
                "/api/swap-query",
                Some(&serde_json::json!({
                    "original_query": text,
                    "user_context": context,
                    "existing_queries": siblings,
                })),
            )
            .await?;
        let resp: SwapResponse = serde_json::from_value(value).context("Malformed swap response")?;
        Ok(resp.query)
    }

    async fn combined_analysis(
        &self,
        document_id: &str,
        pairs: &[AnalysisPair],
    ) -> Result<String> {
        let value = self
            .call(
                Method::POST,
                "/api/combined-analysis",
                Some(&serde_json::json!({
                    "file_id": document_id,
                    "queries": pairs,
                })),
            )
            .await?;
        let resp: AnalysisResponse =
            serde_json::from_value(value).context("Malformed analysis response")?;
        Ok(resp.analysis)
    }

    async fn session(&self) -> Result<SessionSnapshot> {
        let value = self.call(Method::GET, "/api/session", None).await?;
        serde_json::from_value(value).context("Malformed session payload")
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Wire shapes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    queries: Vec<ExtractedQuestion>,
}

#[derive(Debug, Deserialize)]
struct ExtractedQuestion {
    text: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, rename = "questionNumber")]
    question_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    query: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    analysis: String,
}

/// Assigns fresh engine ids and sequential numbers where the service
/// omitted them.
fn numbered_questions(extracted: Vec<ExtractedQuestion>) -> Vec<Question> {
    extracted
        .into_iter()
        .enumerate()
        .map(|(i, q)| Question {
            number: Some(q.question_number.unwrap_or(i as u32 + 1)),
            category: q.category,
            ..Question::manual(q.text)
        })
        .collect()
}

/// Pulls the `error` field out of a JSON error body, falling back to the
/// raw text.
fn service_error_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}
