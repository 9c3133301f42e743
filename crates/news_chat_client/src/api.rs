//! HTTP side of the service: per-session history and reset, plus the
//! request/response ask call used when the streaming channel is unavailable.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ClientError;
use crate::messages::{AskAnswer, ChatMessage, Source};

/// Conversation-history and fallback endpoints the chat core depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Ordered history for `session`; empty for a session the server has never seen.
    async fn fetch_history(&self, session: &str) -> Result<Vec<ChatMessage>, ClientError>;

    /// Clear server-side history. Safe on a session with no history.
    async fn reset(&self, session: &str) -> Result<(), ClientError>;

    /// One complete question/answer round trip.
    async fn ask(&self, session: &str, question: &str, top_k: u32)
        -> Result<AskAnswer, ClientError>;
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Option<Vec<ChatMessage>>,
}

/// `SessionApi` over HTTP/JSON.
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionApi {
    /// `base_url` is the service root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_for_answer(&self, path: &str, body: Value) -> Result<AskAnswer, ClientError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value = resp.json::<Value>().await?;
        normalize_answer(value)
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn fetch_history(&self, session: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/session/{}/history", session)))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: HistoryResponse = resp.error_for_status()?.json().await?;
        Ok(body.history.unwrap_or_default())
    }

    async fn reset(&self, session: &str) -> Result<(), ClientError> {
        self.client
            .post(self.url(&format!("/api/session/{}/reset", session)))
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn ask(
        &self,
        session: &str,
        question: &str,
        top_k: u32,
    ) -> Result<AskAnswer, ClientError> {
        let primary = json!({ "sessionId": session, "message": question, "topK": top_k });
        match self.post_for_answer("/api/chat", primary).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::warn!(error = %e, "ask failed on /api/chat; trying /api/chat/ask");
                let alternate =
                    json!({ "sessionId": session, "question": question, "topK": top_k });
                self.post_for_answer("/api/chat/ask", alternate).await
            }
        }
    }
}

/// Fold the two historical response shapes into one `AskAnswer`.
///
/// Older servers reply `{answer, contexts}`, newer ones `{answer, sources}`;
/// either may also send the answer as a bare JSON string.
pub fn normalize_answer(value: Value) -> Result<AskAnswer, ClientError> {
    let object = match value {
        Value::String(answer) => {
            return Ok(AskAnswer {
                answer,
                sources: Vec::new(),
            })
        }
        Value::Object(object) => object,
        other => {
            return Err(ClientError::Protocol(format!(
                "unexpected answer body: {}",
                other
            )))
        }
    };

    let answer = object
        .get("answer")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Protocol("answer body has no answer".into()))?
        .to_string();

    let sources = ["contexts", "sources"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_array))
        .map(|items| items.iter().filter_map(source_from_value).collect())
        .unwrap_or_default();

    Ok(AskAnswer { answer, sources })
}

fn source_from_value(value: &Value) -> Option<Source> {
    match value {
        Value::String(source) => Some(Source {
            source: source.clone(),
            score: None,
        }),
        Value::Object(object) => Some(Source {
            source: object.get("source")?.as_str()?.to_string(),
            score: object.get("score").and_then(Value::as_f64),
        }),
        _ => None,
    }
}
