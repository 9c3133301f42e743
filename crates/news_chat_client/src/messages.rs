//! Wire types for the streaming channel and the HTTP API. Client ↔ server JSON.

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Result-count hint sent with every question when the caller has no preference.
pub const DEFAULT_TOP_K: u32 = 5;

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Client → server: one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTurn {
    #[serde(rename = "type")]
    pub typ: &'static str,
    pub session_id: String,
    pub content: String,
    pub top_k: u32,
}

impl OutboundTurn {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>, top_k: u32) -> Self {
        Self {
            typ: "user_message",
            session_id: session_id.into(),
            content: content.into(),
            top_k,
        }
    }
}

/// Server → client: handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitMessage {
    #[serde(default)]
    session_id: Option<String>,
}

/// Server → client: answer fragment.
#[derive(Debug, Clone, Deserialize)]
struct ChunkMessage {
    content: String,
}

/// Server → client: turn failed.
#[derive(Debug, Clone, Deserialize)]
struct ErrorMessage {
    #[serde(default)]
    message: Option<String>,
}

/// One server event; discriminator is the JSON "type" field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Init { session_id: Option<String> },
    AssistantChunk(String),
    AssistantDone,
    Error(String),
}

impl InboundEvent {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ClientError> {
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ClientError::Protocol("missing type".into()))?;
        match typ {
            "init" => {
                let m: InitMessage = serde_json::from_value(value.clone())?;
                Ok(InboundEvent::Init {
                    session_id: m.session_id,
                })
            }
            "assistant_chunk" => {
                let m: ChunkMessage = serde_json::from_value(value.clone())?;
                Ok(InboundEvent::AssistantChunk(m.content))
            }
            "assistant_done" => Ok(InboundEvent::AssistantDone),
            "error" => {
                let m: ErrorMessage = serde_json::from_value(value.clone())?;
                Ok(InboundEvent::Error(m.message.unwrap_or_default()))
            }
            other => Err(ClientError::Protocol(format!("unknown type: {}", other))),
        }
    }

    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ClientError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }
}

/// One retrieval citation attached to a fallback answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Normalized request/response answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AskAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
}
