//! Chat delivery core for a retrieval-augmented news Q&A service: a
//! reconnecting streaming channel, HTTP history/reset/ask clients, the
//! conversation state machine, and a local thread registry.
//! Used by the `news-chat` terminal front end.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod messages;
pub mod threads;
pub mod transport;

pub use api::{HttpSessionApi, SessionApi};
pub use chat::{ChatCore, ChatLog, ChatOptions, ChatStatus, TurnPhase, LEGACY_PLACEHOLDER};
pub use config::{default_config_path, Config};
pub use error::{ClientError, ConfigError};
pub use messages::{AskAnswer, ChatMessage, InboundEvent, OutboundTurn, Role, Source};
pub use threads::{Thread, ThreadStore};
pub use transport::{Transport, TransportEvent, TransportOptions, TurnSink};
