//! Messaging platform abstraction.
//!
//! The platform pushes [`PlatformEvent`]s into a channel; the engine answers
//! through [`ChatPlatform::reply`]. Production uses Telegram, tests use a
//! recording stub.

use async_trait::async_trait;
use thiserror::Error;

use crate::chatbot::message::IncomingMessage;

/// Who the bot is connected as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub name: String,
}

/// Inbound events, delivered in order.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Ready(BotIdentity),
    Message(IncomingMessage),
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Network or HTTP level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The platform answered and refused the request.
    #[error("platform rejected message: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send `text` as a reply to `message`, in the channel it came from.
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), SendError>;
}
