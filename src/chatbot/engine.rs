//! Chatbot engine - relays channel messages through the rule kernel and logs each turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chatbot::database::{ChatLogEntry, Database, DatabaseError, Server, TurnWrite, User};
use crate::chatbot::kernel::{Kernel, KernelError};
use crate::chatbot::message::{IncomingMessage, clean_response, sanitize_input};
use crate::chatbot::platform::{BotIdentity, ChatPlatform, PlatformEvent, SendError};

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    /// The only channel the bot answers in.
    pub channel_id: i64,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("send error: {0}")]
    Send(#[from] SendError),
}

/// Why a message was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    FromBot,
    OtherChannel,
    NoText,
}

/// How a turn ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Skipped(Skip),
    Replied { response: String, write: TurnWrite },
    /// Logged, but the cleaned response was empty so nothing was sent.
    Silent { write: TurnWrite },
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: ChatbotConfig,
    kernel: Box<dyn Kernel>,
    database: Arc<Database>,
    platform: Arc<dyn ChatPlatform>,
    /// Every message observed, including ignored ones.
    messages_seen: AtomicU64,
}

impl ChatbotEngine {
    /// The kernel must already be loaded and the schema in place.
    pub fn new(
        config: ChatbotConfig,
        kernel: Box<dyn Kernel>,
        database: Arc<Database>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self {
            config,
            kernel,
            database,
            platform,
            messages_seen: AtomicU64::new(0),
        }
    }

    pub fn messages_seen(&self) -> u64 {
        self.messages_seen.load(Ordering::Relaxed)
    }

    pub fn handle_ready(&self, identity: &BotIdentity) {
        info!("Connected to the platform");
        info!("Name: {}", identity.name);
        info!("ID: {}", identity.id);
    }

    /// Run one turn. The log row is committed before the reply goes out, so a
    /// failed send still leaves the turn in `chat_log`.
    pub async fn handle_message(&mut self, msg: &IncomingMessage) -> Result<TurnOutcome, TurnError> {
        self.messages_seen.fetch_add(1, Ordering::Relaxed);

        if msg.author_is_bot {
            return Ok(TurnOutcome::Skipped(Skip::FromBot));
        }
        if msg.channel_id != self.config.channel_id {
            return Ok(TurnOutcome::Skipped(Skip::OtherChannel));
        }
        let Some(ref text) = msg.text else {
            return Ok(TurnOutcome::Skipped(Skip::NoText));
        };

        let preview: String = text.chars().take(50).collect();
        info!("📨 {} ({}): \"{}\"", msg.author_name, msg.author_id, preview);

        let input = sanitize_input(text);
        let raw = self.kernel.respond(&input).await?;
        let response = clean_response(&raw);

        let now = Utc::now();
        let write = self.database.record_turn(
            &ChatLogEntry {
                time: now,
                server_id: msg.server_id,
                user_id: msg.author_id,
                message: text.clone(),
                response: response.clone(),
            },
            &User {
                id: msg.author_id,
                name: msg.author_name.clone(),
                first_seen: now,
            },
            &Server {
                id: msg.server_id,
                name: msg.server_name.clone(),
                first_seen: now,
            },
        )?;

        if response.is_empty() {
            warn!("Kernel gave an empty response to {:?}, not replying", input);
            return Ok(TurnOutcome::Silent { write });
        }

        self.platform.reply(msg, &response).await?;
        debug!("Replied to message {} ({} chars)", msg.message_id, response.chars().count());

        Ok(TurnOutcome::Replied { response, write })
    }

    /// Consume events one at a time until `shutdown` is cancelled or the
    /// event channel closes. A failed turn is logged and dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<PlatformEvent>, shutdown: CancellationToken) {
        info!("Chatbot running (channel {})", self.config.channel_id);

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
            };

            match event {
                PlatformEvent::Ready(identity) => self.handle_ready(&identity),
                PlatformEvent::Message(msg) => {
                    let result = tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested, dropping in-flight message {}", msg.message_id);
                            break;
                        }
                        result = self.handle_message(&msg) => result,
                    };
                    self.log_turn(&msg, result);
                }
            }
        }

        info!("Chatbot stopped after {} message(s)", self.messages_seen());
    }

    fn log_turn(&self, msg: &IncomingMessage, result: Result<TurnOutcome, TurnError>) {
        match result {
            Ok(TurnOutcome::Skipped(reason)) => {
                debug!("Skipped message {} ({:?})", msg.message_id, reason);
            }
            Ok(TurnOutcome::Replied { write, .. } | TurnOutcome::Silent { write }) => {
                if write.new_user {
                    info!("First message from {} ({})", msg.author_name, msg.author_id);
                }
                if write.new_server {
                    info!("First message in server {} ({})", msg.server_name, msg.server_id);
                }
            }
            Err(TurnError::Send(e)) => error!("Platform send error: {e}"),
            Err(e) => error!("Turn failed: {e}"),
        }
    }
}
