//! Telegram client using teloxide.
//!
//! Telegram has no guild/channel split for ordinary groups, so the chat is both:
//! `server_id` and `channel_id` are the chat id, `server_name` is the chat title.

use async_trait::async_trait;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chatbot::message::IncomingMessage;
use crate::chatbot::platform::{BotIdentity, ChatPlatform, PlatformEvent, SendError};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Who the token belongs to. Fails on bad credentials.
    pub async fn identity(&self) -> Result<BotIdentity, SendError> {
        let me = self.bot.get_me().await.map_err(send_error)?;
        Ok(BotIdentity {
            id: me.id.0 as i64,
            name: me.username().to_string(),
        })
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), SendError> {
        // Plain text: no parse mode, so rule output can't inject markup.
        self.bot
            .send_message(ChatId(message.channel_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(message.message_id as i32)))
            .await
            .map(|_| ())
            .map_err(send_error)
    }
}

fn send_error(e: RequestError) -> SendError {
    match &e {
        RequestError::Api(_) | RequestError::MigrateToChatId(_) => SendError::Rejected(e.to_string()),
        _ => SendError::Transport(e.to_string()),
    }
}

/// Convert a Telegram message to the platform-neutral form.
pub fn incoming_from_telegram(msg: &Message) -> IncomingMessage {
    let (author_id, author_name, author_is_bot) = match msg.from.as_ref() {
        Some(user) => (
            user.id.0 as i64,
            user.username.clone().unwrap_or_else(|| user.first_name.clone()),
            user.is_bot,
        ),
        // Posts on behalf of a chat (anonymous admins, linked channels) have no
        // human account behind them; treat them like bots.
        None => match msg.sender_chat.as_ref() {
            Some(chat) => (chat.id.0, chat.title().unwrap_or("unknown").to_string(), true),
            None => (0, "unknown".to_string(), true),
        },
    };

    let server_name = msg
        .chat
        .title()
        .or_else(|| msg.chat.username())
        .unwrap_or("unknown")
        .to_string();

    IncomingMessage {
        message_id: msg.id.0 as i64,
        author_id,
        author_name,
        author_is_bot,
        channel_id: msg.chat.id.0,
        server_id: msg.chat.id.0,
        server_name,
        text: msg.text().map(str::to_string),
    }
}

/// Poll Telegram and forward every message into `tx` until `shutdown` fires.
pub async fn dispatch_events(bot: Bot, tx: mpsc::Sender<PlatformEvent>, shutdown: CancellationToken) {
    let handler = Update::filter_message().endpoint(forward_message);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![tx])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => debug!("Dispatcher not running: {e}"),
        }
    });

    info!("Telegram dispatcher started");
    dispatcher.dispatch().await;
    info!("Telegram dispatcher stopped");
}

async fn forward_message(msg: Message, tx: mpsc::Sender<PlatformEvent>) -> ResponseResult<()> {
    let event = PlatformEvent::Message(incoming_from_telegram(&msg));
    if tx.send(event).await.is_err() {
        warn!("Event channel closed, dropping message {}", msg.id.0);
    }
    Ok(())
}
