//! Chatbot module - relays one channel's messages through the rule kernel.

pub mod database;
pub mod engine;
pub mod kernel;
pub mod message;
pub mod persona;
pub mod platform;
pub mod telegram;


pub use database::Database;
pub use engine::{ChatbotConfig, ChatbotEngine};
pub use kernel::{Kernel, ProcessKernel, ProcessSettings};
pub use message::IncomingMessage;
pub use persona::Persona;
pub use platform::{ChatPlatform, PlatformEvent};
pub use telegram::TelegramClient;
