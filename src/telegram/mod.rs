//! Telegram Bot API integration: channel comments, posts and stats.

pub mod analytics;
pub mod api;
pub mod comments;
pub mod ingest;
pub mod listener;
pub mod posts;
pub mod types;

pub use analytics::TgStats;
pub use api::{BotApiClient, TelegramApi};
pub use comments::TgCommentActions;
pub use ingest::TgIngest;
pub use listener::{ListenerState, TelegramListener};
pub use posts::TgPublisher;
