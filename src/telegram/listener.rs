//! Sequential Bot API update poller.
//!
//! One loop reads updates with a long poll, handles them strictly in order
//! and persists `last_update_id` after each one. A transient failure stops the
//! batch without moving the cursor, so the same update is fetched again on
//! the next poll. Comment inserts are idempotent, which makes replays safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::TelegramApi;
use super::ingest::TgIngest;
use super::types::{Chat, Message, Update};
use crate::bus::EventBus;
use crate::db::{self, Database};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;
use crate::storage::UploadStore;

/// Long-poll timeout passed to `getUpdates`.
pub const LONG_POLL_SECS: u64 = 50;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

const START_TEXT: &str = "❇️ Hi! I manage Telegram channels of socialops teams. \
Use /help to see the available commands.";

const HELP_TEXT: &str = "❇️ To find out the channel id and the discussion id, forward me any message from the channel.\n\
Make sure the bot is an administrator of the channel and of its discussion group first.\n\n\
Commands:\n\
/start - start working with the bot\n\
/help - show this list\n\
/add_channel <team secret> <channel id> [discussion id] - bind a channel to your team; calling it again updates the binding";

const ADD_CHANNEL_USAGE: &str = "❌ Wrong number of arguments. Usage: \
/add_channel <team secret> <channel id> [discussion id]\n\
Examples:\n\
/add_channel secret123 -1001234567890\n\
/add_channel secret123 -1001234567890 -1009876543210";

const NOT_FROM_CHANNEL_TEXT: &str = "❌ This message was not forwarded from a channel.\n\
🔍 Use /help to see what the bot can do.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Polling,
    Draining,
    Stopped,
}

pub struct TelegramListener {
    api: Arc<dyn TelegramApi>,
    db: Database,
    ingest: TgIngest,
    debug: bool,
    state: watch::Sender<ListenerState>,
}

impl TelegramListener {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        db: Database,
        uploads: UploadStore,
        bus: Arc<dyn EventBus>,
        debug: bool,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Stopped);
        Self {
            ingest: TgIngest::new(Arc::clone(&api), db.clone(), uploads, bus),
            api,
            db,
            debug,
            state,
        }
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ListenerState) {
        debug!(?state, "Telegram listener state");
        self.state.send_replace(state);
    }

    /// Run until `cancel` fires. The batch in flight is finished before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        self.set_state(ListenerState::Starting);

        let mut cursor = loop {
            match db::get_tg_cursor(self.db.pool()).await {
                Ok(cursor) => break cursor,
                Err(e) => {
                    error!("Failed to read Telegram cursor: {e:#}");
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.set_state(ListenerState::Stopped);
                            return;
                        }
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        };

        match self.api.get_me().await {
            Ok(me) => info!(bot = me.username.as_deref().unwrap_or_default(), cursor, "Telegram listener started"),
            Err(e) => warn!(cursor, "Telegram listener started without bot identity: {e:#}"),
        }
        self.set_state(ListenerState::Polling);

        while !cancel.is_cancelled() {
            let polled = tokio::select! {
                () = cancel.cancelled() => break,
                polled = self.api.get_updates(cursor + 1, LONG_POLL_SECS) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    error!("Telegram poll error: {e:#}");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => continue,
                    }
                }
            };

            if let Some(last) = self.process_batch(&updates).await {
                cursor = last;
            } else if !updates.is_empty() {
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }

        self.set_state(ListenerState::Draining);
        info!(cursor, "Telegram listener stopped");
        self.set_state(ListenerState::Stopped);
    }

    /// Handle updates in order. Returns the last update id whose cursor was
    /// stored, or `None` if the first update could not be completed.
    pub async fn process_batch(&self, updates: &[Update]) -> Option<i64> {
        let mut stored = None;

        for update in updates {
            match self.process_update(update).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    warn!(update_id = update.update_id, "Update failed, will retry: {e:#}");
                    break;
                }
                Err(e) => {
                    warn!(update_id = update.update_id, "Dropping update: {e:#}");
                }
            }

            let saved = with_retry("telegram cursor write", || {
                db::set_tg_cursor(self.db.pool(), update.update_id)
            })
            .await;
            if let Err(e) = saved {
                error!(update_id = update.update_id, "Failed to store Telegram cursor: {e:#}");
                break;
            }
            stored = Some(update.update_id);
        }

        stored
    }

    /// Dispatch one update.
    pub async fn process_update(&self, update: &Update) -> CoreResult<()> {
        if self.debug {
            debug!(update = ?update, "Telegram update");
        }

        if let Some(msg) = &update.message {
            if msg.chat.is_private() && msg.forward_origin.is_some() {
                return match msg.channel_origin() {
                    Some((channel, _)) => self.describe_channel(msg.chat.id, channel).await,
                    None => self.reply(msg.chat.id, NOT_FROM_CHANNEL_TEXT).await,
                };
            }
            if let Some((command, args)) = msg.command() {
                return self.handle_command(msg, command, args).await;
            }
            if !msg.chat.is_private() {
                return self.ingest.ingest_new(msg).await;
            }
            return Ok(());
        }

        if let Some(msg) = &update.edited_message {
            if !msg.chat.is_private() {
                return self.ingest.ingest_edit(msg).await;
            }
            return Ok(());
        }

        if let Some(reactions) = &update.message_reaction_count {
            return self.ingest.ingest_reactions(reactions).await;
        }

        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str) -> CoreResult<()> {
        self.api
            .send_message(chat_id, text, None)
            .await
            .map_err(CoreError::platform)?;
        Ok(())
    }

    async fn handle_command(&self, msg: &Message, command: &str, args: &str) -> CoreResult<()> {
        let chat_id = msg.chat.id;
        match command {
            "start" => self.reply(chat_id, START_TEXT).await,
            "help" => self.reply(chat_id, HELP_TEXT).await,
            "add_channel" => {
                let text = self.add_channel(args).await?;
                self.reply(chat_id, &text).await
            }
            _ => {
                self.reply(chat_id, "Unknown command. Use /help to see the available commands.")
                    .await
            }
        }
    }

    /// Bind a channel to the team owning `secret`. Returns the text to answer with.
    async fn add_channel(&self, args: &str) -> CoreResult<String> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        if !(2..=3).contains(&parts.len()) {
            return Ok(ADD_CHANNEL_USAGE.to_string());
        }

        let Some(channel_id) = parse_chat_id(parts[1]) else {
            return Ok("❌ Invalid channel id. Use a negative integer.".to_string());
        };
        let discussion_id = match parts.get(2) {
            Some(raw) => match parse_chat_id(raw) {
                Some(id) => Some(id),
                None => return Ok("❌ Invalid discussion id. Use a negative integer.".to_string()),
            },
            None => None,
        };

        let pool = self.db.pool();
        let Some(team) = db::get_team_by_secret(pool, parts[0])
            .await
            .map_err(CoreError::store)?
        else {
            return Ok("❌ Invalid team secret.".to_string());
        };

        if let Err(e) = db::upsert_tg_binding(pool, team.id, channel_id, discussion_id).await {
            error!(team_id = team.id, channel_id, "Failed to bind channel: {e:#}");
            return Ok("❌ Could not add the channel. Please contact support.".to_string());
        }

        info!(team_id = team.id, channel_id, ?discussion_id, "Bound Telegram channel");
        Ok("✅ Channel added. Open your dashboard and refresh the page.".to_string())
    }

    /// Report whether the bot administers a channel and its discussion group.
    async fn describe_channel(&self, chat_id: i64, channel: &Chat) -> CoreResult<()> {
        let title = channel.title.as_deref().unwrap_or_default();

        let Ok(admins) = self.api.get_chat_administrators(channel.id).await else {
            return self
                .reply(
                    chat_id,
                    "❌ Could not list the channel administrators. Make sure the bot is an administrator of the channel.",
                )
                .await;
        };

        let me = self.api.get_me().await.map_err(CoreError::platform)?;
        let is_admin = admins.iter().any(|a| a.user.id == me.id);

        let details = self
            .api
            .get_chat(channel.id)
            .await
            .map_err(CoreError::platform)?;
        let discussion_id = details.linked_chat_id.filter(|id| *id != 0);

        let mut text = if is_admin {
            format!("✅ The bot is an administrator of the channel \"{title}\".\n")
        } else {
            format!("❌ The bot is NOT an administrator of the channel \"{title}\".\n")
        };

        match discussion_id {
            Some(discussion_id) => {
                let discussion_admin = self
                    .api
                    .get_chat_member(discussion_id, me.id)
                    .await
                    .is_ok_and(|member| member.is_admin());
                if discussion_admin {
                    text.push_str("✅ The bot is an administrator of the discussion group.\n");
                } else {
                    text.push_str("❌ The bot is NOT an administrator of the discussion group.\n");
                }
                text.push_str(&format!(
                    "Channel id: {}\nDiscussion id: {discussion_id}",
                    channel.id
                ));
            }
            None => {
                text.push_str(&format!("\nChannel id: {}\nNo discussion group found", channel.id));
            }
        }

        self.reply(chat_id, &text).await
    }
}

fn parse_chat_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id < 0)
}
