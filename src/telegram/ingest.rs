//! Normalizes discussion-group messages into stored comments.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use super::api::TelegramApi;
use super::types::{Message, MessageReactionCountUpdated};
use crate::bus::{publish_best_effort, CommentEvent, EventBus, EventType};
use crate::db::{self, Comment, Database, NewComment, Platform, PostPlatform, TgBinding, UploadKind};
use crate::error::{CoreError, CoreResult};
use crate::storage::UploadStore;

/// Largest file the Bot API lets a bot download.
pub const MAX_DOWNLOAD_SIZE: i64 = 20 * 1024 * 1024;

/// What a discussion message replies to.
enum ReplyTarget {
    Post(PostPlatform),
    Comment(Comment),
}

pub struct TgIngest {
    api: Arc<dyn TelegramApi>,
    db: Database,
    uploads: UploadStore,
    bus: Arc<dyn EventBus>,
}

impl TgIngest {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        db: Database,
        uploads: UploadStore,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            api,
            db,
            uploads,
            bus,
        }
    }

    async fn binding_for_discussion(&self, chat_id: i64) -> CoreResult<Option<TgBinding>> {
        db::get_tg_binding_by_discussion(self.db.pool(), chat_id)
            .await
            .map_err(CoreError::store)
    }

    async fn existing_comment(&self, team_id: i64, message_id: i64) -> CoreResult<Option<Comment>> {
        db::get_comment_by_platform_id(self.db.pool(), team_id, Platform::Tg, message_id)
            .await
            .map_err(CoreError::store)
    }

    async fn resolve_target(&self, team_id: i64, reply: &Message) -> CoreResult<Option<ReplyTarget>> {
        if let Some((_, channel_message_id)) = reply.channel_origin() {
            let post = db::find_post_platform(self.db.pool(), team_id, Platform::Tg, channel_message_id)
                .await
                .map_err(CoreError::store)?;
            if let Some(post) = post {
                return Ok(Some(ReplyTarget::Post(post)));
            }
        }

        Ok(self
            .existing_comment(team_id, reply.message_id)
            .await?
            .map(ReplyTarget::Comment))
    }

    /// Store a new discussion message as a comment and announce it.
    pub async fn ingest_new(&self, msg: &Message) -> CoreResult<()> {
        if msg.is_automatic_forward == Some(true) || msg.sender_chat.is_some() {
            return Ok(());
        }
        let Some(from) = &msg.from else {
            return Ok(());
        };
        let Some(reply) = &msg.reply_to_message else {
            return Ok(());
        };
        let Some(binding) = self.binding_for_discussion(msg.chat.id).await? else {
            return Ok(());
        };
        let team_id = binding.team_id;

        let Some(target) = self.resolve_target(team_id, reply).await? else {
            debug!(team_id, message_id = msg.message_id, "Reply target is neither a post nor a comment, ignoring");
            return Ok(());
        };

        if let Some(existing) = self.existing_comment(team_id, msg.message_id).await? {
            debug!(team_id, comment_id = existing.id, "Comment already stored, re-announcing");
            self.announce(&existing, EventType::Created).await;
            return Ok(());
        }

        let mut comment = NewComment::new(team_id, Platform::Tg, msg.message_id);
        comment.user_platform_id = from.id;
        comment.full_name = from.full_name();
        comment.username = from.username.clone().unwrap_or_default();
        comment.text = msg.body().to_string();
        comment.created_at = Utc.timestamp_opt(msg.date, 0).single();

        match target {
            ReplyTarget::Post(post) => {
                comment.post_union_id = Some(post.post_union_id);
                comment.platform_post_id = Some(post.platform_post_id);
            }
            ReplyTarget::Comment(parent) => {
                comment.post_union_id = parent.post_union_id;
                comment.platform_post_id = parent.platform_post_id;
                comment.reply_to_comment_id = Some(parent.id);
            }
        }

        comment.attachments = self.collect_attachments(msg).await?;
        if comment.is_empty() {
            debug!(team_id, message_id = msg.message_id, "Dropping empty comment");
            return Ok(());
        }

        match self.fetch_avatar(from.id).await {
            Ok(avatar) => comment.avatar_upload_id = avatar,
            Err(e) => warn!(user_id = from.id, "Failed to store avatar: {e:#}"),
        }

        let inserted = db::insert_comment(self.db.pool(), &comment)
            .await
            .map_err(CoreError::store)?;

        let stored = match inserted {
            Some(id) => db::get_comment(self.db.pool(), id).await,
            None => db::get_comment_by_platform_id(self.db.pool(), team_id, Platform::Tg, msg.message_id).await,
        }
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::store(anyhow::anyhow!("comment vanished after insert")))?;

        info!(
            team_id,
            comment_id = stored.id,
            post_id = stored.post_union_id.unwrap_or(0),
            "Stored Telegram comment"
        );
        self.announce(&stored, EventType::Created).await;
        Ok(())
    }

    /// Apply an edit to a stored comment.
    pub async fn ingest_edit(&self, msg: &Message) -> CoreResult<()> {
        let Some(binding) = self.binding_for_discussion(msg.chat.id).await? else {
            return Ok(());
        };
        let Some(existing) = self.existing_comment(binding.team_id, msg.message_id).await? else {
            return Ok(());
        };

        let text = msg.body().to_string();
        let attachments = self.collect_attachments(msg).await?;
        if text.trim().is_empty() && attachments.is_empty() {
            return Ok(());
        }

        db::update_comment_content(self.db.pool(), existing.id, &text, &attachments)
            .await
            .map_err(CoreError::store)?;

        debug!(team_id = binding.team_id, comment_id = existing.id, "Updated Telegram comment");
        let revision = msg.edit_date.unwrap_or(msg.date);
        let event = CommentEvent::new(
            Platform::Tg,
            existing.team_id,
            existing.post_union_id,
            EventType::Edited,
            existing.id,
        )
        .with_revision(revision);
        publish_best_effort(self.bus.as_ref(), event).await;
        Ok(())
    }

    /// Store the reaction total of a tracked channel post.
    pub async fn ingest_reactions(&self, update: &MessageReactionCountUpdated) -> CoreResult<()> {
        let pool = self.db.pool();
        let binding = match db::get_tg_binding_by_channel(pool, update.chat.id)
            .await
            .map_err(CoreError::store)?
        {
            Some(binding) => binding,
            None => match self.binding_for_discussion(update.chat.id).await? {
                Some(binding) => binding,
                None => return Ok(()),
            },
        };

        let Some(post) = db::find_post_platform(pool, binding.team_id, Platform::Tg, update.message_id)
            .await
            .map_err(CoreError::store)?
        else {
            return Ok(());
        };

        let total = update.total();
        db::set_post_reactions(pool, post.post_union_id, Platform::Tg, total)
            .await
            .map_err(CoreError::store)?;
        debug!(post_id = post.post_union_id, reactions = total, "Updated Telegram reactions");
        Ok(())
    }

    async fn announce(&self, comment: &Comment, kind: EventType) {
        let event = CommentEvent::new(
            Platform::Tg,
            comment.team_id,
            comment.post_union_id,
            kind,
            comment.id,
        );
        publish_best_effort(self.bus.as_ref(), event).await;
    }

    async fn fetch_avatar(&self, user_id: i64) -> CoreResult<Option<i64>> {
        let photos = self
            .api
            .get_user_profile_photos(user_id, 1)
            .await
            .map_err(CoreError::platform)?;

        let Some(largest) = photos.photos.first().and_then(|sizes| sizes.last()) else {
            return Ok(None);
        };
        let id = self.save_file(&largest.file_id, UploadKind::Photo).await?;
        Ok(Some(id))
    }

    /// Download every media item of the message. Any failure aborts the message.
    async fn collect_attachments(&self, msg: &Message) -> CoreResult<Vec<i64>> {
        let mut files: Vec<(&str, Option<i64>, UploadKind)> = Vec::new();

        if let Some(largest) = msg.photo.as_ref().and_then(|sizes| sizes.last()) {
            files.push((largest.file_id.as_str(), largest.file_size, UploadKind::Photo));
        }
        if let Some(video) = &msg.video {
            files.push((video.file_id.as_str(), video.file_size, UploadKind::Video));
        }
        if let Some(doc) = &msg.document {
            files.push((doc.file_id.as_str(), doc.file_size, UploadKind::Doc));
        }
        if let Some(audio) = &msg.audio {
            files.push((audio.file_id.as_str(), audio.file_size, UploadKind::Audio));
        }
        if let Some(voice) = &msg.voice {
            files.push((voice.file_id.as_str(), voice.file_size, UploadKind::Voice));
        }
        if let Some(sticker) = &msg.sticker {
            files.push((sticker.file_id.as_str(), sticker.file_size, UploadKind::Sticker));
        }

        let mut ids = Vec::with_capacity(files.len());
        for (file_id, size, kind) in files {
            if size.is_some_and(|s| s > MAX_DOWNLOAD_SIZE) {
                warn!(
                    message_id = msg.message_id,
                    size,
                    kind = kind.as_str(),
                    "Skipping attachment over the download limit"
                );
                continue;
            }
            ids.push(self.save_file(file_id, kind).await?);
        }
        Ok(ids)
    }

    async fn save_file(&self, file_id: &str, kind: UploadKind) -> CoreResult<i64> {
        let file = self
            .api
            .get_file(file_id)
            .await
            .map_err(CoreError::platform)?;
        let file_path = file
            .file_path
            .ok_or_else(|| CoreError::PlatformRejected(format!("file {file_id} has no download path")))?;

        let data = self
            .api
            .download_file(&file_path)
            .await
            .map_err(CoreError::platform)?;

        if kind == UploadKind::Sticker && file_path.ends_with(".tgs") {
            let lottie = gunzip(&data).map_err(|e| CoreError::PlatformRejected(format!("{e:#}")))?;
            return self
                .uploads
                .store_media("tg", &lottie, kind, Some("json"))
                .await;
        }

        let fallback = file_path
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.contains('/'));
        self.uploads.store_media("tg", &data, kind, fallback).await
    }
}

/// Unpack an animated `.tgs` sticker into its lottie JSON.
fn gunzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("Failed to unpack animated sticker")?;
    Ok(out)
}
