//! Turns long-poll events of a community into stored comments.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::api::VkApi;
use super::types::{LikeEvent, VkEvent, WallComment, WallReplyDelete};
use crate::bus::{publish_best_effort, CommentEvent, EventBus, EventType};
use crate::comments::TEAM_REPLY_NAME;
use crate::db::{self, Comment, Database, NewComment, Platform, UploadKind};
use crate::error::{CoreError, CoreResult};
use crate::storage::UploadStore;

/// Appended to the comment text, followed by the video links.
pub const VIDEO_SUFFIX: &str = "\n📎Video attached: ";

#[derive(Clone)]
pub struct VkIngest {
    db: Database,
    uploads: UploadStore,
    bus: Arc<dyn EventBus>,
}

impl VkIngest {
    pub fn new(db: Database, uploads: UploadStore, bus: Arc<dyn EventBus>) -> Self {
        Self { db, uploads, bus }
    }

    /// Dispatch one long-poll event of `team_id`.
    pub async fn handle(&self, team_id: i64, api: &dyn VkApi, event: &VkEvent) -> CoreResult<()> {
        match event.kind.as_str() {
            "wall_reply_new" => self.on_new(team_id, api, &parse(event)?).await,
            "wall_reply_edit" => self.on_edit(team_id, api, &parse(event)?, &event.event_id).await,
            "wall_reply_restore" => self.on_restore(team_id, api, &parse(event)?, &event.event_id).await,
            "wall_reply_delete" => self.on_delete(team_id, &parse(event)?).await,
            "like_add" => self.on_like(team_id, &parse(event)?, &event.event_id, 1).await,
            "like_remove" => self.on_like(team_id, &parse(event)?, &event.event_id, -1).await,
            other => {
                debug!(team_id, kind = other, "Ignoring VK event");
                Ok(())
            }
        }
    }

    async fn existing_comment(&self, team_id: i64, comment_id: i64) -> CoreResult<Option<Comment>> {
        db::get_comment_by_platform_id(self.db.pool(), team_id, Platform::Vk, comment_id)
            .await
            .map_err(CoreError::store)
    }

    async fn on_new(&self, team_id: i64, api: &dyn VkApi, reply: &WallComment) -> CoreResult<()> {
        let pool = self.db.pool();
        let Some(post) = db::find_post_platform(pool, team_id, Platform::Vk, reply.post_id)
            .await
            .map_err(CoreError::store)?
        else {
            return Ok(());
        };

        if let Some(existing) = self.existing_comment(team_id, reply.id).await? {
            debug!(team_id, comment_id = existing.id, "Comment already stored, re-announcing");
            self.announce(&existing, EventType::Created).await;
            return Ok(());
        }

        let mut comment = NewComment::new(team_id, Platform::Vk, reply.id);
        comment.post_union_id = Some(post.post_union_id);
        comment.platform_post_id = Some(post.platform_post_id);
        comment.user_platform_id = reply.from_id;
        comment.created_at = Utc.timestamp_opt(reply.date, 0).single();

        if let Some(parent) = reply.reply_to_comment {
            comment.reply_to_comment_id = self.existing_comment(team_id, parent).await?.map(|c| c.id);
        }

        let mut avatar_url = None;
        if reply.from_id > 0 {
            let user = api
                .get_user(reply.from_id)
                .await
                .map_err(CoreError::platform)?
                .ok_or_else(|| CoreError::PlatformRejected(format!("user {} not found", reply.from_id)))?;
            comment.full_name = user.full_name();
            comment.username = user.handle();
            avatar_url = user.photo_200;
        } else {
            // Written on behalf of the community.
            comment.is_team_reply = true;
            comment.user_platform_id = 0;
            comment.full_name = TEAM_REPLY_NAME.to_string();
        }

        let (attachments, text) = self.collect(api, reply).await?;
        comment.attachments = attachments;
        comment.text = text;
        if comment.is_empty() {
            debug!(team_id, vk_comment_id = reply.id, "Dropping empty comment");
            return Ok(());
        }

        if let Some(url) = avatar_url {
            match self.store_download(api, &url, UploadKind::Photo, Some("jpg")).await {
                Ok(id) => comment.avatar_upload_id = Some(id),
                Err(e) => warn!(team_id, user_id = reply.from_id, "Failed to store avatar: {e}"),
            }
        }

        let inserted = db::insert_comment(pool, &comment)
            .await
            .map_err(CoreError::store)?;
        let stored = match inserted {
            Some(id) => db::get_comment(pool, id).await,
            None => db::get_comment_by_platform_id(pool, team_id, Platform::Vk, reply.id).await,
        }
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::store(anyhow::anyhow!("comment vanished after insert")))?;

        info!(
            team_id,
            comment_id = stored.id,
            post_id = post.post_union_id,
            "Stored VK comment"
        );
        self.announce(&stored, EventType::Created).await;
        Ok(())
    }

    async fn on_edit(&self, team_id: i64, api: &dyn VkApi, reply: &WallComment, revision: &str) -> CoreResult<()> {
        let Some(existing) = self.existing_comment(team_id, reply.id).await? else {
            return Ok(());
        };

        let (attachments, text) = self.collect(api, reply).await?;
        db::update_comment_content(self.db.pool(), existing.id, &text, &attachments)
            .await
            .map_err(CoreError::store)?;

        debug!(team_id, comment_id = existing.id, "Updated VK comment");
        let event = CommentEvent::new(
            Platform::Vk,
            team_id,
            existing.post_union_id,
            EventType::Edited,
            existing.id,
        )
        .with_revision(revision);
        publish_best_effort(self.bus.as_ref(), event).await;
        Ok(())
    }

    async fn on_restore(&self, team_id: i64, api: &dyn VkApi, reply: &WallComment, revision: &str) -> CoreResult<()> {
        if self.existing_comment(team_id, reply.id).await?.is_some() {
            self.on_edit(team_id, api, reply, revision).await
        } else {
            self.on_new(team_id, api, reply).await
        }
    }

    async fn on_delete(&self, team_id: i64, deleted: &WallReplyDelete) -> CoreResult<()> {
        let Some(existing) = self.existing_comment(team_id, deleted.id).await? else {
            return Ok(());
        };

        let changed = db::mark_comment_deleted(self.db.pool(), existing.id)
            .await
            .map_err(CoreError::store)?;
        if changed {
            debug!(team_id, comment_id = existing.id, "Marked VK comment deleted");
        }
        self.announce(&existing, EventType::Deleted).await;
        Ok(())
    }

    /// Likes are counters, so a redelivered event must not be applied twice.
    async fn on_like(&self, team_id: i64, like: &LikeEvent, event_id: &str, delta: i64) -> CoreResult<()> {
        if like.object_type != "post" {
            return Ok(());
        }
        let pool = self.db.pool();
        let Some(post) = db::find_post_platform(pool, team_id, Platform::Vk, like.object_id)
            .await
            .map_err(CoreError::store)?
        else {
            return Ok(());
        };

        if event_id.is_empty() {
            return db::adjust_post_reactions(pool, post.post_union_id, Platform::Vk, delta)
                .await
                .map_err(CoreError::store);
        }
        let applied = db::apply_vk_like(pool, team_id, event_id, post.post_union_id, delta)
            .await
            .map_err(CoreError::store)?;
        if !applied {
            debug!(team_id, event_id, "Skipping replayed VK like");
        }
        Ok(())
    }

    /// Store the attachments of a comment. Videos cannot be downloaded, so
    /// their links are appended to the returned text instead.
    async fn collect(&self, api: &dyn VkApi, reply: &WallComment) -> CoreResult<(Vec<i64>, String)> {
        let mut ids = Vec::new();
        let mut videos = Vec::new();

        for attachment in &reply.attachments {
            let (url, kind) = match attachment.kind.as_str() {
                "photo" => match attachment.photo.as_ref().and_then(|p| p.largest_url()) {
                    Some(url) => (url.to_string(), UploadKind::Photo),
                    None => continue,
                },
                "video" => {
                    if let Some(video) = &attachment.video {
                        videos.push(video.play_url());
                    }
                    continue;
                }
                "sticker" => match attachment.sticker.as_ref().and_then(|s| s.url()) {
                    Some(url) => (url.to_string(), UploadKind::Sticker),
                    None => continue,
                },
                "doc" => match attachment.doc.as_ref().filter(|d| !d.url.is_empty()) {
                    Some(doc) => (doc.url.clone(), UploadKind::Doc),
                    None => continue,
                },
                other => {
                    warn!(vk_comment_id = reply.id, kind = other, "Skipping unsupported attachment");
                    continue;
                }
            };

            let fallback = (kind == UploadKind::Doc)
                .then(|| attachment.doc.as_ref().map(|d| d.ext.as_str()))
                .flatten()
                .filter(|ext| !ext.is_empty());
            ids.push(self.store_download(api, &url, kind, fallback).await?);
        }

        let mut text = reply.text.clone();
        if !videos.is_empty() {
            text.push_str(VIDEO_SUFFIX);
            text.push_str(&videos.join(", "));
        }
        Ok((ids, text))
    }

    async fn store_download(
        &self,
        api: &dyn VkApi,
        url: &str,
        kind: UploadKind,
        fallback_ext: Option<&str>,
    ) -> CoreResult<i64> {
        let data = api.download(url).await.map_err(CoreError::platform)?;
        self.uploads.store_media("vk", &data, kind, fallback_ext).await
    }

    async fn announce(&self, comment: &Comment, kind: EventType) {
        let event = CommentEvent::new(
            Platform::Vk,
            comment.team_id,
            comment.post_union_id,
            kind,
            comment.id,
        );
        publish_best_effort(self.bus.as_ref(), event).await;
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &VkEvent) -> CoreResult<T> {
    serde_json::from_value(event.object.clone())
        .map_err(|e| CoreError::InvalidArgument(format!("malformed {} event: {e}", event.kind)))
}

impl std::fmt::Debug for VkIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkIngest").finish_non_exhaustive()
    }
}
