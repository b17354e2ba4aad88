//! Reply, delete and follow comments across platforms.

mod summarize;

pub use self::summarize::{Summarizer, Summary};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::{self, COMMENT_ROLES};
use crate::bus::{publish_best_effort, CommentEvent, EventBus, EventStream, EventType};
use crate::db::{self, Comment, Database, NewComment, Platform};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;

/// Upper bound of [`CommentService::last_comments`].
pub const MAX_LAST_COMMENTS: i64 = 100;

/// Display name stored on replies sent on behalf of a team.
pub const TEAM_REPLY_NAME: &str = "Team reply";

/// Outcome of posting a reply on a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    /// Platform id of the posted message (first one for albums).
    pub message_id: i64,
    /// The other messages of an album.
    pub album_rest: Vec<i64>,
    /// False when the platform posted the message without the reply link,
    /// which means the original disappeared in the meantime.
    pub linked: bool,
}

/// Comment side effects on one platform.
#[async_trait]
pub trait CommentPlatform: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send_reply(
        &self,
        team_id: i64,
        original: &Comment,
        text: &str,
        attachments: &[i64],
    ) -> CoreResult<SentReply>;

    async fn delete_message(&self, team_id: i64, message_id: i64) -> CoreResult<()>;

    async fn ban_user(&self, team_id: i64, user_platform_id: i64) -> CoreResult<()>;
}

#[derive(Clone)]
pub struct CommentService {
    db: Database,
    bus: Arc<dyn EventBus>,
    platforms: HashMap<Platform, Arc<dyn CommentPlatform>>,
    summarizer: Option<Summarizer>,
}

impl CommentService {
    pub fn new(db: Database, bus: Arc<dyn EventBus>, summarizer: Option<Summarizer>) -> Self {
        Self {
            db,
            bus,
            platforms: HashMap::new(),
            summarizer,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn CommentPlatform>) -> Self {
        self.platforms.insert(platform.platform(), platform);
        self
    }

    fn platform_for(&self, name: &str) -> CoreResult<&Arc<dyn CommentPlatform>> {
        Platform::from_str(name)
            .and_then(|p| self.platforms.get(&p))
            .ok_or_else(|| CoreError::NotFound(format!("platform {name} is not configured")))
    }

    async fn team_comment(&self, team_id: i64, comment_id: i64) -> CoreResult<Comment> {
        db::get_comment(self.db.pool(), comment_id)
            .await
            .map_err(CoreError::store)?
            .filter(|c| c.team_id == team_id)
            .ok_or_else(|| CoreError::NotFound(format!("comment {comment_id}")))
    }

    /// Reply on behalf of the team. Returns the id of the stored reply.
    pub async fn reply(
        &self,
        team_id: i64,
        user_id: i64,
        comment_id: i64,
        text: &str,
        attachments: &[i64],
    ) -> CoreResult<i64> {
        auth::require_any_role(&self.db, team_id, user_id, COMMENT_ROLES).await?;

        if text.trim().is_empty() && attachments.is_empty() {
            return Err(CoreError::InvalidArgument("reply has neither text nor attachments".into()));
        }

        let original = self.team_comment(team_id, comment_id).await?;
        if original.is_deleted() {
            return Err(CoreError::ReplyUnavailable);
        }
        let platform = self.platform_for(&original.platform)?;

        let sent = with_retry("comment reply", || {
            platform.send_reply(team_id, &original, text, attachments)
        })
        .await?;

        if !sent.linked {
            self.retract_orphan(platform.as_ref(), &original, &sent)
                .await;
            return Err(CoreError::ReplyUnavailable);
        }

        let mut reply = NewComment::new(team_id, platform.platform(), sent.message_id);
        reply.post_union_id = original.post_union_id;
        reply.platform_post_id = original.platform_post_id;
        reply.full_name = TEAM_REPLY_NAME.to_string();
        reply.text = text.to_string();
        reply.reply_to_comment_id = Some(original.id);
        reply.is_team_reply = true;
        reply.attachments = attachments.to_vec();

        let pool = self.db.pool();
        let reply_id = match db::insert_comment(pool, &reply).await.map_err(CoreError::store)? {
            Some(id) => id,
            // The listener stored the echo of our own message first.
            None => db::get_comment_by_platform_id(pool, team_id, platform.platform(), sent.message_id)
                .await
                .map_err(CoreError::store)?
                .map(|c| c.id)
                .ok_or_else(|| CoreError::store(anyhow::anyhow!("reply vanished after insert")))?,
        };

        info!(team_id, comment_id = reply_id, reply_to = original.id, "Stored team reply");
        let event = CommentEvent::new(
            platform.platform(),
            team_id,
            original.post_union_id,
            EventType::Created,
            reply_id,
        );
        publish_best_effort(self.bus.as_ref(), event).await;
        Ok(reply_id)
    }

    /// The original vanished between lookup and send: take our message back
    /// and mark the original deleted.
    async fn retract_orphan(&self, platform: &dyn CommentPlatform, original: &Comment, sent: &SentReply) {
        warn!(
            team_id = original.team_id,
            comment_id = original.id,
            message_id = sent.message_id,
            messages = 1 + sent.album_rest.len(),
            "Original comment was deleted, retracting reply"
        );

        for &message_id in std::iter::once(&sent.message_id).chain(&sent.album_rest) {
            if let Err(e) = with_retry("retract orphan reply", || {
                platform.delete_message(original.team_id, message_id)
            })
            .await
            {
                warn!(message_id, "Failed to delete orphan reply: {e:#}");
            }
        }

        match with_retry("mark comment deleted", || {
            db::mark_comment_deleted(self.db.pool(), original.id)
        })
        .await
        {
            Ok(_) => {
                let event = CommentEvent::new(
                    platform.platform(),
                    original.team_id,
                    original.post_union_id,
                    EventType::Deleted,
                    original.id,
                );
                publish_best_effort(self.bus.as_ref(), event).await;
            }
            Err(e) => warn!(comment_id = original.id, "Failed to mark comment deleted: {e:#}"),
        }
    }

    /// Delete a comment on its platform, optionally banning the author.
    pub async fn delete(&self, team_id: i64, user_id: i64, comment_id: i64, ban_user: bool) -> CoreResult<()> {
        auth::require_any_role(&self.db, team_id, user_id, COMMENT_ROLES).await?;

        let comment = self.team_comment(team_id, comment_id).await?;
        let platform = self.platform_for(&comment.platform)?;

        with_retry("comment delete", || {
            platform.delete_message(team_id, comment.comment_platform_id)
        })
        .await?;

        with_retry("mark comment deleted", || {
            db::mark_comment_deleted(self.db.pool(), comment.id)
        })
        .await
        .map_err(CoreError::store)?;

        info!(team_id, comment_id, "Deleted comment");
        let event = CommentEvent::new(
            platform.platform(),
            team_id,
            comment.post_union_id,
            EventType::Deleted,
            comment.id,
        );
        publish_best_effort(self.bus.as_ref(), event).await;

        if ban_user && comment.user_platform_id > 0 {
            match with_retry("ban user", || platform.ban_user(team_id, comment.user_platform_id)).await {
                Ok(()) => info!(team_id, user_platform_id = comment.user_platform_id, "Banned comment author"),
                Err(e) => warn!(team_id, user_platform_id = comment.user_platform_id, "Failed to ban user: {e:#}"),
            }
        }

        Ok(())
    }

    /// Follow new comment events of a team, or of one post when `post_union_id` is set.
    pub async fn subscribe(&self, team_id: i64, user_id: i64, post_union_id: Option<i64>) -> CoreResult<EventStream> {
        auth::require_member(&self.db, team_id, user_id).await?;
        self.bus.subscribe(team_id, post_union_id.unwrap_or(0)).await
    }

    pub async fn summarize(&self, team_id: i64, user_id: i64, post_union_id: i64) -> CoreResult<Summary> {
        auth::require_member(&self.db, team_id, user_id).await?;

        let post = db::get_post_union(self.db.pool(), post_union_id)
            .await
            .map_err(CoreError::store)?;
        if post.map_or(true, |p| p.team_id != team_id) {
            return Err(CoreError::NotFound(format!("post {post_union_id}")));
        }

        let Some(summarizer) = &self.summarizer else {
            return Err(CoreError::platform(anyhow::anyhow!("summarizer is not configured")));
        };

        let texts = db::comment_texts_for_post(self.db.pool(), post_union_id)
            .await
            .map_err(CoreError::store)?;

        summarizer.summarize(post_union_id, &texts).await
    }

    /// Newest live comments, capped at [`MAX_LAST_COMMENTS`].
    pub async fn last_comments(
        &self,
        team_id: i64,
        user_id: i64,
        post_union_id: Option<i64>,
        limit: i64,
    ) -> CoreResult<Vec<Comment>> {
        auth::require_any_role(&self.db, team_id, user_id, COMMENT_ROLES).await?;
        if limit <= 0 {
            return Err(CoreError::InvalidArgument("limit must be positive".into()));
        }

        db::last_comments(self.db.pool(), team_id, post_union_id, limit.min(MAX_LAST_COMMENTS))
            .await
            .map_err(CoreError::store)
    }

    pub async fn get_comment(&self, team_id: i64, user_id: i64, comment_id: i64) -> CoreResult<Comment> {
        auth::require_any_role(&self.db, team_id, user_id, COMMENT_ROLES).await?;
        self.team_comment(team_id, comment_id).await
    }
}

impl std::fmt::Debug for CommentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentService")
            .field("platforms", &self.platforms.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
