use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::api::TelegramApi;
use super::comments::{load_media, MAX_ALBUM_SIZE};
use crate::db::{self, Database, Platform, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};
use crate::posts::{PostPublisher, Published};
use crate::storage::UploadStore;

/// Posts to the channel bound to a team.
pub struct TgPublisher {
    api: Arc<dyn TelegramApi>,
    db: Database,
    uploads: UploadStore,
}

impl TgPublisher {
    pub fn new(api: Arc<dyn TelegramApi>, db: Database, uploads: UploadStore) -> Self {
        Self { api, db, uploads }
    }

    async fn channel_id(&self, team_id: i64) -> CoreResult<i64> {
        db::get_tg_binding(self.db.pool(), team_id)
            .await
            .map_err(CoreError::store)?
            .map(|binding| binding.channel_id)
            .ok_or_else(|| CoreError::NotFound(format!("telegram channel of team {team_id}")))
    }
}

#[async_trait]
impl PostPublisher for TgPublisher {
    fn platform(&self) -> Platform {
        Platform::Tg
    }

    async fn publish(&self, post: &PostUnion) -> CoreResult<Published> {
        let attachments = post.attachment_ids();
        if attachments.len() > MAX_ALBUM_SIZE {
            return Err(CoreError::PlatformRejected(format!(
                "too many attachments: {} (at most {MAX_ALBUM_SIZE})",
                attachments.len()
            )));
        }
        if attachments.is_empty() && post.text.trim().is_empty() {
            return Err(CoreError::PlatformRejected("empty post".into()));
        }

        let chat_id = self.channel_id(post.team_id).await?;
        let mut media = load_media(&self.uploads, &attachments).await?;

        match media.len() {
            0 => {
                let sent = self
                    .api
                    .send_message(chat_id, &post.text, None)
                    .await
                    .map_err(CoreError::platform)?;
                Ok(Published::single(sent.message_id))
            }
            1 => {
                let sent = self
                    .api
                    .send_media(chat_id, media.remove(0), &post.text, None)
                    .await
                    .map_err(CoreError::platform)?;
                Ok(Published::single(sent.message_id))
            }
            _ => {
                let sent = self
                    .api
                    .send_media_group(chat_id, media, &post.text, None)
                    .await
                    .map_err(CoreError::platform)?;
                let mut ids = sent.into_iter().map(|m| m.message_id);
                let primary = ids.next().ok_or_else(|| {
                    CoreError::platform(anyhow::anyhow!("sendMediaGroup returned no messages"))
                })?;
                Ok(Published {
                    platform_post_id: primary,
                    members: ids.collect(),
                })
            }
        }
    }

    async fn edit(&self, post: &PostUnion, record: &PostPlatform, text: &str) -> CoreResult<()> {
        let chat_id = self.channel_id(post.team_id).await?;
        let result = if post.attachment_ids().is_empty() {
            self.api
                .edit_message_text(chat_id, record.platform_post_id, text)
                .await
        } else {
            self.api
                .edit_message_caption(chat_id, record.platform_post_id, text)
                .await
        };
        result.map_err(CoreError::platform)
    }

    async fn delete(&self, post: &PostUnion, record: &PostPlatform) -> CoreResult<()> {
        let chat_id = self.channel_id(post.team_id).await?;

        for member in record.members() {
            if let Err(e) = self.api.delete_message(chat_id, member).await {
                let e = CoreError::platform(e);
                if e.is_retryable() {
                    return Err(e);
                }
                warn!(post_id = post.id, message_id = member, "Album member already gone: {e}");
            }
        }

        self.api
            .delete_message(chat_id, record.platform_post_id)
            .await
            .map_err(CoreError::platform)
    }
}
