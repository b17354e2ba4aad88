use std::sync::Arc;

use async_trait::async_trait;

use super::api::{MediaKind, OutgoingMedia, TelegramApi};
use crate::comments::{CommentPlatform, SentReply};
use crate::db::{self, Comment, Database, Platform, TgBinding};
use crate::error::{CoreError, CoreResult};
use crate::storage::UploadStore;

/// Most files Telegram accepts in one album.
pub const MAX_ALBUM_SIZE: usize = 10;

/// Replies and moderation in the discussion group of a team channel.
pub struct TgCommentActions {
    api: Arc<dyn TelegramApi>,
    db: Database,
    uploads: UploadStore,
}

impl TgCommentActions {
    pub fn new(api: Arc<dyn TelegramApi>, db: Database, uploads: UploadStore) -> Self {
        Self { api, db, uploads }
    }

    async fn discussion_id(&self, team_id: i64) -> CoreResult<i64> {
        let binding: Option<TgBinding> = db::get_tg_binding(self.db.pool(), team_id)
            .await
            .map_err(CoreError::store)?;
        let binding = binding.ok_or_else(|| CoreError::NotFound(format!("telegram channel of team {team_id}")))?;
        binding.discussion_id.ok_or(CoreError::ReplyUnavailable)
    }
}

/// Load uploads as files ready to send.
pub(crate) async fn load_media(uploads: &UploadStore, ids: &[i64]) -> CoreResult<Vec<OutgoingMedia>> {
    let mut media = Vec::with_capacity(ids.len());
    for &id in ids {
        let (upload, data) = uploads.read_all(id).await?;
        media.push(OutgoingMedia {
            kind: MediaKind::for_upload(upload.kind()),
            file_name: upload.file_name().to_string(),
            data,
        });
    }
    Ok(media)
}

#[async_trait]
impl CommentPlatform for TgCommentActions {
    fn platform(&self) -> Platform {
        Platform::Tg
    }

    async fn send_reply(
        &self,
        team_id: i64,
        original: &Comment,
        text: &str,
        attachments: &[i64],
    ) -> CoreResult<SentReply> {
        if attachments.len() > MAX_ALBUM_SIZE {
            return Err(CoreError::InvalidArgument(format!(
                "at most {MAX_ALBUM_SIZE} attachments are allowed"
            )));
        }

        let chat_id = self.discussion_id(team_id).await?;
        let reply_to = Some(original.comment_platform_id);
        let mut media = load_media(&self.uploads, attachments).await?;

        let mut sent = match media.len() {
            0 => vec![self
                .api
                .send_message(chat_id, text, reply_to)
                .await
                .map_err(CoreError::platform)?],
            1 => {
                let item = media.remove(0);
                vec![self
                    .api
                    .send_media(chat_id, item, text, reply_to)
                    .await
                    .map_err(CoreError::platform)?]
            }
            _ => self
                .api
                .send_media_group(chat_id, media, text, reply_to)
                .await
                .map_err(CoreError::platform)?,
        }
        .into_iter();
        let first = sent
            .next()
            .ok_or_else(|| CoreError::platform(anyhow::anyhow!("sendMediaGroup returned no messages")))?;

        Ok(SentReply {
            message_id: first.message_id,
            album_rest: sent.map(|m| m.message_id).collect(),
            linked: first.reply_to_message.is_some(),
        })
    }

    async fn delete_message(&self, team_id: i64, message_id: i64) -> CoreResult<()> {
        let chat_id = self.discussion_id(team_id).await?;
        self.api
            .delete_message(chat_id, message_id)
            .await
            .map_err(CoreError::platform)
    }

    async fn ban_user(&self, team_id: i64, user_platform_id: i64) -> CoreResult<()> {
        let chat_id = self.discussion_id(team_id).await?;
        self.api
            .ban_chat_member(chat_id, user_platform_id)
            .await
            .map_err(CoreError::platform)
    }
}
