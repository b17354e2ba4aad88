use std::sync::Arc;

use async_trait::async_trait;

use super::api::VkConnector;
use super::{community, upload_attachments};
use crate::comments::{CommentPlatform, SentReply};
use crate::db::{Comment, Database, Platform};
use crate::error::{CoreError, CoreResult};
use crate::storage::UploadStore;

/// Replies and moderation under community posts.
pub struct VkCommentActions {
    db: Database,
    uploads: UploadStore,
    connector: Arc<dyn VkConnector>,
}

impl VkCommentActions {
    pub fn new(db: Database, uploads: UploadStore, connector: Arc<dyn VkConnector>) -> Self {
        Self {
            db,
            uploads,
            connector,
        }
    }
}

#[async_trait]
impl CommentPlatform for VkCommentActions {
    fn platform(&self) -> Platform {
        Platform::Vk
    }

    async fn send_reply(
        &self,
        team_id: i64,
        original: &Comment,
        text: &str,
        attachments: &[i64],
    ) -> CoreResult<SentReply> {
        let post_id = original
            .platform_post_id
            .ok_or_else(|| CoreError::NotFound(format!("post of comment {}", original.id)))?;
        let (binding, api) = community(&self.db, self.connector.as_ref(), team_id).await?;

        let refs = upload_attachments(api.as_ref(), &self.uploads, binding.group_id, attachments).await?;
        let comment_id = api
            .create_comment(
                binding.group_id,
                post_id,
                Some(original.comment_platform_id),
                text,
                &refs,
            )
            .await
            .map_err(CoreError::platform)?;

        // VK refuses replies to missing comments, so a created reply is always linked.
        Ok(SentReply {
            message_id: comment_id,
            album_rest: Vec::new(),
            linked: true,
        })
    }

    async fn delete_message(&self, team_id: i64, message_id: i64) -> CoreResult<()> {
        let (binding, api) = community(&self.db, self.connector.as_ref(), team_id).await?;
        api.delete_comment(binding.group_id, message_id)
            .await
            .map_err(CoreError::platform)
    }

    async fn ban_user(&self, team_id: i64, user_platform_id: i64) -> CoreResult<()> {
        let (binding, api) = community(&self.db, self.connector.as_ref(), team_id).await?;
        api.ban_user(binding.group_id, user_platform_id)
            .await
            .map_err(CoreError::platform)
    }
}
