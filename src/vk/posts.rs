use std::sync::Arc;

use async_trait::async_trait;

use super::api::VkConnector;
use super::{community, upload_attachments};
use crate::db::{Database, Platform, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};
use crate::posts::{PostPublisher, Published};
use crate::storage::UploadStore;

/// Posts to the wall of the community bound to a team.
pub struct VkPublisher {
    db: Database,
    uploads: UploadStore,
    connector: Arc<dyn VkConnector>,
}

impl VkPublisher {
    pub fn new(db: Database, uploads: UploadStore, connector: Arc<dyn VkConnector>) -> Self {
        Self {
            db,
            uploads,
            connector,
        }
    }
}

#[async_trait]
impl PostPublisher for VkPublisher {
    fn platform(&self) -> Platform {
        Platform::Vk
    }

    async fn publish(&self, post: &PostUnion) -> CoreResult<Published> {
        let attachments = post.attachment_ids();
        if attachments.is_empty() && post.text.trim().is_empty() {
            return Err(CoreError::PlatformRejected("empty post".into()));
        }

        let (binding, api) = community(&self.db, self.connector.as_ref(), post.team_id).await?;
        let refs = upload_attachments(api.as_ref(), &self.uploads, binding.group_id, &attachments).await?;
        let post_id = api
            .wall_post(binding.group_id, &post.text, &refs)
            .await
            .map_err(CoreError::platform)?;
        Ok(Published::single(post_id))
    }

    async fn edit(&self, post: &PostUnion, record: &PostPlatform, text: &str) -> CoreResult<()> {
        let (binding, api) = community(&self.db, self.connector.as_ref(), post.team_id).await?;
        // wall.edit replaces the attachment list, so the files go up again.
        let refs = upload_attachments(api.as_ref(), &self.uploads, binding.group_id, &post.attachment_ids()).await?;
        api.wall_edit(binding.group_id, record.platform_post_id, text, &refs)
            .await
            .map_err(CoreError::platform)
    }

    async fn delete(&self, post: &PostUnion, record: &PostPlatform) -> CoreResult<()> {
        let (binding, api) = community(&self.db, self.connector.as_ref(), post.team_id).await?;
        api.wall_delete(binding.group_id, record.platform_post_id)
            .await
            .map_err(CoreError::platform)
    }
}
