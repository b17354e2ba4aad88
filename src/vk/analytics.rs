use std::sync::Arc;

use async_trait::async_trait;

use super::api::VkConnector;
use super::community;
use crate::analytics::{Metrics, StatsPlatform};
use crate::db::{Database, Platform, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};

/// Reads views and likes from `wall.getById`.
pub struct VkStats {
    db: Database,
    connector: Arc<dyn VkConnector>,
}

impl VkStats {
    pub fn new(db: Database, connector: Arc<dyn VkConnector>) -> Self {
        Self { db, connector }
    }
}

#[async_trait]
impl StatsPlatform for VkStats {
    fn platform(&self) -> Platform {
        Platform::Vk
    }

    async fn fetch_metrics(&self, post: &PostUnion, record: &PostPlatform) -> CoreResult<Metrics> {
        let (binding, api) = community(&self.db, self.connector.as_ref(), post.team_id).await?;
        let wall_post = api
            .wall_get_by_id(binding.group_id, record.platform_post_id)
            .await
            .map_err(CoreError::platform)?
            .ok_or_else(|| CoreError::PlatformRejected(format!("wall post {} not found", record.platform_post_id)))?;

        Ok(Metrics {
            views: wall_post.views.count,
            reactions: wall_post.likes.count,
        })
    }
}
