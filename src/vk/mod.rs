//! VK community integration: wall comments, posts and stats.

pub mod analytics;
pub mod api;
pub mod comments;
pub mod ingest;
pub mod listener;
pub mod posts;
pub mod session;
pub mod types;

use std::sync::Arc;

pub use analytics::VkStats;
pub use api::{VkApi, VkClientFactory, VkConnector};
pub use comments::VkCommentActions;
pub use ingest::VkIngest;
pub use listener::VkFleet;
pub use posts::VkPublisher;
pub use session::VkSession;

use crate::db::{self, Database, UploadKind, VkBinding};
use crate::error::{CoreError, CoreResult};
use crate::storage::UploadStore;

/// Binding of a team and a client authorized with its admin key.
pub(crate) async fn community(
    db: &Database,
    connector: &dyn VkConnector,
    team_id: i64,
) -> CoreResult<(VkBinding, Arc<dyn VkApi>)> {
    let binding = db::get_vk_binding(db.pool(), team_id)
        .await
        .map_err(CoreError::store)?
        .ok_or_else(|| CoreError::NotFound(format!("vk community of team {team_id}")))?;
    let api = connector
        .connect(&binding.admin_api_key)
        .map_err(|e| CoreError::Fatal(format!("{e:#}")))?;
    Ok((binding, api))
}

/// Upload stored files to the community wall, returning attachment references.
/// Photos go through the photo server, everything else is sent as a document.
pub(crate) async fn upload_attachments(
    api: &dyn VkApi,
    uploads: &UploadStore,
    group_id: i64,
    ids: &[i64],
) -> CoreResult<Vec<String>> {
    let mut refs = Vec::with_capacity(ids.len());
    for &id in ids {
        let (upload, data) = uploads.read_all(id).await?;
        let name = upload.file_name().to_string();
        let uploaded = match upload.kind() {
            UploadKind::Photo => api.upload_photo(group_id, &name, data).await,
            _ => api.upload_doc(group_id, &name, data).await,
        };
        refs.push(uploaded.map_err(CoreError::platform)?);
    }
    Ok(refs)
}
