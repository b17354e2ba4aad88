//! Post action state machine.
//!
//! Every publish, edit or delete request becomes a `pending` row in
//! `post_actions`; a spawned task performs the platform call and moves the
//! row to `success` or `error`. Terminal rows are never rewritten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::PostPublisher;
use crate::db::{self, ActionOperation, ActionStatus, Database, Platform, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;

/// Pending actions older than this belong to a task that no longer runs.
pub const STALE_ACTION_SECS: i64 = 10 * 60;

const INTERRUPTED: &str = "interrupted before completion";

#[derive(Clone)]
pub struct PostExecutor {
    db: Database,
    publishers: HashMap<Platform, Arc<dyn PostPublisher>>,
    tasks: TaskTracker,
}

impl PostExecutor {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            publishers: HashMap::new(),
            tasks: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PostPublisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    #[must_use]
    pub fn supports(&self, platform: Platform) -> bool {
        self.publishers.contains_key(&platform)
    }

    /// Record a pending action and run it in the background. Returns the action id.
    pub async fn dispatch(
        &self,
        operation: ActionOperation,
        post: PostUnion,
        platform: Platform,
    ) -> CoreResult<i64> {
        let publisher = self
            .publishers
            .get(&platform)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("platform {platform} is not configured")))?;

        let action_id = with_retry("create post action", || {
            db::create_post_action(self.db.pool(), post.id, platform, operation)
        })
        .await
        .map_err(CoreError::store)?;

        info!(
            action_id,
            post_id = post.id,
            platform = %platform,
            operation = operation.as_str(),
            "Dispatched post action"
        );

        let executor = self.clone();
        self.tasks.spawn(async move {
            executor.run(action_id, operation, &post, publisher.as_ref()).await;
        });

        Ok(action_id)
    }

    /// Wait up to `grace` for running actions. Returns `false` if some were
    /// still running when the grace ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if !drained {
            warn!(running = self.tasks.len(), "Post actions still running at shutdown");
        }
        drained
    }

    /// Move actions left `pending` by a previous process to `error`.
    pub async fn fail_interrupted(&self) -> CoreResult<u64> {
        let failed = db::fail_stale_post_actions(self.db.pool(), STALE_ACTION_SECS, INTERRUPTED)
            .await
            .map_err(CoreError::store)?;
        if failed > 0 {
            warn!(failed, "Failed interrupted post actions");
        }
        Ok(failed)
    }

    /// Perform one action and store its terminal status.
    pub async fn run(
        &self,
        action_id: i64,
        operation: ActionOperation,
        post: &PostUnion,
        publisher: &dyn PostPublisher,
    ) {
        let outcome = match operation {
            ActionOperation::Publish => self.publish(post, publisher).await,
            ActionOperation::Edit => self.edit(post, publisher).await,
            ActionOperation::Delete => self.delete(post, publisher).await,
        };

        let (status, message) = match &outcome {
            Ok(()) => (ActionStatus::Success, None),
            Err(e) => {
                warn!(action_id, post_id = post.id, "Post action failed: {e}");
                (ActionStatus::Error, Some(e.to_string()))
            }
        };

        let finished = with_retry("finish post action", || {
            db::finish_post_action(self.db.pool(), action_id, status, message.as_deref())
        })
        .await;

        match finished {
            Ok(true) => info!(action_id, status = status.as_str(), "Post action finished"),
            Ok(false) => warn!(action_id, "Post action was already terminal"),
            Err(e) => error!(action_id, "Failed to store post action status: {e:#}"),
        }
    }

    async fn record(&self, post: &PostUnion, platform: Platform) -> CoreResult<PostPlatform> {
        db::get_post_platform(self.db.pool(), post.id, platform)
            .await
            .map_err(CoreError::store)?
            .ok_or_else(|| CoreError::NotFound(format!("post {} is not published on {platform}", post.id)))
    }

    async fn publish(&self, post: &PostUnion, publisher: &dyn PostPublisher) -> CoreResult<()> {
        let platform = publisher.platform();
        let published = with_retry("publish post", || publisher.publish(post)).await?;

        let record = PostPlatform {
            post_union_id: post.id,
            team_id: post.team_id,
            platform: platform.as_str().to_string(),
            platform_post_id: published.platform_post_id,
            media_group_members: (!published.members.is_empty())
                .then(|| db::id_list_json(&published.members)),
        };

        let pool = self.db.pool();
        with_retry("store post platform", || db::upsert_post_platform(pool, &record))
            .await
            .map_err(CoreError::store)?;

        if let Err(e) = db::create_stats_task(pool, post.id, platform).await {
            warn!(post_id = post.id, "Failed to schedule stats refresh: {e:#}");
        }
        Ok(())
    }

    async fn edit(&self, post: &PostUnion, publisher: &dyn PostPublisher) -> CoreResult<()> {
        let record = self.record(post, publisher.platform()).await?;
        with_retry("edit post", || publisher.edit(post, &record, &post.text)).await
    }

    async fn delete(&self, post: &PostUnion, publisher: &dyn PostPublisher) -> CoreResult<()> {
        let platform = publisher.platform();
        let record = self.record(post, platform).await?;
        with_retry("delete post", || publisher.delete(post, &record)).await?;

        let pool = self.db.pool();
        if let Err(e) = with_retry("drop post platform", || db::delete_post_platform(pool, post.id, platform)).await {
            error!(post_id = post.id, "Failed to delete post platform record: {e:#}");
        }
        if let Err(e) = with_retry("drop post target", || db::remove_post_union_platform(pool, post.id, platform)).await {
            error!(post_id = post.id, "Failed to remove platform from post: {e:#}");
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostExecutor")
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
