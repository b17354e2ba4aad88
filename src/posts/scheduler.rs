//! Fires scheduled posts once their publication date has passed.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::PostExecutor;
use crate::db::{self, ActionOperation, Database};

#[derive(Debug, Clone)]
pub struct Scheduler {
    db: Database,
    executor: PostExecutor,
}

impl Scheduler {
    #[must_use]
    pub fn new(db: Database, executor: PostExecutor) -> Self {
        Self { db, executor }
    }

    /// Dispatch every due post once. Returns the number of posts fired.
    pub async fn tick(&self) -> usize {
        let pool = self.db.pool();
        let due = match db::due_scheduled_posts(pool, Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!("Scheduler tick error: {e:#}");
                return 0;
            }
        };

        let mut fired = 0;
        for scheduled in due {
            // Moving the row out of `pending` claims it against other ticks.
            match db::mark_scheduled_post(pool, scheduled.id, "done").await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(scheduled_id = scheduled.id, "Failed to claim scheduled post: {e:#}");
                    continue;
                }
            }

            let post = match db::get_post_union(pool, scheduled.post_union_id).await {
                Ok(Some(post)) => post,
                Ok(None) => {
                    warn!(post_id = scheduled.post_union_id, "Scheduled post no longer exists");
                    continue;
                }
                Err(e) => {
                    error!(post_id = scheduled.post_union_id, "Failed to load scheduled post: {e:#}");
                    continue;
                }
            };

            for platform in post.platform_list() {
                if let Err(e) = self
                    .executor
                    .dispatch(ActionOperation::Publish, post.clone(), platform)
                    .await
                {
                    error!(post_id = post.id, platform = %platform, "Failed to dispatch scheduled post: {e}");
                }
            }
            info!(post_id = post.id, scheduled_at = %scheduled.scheduled_at, "Fired scheduled post");
            fired += 1;
        }
        fired
    }

    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Starting post scheduler");

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.executor.fail_interrupted().await {
                        error!("Interrupted action sweep error: {e}");
                    }
                    self.tick().await;
                }
                () = shutdown.cancelled() => {
                    info!("Post scheduler shutting down");
                    break;
                }
            }
        }
    }
}
