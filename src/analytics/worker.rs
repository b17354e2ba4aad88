//! Periodic metric refresh driven by `stats_update_tasks`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{AnalyticsService, Refresh};
use crate::db::{self, Database, Platform};

const CLAIM_BATCH: i64 = 50;
/// Claims older than this are taken over by other workers.
const STALE_CLAIM_SECS: i64 = 10 * 60;
/// Delay before a refreshed task is due again.
const RESCHEDULE_SECS: i64 = 60 * 60;
/// Posts older than this stop being refreshed.
const TASK_RETENTION_DAYS: i64 = 180;

#[derive(Debug, Clone)]
pub struct StatsWorker {
    db: Database,
    analytics: AnalyticsService,
    worker_id: String,
}

impl StatsWorker {
    #[must_use]
    pub fn new(db: Database, analytics: AnalyticsService, worker_id: String) -> Self {
        Self {
            db,
            analytics,
            worker_id,
        }
    }

    /// Process every task due now. Returns the number of tasks handled.
    pub async fn tick(&self) -> usize {
        let pool = self.db.pool();
        let worker_id = self.worker_id.as_str();

        match db::delete_expired_stats_tasks(pool, TASK_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(count) => info!(worker_id, expired_tasks = count, "Dropped expired stats tasks"),
            Err(e) => error!(worker_id, "Failed to delete expired stats tasks: {e:#}"),
        }

        let tasks = match db::claim_stats_tasks(pool, worker_id, CLAIM_BATCH, STALE_CLAIM_SECS).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(worker_id, "Stats task claim error: {e:#}");
                return 0;
            }
        };

        let handled = tasks.len();
        for task in tasks {
            match Platform::from_str(&task.platform) {
                Some(platform) => match self.analytics.update_stat(task.post_union_id, platform).await {
                    Ok(Refresh::Updated(_) | Refresh::Fresh) => {}
                    Ok(Refresh::NotPublished) => {
                        warn!(worker_id, post_id = task.post_union_id, platform = %platform, "Stats task for unpublished post");
                    }
                    Err(e) => {
                        warn!(worker_id, post_id = task.post_union_id, platform = %platform, "Stats refresh failed: {e}");
                    }
                },
                None => warn!(worker_id, task_id = task.id, platform = %task.platform, "Unknown platform in stats task"),
            }

            if let Err(e) = db::release_stats_task(pool, task.id, worker_id, RESCHEDULE_SECS).await {
                error!(worker_id, task_id = task.id, "Failed to release stats task: {e:#}");
            }
        }
        handled
    }

    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, interval_secs = interval.as_secs(), "Starting stats worker");

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                () = shutdown.cancelled() => {
                    info!(worker_id = %self.worker_id, "Stats worker shutting down");
                    break;
                }
            }
        }
    }
}
