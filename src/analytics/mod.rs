//! Post metrics: periodic refresh and team reports.

pub mod estimator;
mod worker;

pub use worker::StatsWorker;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::auth::{require_any_role, ANALYTICS_ROLES};
use crate::db::{self, parse_db_time, Database, Platform, PlatformTotals, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;

/// Metrics newer than this are served as is.
pub const REFRESH_SKIP_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub views: i64,
    pub reactions: i64,
}

/// Reads the current metrics of a published post from its platform.
#[async_trait]
pub trait StatsPlatform: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_metrics(&self, post: &PostUnion, record: &PostPlatform) -> CoreResult<Metrics>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub platform: String,
    pub views: i64,
    pub reactions: i64,
    pub comments: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostUnionStats {
    pub post_union_id: i64,
    pub platforms: Vec<PlatformStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamStats {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub platforms: Vec<PlatformTotals>,
}

/// Outcome of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Updated(Metrics),
    Fresh,
    NotPublished,
}

#[derive(Clone)]
pub struct AnalyticsService {
    db: Database,
    platforms: HashMap<Platform, Arc<dyn StatsPlatform>>,
}

impl AnalyticsService {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            platforms: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn StatsPlatform>) -> Self {
        self.platforms.insert(platform.platform(), platform);
        self
    }

    /// Refresh the metrics of one post on one platform unless they are recent.
    pub async fn update_stat(&self, post_id: i64, platform: Platform) -> CoreResult<Refresh> {
        let pool = self.db.pool();

        let stats = db::get_post_stats(pool, post_id, platform)
            .await
            .map_err(CoreError::store)?;
        let last_update = stats
            .as_ref()
            .and_then(|s| s.last_update.as_deref())
            .and_then(parse_db_time);
        if last_update.is_some_and(|at| (Utc::now() - at).num_seconds() < REFRESH_SKIP_SECS) {
            debug!(post_id, platform = %platform, "Stats are fresh, skipping");
            return Ok(Refresh::Fresh);
        }

        let fetcher = self
            .platforms
            .get(&platform)
            .ok_or_else(|| CoreError::NotFound(format!("platform {platform} is not configured")))?;

        let Some(post) = db::get_post_union(pool, post_id).await.map_err(CoreError::store)? else {
            return Ok(Refresh::NotPublished);
        };
        let Some(record) = db::get_post_platform(pool, post_id, platform)
            .await
            .map_err(CoreError::store)?
        else {
            return Ok(Refresh::NotPublished);
        };

        let metrics = with_retry("fetch post metrics", || fetcher.fetch_metrics(&post, &record)).await?;
        db::upsert_post_stats(pool, post_id, platform, metrics.views, metrics.reactions)
            .await
            .map_err(CoreError::store)?;

        debug!(post_id, platform = %platform, views = metrics.views, reactions = metrics.reactions, "Updated post stats");
        Ok(Refresh::Updated(metrics))
    }

    /// Metrics of one post on every platform it was published to.
    pub async fn get_post_union_stats(&self, team_id: i64, user_id: i64, post_id: i64) -> CoreResult<PostUnionStats> {
        require_any_role(&self.db, team_id, user_id, ANALYTICS_ROLES).await?;

        let pool = self.db.pool();
        let post = db::get_post_union(pool, post_id)
            .await
            .map_err(CoreError::store)?
            .filter(|post| post.team_id == team_id)
            .ok_or_else(|| CoreError::NotFound(format!("post {post_id}")))?;

        let mut platforms = Vec::new();
        for platform in post.platform_list() {
            let published = db::get_post_platform(pool, post_id, platform)
                .await
                .map_err(CoreError::store)?
                .is_some();
            if !published {
                continue;
            }

            if self.platforms.contains_key(&platform) {
                self.update_stat(post_id, platform).await?;
            }

            let stats = db::get_post_stats(pool, post_id, platform)
                .await
                .map_err(CoreError::store)?;
            let comments = db::count_comments(pool, post_id, platform)
                .await
                .map_err(CoreError::store)?;
            platforms.push(PlatformStats {
                platform: platform.as_str().to_string(),
                views: stats.as_ref().map_or(0, |s| s.views),
                reactions: stats.as_ref().map_or(0, |s| s.reactions),
                comments,
            });
        }

        Ok(PostUnionStats {
            post_union_id: post_id,
            platforms,
        })
    }

    /// Team totals per platform for posts created within `[start, end)`.
    pub async fn get_stats(
        &self,
        team_id: i64,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<TeamStats> {
        require_any_role(&self.db, team_id, user_id, ANALYTICS_ROLES).await?;
        if start >= end {
            return Err(CoreError::InvalidArgument("start must be before end".into()));
        }

        let platforms = db::team_platform_totals(self.db.pool(), team_id, start, end)
            .await
            .map_err(CoreError::store)?;
        Ok(TeamStats { start, end, platforms })
    }
}

impl std::fmt::Debug for AnalyticsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsService")
            .field("platforms", &self.platforms.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
