use async_trait::async_trait;
use chrono::Utc;

use crate::analytics::estimator::estimate_views;
use crate::analytics::{Metrics, StatsPlatform};
use crate::db::{self, parse_db_time, Database, Platform, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};

/// Bots cannot read channel view counters, so views are estimated from the
/// reaction counts pushed by the listener and the stored comments.
#[derive(Debug, Clone)]
pub struct TgStats {
    db: Database,
}

impl TgStats {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatsPlatform for TgStats {
    fn platform(&self) -> Platform {
        Platform::Tg
    }

    async fn fetch_metrics(&self, post: &PostUnion, _record: &PostPlatform) -> CoreResult<Metrics> {
        let pool = self.db.pool();

        let reactions = db::get_post_stats(pool, post.id, Platform::Tg)
            .await
            .map_err(CoreError::store)?
            .map_or(0, |s| s.reactions);
        let comments = db::count_comments(pool, post.id, Platform::Tg)
            .await
            .map_err(CoreError::store)?;

        let published_at = post
            .pub_date
            .as_deref()
            .and_then(parse_db_time)
            .or_else(|| parse_db_time(&post.created_at))
            .unwrap_or_else(Utc::now);
        let hours = (Utc::now() - published_at).num_minutes() as f64 / 60.0;

        Ok(Metrics {
            views: estimate_views(reactions, comments, hours),
            reactions,
        })
    }
}
