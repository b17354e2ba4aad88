//! Integration tests for post metrics and the stats worker.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use socialops::analytics::{AnalyticsService, Refresh, StatsWorker};
use socialops::db::{self, Database, NewComment, NewPostUnion, Platform, PostPlatform, Role};
use socialops::error::CoreError;
use socialops::telegram::TgStats;
use socialops::vk::{VkConnector, VkStats};

use common::{seed_team, setup_db, FakeVk, FakeVkConnector, ADMIN, MODERATOR};

const ANALYST: i64 = 5;

struct Harness {
    db: Database,
    _temp_dir: tempfile::TempDir,
    vk: Arc<FakeVk>,
    analytics: AnalyticsService,
    team_id: i64,
}

async fn harness() -> Harness {
    let (db, temp_dir) = setup_db().await;
    let team_id = seed_team(&db).await;
    db::set_member_roles(db.pool(), team_id, ANALYST, &[Role::Analytics])
        .await
        .unwrap();

    let vk = FakeVk::new();
    let connector: Arc<dyn VkConnector> = Arc::new(FakeVkConnector(Arc::clone(&vk)));
    let analytics = AnalyticsService::new(db.clone())
        .with_platform(Arc::new(VkStats::new(db.clone(), connector)))
        .with_platform(Arc::new(TgStats::new(db.clone())));

    Harness {
        db,
        _temp_dir: temp_dir,
        vk,
        analytics,
        team_id,
    }
}

impl Harness {
    async fn published(&self, platform: Platform, platform_post_id: i64) -> i64 {
        let post_id = db::insert_post_union(
            self.db.pool(),
            &NewPostUnion {
                team_id: self.team_id,
                user_id: ADMIN,
                text: "metrics".to_string(),
                attachments: vec![],
                platforms: vec![platform],
                pub_date: None,
            },
        )
        .await
        .unwrap();
        db::upsert_post_platform(
            self.db.pool(),
            &PostPlatform {
                post_union_id: post_id,
                team_id: self.team_id,
                platform: platform.as_str().to_string(),
                platform_post_id,
                media_group_members: None,
            },
        )
        .await
        .unwrap();
        post_id
    }

    fn set_vk_metrics(&self, views: i64, likes: i64) {
        let mut state = self.vk.state.lock().unwrap();
        state.views = views;
        state.likes = likes;
    }

    fn metric_calls(&self) -> usize {
        self.vk.state.lock().unwrap().metric_calls
    }
}

#[tokio::test]
async fn test_recent_metrics_are_not_refetched() {
    let h = harness().await;
    let post_id = h.published(Platform::Vk, 12).await;
    h.set_vk_metrics(100, 7);

    let first = h
        .analytics
        .get_post_union_stats(h.team_id, ANALYST, post_id)
        .await
        .unwrap();
    assert_eq!(first.platforms.len(), 1);
    assert_eq!(first.platforms[0].platform, "vk");
    assert_eq!(first.platforms[0].views, 100);
    assert_eq!(first.platforms[0].reactions, 7);

    h.set_vk_metrics(250, 9);
    let second = h
        .analytics
        .get_post_union_stats(h.team_id, ANALYST, post_id)
        .await
        .unwrap();
    assert_eq!(second.platforms[0].views, 100);
    assert_eq!(h.metric_calls(), 1);
}

#[tokio::test]
async fn test_update_stat_outcomes() {
    let h = harness().await;
    let post_id = h.published(Platform::Vk, 12).await;
    h.set_vk_metrics(40, 3);

    assert!(matches!(
        h.analytics.update_stat(post_id, Platform::Vk).await.unwrap(),
        Refresh::Updated(m) if m.views == 40 && m.reactions == 3
    ));
    assert_eq!(
        h.analytics.update_stat(post_id, Platform::Vk).await.unwrap(),
        Refresh::Fresh
    );

    let unpublished = h.published(Platform::Vk, 13).await;
    db::delete_post_platform(h.db.pool(), unpublished, Platform::Vk)
        .await
        .unwrap();
    assert_eq!(
        h.analytics.update_stat(unpublished, Platform::Vk).await.unwrap(),
        Refresh::NotPublished
    );
}

#[tokio::test]
async fn test_transient_metric_failures_are_retried() {
    let h = harness().await;
    let post_id = h.published(Platform::Vk, 12).await;
    h.set_vk_metrics(64, 5);
    h.vk.state.lock().unwrap().metric_failures = 2;

    assert!(matches!(
        h.analytics.update_stat(post_id, Platform::Vk).await.unwrap(),
        Refresh::Updated(m) if m.views == 64 && m.reactions == 5
    ));
    assert_eq!(h.metric_calls(), 3);
}

#[tokio::test]
async fn test_telegram_views_are_estimated() {
    let h = harness().await;
    let post_id = h.published(Platform::Tg, 55).await;
    db::set_post_reactions(h.db.pool(), post_id, Platform::Tg, 5)
        .await
        .unwrap();
    for message_id in [700, 701] {
        let mut comment = NewComment::new(h.team_id, Platform::Tg, message_id);
        comment.post_union_id = Some(post_id);
        comment.text = "nice".to_string();
        db::insert_comment(h.db.pool(), &comment).await.unwrap();
    }

    let stats = h
        .analytics
        .get_post_union_stats(h.team_id, ADMIN, post_id)
        .await
        .unwrap();
    let tg = &stats.platforms[0];
    assert_eq!(tg.reactions, 5);
    assert_eq!(tg.comments, 2);
    // (0.7 * 5 + 0.3 * 2) / 0.04 * 0.3 for a post under an hour old.
    assert_eq!(tg.views, 31);
}

#[tokio::test]
async fn test_analytics_roles() {
    let h = harness().await;
    let post_id = h.published(Platform::Vk, 12).await;

    assert!(matches!(
        h.analytics.get_post_union_stats(h.team_id, MODERATOR, post_id).await,
        Err(CoreError::Forbidden(_))
    ));
    let now = Utc::now();
    assert!(matches!(
        h.analytics
            .get_stats(h.team_id, MODERATOR, now - Duration::days(1), now)
            .await,
        Err(CoreError::Forbidden(_))
    ));
    assert!(matches!(
        h.analytics.get_post_union_stats(h.team_id, ANALYST, post_id + 100).await,
        Err(CoreError::NotFound(_))
    ));
    assert_eq!(h.metric_calls(), 0);
}

#[tokio::test]
async fn test_team_totals() {
    let h = harness().await;
    let first = h.published(Platform::Vk, 12).await;
    let second = h.published(Platform::Vk, 13).await;
    db::upsert_post_stats(h.db.pool(), first, Platform::Vk, 100, 4).await.unwrap();
    db::upsert_post_stats(h.db.pool(), second, Platform::Vk, 50, 1).await.unwrap();

    let now = Utc::now();
    let report = h
        .analytics
        .get_stats(h.team_id, ANALYST, now - Duration::days(1), now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.platforms.len(), 1);
    let vk = &report.platforms[0];
    assert_eq!(vk.platform, "vk");
    assert_eq!(vk.posts, 2);
    assert_eq!(vk.views, 150);
    assert_eq!(vk.reactions, 5);

    assert!(matches!(
        h.analytics.get_stats(h.team_id, ANALYST, now, now).await,
        Err(CoreError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_worker_refreshes_and_reschedules() {
    let h = harness().await;
    let post_id = h.published(Platform::Vk, 12).await;
    db::create_stats_task(h.db.pool(), post_id, Platform::Vk).await.unwrap();
    h.set_vk_metrics(77, 2);

    let worker = StatsWorker::new(h.db.clone(), h.analytics.clone(), "worker-1".to_string());
    assert_eq!(worker.tick().await, 1);

    let stats = db::get_post_stats(h.db.pool(), post_id, Platform::Vk)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.views, 77);
    assert_eq!(stats.reactions, 2);
    assert_eq!(h.metric_calls(), 1);

    // The task is pushed an hour ahead.
    assert_eq!(worker.tick().await, 0);
    assert_eq!(h.metric_calls(), 1);
}
