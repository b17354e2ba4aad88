//! Outbound posts: one union fanned out to several platforms.

mod executor;
mod scheduler;

pub use executor::PostExecutor;
pub use scheduler::Scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::auth::{require_any_role, POST_ROLES};
use crate::db::{self, ActionOperation, Database, NewPostUnion, Platform, PostAction, PostPlatform, PostUnion};
use crate::error::{CoreError, CoreResult};

/// Platform-side ids of a freshly published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub platform_post_id: i64,
    /// Sibling message ids of an album, excluding the primary one.
    pub members: Vec<i64>,
}

impl Published {
    #[must_use]
    pub fn single(platform_post_id: i64) -> Self {
        Self {
            platform_post_id,
            members: Vec::new(),
        }
    }
}

/// Publishes, edits and deletes posts on one platform.
#[async_trait]
pub trait PostPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(&self, post: &PostUnion) -> CoreResult<Published>;

    async fn edit(&self, post: &PostUnion, record: &PostPlatform, text: &str) -> CoreResult<()>;

    async fn delete(&self, post: &PostUnion, record: &PostPlatform) -> CoreResult<()>;
}

/// Request to create a post union.
#[derive(Debug, Clone)]
pub struct AddPost {
    pub text: String,
    pub attachments: Vec<i64>,
    pub platforms: Vec<Platform>,
    pub pub_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddPostResult {
    pub post_union_id: i64,
    pub action_ids: Vec<i64>,
    pub scheduled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub posts: Vec<PostUnion>,
    pub total: i64,
}

const MAX_SCHEDULE_AHEAD_DAYS: i64 = 365;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct PostService {
    db: Database,
    executor: PostExecutor,
}

impl PostService {
    #[must_use]
    pub fn new(db: Database, executor: PostExecutor) -> Self {
        Self { db, executor }
    }

    async fn team_post(&self, team_id: i64, post_id: i64) -> CoreResult<PostUnion> {
        db::get_post_union(self.db.pool(), post_id)
            .await
            .map_err(CoreError::store)?
            .filter(|post| post.team_id == team_id)
            .ok_or_else(|| CoreError::NotFound(format!("post {post_id}")))
    }

    /// Create a post. A future publication date schedules it, otherwise every
    /// target platform gets a publish action right away.
    pub async fn add_post(&self, team_id: i64, user_id: i64, req: AddPost) -> CoreResult<AddPostResult> {
        require_any_role(&self.db, team_id, user_id, POST_ROLES).await?;

        let mut platforms = req.platforms;
        platforms.sort_by_key(|p| p.as_str());
        platforms.dedup();
        if platforms.is_empty() {
            return Err(CoreError::InvalidArgument("at least one platform is required".into()));
        }
        if req.text.trim().is_empty() && req.attachments.is_empty() {
            return Err(CoreError::InvalidArgument("post has neither text nor attachments".into()));
        }
        if let Some(platform) = platforms.iter().find(|p| !self.executor.supports(**p)) {
            return Err(CoreError::InvalidArgument(format!("platform {platform} is not configured")));
        }

        let now = Utc::now();
        if let Some(pub_date) = req.pub_date {
            if pub_date > now + Duration::days(MAX_SCHEDULE_AHEAD_DAYS) {
                return Err(CoreError::InvalidArgument(
                    "publication date is more than a year ahead".into(),
                ));
            }
        }

        let pool = self.db.pool();
        let post_id = db::insert_post_union(
            pool,
            &NewPostUnion {
                team_id,
                user_id,
                text: req.text,
                attachments: req.attachments,
                platforms: platforms.clone(),
                pub_date: req.pub_date,
            },
        )
        .await
        .map_err(CoreError::store)?;

        if let Some(pub_date) = req.pub_date.filter(|d| *d > now) {
            db::insert_scheduled_post(pool, post_id, pub_date)
                .await
                .map_err(CoreError::store)?;
            info!(team_id, post_id, %pub_date, "Scheduled post");
            return Ok(AddPostResult {
                post_union_id: post_id,
                action_ids: Vec::new(),
                scheduled: true,
            });
        }

        let post = self.team_post(team_id, post_id).await?;
        let mut action_ids = Vec::with_capacity(platforms.len());
        for platform in platforms {
            action_ids.push(
                self.executor
                    .dispatch(ActionOperation::Publish, post.clone(), platform)
                    .await?,
            );
        }

        Ok(AddPostResult {
            post_union_id: post_id,
            action_ids,
            scheduled: false,
        })
    }

    /// Replace the text of a post everywhere it was published.
    pub async fn edit_post(&self, team_id: i64, user_id: i64, post_id: i64, text: &str) -> CoreResult<Vec<i64>> {
        require_any_role(&self.db, team_id, user_id, POST_ROLES).await?;
        let mut post = self.team_post(team_id, post_id).await?;

        db::update_post_union_text(self.db.pool(), post_id, text)
            .await
            .map_err(CoreError::store)?;
        post.text = text.to_string();

        let mut action_ids = Vec::new();
        for platform in post.platform_list() {
            let published = db::get_post_platform(self.db.pool(), post_id, platform)
                .await
                .map_err(CoreError::store)?
                .is_some();
            if published {
                action_ids.push(
                    self.executor
                        .dispatch(ActionOperation::Edit, post.clone(), platform)
                        .await?,
                );
            }
        }
        Ok(action_ids)
    }

    /// Delete a post from one platform, or from all of them.
    pub async fn delete_post(
        &self,
        team_id: i64,
        user_id: i64,
        post_id: i64,
        platform: Option<Platform>,
    ) -> CoreResult<Vec<i64>> {
        require_any_role(&self.db, team_id, user_id, POST_ROLES).await?;
        let post = self.team_post(team_id, post_id).await?;

        let targets = match platform {
            Some(platform) => vec![platform],
            None => post.platform_list(),
        };

        let mut action_ids = Vec::new();
        for platform in targets {
            let published = db::get_post_platform(self.db.pool(), post_id, platform)
                .await
                .map_err(CoreError::store)?
                .is_some();
            if !published {
                continue;
            }
            action_ids.push(
                self.executor
                    .dispatch(ActionOperation::Delete, post.clone(), platform)
                    .await?,
            );
        }

        if action_ids.is_empty() {
            return Err(CoreError::NotFound(format!("post {post_id} is not published")));
        }
        Ok(action_ids)
    }

    pub async fn list_posts(&self, team_id: i64, user_id: i64, limit: i64, offset: i64) -> CoreResult<PostPage> {
        require_any_role(&self.db, team_id, user_id, POST_ROLES).await?;
        if limit <= 0 || offset < 0 {
            return Err(CoreError::InvalidArgument("limit must be positive and offset not negative".into()));
        }

        let pool = self.db.pool();
        let posts = db::list_post_unions(pool, team_id, limit.min(MAX_PAGE_SIZE), offset)
            .await
            .map_err(CoreError::store)?;
        let total = db::count_post_unions(pool, team_id)
            .await
            .map_err(CoreError::store)?;
        Ok(PostPage { posts, total })
    }

    /// Every action ever dispatched for a post, oldest first.
    pub async fn post_status(&self, team_id: i64, user_id: i64, post_id: i64) -> CoreResult<Vec<PostAction>> {
        require_any_role(&self.db, team_id, user_id, POST_ROLES).await?;
        self.team_post(team_id, post_id).await?;
        db::list_post_actions(self.db.pool(), post_id)
            .await
            .map_err(CoreError::store)
    }
}
