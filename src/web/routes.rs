use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::AppState;
use crate::analytics::{PostUnionStats, TeamStats};
use crate::auth::AuthUser;
use crate::comments::Summary;
use crate::db::{Comment, Platform, PostAction};
use crate::error::{CoreError, CoreResult};
use crate::gateway::KEEP_ALIVE_INTERVAL;
use crate::posts::{AddPost, AddPostResult, PostPage};

const DEFAULT_LAST_COMMENTS: i64 = 20;
const DEFAULT_PAGE_SIZE: i64 = 20;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/comment/reply", post(reply_comment))
        .route("/comment/delete", post(delete_comment))
        .route("/comment/summarize", get(summarize))
        .route("/comment/last", get(last_comments))
        .route("/comment/get", get(get_comment))
        .route("/comment/subscribe", get(subscribe))
        .route("/post/add", post(add_post))
        .route("/post/edit", post(edit_post))
        .route("/post/delete", post(delete_post))
        .route("/post/list", get(list_posts))
        .route("/post/status", get(post_status))
        .route("/stats", get(team_stats))
        .route("/stats/post", get(post_stats))
}

async fn health() -> &'static str {
    "OK"
}

// ========== Comments ==========

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    team_id: i64,
    comment_id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<i64>,
}

async fn reply_comment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ReplyRequest>,
) -> CoreResult<Json<Value>> {
    let id = state
        .comments
        .reply(req.team_id, user_id, req.comment_id, &req.text, &req.attachments)
        .await?;
    Ok(Json(json!({ "comment_id": id })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteCommentRequest {
    team_id: i64,
    comment_id: i64,
    #[serde(default)]
    ban_user: bool,
}

async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<DeleteCommentRequest>,
) -> CoreResult<Json<Value>> {
    state
        .comments
        .delete(req.team_id, user_id, req.comment_id, req.ban_user)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    team_id: i64,
    post_union_id: i64,
}

async fn summarize(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<PostQuery>,
) -> CoreResult<Json<Summary>> {
    let summary = state
        .comments
        .summarize(q.team_id, user_id, q.post_union_id)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct LastCommentsQuery {
    team_id: i64,
    post_union_id: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CommentList {
    comments: Vec<Comment>,
}

async fn last_comments(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<LastCommentsQuery>,
) -> CoreResult<Json<CommentList>> {
    let comments = state
        .comments
        .last_comments(
            q.team_id,
            user_id,
            q.post_union_id.filter(|id| *id != 0),
            q.limit.unwrap_or(DEFAULT_LAST_COMMENTS),
        )
        .await?;
    Ok(Json(CommentList { comments }))
}

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    team_id: i64,
    comment_id: i64,
}

async fn get_comment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<CommentQuery>,
) -> CoreResult<Json<Comment>> {
    let comment = state
        .comments
        .get_comment(q.team_id, user_id, q.comment_id)
        .await?;
    Ok(Json(comment))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    team_id: i64,
    post_union_id: Option<i64>,
}

/// Server-sent events: `comment` carries an affected comment id, `ping` keeps
/// idle connections open.
async fn subscribe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<SubscribeQuery>,
) -> CoreResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let feed = state
        .gateway
        .open(q.team_id, user_id, q.post_union_id.filter(|id| *id != 0))
        .await?;

    let events = feed.into_stream().map(|item| {
        let event = match item {
            Ok(affected) => Event::default()
                .event("comment")
                .data(affected.comment_id.to_string()),
            Err(e) => Event::default().event("error").data(e.kind()),
        };
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .event(Event::default().event("ping").data("")),
    ))
}

// ========== Posts ==========

#[derive(Debug, Deserialize)]
pub struct AddPostRequest {
    team_id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<i64>,
    platforms: Vec<Platform>,
    /// Unix seconds; 0 or absent publishes immediately.
    #[serde(default)]
    pub_time: i64,
}

async fn add_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<AddPostRequest>,
) -> CoreResult<Json<AddPostResult>> {
    let pub_date = match req.pub_time {
        0 => None,
        secs => Some(unix_time(secs)?),
    };
    let result = state
        .posts
        .add_post(
            req.team_id,
            user_id,
            AddPost {
                text: req.text,
                attachments: req.attachments,
                platforms: req.platforms,
                pub_date,
            },
        )
        .await?;
    Ok(Json(result))
}

fn unix_time(secs: i64) -> CoreResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CoreError::InvalidArgument(format!("invalid pub_time {secs}")))
}

#[derive(Debug, Deserialize)]
pub struct EditPostRequest {
    team_id: i64,
    post_union_id: i64,
    text: String,
}

#[derive(Debug, Serialize)]
struct Dispatched {
    action_ids: Vec<i64>,
}

async fn edit_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<EditPostRequest>,
) -> CoreResult<Json<Dispatched>> {
    let action_ids = state
        .posts
        .edit_post(req.team_id, user_id, req.post_union_id, &req.text)
        .await?;
    Ok(Json(Dispatched { action_ids }))
}

#[derive(Debug, Deserialize)]
pub struct DeletePostRequest {
    team_id: i64,
    post_union_id: i64,
    platform: Option<Platform>,
}

async fn delete_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<DeletePostRequest>,
) -> CoreResult<Json<Dispatched>> {
    let action_ids = state
        .posts
        .delete_post(req.team_id, user_id, req.post_union_id, req.platform)
        .await?;
    Ok(Json(Dispatched { action_ids }))
}

#[derive(Debug, Deserialize)]
pub struct ListPostsQuery {
    team_id: i64,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_posts(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<ListPostsQuery>,
) -> CoreResult<Json<PostPage>> {
    let page = state
        .posts
        .list_posts(
            q.team_id,
            user_id,
            q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            q.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
struct PostStatus {
    post_union_id: i64,
    actions: Vec<PostAction>,
}

async fn post_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<PostQuery>,
) -> CoreResult<Json<PostStatus>> {
    let actions = state
        .posts
        .post_status(q.team_id, user_id, q.post_union_id)
        .await?;
    Ok(Json(PostStatus {
        post_union_id: q.post_union_id,
        actions,
    }))
}

// ========== Analytics ==========

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    team_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

async fn team_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<StatsQuery>,
) -> CoreResult<Json<TeamStats>> {
    let stats = state
        .analytics
        .get_stats(q.team_id, user_id, q.start, q.end)
        .await?;
    Ok(Json(stats))
}

async fn post_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<PostQuery>,
) -> CoreResult<Json<PostUnionStats>> {
    let stats = state
        .analytics
        .get_post_union_stats(q.team_id, user_id, q.post_union_id)
        .await?;
    Ok(Json(stats))
}
