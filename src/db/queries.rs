use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{
    format_db_time, id_list_json, join_roles, parse_roles, ActionOperation, ActionStatus, Comment,
    NewComment, NewPostUnion, Platform, PlatformTotals, PostAction, PostPlatform,
    PostPlatformStats, PostUnion, Role, ScheduledPost, StatsUpdateTask, Team, TgBinding, Upload,
    UploadKind, VkBinding,
};

// ========== Teams ==========

/// Insert a team, returning its ID.
pub async fn insert_team(pool: &SqlitePool, name: &str, secret: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO teams (name, secret) VALUES (?, ?)")
        .bind(name)
        .bind(secret)
        .execute(pool)
        .await
        .context("Failed to insert team")?;

    Ok(result.last_insert_rowid())
}

/// Get a team by ID.
pub async fn get_team(pool: &SqlitePool, id: i64) -> Result<Option<Team>> {
    sqlx::query_as("SELECT * FROM teams WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch team")
}

/// Resolve a team by its admin secret.
pub async fn get_team_by_secret(pool: &SqlitePool, secret: &str) -> Result<Option<Team>> {
    sqlx::query_as("SELECT * FROM teams WHERE secret = ?")
        .bind(secret)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch team by secret")
}

/// Replace the roles of a team member.
pub async fn set_member_roles(
    pool: &SqlitePool,
    team_id: i64,
    user_id: i64,
    roles: &[Role],
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO team_user_roles (team_id, user_id, roles) VALUES (?, ?, ?)
        ON CONFLICT(team_id, user_id) DO UPDATE SET roles = excluded.roles
        ",
    )
    .bind(team_id)
    .bind(user_id)
    .bind(join_roles(roles))
    .execute(pool)
    .await
    .context("Failed to set member roles")?;

    Ok(())
}

/// Roles of a user in a team, `None` when the user is not a member.
pub async fn get_member_roles(
    pool: &SqlitePool,
    team_id: i64,
    user_id: i64,
) -> Result<Option<Vec<Role>>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT roles FROM team_user_roles WHERE team_id = ? AND user_id = ?")
            .bind(team_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch member roles")?;

    Ok(row.map(|(roles,)| parse_roles(&roles)))
}

// ========== Telegram bindings ==========

/// Create or replace the Telegram channel of a team.
pub async fn upsert_tg_binding(
    pool: &SqlitePool,
    team_id: i64,
    channel_id: i64,
    discussion_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO channel_tg (team_id, channel_id, discussion_id) VALUES (?, ?, ?)
        ON CONFLICT(team_id) DO UPDATE SET
            channel_id = excluded.channel_id,
            discussion_id = excluded.discussion_id
        ",
    )
    .bind(team_id)
    .bind(channel_id)
    .bind(discussion_id)
    .execute(pool)
    .await
    .context("Failed to upsert Telegram binding")?;

    Ok(())
}

pub async fn get_tg_binding(pool: &SqlitePool, team_id: i64) -> Result<Option<TgBinding>> {
    sqlx::query_as("SELECT * FROM channel_tg WHERE team_id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch Telegram binding")
}

pub async fn get_tg_binding_by_discussion(
    pool: &SqlitePool,
    discussion_id: i64,
) -> Result<Option<TgBinding>> {
    sqlx::query_as("SELECT * FROM channel_tg WHERE discussion_id = ?")
        .bind(discussion_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch Telegram binding by discussion")
}

pub async fn get_tg_binding_by_channel(
    pool: &SqlitePool,
    channel_id: i64,
) -> Result<Option<TgBinding>> {
    sqlx::query_as("SELECT * FROM channel_tg WHERE channel_id = ?")
        .bind(channel_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch Telegram binding by channel")
}

/// Last processed Telegram update id (0 before the first update).
pub async fn get_tg_cursor(pool: &SqlitePool) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT last_update_id FROM tg_bot_state WHERE id = 1")
        .fetch_optional(pool)
        .await
        .context("Failed to fetch Telegram cursor")?;

    Ok(row.map_or(0, |(v,)| v))
}

/// Advance the Telegram cursor. Never moves it backwards.
pub async fn set_tg_cursor(pool: &SqlitePool, update_id: i64) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO tg_bot_state (id, last_update_id) VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET last_update_id = excluded.last_update_id
        WHERE excluded.last_update_id > tg_bot_state.last_update_id
        ",
    )
    .bind(update_id)
    .execute(pool)
    .await
    .context("Failed to store Telegram cursor")?;

    Ok(())
}

// ========== VK bindings ==========

/// Create or replace the VK community of a team. The cursor is kept.
pub async fn upsert_vk_binding(
    pool: &SqlitePool,
    team_id: i64,
    group_id: i64,
    admin_api_key: &str,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO channel_vk (team_id, group_id, admin_api_key) VALUES (?, ?, ?)
        ON CONFLICT(team_id) DO UPDATE SET
            group_id = excluded.group_id,
            admin_api_key = excluded.admin_api_key
        ",
    )
    .bind(team_id)
    .bind(group_id)
    .bind(admin_api_key)
    .execute(pool)
    .await
    .context("Failed to upsert VK binding")?;

    Ok(())
}

pub async fn get_vk_binding(pool: &SqlitePool, team_id: i64) -> Result<Option<VkBinding>> {
    sqlx::query_as("SELECT * FROM channel_vk WHERE team_id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch VK binding")
}

/// Teams whose long-poll heartbeat is missing or older than `stale_secs`.
pub async fn list_unwatched_vk_teams(pool: &SqlitePool, stale_secs: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r"
        SELECT team_id FROM channel_vk
        WHERE last_updated_timestamp IS NULL
           OR last_updated_timestamp < datetime('now', '-' || ? || ' seconds')
        ORDER BY team_id
        ",
    )
    .bind(stale_secs)
    .fetch_all(pool)
    .await
    .context("Failed to list unwatched VK teams")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Mark the given teams as watched now.
pub async fn touch_vk_heartbeats(pool: &SqlitePool, team_ids: &[i64]) -> Result<()> {
    for team_id in team_ids {
        sqlx::query("UPDATE channel_vk SET last_updated_timestamp = datetime('now') WHERE team_id = ?")
            .bind(team_id)
            .execute(pool)
            .await
            .context("Failed to refresh VK heartbeat")?;
    }
    Ok(())
}

/// Store a long-poll cursor. A cursor lower than the stored one is ignored.
pub async fn set_vk_cursor(pool: &SqlitePool, team_id: i64, ts: &str) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE channel_vk SET last_event_ts = ?
        WHERE team_id = ? AND CAST(last_event_ts AS INTEGER) <= CAST(? AS INTEGER)
        ",
    )
    .bind(ts)
    .bind(team_id)
    .bind(ts)
    .execute(pool)
    .await
    .context("Failed to store VK cursor")?;

    Ok(result.rows_affected() > 0)
}

// ========== Post unions ==========

/// Insert a post union, returning its ID.
pub async fn insert_post_union(pool: &SqlitePool, post: &NewPostUnion) -> Result<i64> {
    let platforms =
        serde_json::to_string(&post.platforms).context("Failed to encode post platforms")?;

    let result = sqlx::query(
        r"
        INSERT INTO post_unions (team_id, user_id, text, attachments, platforms, pub_date)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(post.team_id)
    .bind(post.user_id)
    .bind(&post.text)
    .bind(id_list_json(&post.attachments))
    .bind(platforms)
    .bind(post.pub_date.map(format_db_time))
    .execute(pool)
    .await
    .context("Failed to insert post union")?;

    Ok(result.last_insert_rowid())
}

pub async fn get_post_union(pool: &SqlitePool, id: i64) -> Result<Option<PostUnion>> {
    sqlx::query_as("SELECT * FROM post_unions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post union")
}

pub async fn update_post_union_text(pool: &SqlitePool, id: i64, text: &str) -> Result<()> {
    sqlx::query("UPDATE post_unions SET text = ? WHERE id = ?")
        .bind(text)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update post union text")?;

    Ok(())
}

/// Drop one platform from the targets of a post union.
pub async fn remove_post_union_platform(
    pool: &SqlitePool,
    id: i64,
    platform: Platform,
) -> Result<()> {
    let Some(post) = get_post_union(pool, id).await? else {
        return Ok(());
    };

    let platforms: Vec<Platform> = post
        .platform_list()
        .into_iter()
        .filter(|p| *p != platform)
        .collect();
    let encoded = serde_json::to_string(&platforms).context("Failed to encode post platforms")?;

    sqlx::query("UPDATE post_unions SET platforms = ? WHERE id = ?")
        .bind(encoded)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update post union platforms")?;

    Ok(())
}

/// Posts of a team, newest first.
pub async fn list_post_unions(
    pool: &SqlitePool,
    team_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<PostUnion>> {
    sqlx::query_as(
        r"
        SELECT * FROM post_unions
        WHERE team_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        ",
    )
    .bind(team_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list post unions")
}

/// Number of posts a team owns.
pub async fn count_post_unions(pool: &SqlitePool, team_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_unions WHERE team_id = ?")
        .bind(team_id)
        .fetch_one(pool)
        .await
        .context("Failed to count post unions")?;

    Ok(count)
}

// ========== Post platforms ==========

/// Record where a post landed. Replaces an earlier record for the same platform.
pub async fn upsert_post_platform(pool: &SqlitePool, record: &PostPlatform) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post_platforms
            (post_union_id, team_id, platform, platform_post_id, media_group_members)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(post_union_id, platform) DO UPDATE SET
            platform_post_id = excluded.platform_post_id,
            media_group_members = excluded.media_group_members
        ",
    )
    .bind(record.post_union_id)
    .bind(record.team_id)
    .bind(&record.platform)
    .bind(record.platform_post_id)
    .bind(&record.media_group_members)
    .execute(pool)
    .await
    .context("Failed to upsert post platform")?;

    Ok(())
}

pub async fn get_post_platform(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
) -> Result<Option<PostPlatform>> {
    sqlx::query_as("SELECT * FROM post_platforms WHERE post_union_id = ? AND platform = ?")
        .bind(post_union_id)
        .bind(platform.as_str())
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post platform")
}

/// Find a tracked post by its id on the platform.
pub async fn find_post_platform(
    pool: &SqlitePool,
    team_id: i64,
    platform: Platform,
    platform_post_id: i64,
) -> Result<Option<PostPlatform>> {
    sqlx::query_as(
        r"
        SELECT * FROM post_platforms
        WHERE team_id = ? AND platform = ? AND platform_post_id = ?
        ",
    )
    .bind(team_id)
    .bind(platform.as_str())
    .bind(platform_post_id)
    .fetch_optional(pool)
    .await
    .context("Failed to find post platform")
}

pub async fn delete_post_platform(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
) -> Result<()> {
    sqlx::query("DELETE FROM post_platforms WHERE post_union_id = ? AND platform = ?")
        .bind(post_union_id)
        .bind(platform.as_str())
        .execute(pool)
        .await
        .context("Failed to delete post platform")?;

    Ok(())
}

// ========== Post actions ==========

/// Create a pending action, returning its ID.
pub async fn create_post_action(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
    operation: ActionOperation,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO post_actions (post_union_id, platform, operation, status) VALUES (?, ?, ?, 'pending')",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .bind(operation.as_str())
    .execute(pool)
    .await
    .context("Failed to create post action")?;

    Ok(result.last_insert_rowid())
}

/// Move a pending action to a terminal status.
///
/// Returns `false` when the action was already terminal; such rows are never rewritten.
pub async fn finish_post_action(
    pool: &SqlitePool,
    id: i64,
    status: ActionStatus,
    err_message: Option<&str>,
) -> Result<bool> {
    anyhow::ensure!(
        status != ActionStatus::Pending,
        "post action can only move to a terminal status"
    );

    let result = sqlx::query(
        "UPDATE post_actions SET status = ?, err_message = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(err_message)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to finish post action")?;

    Ok(result.rows_affected() > 0)
}

/// Fail actions still `pending` after `older_than_secs`.
///
/// Their task died with a previous process; nothing else will finish them.
pub async fn fail_stale_post_actions(
    pool: &SqlitePool,
    older_than_secs: i64,
    err_message: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE post_actions
        SET status = 'error', err_message = ?
        WHERE status = 'pending'
          AND created_at < datetime('now', '-' || ? || ' seconds')
        ",
    )
    .bind(err_message)
    .bind(older_than_secs)
    .execute(pool)
    .await
    .context("Failed to fail stale post actions")?;

    Ok(result.rows_affected())
}

pub async fn get_post_action(pool: &SqlitePool, id: i64) -> Result<Option<PostAction>> {
    sqlx::query_as("SELECT * FROM post_actions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post action")
}

pub async fn list_post_actions(pool: &SqlitePool, post_union_id: i64) -> Result<Vec<PostAction>> {
    sqlx::query_as("SELECT * FROM post_actions WHERE post_union_id = ? ORDER BY id")
        .bind(post_union_id)
        .fetch_all(pool)
        .await
        .context("Failed to list post actions")
}

// ========== Scheduled posts ==========

pub async fn insert_scheduled_post(
    pool: &SqlitePool,
    post_union_id: i64,
    scheduled_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO scheduled_posts (post_union_id, scheduled_at, status) VALUES (?, ?, 'pending')",
    )
    .bind(post_union_id)
    .bind(format_db_time(scheduled_at))
    .execute(pool)
    .await
    .context("Failed to insert scheduled post")?;

    Ok(result.last_insert_rowid())
}

/// Pending scheduled posts whose time has come.
pub async fn due_scheduled_posts(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
    sqlx::query_as(
        r"
        SELECT * FROM scheduled_posts
        WHERE status = 'pending' AND scheduled_at <= ?
        ORDER BY scheduled_at
        ",
    )
    .bind(format_db_time(now))
    .fetch_all(pool)
    .await
    .context("Failed to fetch due scheduled posts")
}

/// Move a pending scheduled post to `status`. Returns `false` if another tick took it.
pub async fn mark_scheduled_post(pool: &SqlitePool, id: i64, status: &str) -> Result<bool> {
    let result =
        sqlx::query("UPDATE scheduled_posts SET status = ? WHERE id = ? AND status = 'pending'")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update scheduled post")?;

    Ok(result.rows_affected() > 0)
}

// ========== Comments ==========

/// Insert a comment. Returns `None` if the platform comment is already stored.
pub async fn insert_comment(pool: &SqlitePool, comment: &NewComment) -> Result<Option<i64>> {
    let created_at = format_db_time(comment.created_at.unwrap_or_else(Utc::now));

    let row: Option<(i64,)> = sqlx::query_as(
        r"
        INSERT INTO comments (
            team_id, post_union_id, platform, platform_post_id, user_platform_id,
            comment_platform_id, full_name, username, text, reply_to_comment_id,
            is_team_reply, avatar_upload_id, attachments, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(team_id, platform, comment_platform_id) DO NOTHING
        RETURNING id
        ",
    )
    .bind(comment.team_id)
    .bind(comment.post_union_id)
    .bind(comment.platform.as_str())
    .bind(comment.platform_post_id)
    .bind(comment.user_platform_id)
    .bind(comment.comment_platform_id)
    .bind(&comment.full_name)
    .bind(&comment.username)
    .bind(&comment.text)
    .bind(comment.reply_to_comment_id)
    .bind(comment.is_team_reply)
    .bind(comment.avatar_upload_id)
    .bind(id_list_json(&comment.attachments))
    .bind(created_at)
    .fetch_optional(pool)
    .await
    .context("Failed to insert comment")?;

    Ok(row.map(|(id,)| id))
}

pub async fn get_comment(pool: &SqlitePool, id: i64) -> Result<Option<Comment>> {
    sqlx::query_as("SELECT * FROM comments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch comment")
}

/// Find a comment by its id on the platform.
pub async fn get_comment_by_platform_id(
    pool: &SqlitePool,
    team_id: i64,
    platform: Platform,
    comment_platform_id: i64,
) -> Result<Option<Comment>> {
    sqlx::query_as(
        r"
        SELECT * FROM comments
        WHERE team_id = ? AND platform = ? AND comment_platform_id = ?
        ",
    )
    .bind(team_id)
    .bind(platform.as_str())
    .bind(comment_platform_id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch comment by platform id")
}

/// Replace the text and attachments of a comment. Clears a deletion mark.
pub async fn update_comment_content(
    pool: &SqlitePool,
    id: i64,
    text: &str,
    attachments: &[i64],
) -> Result<()> {
    sqlx::query("UPDATE comments SET text = ?, attachments = ?, deleted_at = NULL WHERE id = ?")
        .bind(text)
        .bind(id_list_json(attachments))
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update comment")?;

    Ok(())
}

/// Mark a comment deleted. Already deleted comments keep their timestamp.
pub async fn mark_comment_deleted(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE comments SET deleted_at = datetime('now') WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark comment deleted")?;

    Ok(result.rows_affected() > 0)
}

/// Latest non-deleted comments of a team, optionally for one post.
pub async fn last_comments(
    pool: &SqlitePool,
    team_id: i64,
    post_union_id: Option<i64>,
    limit: i64,
) -> Result<Vec<Comment>> {
    sqlx::query_as(
        r"
        SELECT * FROM comments
        WHERE team_id = ? AND (? IS NULL OR post_union_id = ?) AND deleted_at IS NULL
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        ",
    )
    .bind(team_id)
    .bind(post_union_id)
    .bind(post_union_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch last comments")
}

/// Texts of the live comments under a post, oldest first.
pub async fn comment_texts_for_post(pool: &SqlitePool, post_union_id: i64) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r"
        SELECT text FROM comments
        WHERE post_union_id = ? AND deleted_at IS NULL AND text != ''
        ORDER BY created_at, id
        ",
    )
    .bind(post_union_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch comment texts")?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Number of live comments under a post on one platform.
pub async fn count_comments(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*) FROM comments
        WHERE post_union_id = ? AND platform = ? AND deleted_at IS NULL
        ",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .fetch_one(pool)
    .await
    .context("Failed to count comments")?;

    Ok(count)
}

// ========== Uploads ==========

pub async fn insert_upload(
    pool: &SqlitePool,
    path: &str,
    kind: UploadKind,
    user_id: Option<i64>,
    size: i64,
) -> Result<i64> {
    let result =
        sqlx::query("INSERT INTO uploads (path, file_type, user_id, size) VALUES (?, ?, ?, ?)")
            .bind(path)
            .bind(kind.as_str())
            .bind(user_id)
            .bind(size)
            .execute(pool)
            .await
            .context("Failed to insert upload")?;

    Ok(result.last_insert_rowid())
}

pub async fn get_upload(pool: &SqlitePool, id: i64) -> Result<Option<Upload>> {
    sqlx::query_as("SELECT * FROM uploads WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch upload")
}

pub async fn delete_upload(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete upload")?;

    Ok(result.rows_affected() > 0)
}

// ========== Stats ==========

pub async fn get_post_stats(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
) -> Result<Option<PostPlatformStats>> {
    sqlx::query_as("SELECT * FROM post_platform_stats WHERE post_union_id = ? AND platform = ?")
        .bind(post_union_id)
        .bind(platform.as_str())
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post stats")
}

/// Overwrite the metrics of a post on one platform and stamp them fresh.
pub async fn upsert_post_stats(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
    views: i64,
    reactions: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post_platform_stats (post_union_id, platform, views, reactions, last_update)
        VALUES (?, ?, ?, ?, datetime('now'))
        ON CONFLICT(post_union_id, platform) DO UPDATE SET
            views = excluded.views,
            reactions = excluded.reactions,
            last_update = excluded.last_update
        ",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .bind(views)
    .bind(reactions)
    .execute(pool)
    .await
    .context("Failed to upsert post stats")?;

    Ok(())
}

/// Set the reaction count without touching views or the refresh stamp.
pub async fn set_post_reactions(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
    reactions: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post_platform_stats (post_union_id, platform, reactions) VALUES (?, ?, ?)
        ON CONFLICT(post_union_id, platform) DO UPDATE SET reactions = excluded.reactions
        ",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .bind(reactions)
    .execute(pool)
    .await
    .context("Failed to set post reactions")?;

    Ok(())
}

/// Apply a VK like event to the reaction count once.
///
/// Returns `false` if `event_id` was already applied for the team.
pub async fn apply_vk_like(
    pool: &SqlitePool,
    team_id: i64,
    event_id: &str,
    post_union_id: i64,
    delta: i64,
) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin like transaction")?;

    let recorded = sqlx::query("INSERT OR IGNORE INTO vk_like_events (team_id, event_id) VALUES (?, ?)")
        .bind(team_id)
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .context("Failed to record VK like event")?;
    if recorded.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r"
        INSERT INTO post_platform_stats (post_union_id, platform, reactions) VALUES (?, 'vk', MAX(?, 0))
        ON CONFLICT(post_union_id, platform) DO UPDATE SET
            reactions = MAX(post_platform_stats.reactions + ?, 0)
        ",
    )
    .bind(post_union_id)
    .bind(delta)
    .bind(delta)
    .execute(&mut *tx)
    .await
    .context("Failed to adjust post reactions")?;

    tx.commit().await.context("Failed to commit like")?;

    Ok(true)
}

/// Add `delta` to the reaction count, never going below zero.
pub async fn adjust_post_reactions(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post_platform_stats (post_union_id, platform, reactions) VALUES (?, ?, MAX(?, 0))
        ON CONFLICT(post_union_id, platform) DO UPDATE SET
            reactions = MAX(post_platform_stats.reactions + ?, 0)
        ",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .bind(delta)
    .bind(delta)
    .execute(pool)
    .await
    .context("Failed to adjust post reactions")?;

    Ok(())
}

/// Per-platform totals for posts of a team created within `[start, end)`.
pub async fn team_platform_totals(
    pool: &SqlitePool,
    team_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<PlatformTotals>> {
    sqlx::query_as(
        r"
        SELECT
            pp.platform AS platform,
            COUNT(*) AS posts,
            COALESCE(SUM(s.views), 0) AS views,
            COALESCE(SUM(s.reactions), 0) AS reactions,
            COALESCE(SUM((
                SELECT COUNT(*) FROM comments c
                WHERE c.post_union_id = pp.post_union_id
                  AND c.platform = pp.platform
                  AND c.deleted_at IS NULL
            )), 0) AS comments
        FROM post_platforms pp
        JOIN post_unions pu ON pu.id = pp.post_union_id
        LEFT JOIN post_platform_stats s
            ON s.post_union_id = pp.post_union_id AND s.platform = pp.platform
        WHERE pu.team_id = ? AND pu.created_at >= ? AND pu.created_at < ?
        GROUP BY pp.platform
        ORDER BY pp.platform
        ",
    )
    .bind(team_id)
    .bind(format_db_time(start))
    .bind(format_db_time(end))
    .fetch_all(pool)
    .await
    .context("Failed to aggregate team stats")
}

// ========== Stats update tasks ==========

/// Schedule periodic metric refresh for a published post. Idempotent.
pub async fn create_stats_task(
    pool: &SqlitePool,
    post_union_id: i64,
    platform: Platform,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO stats_update_tasks (post_union_id, platform) VALUES (?, ?)
        ON CONFLICT(post_union_id, platform) DO NOTHING
        ",
    )
    .bind(post_union_id)
    .bind(platform.as_str())
    .execute(pool)
    .await
    .context("Failed to create stats task")?;

    Ok(())
}

/// Claim up to `limit` due tasks for `worker_id`.
///
/// A claim older than `stale_secs` is considered abandoned and may be taken over.
pub async fn claim_stats_tasks(
    pool: &SqlitePool,
    worker_id: &str,
    limit: i64,
    stale_secs: i64,
) -> Result<Vec<StatsUpdateTask>> {
    sqlx::query_as(
        r"
        UPDATE stats_update_tasks
        SET locked_by = ?, locked_at = datetime('now')
        WHERE id IN (
            SELECT id FROM stats_update_tasks
            WHERE next_update_at <= datetime('now')
              AND (locked_by IS NULL
                   OR locked_by = ?
                   OR locked_at < datetime('now', '-' || ? || ' seconds'))
            ORDER BY next_update_at
            LIMIT ?
        )
        RETURNING *
        ",
    )
    .bind(worker_id)
    .bind(worker_id)
    .bind(stale_secs)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to claim stats tasks")
}

/// Release a claimed task and push its next run `after_secs` ahead.
pub async fn release_stats_task(
    pool: &SqlitePool,
    id: i64,
    worker_id: &str,
    after_secs: i64,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE stats_update_tasks
        SET locked_by = NULL,
            locked_at = NULL,
            next_update_at = datetime('now', '+' || ? || ' seconds')
        WHERE id = ? AND locked_by = ?
        ",
    )
    .bind(after_secs)
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("Failed to release stats task")?;

    Ok(())
}

/// Drop tasks of posts older than `max_age_days`.
pub async fn delete_expired_stats_tasks(pool: &SqlitePool, max_age_days: i64) -> Result<u64> {
    let result = sqlx::query(
        r"
        DELETE FROM stats_update_tasks
        WHERE post_union_id IN (
            SELECT id FROM post_unions
            WHERE created_at < datetime('now', '-' || ? || ' days')
        )
        ",
    )
    .bind(max_age_days)
    .execute(pool)
    .await
    .context("Failed to delete expired stats tasks")?;

    Ok(result.rows_affected())
}
