use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    if current_version < 3 {
        debug!("Running migration v3");
        run_migration_v3(pool).await?;
        set_schema_version(pool, 3).await?;
    }

    if current_version < 4 {
        debug!("Running migration v4");
        run_migration_v4(pool).await?;
        set_schema_version(pool, 4).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn execute_all(pool: &SqlitePool, statements: &[(&str, &str)]) -> Result<()> {
    for (what, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {what}"))?;
    }
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: teams, bindings, posts, comments, uploads");

    execute_all(
        pool,
        &[
            (
                "teams table",
                r"
                CREATE TABLE IF NOT EXISTS teams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    secret TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "team_user_roles table",
                r"
                CREATE TABLE IF NOT EXISTS team_user_roles (
                    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL,
                    roles TEXT NOT NULL DEFAULT '',
                    PRIMARY KEY (team_id, user_id)
                )
                ",
            ),
            (
                "channel_tg table",
                r"
                CREATE TABLE IF NOT EXISTS channel_tg (
                    team_id INTEGER PRIMARY KEY REFERENCES teams(id) ON DELETE CASCADE,
                    channel_id INTEGER NOT NULL UNIQUE,
                    discussion_id INTEGER
                )
                ",
            ),
            (
                "channel_tg discussion index",
                "CREATE INDEX IF NOT EXISTS idx_channel_tg_discussion ON channel_tg(discussion_id)",
            ),
            (
                "channel_vk table",
                r"
                CREATE TABLE IF NOT EXISTS channel_vk (
                    team_id INTEGER PRIMARY KEY REFERENCES teams(id) ON DELETE CASCADE,
                    group_id INTEGER NOT NULL UNIQUE,
                    admin_api_key TEXT NOT NULL,
                    last_event_ts TEXT NOT NULL DEFAULT '0',
                    last_updated_timestamp TEXT
                )
                ",
            ),
            (
                "tg_bot_state table",
                r"
                CREATE TABLE IF NOT EXISTS tg_bot_state (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    last_update_id INTEGER NOT NULL DEFAULT 0
                )
                ",
            ),
            (
                "uploads table",
                r"
                CREATE TABLE IF NOT EXISTS uploads (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    path TEXT NOT NULL UNIQUE,
                    file_type TEXT NOT NULL,
                    user_id INTEGER,
                    size INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "post_unions table",
                r"
                CREATE TABLE IF NOT EXISTS post_unions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    user_id INTEGER NOT NULL,
                    text TEXT NOT NULL DEFAULT '',
                    attachments TEXT NOT NULL DEFAULT '[]',
                    platforms TEXT NOT NULL DEFAULT '[]',
                    pub_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "post_unions team index",
                "CREATE INDEX IF NOT EXISTS idx_post_unions_team ON post_unions(team_id, created_at)",
            ),
            (
                "post_platforms table",
                r"
                CREATE TABLE IF NOT EXISTS post_platforms (
                    post_union_id INTEGER NOT NULL REFERENCES post_unions(id) ON DELETE CASCADE,
                    team_id INTEGER NOT NULL,
                    platform TEXT NOT NULL,
                    platform_post_id INTEGER NOT NULL,
                    media_group_members TEXT,
                    PRIMARY KEY (post_union_id, platform)
                )
                ",
            ),
            (
                "post_platforms lookup index",
                r"
                CREATE INDEX IF NOT EXISTS idx_post_platforms_lookup
                    ON post_platforms(team_id, platform, platform_post_id)
                ",
            ),
            (
                "post_actions table",
                r"
                CREATE TABLE IF NOT EXISTS post_actions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    post_union_id INTEGER NOT NULL REFERENCES post_unions(id) ON DELETE CASCADE,
                    platform TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'success', 'error')),
                    err_message TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "comments table",
                r"
                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    post_union_id INTEGER,
                    platform TEXT NOT NULL,
                    platform_post_id INTEGER,
                    user_platform_id INTEGER NOT NULL DEFAULT 0,
                    comment_platform_id INTEGER NOT NULL,
                    full_name TEXT NOT NULL DEFAULT '',
                    username TEXT NOT NULL DEFAULT '',
                    text TEXT NOT NULL DEFAULT '',
                    reply_to_comment_id INTEGER,
                    is_team_reply INTEGER NOT NULL DEFAULT 0,
                    avatar_upload_id INTEGER,
                    attachments TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT,
                    UNIQUE (team_id, platform, comment_platform_id)
                )
                ",
            ),
            (
                "comments post index",
                "CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_union_id, created_at)",
            ),
            (
                "comments team index",
                "CREATE INDEX IF NOT EXISTS idx_comments_team ON comments(team_id, created_at)",
            ),
        ],
    )
    .await
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: analytics and scheduling");

    execute_all(
        pool,
        &[
            (
                "post_platform_stats table",
                r"
                CREATE TABLE IF NOT EXISTS post_platform_stats (
                    post_union_id INTEGER NOT NULL REFERENCES post_unions(id) ON DELETE CASCADE,
                    platform TEXT NOT NULL,
                    views INTEGER NOT NULL DEFAULT 0,
                    reactions INTEGER NOT NULL DEFAULT 0,
                    last_update TEXT,
                    PRIMARY KEY (post_union_id, platform)
                )
                ",
            ),
            (
                "stats_update_tasks table",
                r"
                CREATE TABLE IF NOT EXISTS stats_update_tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    post_union_id INTEGER NOT NULL REFERENCES post_unions(id) ON DELETE CASCADE,
                    platform TEXT NOT NULL,
                    next_update_at TEXT NOT NULL DEFAULT (datetime('now')),
                    locked_by TEXT,
                    locked_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (post_union_id, platform)
                )
                ",
            ),
            (
                "scheduled_posts table",
                r"
                CREATE TABLE IF NOT EXISTS scheduled_posts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    post_union_id INTEGER NOT NULL UNIQUE REFERENCES post_unions(id) ON DELETE CASCADE,
                    scheduled_at TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
        ],
    )
    .await
}

async fn run_migration_v3(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v3: event log");

    execute_all(
        pool,
        &[
            (
                "bus_topics table",
                r"
                CREATE TABLE IF NOT EXISTS bus_topics (
                    name TEXT PRIMARY KEY,
                    partitions INTEGER NOT NULL,
                    replication INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                ",
            ),
            (
                "bus_messages table",
                r"
                CREATE TABLE IF NOT EXISTS bus_messages (
                    topic TEXT NOT NULL REFERENCES bus_topics(name),
                    part INTEGER NOT NULL,
                    msg_offset INTEGER NOT NULL,
                    key TEXT NOT NULL,
                    value BLOB NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (topic, part, msg_offset)
                )
                ",
            ),
        ],
    )
    .await
}

async fn run_migration_v4(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v4: applied VK likes");

    execute_all(
        pool,
        &[(
            "vk_like_events table",
            r"
            CREATE TABLE IF NOT EXISTS vk_like_events (
                team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                event_id TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (team_id, event_id)
            )
            ",
        )],
    )
    .await
}
