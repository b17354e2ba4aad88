mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

/// One connection per long-lived writer (Telegram poller, VK fleet, event log,
/// stats worker, scheduler) plus headroom for web and gRPC requests.
const MAX_CONNECTIONS: u32 = 8;

/// Event log appends and comment upserts arrive in bursts while a listener
/// catches up; SQLite serializes them, so writers wait instead of failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Relational store for teams, posts, comments, stats and the event log.
///
/// Cheap to clone; every clone shares one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database file at `path`, creating it and its directory when
    /// missing, and bring the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for writing or a
    /// migration fails.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create database directory: {}", dir.display()))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect_options(path))
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // A read-only mount only shows up on the first write, so take one now.
        pool.begin()
            .await
            .with_context(|| format!("Database at {} is not writable", path.display()))?
            .commit()
            .await
            .context("Failed to commit database write check")?;

        migrations::run(&pool).await?;
        info!(path = %path.display(), "Database ready");

        Ok(Self { pool })
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
}
