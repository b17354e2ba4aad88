//! Event log stored in `SQLite` tables.
//!
//! `bus_topics` holds topic metadata; `bus_messages` is an append-only log
//! keyed by `(topic, part, msg_offset)`. Offsets are assigned per partition by
//! a single `INSERT .. SELECT MAX + 1` statement so concurrent publishers never
//! reuse one. Readers in this process are woken through a watch channel; other
//! processes are picked up by polling.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::{codec, topic_name, CommentEvent, EventBus, EventStream, TOPIC_PARTITIONS};
use crate::error::{CoreError, CoreResult};
use crate::retry::{retry, RetryPolicy};

const READ_BATCH: i64 = 100;

pub struct SqlLogBus {
    pool: SqlitePool,
    replication: i64,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
    known_topics: RwLock<HashSet<String>>,
    wake: watch::Sender<u64>,
}

impl SqlLogBus {
    #[must_use]
    pub fn new(pool: SqlitePool, replication: i64, poll_interval: Duration) -> Self {
        let (wake, _) = watch::channel(0);
        Self {
            pool,
            replication: replication.clamp(1, 3),
            poll_interval,
            retry_policy: RetryPolicy::default(),
            known_topics: RwLock::new(HashSet::new()),
            wake,
        }
    }

    /// Override the publish retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Create the topic if it does not exist yet.
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        // Fast path: topic already created by this process
        {
            let known = self.known_topics.read().await;
            if known.contains(topic) {
                return Ok(());
            }
        }

        let mut known = self.known_topics.write().await;
        if known.contains(topic) {
            return Ok(());
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO bus_topics (name, partitions, replication) VALUES (?, ?, ?)",
        )
        .bind(topic)
        .bind(TOPIC_PARTITIONS)
        .bind(self.replication)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create topic {topic}"))?;

        if result.rows_affected() > 0 {
            info!(
                topic = %topic,
                partitions = TOPIC_PARTITIONS,
                replication = self.replication,
                "Created event topic"
            );
        }

        known.insert(topic.to_string());
        Ok(())
    }

    async fn append(&self, topic: &str, key: &str, value: &[u8]) -> Result<(i64, i64)> {
        self.ensure_topic(topic).await?;

        let part = partition_for(key, TOPIC_PARTITIONS);
        let (offset,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO bus_messages (topic, part, msg_offset, key, value)
            SELECT ?, ?, COALESCE(MAX(msg_offset), -1) + 1, ?, ?
            FROM bus_messages WHERE topic = ? AND part = ?
            RETURNING msg_offset
            ",
        )
        .bind(topic)
        .bind(part)
        .bind(key)
        .bind(value)
        .bind(topic)
        .bind(part)
        .fetch_one(&self.pool)
        .await
        .context("Failed to append event")?;

        Ok((part, offset))
    }

    async fn latest_offsets(&self, topic: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT part, MAX(msg_offset) FROM bus_messages WHERE topic = ? GROUP BY part",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read latest offsets")?;

        let mut offsets = vec![-1; TOPIC_PARTITIONS as usize];
        for (part, offset) in rows {
            if let Some(slot) = offsets.get_mut(part as usize) {
                *slot = offset;
            }
        }
        Ok(offsets)
    }

    /// Drop messages older than `max_age`. Returns the number removed.
    ///
    /// The newest message of each partition is kept so the next append
    /// continues its offset sequence.
    pub async fn prune(&self, max_age: Duration) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM bus_messages
            WHERE created_at < datetime('now', '-' || ? || ' seconds')
              AND msg_offset < (
                  SELECT MAX(newest.msg_offset) FROM bus_messages newest
                  WHERE newest.topic = bus_messages.topic AND newest.part = bus_messages.part
              )
            ",
        )
        .bind(max_age.as_secs() as i64)
        .execute(&self.pool)
        .await
        .context("Failed to prune event log")?;

        Ok(result.rows_affected())
    }
}

/// Stable partition for a message key.
#[must_use]
pub fn partition_for(key: &str, partitions: i64) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % partitions as u64) as i64
}

async fn read_partition(
    pool: &SqlitePool,
    topic: &str,
    part: i64,
    after: i64,
) -> Result<Vec<(i64, Vec<u8>)>> {
    sqlx::query_as(
        r"
        SELECT msg_offset, value FROM bus_messages
        WHERE topic = ? AND part = ? AND msg_offset > ?
        ORDER BY msg_offset
        LIMIT ?
        ",
    )
    .bind(topic)
    .bind(part)
    .bind(after)
    .bind(READ_BATCH)
    .fetch_all(pool)
    .await
    .context("Failed to read event log")
}

#[async_trait]
impl EventBus for SqlLogBus {
    async fn publish(&self, event: &CommentEvent) -> CoreResult<()> {
        let topic = topic_name(event.team_id);
        let key = event.partition_key();
        let value = codec::encode(event).map_err(|e| CoreError::InvalidArgument(e.to_string()))?;

        let (part, offset) = retry(&self.retry_policy, "event publish", || {
            self.append(&topic, &key, &value)
        })
        .await
        .map_err(CoreError::bus)?;

        debug!(
            topic = %topic,
            part,
            offset,
            event_id = %event.event_id,
            "Published comment event"
        );
        self.wake.send_modify(|n| *n = n.wrapping_add(1));
        Ok(())
    }

    async fn subscribe(&self, team_id: i64, post_id_filter: i64) -> CoreResult<EventStream> {
        let topic = topic_name(team_id);
        self.ensure_topic(&topic).await.map_err(CoreError::bus)?;
        let mut cursors = self.latest_offsets(&topic).await.map_err(CoreError::bus)?;

        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let group_id = format!("comment-listener-{team_id}-{post_id_filter}-{nanos}");
        debug!(topic = %topic, group_id = %group_id, ?cursors, "Subscribed to event topic");

        let pool = self.pool.clone();
        let poll_interval = self.poll_interval;
        let mut wake = self.wake.subscribe();

        let stream = async_stream::stream! {
            'outer: loop {
                let mut drained = true;

                for part in 0..TOPIC_PARTITIONS {
                    let idx = part as usize;
                    let batch = match read_partition(&pool, &topic, part, cursors[idx]).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!(group_id = %group_id, "Closing subscription after read error: {e:#}");
                            break 'outer;
                        }
                    };

                    if batch.len() as i64 == READ_BATCH {
                        drained = false;
                    }

                    for (offset, value) in batch {
                        cursors[idx] = offset;
                        match codec::decode(&value) {
                            Ok(event) if post_id_filter == 0 || event.post_id == post_id_filter => {
                                yield event;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(group_id = %group_id, part, offset, "Skipping undecodable event: {e:#}");
                            }
                        }
                    }
                }

                if drained {
                    let closed = tokio::select! {
                        changed = wake.changed() => changed.is_err(),
                        () = tokio::time::sleep(poll_interval) => false,
                    };
                    if closed {
                        break;
                    }
                }
            }
            debug!(group_id = %group_id, "Subscription closed");
        };

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for SqlLogBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLogBus")
            .field("replication", &self.replication)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
