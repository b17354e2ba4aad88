//! Durable per-team comment event log.
//!
//! Every team has one topic, `comment-events-team-<id>`, split into a fixed
//! number of partitions keyed by post id. Subscribers always start at the
//! latest offset and never replay history.

pub mod codec;
pub mod sql_log;

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::Platform;
use crate::error::CoreResult;

pub use self::sql_log::SqlLogBus;

/// Partitions per topic.
pub const TOPIC_PARTITIONS: i64 = 3;

/// Topic carrying the comment events of one team.
#[must_use]
pub fn topic_name(team_id: i64) -> String {
    format!("comment-events-team-{team_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Deleted,
    Edited,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::Edited => "edited",
        }
    }
}

/// Notification that a comment changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub event_id: String,
    pub team_id: i64,
    /// Post union id, 0 when the comment is not tied to a post.
    pub post_id: i64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub comment_id: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
}

impl CommentEvent {
    /// Event with a deterministic id, so a replayed change dedupes downstream.
    #[must_use]
    pub fn new(
        platform: Platform,
        team_id: i64,
        post_id: Option<i64>,
        kind: EventType,
        comment_id: i64,
    ) -> Self {
        Self {
            event_id: format!("{platform}-{team_id}-{comment_id}-{}", kind.as_str()),
            team_id,
            post_id: post_id.unwrap_or(0),
            kind,
            comment_id,
            occurred_at: Utc::now(),
        }
    }

    /// Distinguish repeated changes of the same kind (edits).
    #[must_use]
    pub fn with_revision(mut self, revision: impl Display) -> Self {
        self.event_id = format!("{}-{revision}", self.event_id);
        self
    }

    /// Partition key: ASCII decimal post id.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.post_id.to_string()
    }
}

/// Lazy, infinite sequence of events. Ends when the underlying reader fails.
pub type EventStream = BoxStream<'static, CommentEvent>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append an event to the team topic. Transport failures are retried.
    async fn publish(&self, event: &CommentEvent) -> CoreResult<()>;

    /// Follow a team topic from its latest offset. `post_id_filter == 0` passes every event.
    async fn subscribe(&self, team_id: i64, post_id_filter: i64) -> CoreResult<EventStream>;
}

/// Publish after a local mutation. The mutation already happened, so a bus
/// failure is logged and swallowed.
pub async fn publish_best_effort(bus: &dyn EventBus, event: CommentEvent) {
    if let Err(e) = bus.publish(&event).await {
        warn!(
            event_id = %event.event_id,
            team_id = event.team_id,
            comment_id = event.comment_id,
            "Failed to publish comment event: {e:#}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name() {
        assert_eq!(topic_name(42), "comment-events-team-42");
    }

    #[test]
    fn test_event_ids_are_deterministic() {
        let a = CommentEvent::new(Platform::Tg, 1, Some(7), EventType::Created, 99);
        let b = CommentEvent::new(Platform::Tg, 1, Some(7), EventType::Created, 99);
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a.event_id, "tg-1-99-created");

        let edit = CommentEvent::new(Platform::Vk, 1, None, EventType::Edited, 99).with_revision(1700);
        assert_eq!(edit.event_id, "vk-1-99-edited-1700");
        assert_eq!(edit.post_id, 0);
        assert_eq!(edit.partition_key(), "0");
    }
}
