//! Delivery of team comment feeds to connected clients.
//!
//! Each connection gets a forwarder task that reads the bus subscription and
//! pushes affected comments into a bounded channel. A client that falls a whole
//! buffer behind is cut off with [`CoreError::SlowConsumer`] instead of
//! making the forwarder buffer without limit.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::bus::{EventStream, EventType};
use crate::comments::CommentService;
use crate::error::{CoreError, CoreResult};

/// Idle period after which a keep-alive goes out.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Event ids remembered per connection to drop replays.
const SEEN_EVENTS: usize = 512;

/// A comment touched by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affected {
    pub comment_id: i64,
    pub kind: EventType,
}

/// Comments affected on one connection. Dropping the feed stops its forwarder.
pub struct Feed {
    rx: mpsc::Receiver<CoreResult<Affected>>,
    guard: DropGuard,
}

impl Feed {
    /// Next affected comment; `None` once the feed ended cleanly.
    pub async fn next(&mut self) -> Option<CoreResult<Affected>> {
        self.rx.recv().await
    }

    /// The feed as a stream that ends after its first error.
    pub fn into_stream(self) -> impl Stream<Item = CoreResult<Affected>> + Send + 'static {
        let Self { mut rx, guard } = self;
        async_stream::stream! {
            let _guard = guard;
            while let Some(item) = rx.recv().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed").finish_non_exhaustive()
    }
}

/// Start forwarding `events` into a feed holding at most `buffer` items.
pub fn spawn_forwarder(mut events: EventStream, buffer: usize, cancel: CancellationToken) -> Feed {
    let buffer = buffer.max(1);
    // One extra slot is kept for the slow-consumer notice.
    let (tx, rx) = mpsc::channel(buffer + 1);
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        let mut seen: HashSet<String> = HashSet::new();
        let mut order: VecDeque<String> = VecDeque::new();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                () = tx.closed() => break,
                next = events.next() => next,
            };

            let Some(event) = next else {
                if !cancel.is_cancelled() {
                    let _ = tx.try_send(Err(CoreError::bus(anyhow::anyhow!("subscription closed"))));
                }
                break;
            };

            if !seen.insert(event.event_id.clone()) {
                debug!(event_id = %event.event_id, "Dropping replayed event");
                continue;
            }
            order.push_back(event.event_id.clone());
            if order.len() > SEEN_EVENTS {
                if let Some(oldest) = order.pop_front() {
                    seen.remove(&oldest);
                }
            }

            if tx.capacity() <= 1 {
                warn!(team_id = event.team_id, "Dropping slow subscriber");
                let _ = tx.try_send(Err(CoreError::SlowConsumer));
                break;
            }
            let affected = Affected {
                comment_id: event.comment_id,
                kind: event.kind,
            };
            if tx.try_send(Ok(affected)).is_err() {
                break;
            }
        }
        debug!("Feed forwarder stopped");
    });

    Feed { rx, guard }
}

/// Opens authorized feeds over the comment service.
#[derive(Debug, Clone)]
pub struct Gateway {
    comments: CommentService,
    buffer: usize,
    shutdown: CancellationToken,
}

impl Gateway {
    #[must_use]
    pub fn new(comments: CommentService, buffer: usize, shutdown: CancellationToken) -> Self {
        Self {
            comments,
            buffer,
            shutdown,
        }
    }

    /// Feed of a team, optionally narrowed to one post. Members only.
    pub async fn open(&self, team_id: i64, user_id: i64, post_union_id: Option<i64>) -> CoreResult<Feed> {
        let events = self.comments.subscribe(team_id, user_id, post_union_id).await?;
        debug!(team_id, user_id, post_id = post_union_id.unwrap_or(0), "Opened comment feed");
        Ok(spawn_forwarder(events, self.buffer, self.shutdown.child_token()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CommentEvent;
    use crate::db::Platform;
    use futures_util::stream;

    fn event(comment_id: i64) -> CommentEvent {
        CommentEvent::new(Platform::Tg, 1, Some(5), EventType::Created, comment_id)
    }

    fn endless(events: Vec<CommentEvent>) -> EventStream {
        Box::pin(stream::iter(events).chain(stream::pending()))
    }

    #[tokio::test]
    async fn test_forwards_comment_ids_in_order() {
        let mut feed = spawn_forwarder(endless(vec![event(1), event(2), event(3)]), 8, CancellationToken::new());
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 1);
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 2);
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 3);
    }

    #[tokio::test]
    async fn test_replayed_events_are_dropped() {
        let mut feed = spawn_forwarder(endless(vec![event(1), event(1), event(2)]), 8, CancellationToken::new());
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 1);
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 2);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_cut_off() {
        let events = (1..=10).map(event).collect();
        let mut feed = spawn_forwarder(endless(events), 2, CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 1);
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 2);
        assert!(matches!(feed.next().await, Some(Err(CoreError::SlowConsumer))));
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_ends_feed_cleanly() {
        let cancel = CancellationToken::new();
        let mut feed = spawn_forwarder(endless(Vec::new()), 4, cancel.clone());
        cancel.cancel();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_subscription_is_reported() {
        let mut feed = spawn_forwarder(Box::pin(stream::iter(vec![event(7)])), 4, CancellationToken::new());
        assert_eq!(feed.next().await.unwrap().unwrap().comment_id, 7);
        assert!(matches!(feed.next().await, Some(Err(CoreError::BusUnavailable(_)))));
    }
}
