//! Integration tests for the comment event log.

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use socialops::bus::{CommentEvent, EventBus, EventStream, EventType, SqlLogBus};
use socialops::db::Platform;

use common::{event_bus, setup_db};

async fn next_event(stream: &mut EventStream) -> CommentEvent {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("event within timeout")
        .expect("stream still open")
}

async fn assert_quiet(stream: &mut EventStream) {
    let next = tokio::time::timeout(Duration::from_millis(150), stream.next()).await;
    assert!(next.is_err(), "unexpected event: {next:?}");
}

#[tokio::test]
async fn test_subscriber_receives_published_events() {
    let (db, _temp_dir) = setup_db().await;
    let bus = event_bus(&db);

    let mut stream = bus.subscribe(1, 0).await.unwrap();

    let event = CommentEvent::new(Platform::Tg, 1, Some(5), EventType::Created, 42);
    bus.publish(&event).await.unwrap();

    let received = next_event(&mut stream).await;
    assert_eq!(received.event_id, event.event_id);
    assert_eq!(received.comment_id, 42);
    assert_eq!(received.post_id, 5);
    assert_eq!(received.kind, EventType::Created);
}

#[tokio::test]
async fn test_events_of_one_post_keep_their_order() {
    let (db, _temp_dir) = setup_db().await;
    let bus = event_bus(&db);
    let mut stream = bus.subscribe(1, 0).await.unwrap();

    for comment_id in 1..=5 {
        bus.publish(&CommentEvent::new(Platform::Vk, 1, Some(9), EventType::Created, comment_id))
            .await
            .unwrap();
    }

    for expected in 1..=5 {
        assert_eq!(next_event(&mut stream).await.comment_id, expected);
    }
}

#[tokio::test]
async fn test_subscription_starts_at_latest_offset() {
    let (db, _temp_dir) = setup_db().await;
    let bus = event_bus(&db);

    bus.publish(&CommentEvent::new(Platform::Tg, 1, Some(5), EventType::Created, 1))
        .await
        .unwrap();

    let mut stream = bus.subscribe(1, 0).await.unwrap();
    assert_quiet(&mut stream).await;

    bus.publish(&CommentEvent::new(Platform::Tg, 1, Some(5), EventType::Created, 2))
        .await
        .unwrap();
    assert_eq!(next_event(&mut stream).await.comment_id, 2);
}

#[tokio::test]
async fn test_post_filter_and_team_isolation() {
    let (db, _temp_dir) = setup_db().await;
    let bus = event_bus(&db);

    let mut post_stream = bus.subscribe(1, 5).await.unwrap();
    let mut other_team = bus.subscribe(2, 0).await.unwrap();

    bus.publish(&CommentEvent::new(Platform::Tg, 1, Some(6), EventType::Created, 1))
        .await
        .unwrap();
    bus.publish(&CommentEvent::new(Platform::Tg, 1, Some(5), EventType::Deleted, 2))
        .await
        .unwrap();

    let received = next_event(&mut post_stream).await;
    assert_eq!(received.comment_id, 2);
    assert_eq!(received.kind, EventType::Deleted);

    assert_quiet(&mut other_team).await;
}

#[tokio::test]
async fn test_prune_keeps_recent_events() {
    let (db, _temp_dir) = setup_db().await;
    let bus = SqlLogBus::new(db.pool().clone(), 1, Duration::from_millis(20));
    bus.publish(&CommentEvent::new(Platform::Tg, 1, None, EventType::Created, 1))
        .await
        .unwrap();

    let removed = bus.prune(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn test_offsets_continue_after_prune() {
    let (db, _temp_dir) = setup_db().await;
    let bus = SqlLogBus::new(db.pool().clone(), 1, Duration::from_millis(20));
    for comment_id in 1..=5 {
        bus.publish(&CommentEvent::new(Platform::Vk, 1, Some(9), EventType::Created, comment_id))
            .await
            .unwrap();
    }

    let mut stream = bus.subscribe(1, 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Everything is old enough, but the newest message of the partition stays.
    assert_eq!(bus.prune(Duration::ZERO).await.unwrap(), 4);

    bus.publish(&CommentEvent::new(Platform::Vk, 1, Some(9), EventType::Created, 6))
        .await
        .unwrap();
    assert_eq!(next_event(&mut stream).await.comment_id, 6);
}
