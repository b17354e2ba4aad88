//! Integration tests for the Telegram update listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use socialops::bus::{EventBus, EventType};
use socialops::db::{self, NewPostUnion, Platform, PostPlatform, UploadKind};
use socialops::telegram::types::Update;
use socialops::telegram::{TelegramApi, TelegramListener};

use common::{
    discussion_reply, event_bus, seed_team, setup_db, upload_store, FakeTelegram, ADMIN,
    CHANNEL_ID, DISCUSSION_ID, JPEG,
};

const POST_MESSAGE_ID: i64 = 55;

fn update(update_id: i64, field: &str, message: serde_json::Value) -> Update {
    let mut value = json!({ "update_id": update_id });
    value[field] = message;
    serde_json::from_value(value).expect("valid update json")
}

/// A team post published to the channel as message 55.
async fn seed_post(db: &db::Database, team_id: i64) -> i64 {
    let post_id = db::insert_post_union(
        db.pool(),
        &NewPostUnion {
            team_id,
            user_id: ADMIN,
            text: "launch".to_string(),
            attachments: vec![],
            platforms: vec![Platform::Tg],
            pub_date: None,
        },
    )
    .await
    .unwrap();
    db::upsert_post_platform(
        db.pool(),
        &PostPlatform {
            post_union_id: post_id,
            team_id,
            platform: "tg".to_string(),
            platform_post_id: POST_MESSAGE_ID,
            media_group_members: None,
        },
    )
    .await
    .unwrap();
    post_id
}

struct Harness {
    db: db::Database,
    _temp_dir: tempfile::TempDir,
    fake: Arc<FakeTelegram>,
    bus: Arc<dyn EventBus>,
    listener: TelegramListener,
    team_id: i64,
    post_id: i64,
}

async fn harness() -> Harness {
    let (db, temp_dir) = setup_db().await;
    let team_id = seed_team(&db).await;
    let post_id = seed_post(&db, team_id).await;
    let fake = FakeTelegram::new();
    let bus = event_bus(&db);
    let listener = TelegramListener::new(
        Arc::clone(&fake) as Arc<dyn TelegramApi>,
        db.clone(),
        upload_store(&db, &temp_dir),
        Arc::clone(&bus),
        false,
    );
    Harness {
        db,
        _temp_dir: temp_dir,
        fake,
        bus,
        listener,
        team_id,
        post_id,
    }
}

#[tokio::test]
async fn test_photo_reply_is_stored_and_announced() {
    let h = harness().await;
    h.fake.add_file("big", "photos/file_1.jpg", JPEG);

    let mut events = h.bus.subscribe(h.team_id, 0).await.unwrap();

    let mut message = discussion_reply(700, POST_MESSAGE_ID, "");
    message.as_object_mut().unwrap().remove("text");
    message["caption"] = json!("look at this");
    message["photo"] = json!([
        { "file_id": "small", "width": 90, "height": 90, "file_size": 1200 },
        { "file_id": "big", "width": 1280, "height": 1280, "file_size": JPEG.len() }
    ]);
    let updates = vec![update(10, "message", message)];

    assert_eq!(h.listener.process_batch(&updates).await, Some(10));
    assert_eq!(db::get_tg_cursor(h.db.pool()).await.unwrap(), 10);

    let comment = db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 700)
        .await
        .unwrap()
        .expect("comment stored");
    assert_eq!(comment.post_union_id, Some(h.post_id));
    assert_eq!(comment.platform_post_id, Some(POST_MESSAGE_ID));
    assert_eq!(comment.user_platform_id, 4242);
    assert_eq!(comment.full_name, "Ann Lee");
    assert_eq!(comment.username, "annlee");
    assert_eq!(comment.text, "look at this");
    assert!(!comment.is_team_reply);

    let attachments = comment.attachment_ids();
    assert_eq!(attachments.len(), 1);
    let upload = db::get_upload(h.db.pool(), attachments[0]).await.unwrap().unwrap();
    assert_eq!(upload.kind(), UploadKind::Photo);
    assert!(upload.path.starts_with("tg/"));
    assert!(upload.path.ends_with(".jpg"));
    assert_eq!(upload.size, JPEG.len() as i64);

    let event = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.comment_id, comment.id);
    assert_eq!(event.post_id, h.post_id);
    assert_eq!(event.kind, EventType::Created);

    // Replaying the same update keeps a single row.
    assert_eq!(h.listener.process_batch(&updates).await, Some(10));
    assert_eq!(
        db::count_comments(h.db.pool(), h.post_id, Platform::Tg).await.unwrap(),
        1
    );
    assert!(db::get_upload(h.db.pool(), attachments[0] + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reply_to_comment_links_parent() {
    let h = harness().await;

    let parent = discussion_reply(700, POST_MESSAGE_ID, "first");
    let child = json!({
        "message_id": 701,
        "date": 1_700_000_200,
        "chat": { "id": DISCUSSION_ID, "type": "supergroup" },
        "from": { "id": 5151, "is_bot": false, "first_name": "Bob" },
        "text": "agreed",
        "reply_to_message": parent.clone(),
    });
    let updates = vec![update(1, "message", parent), update(2, "message", child)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(2));

    let parent = db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 700)
        .await
        .unwrap()
        .unwrap();
    let child = db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 701)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.reply_to_comment_id, Some(parent.id));
    assert_eq!(child.post_union_id, Some(h.post_id));
    assert_eq!(child.full_name, "Bob");
}

#[tokio::test]
async fn test_untracked_messages_only_move_the_cursor() {
    let h = harness().await;

    // Reply to a channel post the service did not publish.
    let unknown_post = discussion_reply(700, 9999, "hello?");
    // Message in a chat no team is bound to.
    let mut foreign = discussion_reply(701, POST_MESSAGE_ID, "hi");
    foreign["chat"]["id"] = json!(-100_999);

    let updates = vec![update(5, "message", unknown_post), update(6, "message", foreign)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(6));
    assert_eq!(db::get_tg_cursor(h.db.pool()).await.unwrap(), 6);
    assert!(db::last_comments(h.db.pool(), h.team_id, None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_missing_file_drops_the_update() {
    let h = harness().await;

    let mut message = discussion_reply(700, POST_MESSAGE_ID, "");
    message["photo"] = json!([{ "file_id": "gone", "width": 10, "height": 10 }]);
    let ok = discussion_reply(701, POST_MESSAGE_ID, "still here");

    let updates = vec![update(1, "message", message), update(2, "message", ok)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(2));

    assert!(db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 700)
        .await
        .unwrap()
        .is_none());
    assert!(db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 701)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_edit_updates_text() {
    let h = harness().await;
    let mut events = h.bus.subscribe(h.team_id, h.post_id).await.unwrap();

    let original = discussion_reply(700, POST_MESSAGE_ID, "teh news");
    let mut edited = original.clone();
    edited["text"] = json!("the news");
    edited["edit_date"] = json!(1_700_000_500);

    let updates = vec![update(1, "message", original), update(2, "edited_message", edited)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(2));

    let comment = db::get_comment_by_platform_id(h.db.pool(), h.team_id, Platform::Tg, 700)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(comment.text, "the news");

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        kinds.push(event.kind);
    }
    assert_eq!(kinds, vec![EventType::Created, EventType::Edited]);
}

#[tokio::test]
async fn test_channel_reactions_are_stored() {
    let h = harness().await;

    let reactions = json!({
        "chat": { "id": CHANNEL_ID, "type": "channel" },
        "message_id": POST_MESSAGE_ID,
        "date": 1_700_000_000,
        "reactions": [
            { "type": { "type": "emoji", "emoji": "👍" }, "total_count": 3 },
            { "type": { "type": "emoji", "emoji": "🔥" }, "total_count": 2 }
        ]
    });
    let updates = vec![update(1, "message_reaction_count", reactions)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(1));

    let stats = db::get_post_stats(h.db.pool(), h.post_id, Platform::Tg)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.reactions, 5);
}

#[tokio::test]
async fn test_add_channel_command_binds_team() {
    let h = harness().await;

    let command = json!({
        "message_id": 1,
        "date": 1_700_000_000,
        "chat": { "id": 4242, "type": "private" },
        "from": { "id": 4242, "is_bot": false, "first_name": "Ann" },
        "text": "/add_channel secret-acme -100333 -100444"
    });
    let wrong = json!({
        "message_id": 2,
        "date": 1_700_000_000,
        "chat": { "id": 4242, "type": "private" },
        "from": { "id": 4242, "is_bot": false, "first_name": "Ann" },
        "text": "/add_channel nope -100333"
    });
    let updates = vec![update(1, "message", command), update(2, "message", wrong)];
    assert_eq!(h.listener.process_batch(&updates).await, Some(2));

    let binding = db::get_tg_binding(h.db.pool(), h.team_id).await.unwrap().unwrap();
    assert_eq!(binding.channel_id, -100_333);
    assert_eq!(binding.discussion_id, Some(-100_444));

    let sent = h.fake.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].text.starts_with("✅"));
    assert_eq!(sent[1].text, "❌ Invalid team secret.");
}

#[tokio::test]
async fn test_forwarded_channel_post_is_described() {
    let h = harness().await;

    let forward = json!({
        "message_id": 3,
        "date": 1_700_000_000,
        "chat": { "id": 4242, "type": "private" },
        "from": { "id": 4242, "is_bot": false, "first_name": "Ann" },
        "text": "post",
        "forward_origin": {
            "type": "channel",
            "chat": { "id": CHANNEL_ID, "type": "channel", "title": "Acme news" },
            "message_id": 12,
            "date": 1_700_000_000
        }
    });
    assert_eq!(h.listener.process_batch(&[update(1, "message", forward)]).await, Some(1));

    let sent = h.fake.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("is an administrator of the channel"));
    assert!(sent[0].text.contains(&format!("Discussion id: {DISCUSSION_ID}")));
}

#[tokio::test]
async fn test_listener_run_drains_queued_updates() {
    let h = harness().await;
    h.fake.state.lock().unwrap().updates = vec![
        update(3, "message", discussion_reply(700, POST_MESSAGE_ID, "one")),
        update(4, "message", discussion_reply(701, POST_MESSAGE_ID, "two")),
    ];

    let cancel = tokio_util::sync::CancellationToken::new();
    let listener = Arc::new(h.listener);
    let task = {
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(cancel).await })
    };

    let mut stored = 0;
    for _ in 0..100 {
        stored = db::count_comments(h.db.pool(), h.post_id, Platform::Tg).await.unwrap();
        if stored == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stored, 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(db::get_tg_cursor(h.db.pool()).await.unwrap(), 4);
}
