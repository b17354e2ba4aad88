//! Shared fixtures: temporary database, local object store and in-process
//! platform fakes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use socialops::bus::{EventBus, SqlLogBus};
use socialops::db::{self, Database, Role};
use socialops::error::CoreError;
use socialops::storage::{LocalObjectStore, UploadStore};
use socialops::telegram::api::{OutgoingMedia, TelegramApi};
use socialops::telegram::types::{Chat, ChatMember, File, Message, Update, User, UserProfilePhotos};
use socialops::vk::types::{LongPollResponse, LongPollServer, VkUser, WallPost};
use socialops::vk::{VkApi, VkConnector};

pub const CHANNEL_ID: i64 = -100_111;
pub const DISCUSSION_ID: i64 = -100_222;
pub const GROUP_ID: i64 = 777;
pub const ADMIN: i64 = 1;
pub const MODERATOR: i64 = 2;
pub const OUTSIDER: i64 = 3;

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

pub fn upload_store(db: &Database, dir: &TempDir) -> UploadStore {
    let objects = LocalObjectStore::new(dir.path().join("objects"));
    UploadStore::new(db.clone(), Arc::new(objects))
}

pub fn event_bus(db: &Database) -> Arc<dyn EventBus> {
    Arc::new(SqlLogBus::new(db.pool().clone(), 1, Duration::from_millis(20)))
}

/// A team with an admin and a comment moderator, bound to both platforms.
pub async fn seed_team(db: &Database) -> i64 {
    let pool = db.pool();
    let team_id = db::insert_team(pool, "Acme", "secret-acme").await.unwrap();
    db::set_member_roles(pool, team_id, ADMIN, &[Role::Admin]).await.unwrap();
    db::set_member_roles(pool, team_id, MODERATOR, &[Role::Comments]).await.unwrap();
    db::upsert_tg_binding(pool, team_id, CHANNEL_ID, Some(DISCUSSION_ID)).await.unwrap();
    db::upsert_vk_binding(pool, team_id, GROUP_ID, "vk-admin-key").await.unwrap();
    team_id
}

// ========== Telegram ==========

pub fn tg_message(value: serde_json::Value) -> Message {
    serde_json::from_value(value).expect("valid message json")
}

fn bare_message(chat_id: i64, message_id: i64, text: &str, reply_to: Option<i64>) -> Message {
    let mut value = json!({
        "message_id": message_id,
        "date": 1_700_000_000,
        "chat": { "id": chat_id, "type": "supergroup" },
        "text": text,
    });
    if let Some(reply_to) = reply_to {
        value["reply_to_message"] = json!({
            "message_id": reply_to,
            "date": 1_700_000_000,
            "chat": { "id": chat_id, "type": "supergroup" },
        });
    }
    tg_message(value)
}

/// Discussion reply of a user to the automatic forward of channel post `post_message_id`.
pub fn discussion_reply(message_id: i64, post_message_id: i64, text: &str) -> serde_json::Value {
    json!({
        "message_id": message_id,
        "date": 1_700_000_100,
        "chat": { "id": DISCUSSION_ID, "type": "supergroup" },
        "from": { "id": 4242, "is_bot": false, "first_name": "Ann", "last_name": "Lee", "username": "annlee" },
        "text": text,
        "reply_to_message": {
            "message_id": 9000 + post_message_id,
            "date": 1_700_000_000,
            "chat": { "id": DISCUSSION_ID, "type": "supergroup" },
            "is_automatic_forward": true,
            "forward_origin": {
                "type": "channel",
                "chat": { "id": CHANNEL_ID, "type": "channel" },
                "message_id": post_message_id,
                "date": 1_700_000_000
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
    pub media: usize,
}

#[derive(Debug, Default)]
pub struct TgState {
    pub updates: Vec<Update>,
    /// file_id -> (file_path, bytes)
    pub files: HashMap<String, (String, Vec<u8>)>,
    pub sent: Vec<SentMessage>,
    pub edited: Vec<(i64, i64, String)>,
    pub deleted: Vec<(i64, i64)>,
    pub banned: Vec<(i64, i64)>,
    pub next_message_id: i64,
    /// Sent replies come back without `reply_to_message`, as when the original vanished.
    pub drop_reply_links: bool,
}

#[derive(Debug, Default)]
pub struct FakeTelegram {
    pub state: Mutex<TgState>,
}

impl FakeTelegram {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().next_message_id = 500;
        Arc::new(fake)
    }

    pub fn add_file(&self, file_id: &str, file_path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(file_id.to_string(), (file_path.to_string(), data.to_vec()));
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn deleted(&self) -> Vec<(i64, i64)> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn record(&self, chat_id: i64, text: &str, reply_to: Option<i64>, media: usize) -> Message {
        let mut state = self.state.lock().unwrap();
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        state.sent.push(SentMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            reply_to,
            media,
        });
        let linked = if state.drop_reply_links { None } else { reply_to };
        bare_message(chat_id, message_id, text, linked)
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    async fn get_me(&self) -> Result<User> {
        Ok(serde_json::from_value(json!({ "id": 999, "is_bot": true, "first_name": "ops", "username": "ops_bot" }))?)
    }

    async fn get_updates(&self, offset: i64, _timeout_secs: u64) -> Result<Vec<Update>> {
        let updates: Vec<Update> = {
            let state = self.state.lock().unwrap();
            state
                .updates
                .iter()
                .filter(|u| u.update_id >= offset)
                .cloned()
                .collect()
        };
        if updates.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(updates)
    }

    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<Message> {
        Ok(self.record(chat_id, text, reply_to, 0))
    }

    async fn send_media(
        &self,
        chat_id: i64,
        _media: OutgoingMedia,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message> {
        Ok(self.record(chat_id, caption, reply_to, 1))
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        media: Vec<OutgoingMedia>,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Vec<Message>> {
        let count = media.len();
        Ok((0..count)
            .map(|i| {
                let text = if i == 0 { caption } else { "" };
                self.record(chat_id, text, reply_to, 1)
            })
            .collect())
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .edited
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn edit_message_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()> {
        self.edit_message_text(chat_id, message_id, caption).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.state.lock().unwrap().deleted.push((chat_id, message_id));
        Ok(())
    }

    async fn ban_chat_member(&self, chat_id: i64, user_id: i64) -> Result<()> {
        self.state.lock().unwrap().banned.push((chat_id, user_id));
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat> {
        Ok(serde_json::from_value(json!({
            "id": chat_id,
            "type": "channel",
            "title": "Acme news",
            "linked_chat_id": DISCUSSION_ID
        }))?)
    }

    async fn get_chat_administrators(&self, _chat_id: i64) -> Result<Vec<ChatMember>> {
        Ok(vec![serde_json::from_value(json!({
            "status": "administrator",
            "user": { "id": 999, "is_bot": true, "first_name": "ops" }
        }))?])
    }

    async fn get_chat_member(&self, _chat_id: i64, user_id: i64) -> Result<ChatMember> {
        Ok(serde_json::from_value(json!({
            "status": "administrator",
            "user": { "id": user_id, "is_bot": true, "first_name": "ops" }
        }))?)
    }

    async fn get_user_profile_photos(&self, _user_id: i64, _limit: i64) -> Result<UserProfilePhotos> {
        Ok(UserProfilePhotos::default())
    }

    async fn get_file(&self, file_id: &str) -> Result<File> {
        let state = self.state.lock().unwrap();
        let (path, data) = state
            .files
            .get(file_id)
            .ok_or_else(|| anyhow::Error::new(CoreError::PlatformRejected(format!("unknown file {file_id}"))))?;
        Ok(serde_json::from_value(json!({
            "file_id": file_id,
            "file_size": data.len(),
            "file_path": path
        }))?)
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .files
            .values()
            .find(|(path, _)| path == file_path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| anyhow!("no file at {file_path}"))
    }
}

// ========== VK ==========

#[derive(Debug, Default)]
pub struct VkState {
    pub users: HashMap<i64, VkUser>,
    pub downloads: HashMap<String, Vec<u8>>,
    pub downloaded: Vec<String>,
    pub comments: Vec<(i64, Option<i64>, String, Vec<String>)>,
    pub deleted_comments: Vec<i64>,
    pub wall: Vec<(i64, String, Vec<String>)>,
    pub deleted_posts: Vec<i64>,
    pub uploads: Vec<String>,
    pub views: i64,
    pub likes: i64,
    pub metric_calls: usize,
    /// Metric reads that fail as if VK timed out, before they start succeeding.
    pub metric_failures: usize,
    pub next_id: i64,
    /// Long-poll batches handed out in order; an empty queue blocks briefly.
    pub polls: Vec<LongPollResponse>,
}

#[derive(Debug, Default)]
pub struct FakeVk {
    pub state: Mutex<VkState>,
}

impl FakeVk {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().next_id = 100;
        Arc::new(fake)
    }

    pub fn add_user(&self, id: i64, first: &str, last: &str) {
        let user: VkUser = serde_json::from_value(json!({
            "id": id,
            "first_name": first,
            "last_name": last,
            "screen_name": format!("id{id}")
        }))
        .unwrap();
        self.state.lock().unwrap().users.insert(id, user);
    }

    pub fn add_download(&self, url: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(url.to_string(), data.to_vec());
    }

    fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl VkApi for FakeVk {
    async fn get_long_poll_server(&self, _group_id: i64) -> Result<LongPollServer> {
        Ok(serde_json::from_value(json!({ "key": "k", "server": "http://lp.invalid", "ts": "10" }))?)
    }

    async fn check_long_poll(&self, _server: &LongPollServer, ts: &str, _wait_secs: u64) -> Result<LongPollResponse> {
        let next = {
            let mut state = self.state.lock().unwrap();
            (!state.polls.is_empty()).then(|| state.polls.remove(0))
        };
        match next {
            Some(response) => Ok(response),
            None => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(serde_json::from_value(json!({ "ts": ts, "updates": [] }))?)
            }
        }
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<VkUser>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.downloaded.push(url.to_string());
        state
            .downloads
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no download at {url}"))
    }

    async fn create_comment(
        &self,
        _group_id: i64,
        _post_id: i64,
        reply_to_comment: Option<i64>,
        message: &str,
        attachments: &[String],
    ) -> Result<i64> {
        let id = self.next_id();
        self.state.lock().unwrap().comments.push((
            id,
            reply_to_comment,
            message.to_string(),
            attachments.to_vec(),
        ));
        Ok(id)
    }

    async fn delete_comment(&self, _group_id: i64, comment_id: i64) -> Result<()> {
        self.state.lock().unwrap().deleted_comments.push(comment_id);
        Ok(())
    }

    async fn ban_user(&self, _group_id: i64, _user_id: i64) -> Result<()> {
        Ok(())
    }

    async fn wall_post(&self, _group_id: i64, message: &str, attachments: &[String]) -> Result<i64> {
        let id = self.next_id();
        self.state
            .lock()
            .unwrap()
            .wall
            .push((id, message.to_string(), attachments.to_vec()));
        Ok(id)
    }

    async fn wall_edit(&self, _group_id: i64, post_id: i64, message: &str, attachments: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.wall.iter_mut().find(|(id, _, _)| *id == post_id) {
            entry.1 = message.to_string();
            entry.2 = attachments.to_vec();
        }
        Ok(())
    }

    async fn wall_delete(&self, _group_id: i64, post_id: i64) -> Result<()> {
        self.state.lock().unwrap().deleted_posts.push(post_id);
        Ok(())
    }

    async fn wall_get_by_id(&self, _group_id: i64, post_id: i64) -> Result<Option<WallPost>> {
        let mut state = self.state.lock().unwrap();
        state.metric_calls += 1;
        if state.metric_failures > 0 {
            state.metric_failures -= 1;
            return Err(anyhow!("wall.getById timed out"));
        }
        Ok(Some(serde_json::from_value(json!({
            "id": post_id,
            "views": { "count": state.views },
            "likes": { "count": state.likes },
            "comments": { "count": 0 }
        }))?))
    }

    async fn upload_photo(&self, group_id: i64, _file_name: &str, _data: Vec<u8>) -> Result<String> {
        let id = self.next_id();
        let reference = format!("photo-{group_id}_{id}");
        self.state.lock().unwrap().uploads.push(reference.clone());
        Ok(reference)
    }

    async fn upload_doc(&self, group_id: i64, _file_name: &str, _data: Vec<u8>) -> Result<String> {
        let id = self.next_id();
        let reference = format!("doc-{group_id}_{id}");
        self.state.lock().unwrap().uploads.push(reference.clone());
        Ok(reference)
    }
}

/// Connector handing out one shared fake for every key.
pub struct FakeVkConnector(pub Arc<FakeVk>);

impl VkConnector for FakeVkConnector {
    fn connect(&self, _access_token: &str) -> Result<Arc<dyn VkApi>> {
        Ok(Arc::clone(&self.0) as Arc<dyn VkApi>)
    }
}

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR\x00\x00\x00\x01\x00\x00\x00\x01";
pub const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00";
