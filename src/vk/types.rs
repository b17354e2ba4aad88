//! VK API payloads the service reads.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Envelope of every method call.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub response: Option<T>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
}

/// Accepts a cursor sent either as a JSON number or a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected cursor value: {other}"))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("unexpected cursor value: {other}"))),
    }
}

/// `groups.getLongPollServer` result.
#[derive(Debug, Clone, Deserialize)]
pub struct LongPollServer {
    pub key: String,
    pub server: String,
    #[serde(deserialize_with = "string_or_number")]
    pub ts: String,
}

/// Reply of a long-poll check.
#[derive(Debug, Clone, Deserialize)]
pub struct LongPollResponse {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub ts: Option<String>,
    #[serde(default)]
    pub updates: Vec<VkEvent>,
    pub failed: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub object: Value,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub event_id: String,
}

/// `wall_reply_new`, `wall_reply_edit` and `wall_reply_restore` object.
#[derive(Debug, Clone, Deserialize)]
pub struct WallComment {
    pub id: i64,
    #[serde(default)]
    pub from_id: i64,
    pub post_id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: String,
    /// Platform id of the comment this one answers in a thread.
    pub reply_to_comment: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// `wall_reply_delete` object.
#[derive(Debug, Clone, Deserialize)]
pub struct WallReplyDelete {
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub post_id: i64,
}

/// `like_add` and `like_remove` object.
#[derive(Debug, Clone, Deserialize)]
pub struct LikeEvent {
    #[serde(default)]
    pub liker_id: i64,
    pub object_type: String,
    pub object_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub photo: Option<Photo>,
    pub video: Option<Video>,
    pub sticker: Option<Sticker>,
    pub doc: Option<Doc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Photo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub sizes: Vec<PhotoSize>,
}

impl Photo {
    /// URL of the largest size.
    #[must_use]
    pub fn largest_url(&self) -> Option<&str> {
        self.sizes
            .iter()
            .max_by_key(|s| s.width * s.height)
            .map(|s| s.url.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub id: i64,
    pub owner_id: i64,
    pub player: Option<String>,
}

impl Video {
    /// Player link, or the public page of the video.
    #[must_use]
    pub fn play_url(&self) -> String {
        match self.player.as_deref().filter(|p| !p.is_empty()) {
            Some(player) => player.to_string(),
            None => format!("https://vk.com/video{}_{}", self.owner_id, self.id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sticker {
    pub animation_url: Option<String>,
    #[serde(default)]
    pub images: Vec<PhotoSize>,
}

impl Sticker {
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.animation_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.images.last().map(|i| i.url.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Doc {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ext: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub screen_name: Option<String>,
    pub nickname: Option<String>,
    pub photo_200: Option<String>,
}

impl VkUser {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    #[must_use]
    pub fn handle(&self) -> String {
        self.screen_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.nickname.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WallPost {
    pub id: i64,
    #[serde(default)]
    pub views: Counter,
    #[serde(default)]
    pub likes: Counter,
    #[serde(default)]
    pub comments: Counter,
}

/// `wall.getById` answers with a bare list or with `{items}` depending on version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WallPosts {
    Items { items: Vec<WallPost> },
    List(Vec<WallPost>),
}

impl WallPosts {
    #[must_use]
    pub fn into_vec(self) -> Vec<WallPost> {
        match self {
            Self::Items { items } => items,
            Self::List(list) => list,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadServer {
    pub upload_url: String,
}

/// Answer of the photo upload server.
#[derive(Debug, Deserialize)]
pub struct PhotoUploadResult {
    pub server: i64,
    pub photo: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct DocUploadResult {
    pub file: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SavedDoc {
    pub doc: Option<Doc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedComment {
    pub comment_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreatedPost {
    pub post_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_poll_ts_accepts_numbers_and_strings() {
        let server: LongPollServer =
            serde_json::from_str(r#"{"key":"k","server":"https://lp.vk.com/wh1","ts":"42"}"#).unwrap();
        assert_eq!(server.ts, "42");

        let response: LongPollResponse = serde_json::from_str(r#"{"ts":43,"updates":[]}"#).unwrap();
        assert_eq!(response.ts.as_deref(), Some("43"));

        let failed: LongPollResponse = serde_json::from_str(r#"{"failed":2}"#).unwrap();
        assert_eq!(failed.failed, Some(2));
        assert!(failed.ts.is_none());
    }

    #[test]
    fn test_wall_comment_with_attachments() {
        let json = r#"{
            "id": 501, "from_id": 77, "post_id": 12, "owner_id": -5, "date": 1700000000,
            "text": "nice",
            "attachments": [
                {"type": "video", "video": {"id": 20, "owner_id": 10}},
                {"type": "photo", "photo": {"sizes": [
                    {"url": "https://img/s", "width": 75, "height": 50},
                    {"url": "https://img/x", "width": 1280, "height": 853}
                ]}},
                {"type": "poll", "poll": {"id": 1}}
            ]
        }"#;
        let comment: WallComment = serde_json::from_str(json).unwrap();
        assert_eq!(comment.attachments.len(), 3);
        assert_eq!(
            comment.attachments[0].video.as_ref().unwrap().play_url(),
            "https://vk.com/video10_20"
        );
        assert_eq!(
            comment.attachments[1].photo.as_ref().unwrap().largest_url(),
            Some("https://img/x")
        );
        assert_eq!(comment.attachments[2].kind, "poll");
    }

    #[test]
    fn test_wall_posts_both_shapes() {
        let items: WallPosts =
            serde_json::from_str(r#"{"items":[{"id":1,"views":{"count":9},"likes":{"count":2}}]}"#).unwrap();
        let list: WallPosts = serde_json::from_str(r#"[{"id":1}]"#).unwrap();
        assert_eq!(items.into_vec()[0].views.count, 9);
        assert_eq!(list.into_vec()[0].likes.count, 0);
    }
}
