use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by `datetime('now')` columns.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way `SQLite` stores `datetime('now')`.
#[must_use]
pub fn format_db_time(at: DateTime<Utc>) -> String {
    at.format(DB_TIME_FORMAT).to_string()
}

/// Parse a `datetime('now')` column, also accepting RFC 3339.
#[must_use]
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DB_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn parse_id_list(s: &str) -> Vec<i64> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Serialize a list of ids for a JSON text column.
#[must_use]
pub fn id_list_json(ids: &[i64]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

/// External platform a binding, post or comment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tg,
    Vk,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Tg, Platform::Vk];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tg => "tg",
            Self::Vk => "vk",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tg" => Some(Self::Tg),
            "vk" => Some(Self::Vk),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Team role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Posts,
    Comments,
    Analytics,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Posts => "posts",
            Self::Comments => "comments",
            Self::Analytics => "analytics",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "posts" => Some(Self::Posts),
            "comments" => Some(Self::Comments),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }
}

/// Parse a comma separated role column, skipping unknown names.
#[must_use]
pub fn parse_roles(s: &str) -> Vec<Role> {
    s.split(',')
        .filter_map(|r| Role::from_str(r.trim()))
        .collect()
}

/// Join roles for storage.
#[must_use]
pub fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub created_at: String,
}

/// Telegram channel bound to a team.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TgBinding {
    pub team_id: i64,
    pub channel_id: i64,
    pub discussion_id: Option<i64>,
}

/// VK community bound to a team, with its long-poll cursor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VkBinding {
    pub team_id: i64,
    pub group_id: i64,
    pub admin_api_key: String,
    pub last_event_ts: String,
    pub last_updated_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostUnion {
    pub id: i64,
    pub team_id: i64,
    pub user_id: i64,
    pub text: String,
    pub attachments: String,
    pub platforms: String,
    pub pub_date: Option<String>,
    pub created_at: String,
}

impl PostUnion {
    /// Ordered attachment upload ids.
    #[must_use]
    pub fn attachment_ids(&self) -> Vec<i64> {
        parse_id_list(&self.attachments)
    }

    /// Target platforms.
    #[must_use]
    pub fn platform_list(&self) -> Vec<Platform> {
        serde_json::from_str(&self.platforms).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewPostUnion {
    pub team_id: i64,
    pub user_id: i64,
    pub text: String,
    pub attachments: Vec<i64>,
    pub platforms: Vec<Platform>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Where a post union landed on one platform.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostPlatform {
    pub post_union_id: i64,
    pub team_id: i64,
    pub platform: String,
    pub platform_post_id: i64,
    pub media_group_members: Option<String>,
}

impl PostPlatform {
    /// Sibling message ids of a Telegram album, excluding the primary one.
    #[must_use]
    pub fn members(&self) -> Vec<i64> {
        self.media_group_members
            .as_deref()
            .map(parse_id_list)
            .unwrap_or_default()
    }
}

/// Post action status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Error,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Side effect a post action performs on a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOperation {
    Publish,
    Edit,
    Delete,
}

impl ActionOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostAction {
    pub id: i64,
    pub post_union_id: i64,
    pub platform: String,
    pub operation: String,
    pub status: String,
    pub err_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledPost {
    pub id: i64,
    pub post_union_id: i64,
    pub scheduled_at: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub team_id: i64,
    pub post_union_id: Option<i64>,
    pub platform: String,
    pub platform_post_id: Option<i64>,
    pub user_platform_id: i64,
    pub comment_platform_id: i64,
    pub full_name: String,
    pub username: String,
    pub text: String,
    pub reply_to_comment_id: Option<i64>,
    pub is_team_reply: bool,
    pub avatar_upload_id: Option<i64>,
    pub attachments: String,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

impl Comment {
    #[must_use]
    pub fn attachment_ids(&self) -> Vec<i64> {
        parse_id_list(&self.attachments)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub team_id: i64,
    pub post_union_id: Option<i64>,
    pub platform: Platform,
    pub platform_post_id: Option<i64>,
    pub user_platform_id: i64,
    pub comment_platform_id: i64,
    pub full_name: String,
    pub username: String,
    pub text: String,
    pub reply_to_comment_id: Option<i64>,
    pub is_team_reply: bool,
    pub avatar_upload_id: Option<i64>,
    pub attachments: Vec<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewComment {
    #[must_use]
    pub fn new(team_id: i64, platform: Platform, comment_platform_id: i64) -> Self {
        Self {
            team_id,
            post_union_id: None,
            platform,
            platform_post_id: None,
            user_platform_id: 0,
            comment_platform_id,
            full_name: String::new(),
            username: String::new(),
            text: String::new(),
            reply_to_comment_id: None,
            is_team_reply: false,
            avatar_upload_id: None,
            attachments: Vec::new(),
            created_at: None,
        }
    }

    /// A comment with neither text nor attachments carries nothing to show.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Kind tag of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Photo,
    Video,
    Audio,
    Voice,
    Sticker,
    Doc,
    Raw,
}

impl UploadKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Doc => "doc",
            Self::Raw => "raw",
        }
    }

    /// Unknown tags are stored as raw blobs.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "voice" => Self::Voice,
            "sticker" => Self::Sticker,
            "doc" => Self::Doc,
            _ => Self::Raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Upload {
    pub id: i64,
    pub path: String,
    pub file_type: String,
    pub user_id: Option<i64>,
    pub size: i64,
    pub created_at: String,
}

impl Upload {
    #[must_use]
    pub fn kind(&self) -> UploadKind {
        UploadKind::from_str(&self.file_type)
    }

    /// File name part of the storage path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostPlatformStats {
    pub post_union_id: i64,
    pub platform: String,
    pub views: i64,
    pub reactions: i64,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatsUpdateTask {
    pub id: i64,
    pub post_union_id: i64,
    pub platform: String,
    pub next_update_at: String,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub created_at: String,
}

/// Aggregated metrics of a team on one platform over a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlatformTotals {
    pub platform: String,
    pub posts: i64,
    pub views: i64,
    pub reactions: i64,
    pub comments: i64,
}
