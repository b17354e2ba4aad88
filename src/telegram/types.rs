//! Subset of the Bot API object model the service reads.

use serde::{Deserialize, Serialize};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub message_reaction_count: Option<MessageReactionCountUpdated>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub linked_chat_id: Option<i64>,
}

impl Chat {
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

/// Where a forwarded message came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    Channel { chat: Chat, message_id: i64 },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub file_size: Option<i64>,
}

/// Video, audio, voice and document payloads share these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub sender_chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub forward_origin: Option<MessageOrigin>,
    #[serde(default)]
    pub is_automatic_forward: Option<bool>,
    #[serde(default)]
    pub edit_date: Option<i64>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
}

impl Message {
    /// Text of a plain message or caption of a media message.
    #[must_use]
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }

    /// Channel message this one was forwarded from, if any.
    #[must_use]
    pub fn channel_origin(&self) -> Option<(&Chat, i64)> {
        match &self.forward_origin {
            Some(MessageOrigin::Channel { chat, message_id }) => Some((chat, *message_id)),
            _ => None,
        }
    }

    /// `(command, args)` when the text is a bot command. A `@botname` suffix is dropped.
    #[must_use]
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.text.as_deref()?.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let name = head.split('@').next().unwrap_or(head);
        Some((name, args.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionCount {
    pub total_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionCountUpdated {
    pub chat: Chat,
    pub message_id: i64,
    pub date: i64,
    #[serde(default)]
    pub reactions: Vec<ReactionCount>,
}

impl MessageReactionCountUpdated {
    #[must_use]
    pub fn total(&self) -> i64 {
        self.reactions.iter().map(|r| r.total_count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfilePhotos {
    pub total_count: i64,
    #[serde(default)]
    pub photos: Vec<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: User,
}

impl ChatMember {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self.status.as_str(), "administrator" | "creator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discussion_reply() {
        let json = r#"{
            "update_id": 10,
            "message": {
                "message_id": 55,
                "date": 1700000000,
                "chat": {"id": -100200, "type": "supergroup", "title": "Talk"},
                "from": {"id": 7, "is_bot": false, "first_name": "Ann", "last_name": "Lee", "username": "ann"},
                "text": "nice post",
                "reply_to_message": {
                    "message_id": 40,
                    "date": 1699999999,
                    "chat": {"id": -100200, "type": "supergroup"},
                    "is_automatic_forward": true,
                    "forward_origin": {
                        "type": "channel",
                        "date": 1699999990,
                        "chat": {"id": -100100, "type": "channel", "title": "News"},
                        "message_id": 12
                    }
                }
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(msg.from.as_ref().unwrap().full_name(), "Ann Lee");
        let reply = msg.reply_to_message.unwrap();
        let (chat, id) = reply.channel_origin().unwrap();
        assert_eq!((chat.id, id), (-100100, 12));
    }

    #[test]
    fn test_unknown_origin_is_other() {
        let origin: MessageOrigin =
            serde_json::from_str(r#"{"type": "hidden_user", "date": 1, "sender_user_name": "x"}"#)
                .unwrap();
        assert!(matches!(origin, MessageOrigin::Other));
    }

    #[test]
    fn test_command_parsing() {
        let mut msg: Message = serde_json::from_str(
            r#"{"message_id": 1, "date": 1, "chat": {"id": 1, "type": "private"}, "text": "/add_channel@bot  key -100 -200"}"#,
        )
        .unwrap();
        assert_eq!(msg.command(), Some(("add_channel", "key -100 -200")));
        msg.text = Some("/help".to_string());
        assert_eq!(msg.command(), Some(("help", "")));
        msg.text = Some("hello".to_string());
        assert_eq!(msg.command(), None);
    }
}
