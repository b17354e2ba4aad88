//! Bot API transport.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{ApiResponse, Chat, ChatMember, File, Message, Update, User, UserProfilePhotos};
use crate::db::UploadKind;
use crate::error::CoreError;

const UNARY_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// How a media file is sent to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    #[must_use]
    pub fn for_upload(kind: UploadKind) -> Self {
        match kind {
            UploadKind::Photo => Self::Photo,
            UploadKind::Video => Self::Video,
            UploadKind::Audio => Self::Audio,
            _ => Self::Document,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    fn send_method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Video => "sendVideo",
            Self::Audio => "sendAudio",
            Self::Document => "sendDocument",
        }
    }
}

/// A file to upload with a message.
#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Bot API calls used by the listener and the action services.
///
/// Errors carry a [`CoreError::PlatformRejected`] when the Bot API refused the
/// request; anything else is a transport failure worth retrying.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn get_me(&self) -> Result<User>;

    /// Long poll for updates after `offset - 1`.
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;

    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<Message>;

    async fn send_media(
        &self,
        chat_id: i64,
        media: OutgoingMedia,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message>;

    /// Send 2..=10 files as an album. The caption goes on the first member.
    async fn send_media_group(
        &self,
        chat_id: i64,
        media: Vec<OutgoingMedia>,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Vec<Message>>;

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;

    async fn edit_message_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn ban_chat_member(&self, chat_id: i64, user_id: i64) -> Result<()>;

    async fn get_chat(&self, chat_id: i64) -> Result<Chat>;

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>>;

    async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<ChatMember>;

    async fn get_user_profile_photos(&self, user_id: i64, limit: i64) -> Result<UserProfilePhotos>;

    async fn get_file(&self, file_id: &str) -> Result<File>;

    /// Download a file by the `file_path` returned from [`TelegramApi::get_file`].
    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>>;
}

/// [`TelegramApi`] over HTTPS.
#[derive(Clone)]
pub struct BotApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BotApiClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value, timeout: Duration) -> Result<T> {
        debug!(method, "Calling Bot API");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&params)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?;

        parse_response(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(&self, method: &str, form: multipart::Form) -> Result<T> {
        debug!(method, "Calling Bot API with upload");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(TRANSFER_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?;

        parse_response(method, response).await
    }
}

async fn parse_response<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read {method} response"))?;

    let parsed: ApiResponse<T> = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) if status.is_success() => {
            return Err(e).with_context(|| format!("Failed to parse {method} response"));
        }
        Err(_) => anyhow::bail!("{method} failed with status {status}"),
    };

    if parsed.ok {
        return parsed
            .result
            .with_context(|| format!("{method} response has no result"));
    }

    let description = parsed
        .description
        .unwrap_or_else(|| "unknown error".to_string());
    let code = parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16()));

    // 429 and 5xx are transient; other refusals will not change on retry.
    if code == 429 || code >= 500 {
        anyhow::bail!("{method} failed ({code}): {description}");
    }
    Err(CoreError::PlatformRejected(format!("{method} ({code}): {description}")).into())
}

fn reply_parameters(reply_to: Option<i64>) -> Option<Value> {
    reply_to.map(|id| json!({ "message_id": id, "allow_sending_without_reply": true }))
}

fn file_part(media: OutgoingMedia) -> Result<multipart::Part> {
    let mime = crate::storage::mime::mime_from_name(&media.file_name);
    multipart::Part::bytes(media.data)
        .file_name(media.file_name)
        .mime_str(&mime)
        .context("Failed to set upload mime type")
}

#[async_trait]
impl TelegramApi for BotApiClient {
    async fn get_me(&self) -> Result<User> {
        self.call("getMe", json!({}), UNARY_TIMEOUT).await
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let params = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "edited_message", "message_reaction_count"],
        });
        self.call(
            "getUpdates",
            params,
            Duration::from_secs(timeout_secs) + Duration::from_secs(10),
        )
        .await
    }

    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<Message> {
        let mut params = json!({ "chat_id": chat_id, "text": text });
        if let Some(reply) = reply_parameters(reply_to) {
            params["reply_parameters"] = reply;
        }
        self.call("sendMessage", params, UNARY_TIMEOUT).await
    }

    async fn send_media(
        &self,
        chat_id: i64,
        media: OutgoingMedia,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message> {
        let kind = media.kind;
        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(kind.as_str(), file_part(media)?);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }
        if let Some(reply) = reply_parameters(reply_to) {
            form = form.text("reply_parameters", reply.to_string());
        }
        self.call_multipart(kind.send_method(), form).await
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        media: Vec<OutgoingMedia>,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Vec<Message>> {
        let mut descriptors = Vec::with_capacity(media.len());
        let mut form = multipart::Form::new().text("chat_id", chat_id.to_string());

        for (i, item) in media.into_iter().enumerate() {
            let attach = format!("file{i}");
            let mut descriptor = json!({
                "type": item.kind.as_str(),
                "media": format!("attach://{attach}"),
            });
            if i == 0 && !caption.is_empty() {
                descriptor["caption"] = json!(caption);
            }
            descriptors.push(descriptor);
            form = form.part(attach, file_part(item)?);
        }

        form = form.text("media", Value::Array(descriptors).to_string());
        if let Some(reply) = reply_parameters(reply_to) {
            form = form.text("reply_parameters", reply.to_string());
        }
        self.call_multipart("sendMediaGroup", form).await
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let _: Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
                UNARY_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn edit_message_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<()> {
        let _: Value = self
            .call(
                "editMessageCaption",
                json!({ "chat_id": chat_id, "message_id": message_id, "caption": caption }),
                UNARY_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
                UNARY_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn ban_chat_member(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "banChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id, "revoke_messages": false }),
                UNARY_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat> {
        self.call("getChat", json!({ "chat_id": chat_id }), UNARY_TIMEOUT)
            .await
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>> {
        self.call(
            "getChatAdministrators",
            json!({ "chat_id": chat_id }),
            UNARY_TIMEOUT,
        )
        .await
    }

    async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<ChatMember> {
        self.call(
            "getChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
            UNARY_TIMEOUT,
        )
        .await
    }

    async fn get_user_profile_photos(&self, user_id: i64, limit: i64) -> Result<UserProfilePhotos> {
        self.call(
            "getUserProfilePhotos",
            json!({ "user_id": user_id, "limit": limit }),
            UNARY_TIMEOUT,
        )
        .await
    }

    async fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", json!({ "file_id": file_id }), UNARY_TIMEOUT)
            .await
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/file/bot{}/{file_path}", self.base_url, self.token);
        let response = self
            .http
            .get(&url)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .context("Failed to download file")?;

        let status = response.status();
        if status.is_client_error() {
            return Err(CoreError::PlatformRejected(format!("file download failed with status {status}")).into());
        }
        if !status.is_success() {
            anyhow::bail!("File download failed with status {status}");
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read file body")?;
        Ok(bytes.to_vec())
    }
}

impl std::fmt::Debug for BotApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
