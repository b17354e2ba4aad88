//! VK API transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{
    ApiEnvelope, CreatedComment, CreatedPost, DocUploadResult, LongPollResponse, LongPollServer,
    Photo, PhotoUploadResult, SavedDoc, UploadServer, VkUser, WallPost, WallPosts,
};
use crate::error::CoreError;

const UNARY_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Error codes worth retrying: unknown error, rate limit, flood control, internal error.
const TRANSIENT_CODES: [i64; 4] = [1, 6, 9, 10];

/// VK calls made with one community admin key.
///
/// Errors carry a [`CoreError::PlatformRejected`] when VK refused the request.
#[async_trait]
pub trait VkApi: Send + Sync {
    async fn get_long_poll_server(&self, group_id: i64) -> Result<LongPollServer>;

    /// Wait up to `wait_secs` for events after `ts`.
    async fn check_long_poll(&self, server: &LongPollServer, ts: &str, wait_secs: u64) -> Result<LongPollResponse>;

    async fn get_user(&self, user_id: i64) -> Result<Option<VkUser>>;

    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Comment under a community post, returning the new comment id.
    async fn create_comment(
        &self,
        group_id: i64,
        post_id: i64,
        reply_to_comment: Option<i64>,
        message: &str,
        attachments: &[String],
    ) -> Result<i64>;

    async fn delete_comment(&self, group_id: i64, comment_id: i64) -> Result<()>;

    async fn ban_user(&self, group_id: i64, user_id: i64) -> Result<()>;

    /// Post on the community wall, returning the post id.
    async fn wall_post(&self, group_id: i64, message: &str, attachments: &[String]) -> Result<i64>;

    async fn wall_edit(&self, group_id: i64, post_id: i64, message: &str, attachments: &[String]) -> Result<()>;

    async fn wall_delete(&self, group_id: i64, post_id: i64) -> Result<()>;

    async fn wall_get_by_id(&self, group_id: i64, post_id: i64) -> Result<Option<WallPost>>;

    /// Upload a wall photo, returning its attachment reference.
    async fn upload_photo(&self, group_id: i64, file_name: &str, data: Vec<u8>) -> Result<String>;

    /// Upload a wall document, returning its attachment reference.
    async fn upload_doc(&self, group_id: i64, file_name: &str, data: Vec<u8>) -> Result<String>;
}

/// Builds API clients for community keys.
pub trait VkConnector: Send + Sync {
    fn connect(&self, access_token: &str) -> Result<Arc<dyn VkApi>>;
}

/// Connector producing [`VkClient`]s that share one HTTP pool.
#[derive(Debug, Clone)]
pub struct VkClientFactory {
    http: reqwest::Client,
    base_url: String,
    version: String,
}

impl VkClientFactory {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, version: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.to_string(),
        })
    }
}

impl VkConnector for VkClientFactory {
    fn connect(&self, access_token: &str) -> Result<Arc<dyn VkApi>> {
        Ok(Arc::new(VkClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            version: self.version.clone(),
            access_token: access_token.to_string(),
        }))
    }
}

pub struct VkClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    access_token: String,
}

impl VkClient {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        debug!(method, "Calling VK API");
        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", self.access_token.clone()));
        form.push(("v", self.version.clone()));

        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .timeout(UNARY_TIMEOUT)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{method} failed with status {status}");
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read {method} response"))?;
        parse_envelope(method, &body)
    }

    async fn post_file<T: DeserializeOwned>(&self, upload_url: &str, field: &'static str, file_name: &str, data: Vec<u8>) -> Result<T> {
        let mime = crate::storage::mime::mime_from_name(file_name);
        let part = multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(&mime)
            .context("Failed to set upload mime type")?;

        let response = self
            .http
            .post(upload_url)
            .timeout(TRANSFER_TIMEOUT)
            .multipart(multipart::Form::new().part(field, part))
            .send()
            .await
            .context("Failed to send upload")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Upload failed with status {status}");
        }

        // Upload servers answer JSON with a text/html content type.
        let body = response.bytes().await.context("Failed to read upload response")?;
        serde_json::from_slice(&body).context("Failed to parse upload response")
    }
}

fn parse_envelope<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
    let envelope: ApiEnvelope<T> =
        serde_json::from_slice(body).with_context(|| format!("Failed to parse {method} response"))?;

    if let Some(error) = envelope.error {
        if TRANSIENT_CODES.contains(&error.error_code) {
            anyhow::bail!("{method} failed ({}): {}", error.error_code, error.error_msg);
        }
        return Err(CoreError::PlatformRejected(format!(
            "{method} ({}): {}",
            error.error_code, error.error_msg
        ))
        .into());
    }

    envelope
        .response
        .with_context(|| format!("{method} response has no result"))
}

fn owner(group_id: i64) -> String {
    (-group_id.abs()).to_string()
}

#[async_trait]
impl VkApi for VkClient {
    async fn get_long_poll_server(&self, group_id: i64) -> Result<LongPollServer> {
        self.call("groups.getLongPollServer", &[("group_id", group_id.to_string())])
            .await
    }

    async fn check_long_poll(&self, server: &LongPollServer, ts: &str, wait_secs: u64) -> Result<LongPollResponse> {
        let wait = wait_secs.to_string();
        let response = self
            .http
            .get(&server.server)
            .timeout(Duration::from_secs(wait_secs + 10))
            .query(&[
                ("act", "a_check"),
                ("key", server.key.as_str()),
                ("ts", ts),
                ("wait", wait.as_str()),
            ])
            .send()
            .await
            .context("Failed to send long-poll request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Long-poll failed with status {status}");
        }
        response
            .json()
            .await
            .context("Failed to parse long-poll response")
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<VkUser>> {
        let users: Vec<VkUser> = self
            .call(
                "users.get",
                &[
                    ("user_ids", user_id.to_string()),
                    ("fields", "photo_200,screen_name,nickname".to_string()),
                ],
            )
            .await?;
        Ok(users.into_iter().next())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await
            .context("Failed to download file")?;

        let status = response.status();
        if status.is_client_error() {
            return Err(CoreError::PlatformRejected(format!("download failed with status {status}")).into());
        }
        if !status.is_success() {
            anyhow::bail!("Download failed with status {status}");
        }

        let bytes = response.bytes().await.context("Failed to read file body")?;
        Ok(bytes.to_vec())
    }

    async fn create_comment(
        &self,
        group_id: i64,
        post_id: i64,
        reply_to_comment: Option<i64>,
        message: &str,
        attachments: &[String],
    ) -> Result<i64> {
        let mut params = vec![
            ("owner_id", owner(group_id)),
            ("from_group", group_id.abs().to_string()),
            ("post_id", post_id.to_string()),
            ("message", message.to_string()),
        ];
        if let Some(reply_to) = reply_to_comment {
            params.push(("reply_to_comment", reply_to.to_string()));
        }
        if !attachments.is_empty() {
            params.push(("attachments", attachments.join(",")));
        }

        let created: CreatedComment = self.call("wall.createComment", &params).await?;
        Ok(created.comment_id)
    }

    async fn delete_comment(&self, group_id: i64, comment_id: i64) -> Result<()> {
        let _: i64 = self
            .call(
                "wall.deleteComment",
                &[("owner_id", owner(group_id)), ("comment_id", comment_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn ban_user(&self, group_id: i64, user_id: i64) -> Result<()> {
        let _: i64 = self
            .call(
                "groups.ban",
                &[("group_id", group_id.abs().to_string()), ("owner_id", user_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn wall_post(&self, group_id: i64, message: &str, attachments: &[String]) -> Result<i64> {
        let mut params = vec![
            ("owner_id", owner(group_id)),
            ("from_group", "1".to_string()),
            ("message", message.to_string()),
        ];
        if !attachments.is_empty() {
            params.push(("attachments", attachments.join(",")));
        }

        let created: CreatedPost = self.call("wall.post", &params).await?;
        Ok(created.post_id)
    }

    async fn wall_edit(&self, group_id: i64, post_id: i64, message: &str, attachments: &[String]) -> Result<()> {
        let mut params = vec![
            ("owner_id", owner(group_id)),
            ("post_id", post_id.to_string()),
            ("message", message.to_string()),
        ];
        if !attachments.is_empty() {
            params.push(("attachments", attachments.join(",")));
        }

        let _: CreatedPost = self.call("wall.edit", &params).await?;
        Ok(())
    }

    async fn wall_delete(&self, group_id: i64, post_id: i64) -> Result<()> {
        let _: i64 = self
            .call(
                "wall.delete",
                &[("owner_id", owner(group_id)), ("post_id", post_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn wall_get_by_id(&self, group_id: i64, post_id: i64) -> Result<Option<WallPost>> {
        let posts: WallPosts = self
            .call(
                "wall.getById",
                &[("posts", format!("{}_{post_id}", owner(group_id)))],
            )
            .await?;
        Ok(posts.into_vec().into_iter().next())
    }

    async fn upload_photo(&self, group_id: i64, file_name: &str, data: Vec<u8>) -> Result<String> {
        let server: UploadServer = self
            .call("photos.getWallUploadServer", &[("group_id", group_id.abs().to_string())])
            .await?;
        let uploaded: PhotoUploadResult = self.post_file(&server.upload_url, "photo", file_name, data).await?;

        let saved: Vec<Photo> = self
            .call(
                "photos.saveWallPhoto",
                &[
                    ("group_id", group_id.abs().to_string()),
                    ("server", uploaded.server.to_string()),
                    ("photo", uploaded.photo),
                    ("hash", uploaded.hash),
                ],
            )
            .await?;
        let photo = saved.last().context("photos.saveWallPhoto returned no photos")?;
        Ok(format!("photo{}_{}", photo.owner_id, photo.id))
    }

    async fn upload_doc(&self, group_id: i64, file_name: &str, data: Vec<u8>) -> Result<String> {
        let server: UploadServer = self
            .call("docs.getWallUploadServer", &[("group_id", group_id.abs().to_string())])
            .await?;
        let uploaded: DocUploadResult = self.post_file(&server.upload_url, "file", file_name, data).await?;
        let file = match (uploaded.file, uploaded.error) {
            (Some(file), _) => file,
            (None, error) => {
                return Err(CoreError::PlatformRejected(format!(
                    "document upload refused: {}",
                    error.unwrap_or_default()
                ))
                .into())
            }
        };

        let saved: SavedDoc = self
            .call("docs.save", &[("file", file), ("title", file_name.to_string())])
            .await?;
        let doc = saved.doc.context("docs.save returned no document")?;
        Ok(format!("doc{}_{}", doc.owner_id, doc.id))
    }
}

impl std::fmt::Debug for VkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
