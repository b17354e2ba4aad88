use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

const NO_COMMENTS: &str = "No comments to summarize";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub markdown: String,
    pub post_union_id: i64,
}

#[derive(Debug, Deserialize)]
struct SummarizerAnswer {
    response: String,
}

/// Client of the external text summarization endpoint.
#[derive(Debug, Clone)]
pub struct Summarizer {
    http: reqwest::Client,
    url: String,
}

impl Summarizer {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Summarize comment texts of one post.
    pub async fn summarize(&self, post_union_id: i64, texts: &[String]) -> CoreResult<Summary> {
        let comments = if texts.is_empty() {
            NO_COMMENTS.to_string()
        } else {
            texts
                .iter()
                .map(|t| format!("{t}\n\n"))
                .collect::<String>()
        };

        debug!(post_id = post_union_id, count = texts.len(), "Requesting summary");
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "comments": comments }))
            .send()
            .await
            .context("Failed to reach summarizer")
            .map_err(CoreError::platform)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::platform(anyhow::anyhow!(
                "summarizer failed with status {status}"
            )));
        }

        let answer: SummarizerAnswer = response
            .json()
            .await
            .context("Failed to parse summarizer response")
            .map_err(CoreError::platform)?;

        Ok(Summary {
            markdown: answer.response,
            post_union_id,
        })
    }
}
