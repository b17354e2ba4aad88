//! Long-poll session of one community.
//!
//! Events of a batch are handled in order. The batch cursor is stored only
//! after every event completed, so a transient failure refetches the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::VkApi;
use super::ingest::VkIngest;
use super::types::{LongPollServer, VkEvent};
use crate::db::{self, Database};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;

/// Seconds the long-poll server holds a request open.
pub const LONG_POLL_WAIT_SECS: u64 = 25;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct VkSession {
    team_id: i64,
    group_id: i64,
    api: Arc<dyn VkApi>,
    db: Database,
    ingest: VkIngest,
}

impl VkSession {
    pub fn new(team_id: i64, group_id: i64, api: Arc<dyn VkApi>, db: Database, ingest: VkIngest) -> Self {
        Self {
            team_id,
            group_id,
            api,
            db,
            ingest,
        }
    }

    async fn connect(&self) -> CoreResult<LongPollServer> {
        with_retry("vk long-poll server", || self.api.get_long_poll_server(self.group_id))
            .await
            .map_err(CoreError::platform)
    }

    /// Poll until cancelled. Returns an error when the community refuses access.
    pub async fn run(&self, stored_ts: &str, cancel: CancellationToken) -> CoreResult<()> {
        let team_id = self.team_id;
        let mut server = self.connect().await?;
        let mut ts = if stored_ts.is_empty() || stored_ts == "0" {
            server.ts.clone()
        } else {
            stored_ts.to_string()
        };
        info!(team_id, group_id = self.group_id, ts = %ts, "VK session started");

        loop {
            let polled = tokio::select! {
                () = cancel.cancelled() => break,
                polled = self.api.check_long_poll(&server, &ts, LONG_POLL_WAIT_SECS) => polled,
            };

            let response = match polled {
                Ok(response) => response,
                Err(e) => {
                    error!(team_id, "VK long-poll error: {e:#}");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => continue,
                    }
                }
            };

            match response.failed {
                None => {}
                Some(1) => {
                    // History was lost; continue from the cursor the server hands out.
                    if let Some(next) = response.ts {
                        warn!(team_id, ts = %next, "VK event history expired");
                        self.store_cursor(&next).await;
                        ts = next;
                    }
                    continue;
                }
                Some(2) => {
                    debug!(team_id, "VK long-poll key expired");
                    server = self.connect().await?;
                    continue;
                }
                Some(code) => {
                    warn!(team_id, code, "VK long-poll session lost");
                    server = self.connect().await?;
                    ts = server.ts.clone();
                    continue;
                }
            }

            if self.process_batch(&response.updates).await {
                if let Some(next) = response.ts {
                    self.store_cursor(&next).await;
                    ts = next;
                }
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }

        info!(team_id, ts = %ts, "VK session stopped");
        Ok(())
    }

    /// Handle events in order. Returns `false` if one must be retried.
    pub async fn process_batch(&self, events: &[VkEvent]) -> bool {
        for event in events {
            match self.ingest.handle(self.team_id, self.api.as_ref(), event).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    warn!(team_id = self.team_id, event_id = %event.event_id, "VK event failed, will retry: {e}");
                    return false;
                }
                Err(e) => {
                    warn!(team_id = self.team_id, event_id = %event.event_id, kind = %event.kind, "Dropping VK event: {e}");
                }
            }
        }
        true
    }

    async fn store_cursor(&self, ts: &str) {
        let stored = with_retry("vk cursor write", || db::set_vk_cursor(self.db.pool(), self.team_id, ts)).await;
        match stored {
            Ok(true) => {}
            Ok(false) => debug!(team_id = self.team_id, ts = %ts, "Kept newer VK cursor"),
            Err(e) => error!(team_id = self.team_id, "Failed to store VK cursor: {e:#}"),
        }
    }
}
