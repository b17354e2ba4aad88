//! Fleet of per-community long-poll sessions.
//!
//! A control loop claims communities whose heartbeat went stale, starts one
//! session per community and refreshes the heartbeat of every community it
//! watches. Several processes can run a fleet against one database; the
//! heartbeat keeps them off each other's communities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::api::{VkApi, VkConnector};
use super::ingest::VkIngest;
use super::session::VkSession;
use crate::db::{self, Database};

/// A community is claimable once its heartbeat is older than this.
pub const HEARTBEAT_STALE_SECS: i64 = 5 * 60;

#[derive(Default)]
struct FleetMaps {
    sessions: HashMap<i64, CancellationToken>,
    clients: HashMap<i64, Arc<dyn VkApi>>,
}

#[derive(Clone)]
pub struct VkFleet {
    db: Database,
    connector: Arc<dyn VkConnector>,
    ingest: VkIngest,
    maps: Arc<Mutex<FleetMaps>>,
}

impl VkFleet {
    pub fn new(db: Database, connector: Arc<dyn VkConnector>, ingest: VkIngest) -> Self {
        Self {
            db,
            connector,
            ingest,
            maps: Arc::new(Mutex::new(FleetMaps::default())),
        }
    }

    fn maps(&self) -> MutexGuard<'_, FleetMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Teams with a running session.
    #[must_use]
    pub fn watched_teams(&self) -> Vec<i64> {
        let mut teams: Vec<i64> = self.maps().sessions.keys().copied().collect();
        teams.sort_unstable();
        teams
    }

    /// API client of a watched team.
    #[must_use]
    pub fn client(&self, team_id: i64) -> Option<Arc<dyn VkApi>> {
        self.maps().clients.get(&team_id).cloned()
    }

    /// Start sessions for unwatched communities and refresh heartbeats.
    /// Returns the number of sessions started.
    pub async fn tick(&self, cancel: &CancellationToken) -> usize {
        let pool = self.db.pool();
        let teams = match db::list_unwatched_vk_teams(pool, HEARTBEAT_STALE_SECS).await {
            Ok(teams) => teams,
            Err(e) => {
                error!("VK discovery error: {e:#}");
                Vec::new()
            }
        };

        let mut started = 0;
        for team_id in teams {
            if self.maps().sessions.contains_key(&team_id) {
                continue;
            }

            let binding = match db::get_vk_binding(pool, team_id).await {
                Ok(Some(binding)) => binding,
                Ok(None) => continue,
                Err(e) => {
                    error!(team_id, "Failed to load VK binding: {e:#}");
                    continue;
                }
            };

            let api = match self.connector.connect(&binding.admin_api_key) {
                Ok(api) => api,
                Err(e) => {
                    error!(team_id, "Failed to create VK client: {e:#}");
                    continue;
                }
            };

            let token = cancel.child_token();
            {
                let mut maps = self.maps();
                if maps.sessions.contains_key(&team_id) {
                    continue;
                }
                maps.sessions.insert(team_id, token.clone());
                maps.clients.insert(team_id, Arc::clone(&api));
            }

            if let Err(e) = db::touch_vk_heartbeats(pool, &[team_id]).await {
                warn!(team_id, "Failed to claim VK community: {e:#}");
            }

            let session = VkSession::new(team_id, binding.group_id, api, self.db.clone(), self.ingest.clone());
            let fleet = self.clone();
            let stored_ts = binding.last_event_ts;
            tokio::spawn(async move {
                if let Err(e) = session.run(&stored_ts, token).await {
                    error!(team_id, "VK session ended with error: {e}");
                }
                let mut maps = fleet.maps();
                maps.sessions.remove(&team_id);
                maps.clients.remove(&team_id);
            });

            info!(team_id, group_id = binding.group_id, "Watching VK community");
            started += 1;
        }

        let watched = self.watched_teams();
        if !watched.is_empty() {
            if let Err(e) = db::touch_vk_heartbeats(pool, &watched).await {
                error!("Failed to refresh VK heartbeats: {e:#}");
            }
        }
        started
    }

    /// Run the control loop until `cancel` fires. Sessions stop with it.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Starting VK listener fleet");

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&cancel).await;
                }
                () = cancel.cancelled() => {
                    info!(sessions = self.watched_teams().len(), "VK listener fleet shutting down");
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for VkFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkFleet")
            .field("watched", &self.watched_teams())
            .finish_non_exhaustive()
    }
}
