//! Agent registry: registration, heartbeat, liveness.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ngoogle_common::model::{Agent, AgentStatus, BandwidthSample};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::errors::ApiError;
use crate::store::Store;

use super::{generate_id, generate_token};

/// How long an agent may stay silent before the sweep marks it offline.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub struct AgentService {
    store: Arc<Store>,
}

impl AgentService {
    pub fn new(store: Arc<Store>) -> Self {
        AgentService { store }
    }

    /// Registers a new agent, or rotates the token of an existing one with
    /// the same `(hostname, ip)`.
    pub async fn register(
        &self,
        hostname: &str,
        ip: &str,
        port: i64,
        version: &str,
    ) -> Result<Agent, ApiError> {
        let now = Utc::now();
        let agents = self.store.list_agents().await?;
        if let Some(mut existing) = agents
            .into_iter()
            .find(|a| a.hostname == hostname && a.ip == ip)
        {
            existing.token = generate_token();
            existing.status = AgentStatus::Online;
            existing.version = version.to_string();
            existing.port = port;
            existing.last_heartbeat = now;
            existing.updated_at = now;
            self.store.upsert_agent(&existing).await?;
            info!(agent = %existing.id, ip, "agent re-registered, token rotated");
            return Ok(existing);
        }

        let agent = Agent {
            id: generate_id(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            port,
            token: generate_token(),
            status: AgentStatus::Online,
            version: version.to_string(),
            current_rate_mbps: 0.0,
            last_heartbeat: now,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_agent(&agent).await?;
        info!(agent = %agent.id, ip, "agent registered");
        Ok(agent)
    }

    /// Refreshes liveness and records a bandwidth sample. Fails with
    /// `Unauthorized` unless the bearer token matches.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        token: &str,
        rate_mbps: f64,
    ) -> Result<(), ApiError> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        if !constant_time_eq(agent.token.as_bytes(), token.as_bytes()) {
            return Err(ApiError::Unauthorized);
        }

        let now = Utc::now();
        self.store
            .update_agent_status(agent_id, AgentStatus::Online, now)
            .await?;
        self.store.update_agent_rate(agent_id, rate_mbps).await?;
        self.store
            .insert_bandwidth_sample(&BandwidthSample {
                id: 0,
                agent_id: agent_id.to_string(),
                rate_mbps,
                recorded_at: now,
            })
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Agent>, ApiError> {
        Ok(self.store.list_agents().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Agent, ApiError> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("agent {id}")))
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        Ok(self.store.delete_agent(id).await?)
    }

    /// Marks agents offline once their last heartbeat is older than the
    /// timeout. `last_heartbeat` is left intact for diagnostics.
    pub async fn sweep_offline(&self) -> Result<(), ApiError> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(HEARTBEAT_TIMEOUT).unwrap_or(chrono::Duration::seconds(30));
        let agents = self.store.list_agents().await?;
        for a in agents {
            if a.status == AgentStatus::Online && a.last_heartbeat < threshold {
                info!(agent = %a.id, "marking agent offline");
                self.store
                    .update_agent_status(&a.id, AgentStatus::Offline, a.last_heartbeat)
                    .await?;
            }
        }
        Ok(())
    }

    /// Background sweep loop; errors are logged and never fatal.
    pub async fn run_offline_sweep(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_offline().await {
                        error!("offline sweep failed: {e}");
                    }
                }
            }
        }
    }
}

/// Byte-for-byte comparison without early exit, so heartbeat timing does not
/// leak token prefixes.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::constant_time_eq;

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"abc", b"abc123"));
        assert!(constant_time_eq(b"", b""));
    }
}
