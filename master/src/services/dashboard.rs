//! Dashboard aggregation and bandwidth-sample retention.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ngoogle_common::model::{AgentStatus, BandwidthPoint, TaskStatus};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::errors::ApiError;
use crate::store::Store;

const RETENTION: chrono::Duration = chrono::Duration::days(7);
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize)]
pub struct AgentStat {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub rate_mbps: f64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct Overview {
    pub total_agents: usize,
    pub online_agents: usize,
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub total_rate_mbps: f64,
    pub agents: Vec<AgentStat>,
}

pub struct DashboardService {
    store: Arc<Store>,
}

impl DashboardService {
    pub fn new(store: Arc<Store>) -> Self {
        DashboardService { store }
    }

    /// Fleet snapshot. The total rate is the sum of each online agent's most
    /// recently reported rate.
    pub async fn overview(&self) -> Result<Overview, ApiError> {
        let agents = self.store.list_agents().await?;
        let tasks = self.store.list_tasks().await?;

        let mut online = 0;
        let mut total_rate = 0.0;
        let mut stats = Vec::with_capacity(agents.len());
        for a in &agents {
            if a.status == AgentStatus::Online {
                online += 1;
                total_rate += a.current_rate_mbps;
            }
            stats.push(AgentStat {
                id: a.id.clone(),
                hostname: a.hostname.clone(),
                ip: a.ip.clone(),
                rate_mbps: a.current_rate_mbps,
                status: a.status.as_str().to_string(),
            });
        }

        let running = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();

        Ok(Overview {
            total_agents: agents.len(),
            online_agents: online,
            total_tasks: tasks.len(),
            running_tasks: running,
            total_rate_mbps: total_rate,
            agents: stats,
        })
    }

    pub async fn bandwidth_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step_sec: i64,
    ) -> Result<Vec<BandwidthPoint>, ApiError> {
        let step_sec = if step_sec <= 0 { 60 } else { step_sec };
        Ok(self
            .store
            .aggregate_bandwidth_history(from, to, step_sec)
            .await?)
    }

    /// Hourly purge of samples outside the 7-day retention window.
    pub async fn run_purge(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    let cutoff = Utc::now() - RETENTION;
                    match self.store.purge_bandwidth_older_than(cutoff).await {
                        Ok(n) if n > 0 => info!("purged {n} bandwidth samples older than {cutoff}"),
                        Ok(_) => {}
                        Err(e) => error!("bandwidth purge failed: {e}"),
                    }
                }
            }
        }
    }
}
