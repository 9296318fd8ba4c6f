//! HTTP client for the master API.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use ngoogle_common::model::{Task, TaskMetrics, TrafficProfile};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    pub token: String,
}

pub struct MasterClient {
    base_url: String,
    http: reqwest::Client,
    agent_id: String,
    token: String,
}

impl MasterClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(MasterClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            agent_id: String::new(),
            token: String::new(),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Registers with the master and stores the returned identity for all
    /// later calls.
    pub async fn register(
        &mut self,
        hostname: &str,
        ip: &str,
        port: i64,
        version: &str,
    ) -> Result<RegisterResponse> {
        let body = json!({
            "hostname": hostname,
            "ip": ip,
            "port": port,
            "version": version,
        });
        let resp: RegisterResponse = self.post("/api/v1/agents/register", &body).await?;
        self.agent_id = resp.id.clone();
        self.token = resp.token.clone();
        Ok(resp)
    }

    pub async fn heartbeat(&self, rate_mbps: f64) -> Result<()> {
        let body = json!({
            "agent_id": self.agent_id,
            "token": self.token,
            "rate_mbps": rate_mbps,
        });
        self.post_unit("/api/v1/agents/heartbeat", &body).await
    }

    pub async fn pull_tasks(&self) -> Result<Vec<Task>> {
        if self.agent_id.is_empty() {
            bail!("not registered");
        }
        let path = format!("/api/v1/agents/{}/tasks/pull", self.agent_id);
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<TrafficProfile>> {
        let resp = self
            .http
            .get(format!("{}/api/v1/traffic-profiles", self.base_url))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn report_metrics(&self, m: &TaskMetrics) -> Result<()> {
        let path = format!("/api/v1/tasks/{}/metrics", m.task_id);
        self.post_unit(&path, m).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("http {status}: {body}"));
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("http {status}: {body}"));
        }
        Ok(resp.json().await?)
    }
}
