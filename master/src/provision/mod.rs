//! SSH-based agent provisioning.
//!
//! A job walks `ssh_check -> download_binary -> install_service ->
//! health_check`; any step failure parks it in `failed` with the step
//! recorded, and only failed jobs may be retried. The worker runs detached
//! from the HTTP request that started it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use chrono::Utc;
use ngoogle_common::model::{
    AgentStatus, AuthType, Credential, ProvisionJob, ProvisionStatus,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::store::Store;

use crate::services::generate_id;

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_CHECK_POLL: Duration = Duration::from_secs(5);

const REMOTE_TMP_PATH: &str = "/tmp/ngoogle-agent";
const REMOTE_BIN_PATH: &str = "/usr/local/bin/ngoogle-agent";

const SYSTEMD_UNIT: &str = r#"[Unit]
Description=ngoogle Agent
After=network.target

[Service]
Type=simple
ExecStart=/usr/local/bin/ngoogle-agent
Environment=AGENT_HOST_IP={host_ip}
Environment=MASTER_URL={master_url}
Restart=on-failure
RestartSec=5
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub host_ip: String,
    #[serde(default)]
    pub ssh_port: i64,
    pub ssh_user: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: AuthType,
    pub credential_ref: String,
}

fn default_auth_type() -> AuthType {
    AuthType::Key
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Private key PEM or password.
    pub payload: String,
}

#[derive(Clone)]
pub struct ProvisionService {
    store: Arc<Store>,
    master_url: String,
    agent_bin_url: String,
}

impl ProvisionService {
    pub fn new(store: Arc<Store>, master_url: String, agent_bin_url: String) -> Self {
        ProvisionService {
            store,
            master_url,
            agent_bin_url,
        }
    }

    /// Validates the request, guards against duplicate hosts, persists the
    /// job and launches the async worker.
    pub async fn start(&self, mut req: JobRequest) -> Result<ProvisionJob, ApiError> {
        if req.host_ip.is_empty() || req.ssh_user.is_empty() || req.credential_ref.is_empty() {
            return Err(ApiError::Validation(
                "host_ip, ssh_user and credential_ref are required".into(),
            ));
        }
        if req.ssh_port <= 0 {
            req.ssh_port = 22;
        }

        let agents = self.store.list_agents().await?;
        if agents.iter().any(|a| a.ip == req.host_ip) {
            return Err(ApiError::Conflict(format!(
                "an agent with ip {} already exists",
                req.host_ip
            )));
        }
        if self.store.has_active_provision_job(&req.host_ip).await? {
            return Err(ApiError::Conflict(format!(
                "a provisioning job for {} is already in progress",
                req.host_ip
            )));
        }

        let now = Utc::now();
        let job = ProvisionJob {
            id: generate_id(),
            host_ip: req.host_ip.clone(),
            ssh_port: req.ssh_port,
            ssh_user: req.ssh_user.clone(),
            auth_type: req.auth_type,
            credential_ref: req.credential_ref.clone(),
            status: ProvisionStatus::Pending,
            current_step: "created".into(),
            log: String::new(),
            agent_id: String::new(),
            failed_step: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.create_provision_job(&job).await?;

        let svc = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move { svc.run_worker(job_id, req).await });

        Ok(job)
    }

    /// Resets a failed job to `pending` and re-runs the worker.
    pub async fn retry(&self, id: &str) -> Result<ProvisionJob, ApiError> {
        let job = self.get(id).await?;
        if job.status != ProvisionStatus::Failed {
            return Err(ApiError::Validation(format!(
                "only failed jobs can be retried (status={})",
                job.status.as_str()
            )));
        }
        self.store.reset_provision_job(id).await?;

        let req = JobRequest {
            host_ip: job.host_ip,
            ssh_port: job.ssh_port,
            ssh_user: job.ssh_user,
            auth_type: job.auth_type,
            credential_ref: job.credential_ref,
        };
        let svc = self.clone();
        let job_id = id.to_string();
        tokio::spawn(async move { svc.run_worker(job_id, req).await });

        self.get(id).await
    }

    pub async fn get(&self, id: &str) -> Result<ProvisionJob, ApiError> {
        self.store
            .get_provision_job(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("provision job {id}")))
    }

    pub async fn list(&self) -> Result<Vec<ProvisionJob>, ApiError> {
        Ok(self.store.list_provision_jobs().await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        Ok(self.store.delete_provision_job(id).await?)
    }

    pub async fn create_credential(&self, req: CredentialRequest) -> Result<Credential, ApiError> {
        if req.name.is_empty() || req.payload.is_empty() {
            return Err(ApiError::Validation("name and payload are required".into()));
        }
        let cred = Credential {
            id: generate_id(),
            name: req.name,
            auth_type: req.auth_type,
            payload: req.payload,
            created_at: Utc::now(),
        };
        self.store.create_credential(&cred).await?;
        Ok(cred)
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>, ApiError> {
        Ok(self.store.list_credentials().await?)
    }

    pub async fn delete_credential(&self, id: &str) -> Result<(), ApiError> {
        Ok(self.store.delete_credential(id).await?)
    }

    // ========================================================================
    // Worker
    // ========================================================================

    async fn run_worker(&self, job_id: String, req: JobRequest) {
        if let Err((step, reason)) = self.walk_steps(&job_id, &req).await {
            warn!(job = %job_id, step = %step, "provisioning failed: {reason}");
            self.log_line(&job_id, &format!("[FAIL] {step}: {reason}"))
                .await;
            if let Err(e) = self.store.set_provision_failed(&job_id, &step).await {
                warn!(job = %job_id, "recording failure state: {e}");
            }
        }
    }

    async fn walk_steps(&self, job_id: &str, req: &JobRequest) -> Result<(), (String, String)> {
        let fail = |step: &str| {
            let step = step.to_string();
            move |e: anyhow::Error| (step, e.to_string())
        };

        // ── ssh_check ────────────────────────────────────────────────────
        self.set_step(job_id, "ssh_check").await;
        self.log_line(job_id, "Loading credential...").await;
        let cred = self
            .store
            .get_credential(&req.credential_ref)
            .await
            .map_err(fail("ssh_check"))?
            .ok_or_else(|| {
                (
                    "ssh_check".to_string(),
                    format!("credential {} not found", req.credential_ref),
                )
            })?;

        self.log_line(
            job_id,
            &format!("Connecting to {}:{}...", req.host_ip, req.ssh_port),
        )
        .await;
        let client = connect(&req.host_ip, req.ssh_port, &req.ssh_user, &cred)
            .await
            .map_err(fail("ssh_check"))?;
        self.log_line(job_id, "SSH connectivity OK").await;

        // ── download_binary ──────────────────────────────────────────────
        self.set_step(job_id, "download_binary").await;
        let arch_raw = exec(&client, "uname -m")
            .await
            .map_err(fail("download_binary"))?;
        let arch = map_arch(arch_raw.trim());
        let url = self.agent_bin_url.replace("{arch}", arch);
        self.log_line(job_id, &format!("Downloading agent binary ({arch}) from {url}"))
            .await;
        let download_cmd = format!(
            "wget -q -O {REMOTE_TMP_PATH} '{url}' || curl -fsSL -o {REMOTE_TMP_PATH} '{url}'"
        );
        exec(&client, &download_cmd)
            .await
            .map_err(fail("download_binary"))?;
        self.log_line(job_id, "Agent binary downloaded").await;

        // ── install_service ──────────────────────────────────────────────
        self.set_step(job_id, "install_service").await;
        self.log_line(job_id, "Installing systemd service...").await;
        let unit = SYSTEMD_UNIT
            .replace("{host_ip}", &req.host_ip)
            .replace("{master_url}", &self.master_url);
        let install_cmds = [
            format!("sudo mv {REMOTE_TMP_PATH} {REMOTE_BIN_PATH} && sudo chmod +x {REMOTE_BIN_PATH}"),
            format!(
                "sudo tee /etc/systemd/system/ngoogle-agent.service > /dev/null << 'UNIT_EOF'\n{unit}UNIT_EOF"
            ),
            "sudo systemctl daemon-reload && sudo systemctl enable ngoogle-agent && sudo systemctl restart ngoogle-agent".to_string(),
        ];
        for cmd in &install_cmds {
            let shown: String = cmd.chars().take(80).collect();
            self.log_line(job_id, &format!("  $ {shown}")).await;
            exec(&client, cmd).await.map_err(fail("install_service"))?;
        }
        self.log_line(job_id, "Service installed and started").await;

        // ── health_check ─────────────────────────────────────────────────
        self.set_step(job_id, "health_check").await;
        self.log_line(job_id, "Waiting for agent to come online (max 60s)...")
            .await;
        let deadline = tokio::time::Instant::now() + HEALTH_CHECK_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if let Ok(agents) = self.store.list_agents().await {
                if let Some(agent) = agents
                    .iter()
                    .find(|a| a.ip == req.host_ip && a.status == AgentStatus::Online)
                {
                    self.log_line(job_id, &format!("Agent {} is online", agent.id))
                        .await;
                    let _ = self.store.set_provision_agent(job_id, &agent.id).await;
                    let _ = self
                        .store
                        .update_provision_status(job_id, ProvisionStatus::Success, "done")
                        .await;
                    info!(job = %job_id, agent = %agent.id, "provisioning succeeded");
                    return Ok(());
                }
            }
            tokio::time::sleep(HEALTH_CHECK_POLL).await;
        }
        Err((
            "health_check".to_string(),
            "agent did not come online within 60s".to_string(),
        ))
    }

    async fn set_step(&self, job_id: &str, step: &str) {
        if let Err(e) = self
            .store
            .update_provision_status(job_id, ProvisionStatus::Running, step)
            .await
        {
            warn!(job = %job_id, "updating provision step: {e}");
        }
    }

    async fn log_line(&self, job_id: &str, msg: &str) {
        info!(job = %job_id, "provision: {msg}");
        let line = format!("[{}] {}", Utc::now().to_rfc3339(), msg);
        if let Err(e) = self.store.append_provision_log(job_id, &line).await {
            warn!(job = %job_id, "appending provision log: {e}");
        }
    }
}

fn map_arch(uname: &str) -> &'static str {
    match uname {
        "aarch64" | "arm64" => "arm64",
        _ => "amd64",
    }
}

async fn connect(host_ip: &str, port: i64, user: &str, cred: &Credential) -> Result<Client> {
    let auth = match cred.auth_type {
        AuthType::Key => AuthMethod::with_key(&cred.payload, None),
        AuthType::Password => AuthMethod::with_password(&cred.payload),
    };
    let addr = format!("{host_ip}:{port}");
    tokio::time::timeout(
        SSH_CONNECT_TIMEOUT,
        Client::connect(
            addr.as_str(),
            user,
            auth,
            ServerCheckMethod::NoCheck,
        ),
    )
    .await
    .map_err(|_| anyhow!("SSH connect to {addr} timed out after 15s"))?
    .map_err(|e| anyhow!("SSH connect to {addr} failed: {e}"))
}

async fn exec(client: &Client, cmd: &str) -> Result<String> {
    let result = client
        .execute(cmd)
        .await
        .map_err(|e| anyhow!("SSH command failed: {e}"))?;
    if result.exit_status != 0 {
        bail!(
            "command exited with status {}: {}",
            result.exit_status,
            result.stderr.trim()
        );
    }
    Ok(result.stdout)
}
