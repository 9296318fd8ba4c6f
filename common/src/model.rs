//! Entity types shared by the master and the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        }
    }
}

impl From<&str> for AgentStatus {
    fn from(s: &str) -> Self {
        match s {
            "online" => AgentStatus::Online,
            _ => AgentStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub port: i64,
    pub token: String,
    pub status: AgentStatus,
    pub version: String,
    pub current_rate_mbps: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Youtube,
    Static,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Youtube => "youtube",
            TaskType::Static => "static",
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "youtube" => TaskType::Youtube,
            _ => TaskType::Static,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Running,
    Done,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    /// Terminal statuses are absorbing: no transition may leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "dispatched" => TaskStatus::Dispatched,
            "running" => TaskStatus::Running,
            "done" => TaskStatus::Done,
            "failed" => TaskStatus::Failed,
            "stopped" => TaskStatus::Stopped,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Flat,
    Ramp,
    Diurnal,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Flat => "flat",
            Distribution::Ramp => "ramp",
            Distribution::Diurnal => "diurnal",
        }
    }
}

impl From<&str> for Distribution {
    fn from(s: &str) -> Self {
        match s {
            "ramp" => Distribution::Ramp,
            "diurnal" => Distribution::Diurnal,
            _ => Distribution::Flat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub target_url: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub target_rate_mbps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    pub duration_sec: i64,
    pub total_bytes_target: i64,
    pub total_requests_target: i64,
    pub dispatch_rate_tpm: i64,
    pub dispatch_batch_size: i64,
    pub distribution: Distribution,
    pub jitter_pct: f64,
    pub ramp_up_sec: i64,
    pub ramp_down_sec: i64,
    pub traffic_profile_id: String,
    pub concurrent_fragments: i64,
    pub retries: i64,
    pub total_bytes_done: i64,
    #[serde(default)]
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Task metrics
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub agent_id: String,
    pub bytes_total: i64,
    pub bytes_delta: i64,
    pub rate_mbps_5s: f64,
    pub rate_mbps_30s: f64,
    pub request_count: i64,
    pub error_count: i64,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Traffic profile
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub distribution: Distribution,
    /// JSON array of `{offset_sec, rate_pct}` breakpoints for diurnal curves.
    pub points: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Provision job
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStatus::Pending => "pending",
            ProvisionStatus::Running => "running",
            ProvisionStatus::Success => "success",
            ProvisionStatus::Failed => "failed",
        }
    }

}

impl From<&str> for ProvisionStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => ProvisionStatus::Running,
            "success" => ProvisionStatus::Success,
            "failed" => ProvisionStatus::Failed,
            _ => ProvisionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Key,
    Password,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Key => "key",
            AuthType::Password => "password",
        }
    }
}

impl From<&str> for AuthType {
    fn from(s: &str) -> Self {
        match s {
            "password" => AuthType::Password,
            _ => AuthType::Key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionJob {
    pub id: String,
    pub host_ip: String,
    pub ssh_port: i64,
    pub ssh_user: String,
    pub auth_type: AuthType,
    pub credential_ref: String,
    pub status: ProvisionStatus,
    pub current_step: String,
    pub log: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub failed_step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Bandwidth sample
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthSample {
    #[serde(default)]
    pub id: i64,
    pub agent_id: String,
    pub rate_mbps: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Time-bucketed bandwidth aggregate for the dashboard chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthPoint {
    pub ts: DateTime<Utc>,
    pub avg_mbps: f64,
    pub max_mbps: f64,
}

// ============================================================================
// Credential
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Private key PEM or password. Never serialized back to clients.
    #[serde(skip_serializing, default)]
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
