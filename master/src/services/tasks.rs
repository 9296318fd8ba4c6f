//! Task lifecycle: CRUD, transitions, metrics recording, agent pull.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ngoogle_common::model::{Distribution, Task, TaskMetrics, TaskStatus, TaskType};
use serde::Deserialize;

use crate::errors::ApiError;
use crate::store::Store;

use super::generate_id;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub target_url: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub target_rate_mbps: f64,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_sec: i64,
    #[serde(default)]
    pub total_bytes_target: i64,
    #[serde(default)]
    pub total_requests_target: i64,
    #[serde(default)]
    pub dispatch_rate_tpm: i64,
    #[serde(default)]
    pub dispatch_batch_size: i64,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    #[serde(default)]
    pub jitter_pct: f64,
    #[serde(default)]
    pub ramp_up_sec: i64,
    #[serde(default)]
    pub ramp_down_sec: i64,
    #[serde(default)]
    pub traffic_profile_id: String,
    #[serde(default)]
    pub concurrent_fragments: i64,
    #[serde(default)]
    pub retries: i64,
}

pub struct TaskService {
    store: Arc<Store>,
}

impl TaskService {
    pub fn new(store: Arc<Store>) -> Self {
        TaskService { store }
    }

    pub async fn create(&self, req: CreateTaskRequest) -> Result<Task, ApiError> {
        if req.target_url.is_empty() {
            return Err(ApiError::Validation("target_url is required".into()));
        }
        let now = Utc::now();
        let task = Task {
            id: generate_id(),
            name: req.name,
            task_type: req.task_type,
            target_url: req.target_url,
            agent_id: req.agent_id,
            status: TaskStatus::Pending,
            target_rate_mbps: req.target_rate_mbps,
            start_at: req.start_at,
            end_at: req.end_at,
            duration_sec: req.duration_sec,
            total_bytes_target: req.total_bytes_target,
            total_requests_target: req.total_requests_target,
            dispatch_rate_tpm: req.dispatch_rate_tpm,
            dispatch_batch_size: req.dispatch_batch_size.max(1),
            distribution: req.distribution.unwrap_or(Distribution::Flat),
            jitter_pct: req.jitter_pct,
            ramp_up_sec: req.ramp_up_sec,
            ramp_down_sec: req.ramp_down_sec,
            traffic_profile_id: req.traffic_profile_id,
            concurrent_fragments: req.concurrent_fragments.max(1),
            retries: if req.retries <= 0 { 3 } else { req.retries },
            total_bytes_done: 0,
            error_message: String::new(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_task(&task).await?;
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task, ApiError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("task {id}")))
    }

    pub async fn list(&self) -> Result<Vec<Task>, ApiError> {
        Ok(self.store.list_tasks().await?)
    }

    /// pending -> dispatched.
    pub async fn dispatch(&self, id: &str) -> Result<(), ApiError> {
        let task = self.get(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(ApiError::Validation(format!(
                "task {id} is not pending (status={})",
                task.status.as_str()
            )));
        }
        self.store
            .update_task_status_at(id, TaskStatus::Dispatched, Utc::now(), "dispatched_at")
            .await?;
        Ok(())
    }

    /// Any non-terminal status -> stopped.
    pub async fn stop(&self, id: &str) -> Result<(), ApiError> {
        let task = self.get(id).await?;
        if task.status.is_terminal() {
            return Err(ApiError::Validation(format!(
                "task {id} is already terminal (status={})",
                task.status.as_str()
            )));
        }
        self.store
            .update_task_status_at(id, TaskStatus::Stopped, Utc::now(), "finished_at")
            .await?;
        Ok(())
    }

    pub async fn mark_running(&self, id: &str) -> Result<(), ApiError> {
        self.store
            .update_task_status_at(id, TaskStatus::Running, Utc::now(), "started_at")
            .await?;
        Ok(())
    }

    pub async fn mark_done(&self, id: &str) -> Result<(), ApiError> {
        self.store
            .update_task_status_at(id, TaskStatus::Done, Utc::now(), "finished_at")
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<(), ApiError> {
        self.store.set_task_error(id, reason).await?;
        self.store
            .update_task_status_at(id, TaskStatus::Failed, Utc::now(), "finished_at")
            .await?;
        Ok(())
    }

    /// Stores a metric sample and folds its byte total into the task.
    pub async fn record_metrics(&self, mut m: TaskMetrics) -> Result<(), ApiError> {
        m.recorded_at = Utc::now();
        self.store.insert_task_metrics(&m).await?;
        self.store
            .update_task_bytes(&m.task_id, m.bytes_total)
            .await?;
        Ok(())
    }

    /// Tasks an agent should currently be executing.
    pub async fn pull_tasks(&self, agent_id: &str) -> Result<Vec<Task>, ApiError> {
        Ok(self
            .store
            .list_tasks_by_agent(agent_id, &[TaskStatus::Dispatched, TaskStatus::Running])
            .await?)
    }

    pub async fn metrics(
        &self,
        task_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskMetrics>, ApiError> {
        Ok(self.store.list_task_metrics(task_id, from, to).await?)
    }
}
