//! Task runner: owns the per-task executors.
//!
//! Reconciliation is pull-driven: tasks returned by the master that are not
//! yet running get an executor under a child cancellation token; running
//! entries the master no longer returns are cancelled and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ngoogle_common::model::{Task, TaskType};
use ngoogle_common::ratelimit::Meter;
use ngoogle_common::shape::ProfilePoint;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::client::MasterClient;
use crate::executor;
use crate::reporter::TaskReporter;

#[derive(Default)]
struct RunnerState {
    running: HashMap<String, CancellationToken>,
    meters: HashMap<String, Arc<Meter>>,
}

pub struct TaskRunner {
    client: Arc<MasterClient>,
    agent_id: String,
    state: Mutex<RunnerState>,
    tracker: TaskTracker,
}

impl TaskRunner {
    pub fn new(client: Arc<MasterClient>, agent_id: String) -> Self {
        TaskRunner {
            client,
            agent_id,
            state: Mutex::new(RunnerState::default()),
            tracker: TaskTracker::new(),
        }
    }

    /// Sum of all per-task 5 s rates; reported with each heartbeat.
    pub fn total_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        state.meters.values().map(|m| m.rate_5s()).sum()
    }

    /// One pull cycle: fetch assigned tasks and reconcile the running set.
    pub async fn pull(self: Arc<Self>, root: CancellationToken) {
        let tasks = match self.client.pull_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("pull tasks failed: {e}");
                return;
            }
        };

        let mut state = self.state.lock().unwrap();

        for task in &tasks {
            if state.running.contains_key(&task.id) {
                continue;
            }
            let cancel = root.child_token();
            let meter = Arc::new(Meter::new());
            state.running.insert(task.id.clone(), cancel.clone());
            state.meters.insert(task.id.clone(), meter.clone());

            let runner = Arc::clone(&self);
            let task = task.clone();
            self.tracker
                .spawn(async move { runner.execute(task, meter, cancel).await });
        }

        let assigned: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let dropped: Vec<String> = state
            .running
            .keys()
            .filter(|id| !assigned.contains(&id.as_str()))
            .cloned()
            .collect();
        for id in dropped {
            info!(task = %id, "task no longer assigned, stopping");
            if let Some(cancel) = state.running.remove(&id) {
                cancel.cancel();
            }
            state.meters.remove(&id);
        }
    }

    async fn execute(self: Arc<Self>, task: Task, meter: Arc<Meter>, cancel: CancellationToken) {
        info!(task = %task.id, task_type = task.task_type.as_str(), url = %task.target_url, "executing task");

        let reporter = Arc::new(TaskReporter::new(
            task.id.clone(),
            self.agent_id.clone(),
            self.client.clone(),
            meter,
        ));
        // Reporter runs under its own token so the executor finishing also
        // triggers the final flush.
        let report_cancel = cancel.child_token();
        let report_handle = tokio::spawn(reporter.clone().run(report_cancel.clone()));

        let points = self.profile_points(&task).await;
        let result = match task.task_type {
            TaskType::Static => {
                executor::static_dl::run(cancel.clone(), &task, &points, reporter.clone()).await
            }
            TaskType::Youtube => {
                executor::youtube::run(cancel.clone(), &task, reporter.clone()).await
            }
        };

        report_cancel.cancel();
        let _ = report_handle.await;

        match result {
            Ok(()) => info!(task = %task.id, "task finished"),
            Err(e) => error!(task = %task.id, "task failed: {e}"),
        }

        let mut state = self.state.lock().unwrap();
        state.running.remove(&task.id);
        state.meters.remove(&task.id);
    }

    /// Resolves the task's traffic profile into curve points. A missing or
    /// unreachable profile degrades to a constant multiplier.
    async fn profile_points(&self, task: &Task) -> Vec<ProfilePoint> {
        if task.traffic_profile_id.is_empty() {
            return Vec::new();
        }
        match self.client.list_profiles().await {
            Ok(profiles) => profiles
                .into_iter()
                .find(|p| p.id == task.traffic_profile_id)
                .map(|p| ngoogle_common::shape::parse_points(&p.points))
                .unwrap_or_default(),
            Err(e) => {
                warn!(task = %task.id, "loading traffic profile failed: {e}");
                Vec::new()
            }
        }
    }

    /// Cancels everything and waits for executors to drain.
    pub async fn shutdown(&self) {
        {
            let state = self.state.lock().unwrap();
            for cancel in state.running.values() {
                cancel.cancel();
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}
