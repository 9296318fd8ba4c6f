//! Task lifecycle scheduler.
//!
//! Every 5 s the tick scans all tasks: pending/dispatched tasks whose start
//! condition holds become running, running tasks whose stop condition holds
//! become stopped. Ticks are idempotent; terminal tasks are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ngoogle_common::model::{Task, TaskStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::Store;

const TICK_INTERVAL: Duration = Duration::from_secs(5);

pub struct Scheduler {
    store: Arc<Store>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>) -> Self {
        Scheduler { store }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    pub async fn tick(&self) {
        let tasks = match self.store.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("scheduler list tasks: {e}");
                return;
            }
        };
        let now = Utc::now();
        for t in &tasks {
            match t.status {
                TaskStatus::Pending | TaskStatus::Dispatched if should_start(t, now) => {
                    info!(task = %t.id, "scheduler: task running");
                    if let Err(e) = self
                        .store
                        .update_task_status_at(&t.id, TaskStatus::Running, now, "started_at")
                        .await
                    {
                        error!(task = %t.id, "scheduler mark running: {e}");
                    }
                }
                TaskStatus::Running if should_stop(t, now) => {
                    info!(task = %t.id, "scheduler: task stopped");
                    if let Err(e) = self
                        .store
                        .update_task_status_at(&t.id, TaskStatus::Stopped, now, "finished_at")
                        .await
                    {
                        error!(task = %t.id, "scheduler mark stopped: {e}");
                    }
                }
                _ => {}
            }
        }
    }
}

pub fn should_start(t: &Task, now: DateTime<Utc>) -> bool {
    match t.start_at {
        Some(start_at) => start_at <= now,
        None => true,
    }
}

/// Time conditions are checked before the volume condition so a task that
/// trips both gets its `finished_at` from the time window.
pub fn should_stop(t: &Task, now: DateTime<Utc>) -> bool {
    if let Some(end_at) = t.end_at {
        if end_at < now {
            return true;
        }
    }
    if t.duration_sec > 0 {
        if let Some(started_at) = t.started_at {
            if (now - started_at).num_seconds() > t.duration_sec {
                return true;
            }
        }
    }
    t.total_bytes_target > 0 && t.total_bytes_done >= t.total_bytes_target
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngoogle_common::model::{Distribution, TaskType};

    fn base_task() -> Task {
        let now = Utc::now();
        Task {
            id: "t1".into(),
            name: String::new(),
            task_type: TaskType::Static,
            target_url: "https://example.com".into(),
            agent_id: String::new(),
            status: TaskStatus::Running,
            target_rate_mbps: 10.0,
            start_at: None,
            end_at: None,
            duration_sec: 0,
            total_bytes_target: 0,
            total_requests_target: 0,
            dispatch_rate_tpm: 0,
            dispatch_batch_size: 1,
            distribution: Distribution::Flat,
            jitter_pct: 0.0,
            ramp_up_sec: 0,
            ramp_down_sec: 0,
            traffic_profile_id: String::new(),
            concurrent_fragments: 1,
            retries: 3,
            total_bytes_done: 0,
            error_message: String::new(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn starts_without_start_at() {
        assert!(should_start(&base_task(), Utc::now()));
    }

    #[test]
    fn waits_for_future_start_at() {
        let mut t = base_task();
        let now = Utc::now();
        t.start_at = Some(now + chrono::Duration::minutes(5));
        assert!(!should_start(&t, now));
        assert!(should_start(&t, now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn stops_after_end_at() {
        let mut t = base_task();
        let now = Utc::now();
        t.end_at = Some(now - chrono::Duration::seconds(1));
        assert!(should_stop(&t, now));
    }

    #[test]
    fn stops_after_duration() {
        let mut t = base_task();
        let now = Utc::now();
        t.duration_sec = 60;
        t.started_at = Some(now - chrono::Duration::seconds(61));
        assert!(should_stop(&t, now));
        t.started_at = Some(now - chrono::Duration::seconds(30));
        assert!(!should_stop(&t, now));
    }

    #[test]
    fn stops_on_volume_target() {
        let mut t = base_task();
        t.total_bytes_target = 1_000_000;
        t.total_bytes_done = 999_999;
        assert!(!should_stop(&t, Utc::now()));
        t.total_bytes_done = 1_000_000;
        assert!(should_stop(&t, Utc::now()));
    }

    #[test]
    fn runs_forever_without_conditions() {
        let mut t = base_task();
        t.started_at = Some(Utc::now() - chrono::Duration::days(2));
        assert!(!should_stop(&t, Utc::now()));
    }
}
