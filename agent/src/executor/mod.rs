//! Task executors.
//!
//! Both executors stop cleanly (`Ok`) on deadline or cancellation and only
//! return an error when the task itself is unusable (e.g. empty URL).

pub mod static_dl;
pub mod youtube;

use chrono::{DateTime, Duration, Utc};
use ngoogle_common::model::Task;

/// When a task must stop executing: its `end_at`, else `started_at` plus the
/// duration, else one hour from start.
pub fn compute_end_time(task: &Task, started_at: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(end_at) = task.end_at {
        return end_at;
    }
    if task.duration_sec > 0 {
        return started_at + Duration::seconds(task.duration_sec);
    }
    started_at + Duration::hours(1)
}

/// Elapsed runtime used by the shape curve: wall-clock against the task's
/// recorded start, falling back to the local start.
pub fn task_elapsed(task: &Task, local_start: DateTime<Utc>) -> std::time::Duration {
    let started = task.started_at.unwrap_or(local_start);
    (Utc::now() - started).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngoogle_common::model::{Distribution, TaskStatus, TaskType};

    fn task() -> Task {
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
    fn end_time_prefers_end_at() {
        let mut t = task();
        let start = Utc::now();
        let end = start + Duration::minutes(5);
        t.end_at = Some(end);
        t.duration_sec = 9999;
        assert_eq!(compute_end_time(&t, start), end);
    }

    #[test]
    fn end_time_from_duration() {
        let mut t = task();
        let start = Utc::now();
        t.duration_sec = 120;
        assert_eq!(compute_end_time(&t, start), start + Duration::seconds(120));
    }

    #[test]
    fn end_time_defaults_to_one_hour() {
        let t = task();
        let start = Utc::now();
        assert_eq!(compute_end_time(&t, start), start + Duration::hours(1));
    }
}
