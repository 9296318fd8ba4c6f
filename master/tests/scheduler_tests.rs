//! Scheduler tick behavior against a live store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ngoogle_common::model::*;
use ngoogle_master::scheduler::Scheduler;
use ngoogle_master::services::tasks::CreateTaskRequest;
use ngoogle_master::services::TaskService;
use ngoogle_master::Store;

async fn setup() -> (Arc<Store>, TaskService, Scheduler) {
    let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
    let tasks = TaskService::new(store.clone());
    let scheduler = Scheduler::new(store.clone());
    (store, tasks, scheduler)
}

fn create_req(extra: serde_json::Value) -> CreateTaskRequest {
    let mut base = serde_json::json!({
        "type": "static",
        "target_url": "https://example.com",
        "agent_id": "a1",
        "target_rate_mbps": 10.0,
    });
    base.as_object_mut()
        .unwrap()
        .extend(extra.as_object().unwrap().clone());
    serde_json::from_value(base).unwrap()
}

#[tokio::test]
async fn tick_starts_due_tasks() {
    let (_store, tasks, scheduler) = setup().await;
    let task = tasks.create(create_req(serde_json::json!({}))).await.unwrap();
    tasks.dispatch(&task.id).await.unwrap();

    scheduler.tick().await;

    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Running);
    assert!(got.started_at.is_some());
}

#[tokio::test]
async fn tick_starts_pending_tasks_without_dispatch() {
    let (_store, tasks, scheduler) = setup().await;
    let task = tasks.create(create_req(serde_json::json!({}))).await.unwrap();

    scheduler.tick().await;
    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Running);
}

#[tokio::test]
async fn tick_respects_future_start_at() {
    let (_store, tasks, scheduler) = setup().await;
    let start_at = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let task = tasks
        .create(create_req(serde_json::json!({ "start_at": start_at })))
        .await
        .unwrap();

    scheduler.tick().await;
    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Pending);
}

#[tokio::test]
async fn tick_stops_after_duration() {
    let (store, tasks, scheduler) = setup().await;
    let task = tasks
        .create(create_req(serde_json::json!({ "duration_sec": 60 })))
        .await
        .unwrap();
    // backdate the start past the duration window
    store
        .update_task_status_at(
            &task.id,
            TaskStatus::Running,
            Utc::now() - Duration::seconds(90),
            "started_at",
        )
        .await
        .unwrap();

    scheduler.tick().await;

    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Stopped);
    assert!(got.finished_at.is_some());
}

#[tokio::test]
async fn tick_stops_after_end_at() {
    let (store, tasks, scheduler) = setup().await;
    let end_at = (Utc::now() - Duration::seconds(5)).to_rfc3339();
    let task = tasks
        .create(create_req(serde_json::json!({ "end_at": end_at })))
        .await
        .unwrap();
    store
        .update_task_status_at(&task.id, TaskStatus::Running, Utc::now(), "started_at")
        .await
        .unwrap();

    scheduler.tick().await;
    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Stopped);
}

#[tokio::test]
async fn tick_stops_on_volume_target() {
    let (store, tasks, scheduler) = setup().await;
    let task = tasks
        .create(create_req(serde_json::json!({ "total_bytes_target": 1000 })))
        .await
        .unwrap();
    store
        .update_task_status_at(&task.id, TaskStatus::Running, Utc::now(), "started_at")
        .await
        .unwrap();
    store.update_task_bytes(&task.id, 1000).await.unwrap();

    scheduler.tick().await;
    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Stopped);
}

#[tokio::test]
async fn full_lifecycle_with_metrics() {
    let (store, tasks, scheduler) = setup().await;
    let task = tasks
        .create(create_req(serde_json::json!({ "duration_sec": 60 })))
        .await
        .unwrap();
    tasks.dispatch(&task.id).await.unwrap();

    // first tick: the agent's work begins
    scheduler.tick().await;
    let running = tasks.get(&task.id).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    let started_at = running.started_at.unwrap();

    // agent reports progress while executing
    tasks
        .record_metrics(TaskMetrics {
            task_id: task.id.clone(),
            agent_id: "a1".into(),
            bytes_total: 4_200_000,
            rate_mbps_5s: 9.8,
            rate_mbps_30s: 9.1,
            request_count: 3,
            ..Default::default()
        })
        .await
        .unwrap();

    // age the task past its duration; next tick stops it
    store
        .update_task_status_at(
            &task.id,
            TaskStatus::Running,
            started_at - Duration::seconds(61),
            "started_at",
        )
        .await
        .unwrap();
    scheduler.tick().await;

    let done = tasks.get(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Stopped);
    assert!(done.total_bytes_done > 0);
    assert!(done.finished_at.is_some());
    assert!(done.finished_at.unwrap() >= done.started_at.unwrap() - Duration::seconds(61));
}

#[tokio::test]
async fn tick_is_idempotent_on_terminal_tasks() {
    let (_store, tasks, scheduler) = setup().await;
    let task = tasks.create(create_req(serde_json::json!({}))).await.unwrap();
    tasks.stop(&task.id).await.unwrap();
    let stopped = tasks.get(&task.id).await.unwrap();

    scheduler.tick().await;
    scheduler.tick().await;

    let got = tasks.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Stopped);
    assert_eq!(got.finished_at, stopped.finished_at);
}
