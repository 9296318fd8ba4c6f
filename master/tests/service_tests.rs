//! Service-level behavior tests: registry, task lifecycle, dashboard,
//! provisioning guards.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ngoogle_common::model::*;
use ngoogle_master::errors::ApiError;
use ngoogle_master::provision::{CredentialRequest, JobRequest, ProvisionService};
use ngoogle_master::services::tasks::CreateTaskRequest;
use ngoogle_master::services::{AgentService, DashboardService, TaskService};
use ngoogle_master::Store;

async fn test_store() -> Arc<Store> {
    Arc::new(Store::connect("sqlite::memory:").await.unwrap())
}

fn create_req(url: &str) -> CreateTaskRequest {
    serde_json::from_value(serde_json::json!({
        "type": "static",
        "target_url": url,
        "agent_id": "a1",
        "target_rate_mbps": 10.0,
    }))
    .unwrap()
}

#[tokio::test]
async fn register_creates_then_rotates_token() {
    let svc = AgentService::new(test_store().await);

    let first = svc.register("host-a", "10.0.0.1", 0, "1.0.0").await.unwrap();
    assert_eq!(first.status, AgentStatus::Online);
    assert_eq!(first.token.len(), 64);

    let second = svc.register("host-a", "10.0.0.1", 0, "1.0.1").await.unwrap();
    assert_eq!(second.id, first.id, "same (hostname, ip) is the same agent");
    assert_ne!(second.token, first.token, "re-register rotates the token");
    assert_eq!(second.version, "1.0.1");

    let other = svc.register("host-b", "10.0.0.2", 0, "1.0.0").await.unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn heartbeat_requires_matching_token() {
    let store = test_store().await;
    let svc = AgentService::new(store.clone());
    let agent = svc.register("host-a", "10.0.0.1", 0, "1.0.0").await.unwrap();

    let err = svc.heartbeat(&agent.id, "wrong-token", 5.0).await;
    assert!(matches!(err, Err(ApiError::Unauthorized)));

    let err = svc.heartbeat("no-such-agent", &agent.token, 5.0).await;
    assert!(matches!(err, Err(ApiError::Unauthorized)));

    svc.heartbeat(&agent.id, &agent.token, 42.5).await.unwrap();
    let got = svc.get(&agent.id).await.unwrap();
    assert_eq!(got.current_rate_mbps, 42.5);

    // a bandwidth sample was recorded
    let samples = store
        .bandwidth_history(&agent.id, Utc::now() - Duration::minutes(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].rate_mbps, 42.5);
}

#[tokio::test]
async fn offline_sweep_marks_stale_agents() {
    let store = test_store().await;
    let svc = AgentService::new(store.clone());
    let agent = svc.register("host-a", "10.0.0.1", 0, "1.0.0").await.unwrap();

    // age the heartbeat past the 30s timeout
    let stale = Utc::now() - Duration::seconds(45);
    store
        .update_agent_status(&agent.id, AgentStatus::Online, stale)
        .await
        .unwrap();

    svc.sweep_offline().await.unwrap();
    let got = svc.get(&agent.id).await.unwrap();
    assert_eq!(got.status, AgentStatus::Offline);
    // last_heartbeat is kept for diagnostics
    assert!((got.last_heartbeat - stale).num_seconds().abs() <= 1);
}

#[tokio::test]
async fn task_create_validates_and_defaults() {
    let svc = TaskService::new(test_store().await);

    let err = svc.create(create_req("")).await;
    assert!(matches!(err, Err(ApiError::Validation(_))));

    let task = svc.create(create_req("https://example.com")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.distribution, Distribution::Flat);
    assert_eq!(task.dispatch_batch_size, 1);
    assert_eq!(task.retries, 3);
    assert_eq!(task.concurrent_fragments, 1);
}

#[tokio::test]
async fn dispatch_requires_pending() {
    let svc = TaskService::new(test_store().await);
    let task = svc.create(create_req("https://example.com")).await.unwrap();

    svc.dispatch(&task.id).await.unwrap();
    let got = svc.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Dispatched);
    assert!(got.dispatched_at.is_some());

    // dispatching twice is rejected
    let err = svc.dispatch(&task.id).await;
    assert!(matches!(err, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn terminal_statuses_are_absorbing() {
    let svc = TaskService::new(test_store().await);
    let task = svc.create(create_req("https://example.com")).await.unwrap();

    svc.stop(&task.id).await.unwrap();
    let got = svc.get(&task.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Stopped);
    assert!(got.finished_at.is_some());

    // no transition leaves a terminal status through the service
    assert!(matches!(svc.stop(&task.id).await, Err(ApiError::Validation(_))));
    assert!(matches!(svc.dispatch(&task.id).await, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn mark_transitions_set_their_timestamps() {
    let svc = TaskService::new(test_store().await);

    let t = svc.create(create_req("https://example.com")).await.unwrap();
    svc.mark_running(&t.id).await.unwrap();
    let got = svc.get(&t.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Running);
    assert!(got.started_at.is_some());

    svc.mark_done(&t.id).await.unwrap();
    let got = svc.get(&t.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Done);
    assert!(got.finished_at.is_some());

    let t2 = svc.create(create_req("https://example.com/2")).await.unwrap();
    svc.mark_failed(&t2.id, "target unreachable").await.unwrap();
    let got = svc.get(&t2.id).await.unwrap();
    assert_eq!(got.status, TaskStatus::Failed);
    assert_eq!(got.error_message, "target unreachable");
    assert!(got.finished_at.is_some());
}

#[tokio::test]
async fn record_metrics_updates_task_bytes_monotonically() {
    let svc = TaskService::new(test_store().await);
    let task = svc.create(create_req("https://example.com")).await.unwrap();

    let mut m = TaskMetrics {
        task_id: task.id.clone(),
        agent_id: "a1".into(),
        bytes_total: 1000,
        ..Default::default()
    };
    svc.record_metrics(m.clone()).await.unwrap();
    m.bytes_total = 400; // out-of-order sample
    svc.record_metrics(m.clone()).await.unwrap();

    let got = svc.get(&task.id).await.unwrap();
    assert_eq!(got.total_bytes_done, 1000);

    let samples = svc
        .metrics(&task.id, Utc::now() - Duration::minutes(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(samples.len(), 2);
}

#[tokio::test]
async fn pull_returns_only_active_work() {
    let store = test_store().await;
    let svc = TaskService::new(store.clone());

    let dispatched = svc.create(create_req("https://example.com/a")).await.unwrap();
    svc.dispatch(&dispatched.id).await.unwrap();

    let pending = svc.create(create_req("https://example.com/b")).await.unwrap();
    let stopped = svc.create(create_req("https://example.com/c")).await.unwrap();
    svc.stop(&stopped.id).await.unwrap();

    let pulled = svc.pull_tasks("a1").await.unwrap();
    let ids: Vec<&str> = pulled.iter().map(|t| t.id.as_str()).collect();
    assert!(ids.contains(&dispatched.id.as_str()));
    assert!(!ids.contains(&pending.id.as_str()));
    assert!(!ids.contains(&stopped.id.as_str()));
}

#[tokio::test]
async fn dashboard_overview_counts_fleet() {
    let store = test_store().await;
    let agents = AgentService::new(store.clone());
    let tasks = TaskService::new(store.clone());
    let dashboard = DashboardService::new(store.clone());

    let a1 = agents.register("host-a", "10.0.0.1", 0, "1").await.unwrap();
    let a2 = agents.register("host-b", "10.0.0.2", 0, "1").await.unwrap();
    agents.heartbeat(&a1.id, &a1.token, 30.0).await.unwrap();
    agents.heartbeat(&a2.id, &a2.token, 12.5).await.unwrap();
    // a2 goes offline: its rate must not count toward the total
    store
        .update_agent_status(&a2.id, AgentStatus::Offline, Utc::now())
        .await
        .unwrap();

    let t = tasks.create(create_req("https://example.com")).await.unwrap();
    tasks.mark_running(&t.id).await.unwrap();
    let _ = tasks.create(create_req("https://example.com/2")).await.unwrap();

    let overview = dashboard.overview().await.unwrap();
    assert_eq!(overview.total_agents, 2);
    assert_eq!(overview.online_agents, 1);
    assert_eq!(overview.total_tasks, 2);
    assert_eq!(overview.running_tasks, 1);
    assert_eq!(overview.total_rate_mbps, 30.0);
    assert_eq!(overview.agents.len(), 2);
}

#[tokio::test]
async fn provision_start_guards_duplicate_hosts() {
    let store = test_store().await;
    let agents = AgentService::new(store.clone());
    let provision = Arc::new(ProvisionService::new(
        store.clone(),
        "http://master:8080".into(),
        "http://master:8080/bin/{arch}".into(),
    ));

    let cred = provision
        .create_credential(CredentialRequest {
            name: "key".into(),
            auth_type: AuthType::Password,
            payload: "secret".into(),
        })
        .await
        .unwrap();

    // an existing agent with the same IP blocks provisioning
    agents.register("host-a", "10.0.0.1", 0, "1").await.unwrap();
    let err = provision
        .start(JobRequest {
            host_ip: "10.0.0.1".into(),
            ssh_port: 0,
            ssh_user: "root".into(),
            auth_type: AuthType::Password,
            credential_ref: cred.id.clone(),
        })
        .await;
    assert!(matches!(err, Err(ApiError::Conflict(_))));

    // missing fields are rejected up front
    let err = provision
        .start(JobRequest {
            host_ip: String::new(),
            ssh_port: 22,
            ssh_user: "root".into(),
            auth_type: AuthType::Password,
            credential_ref: cred.id.clone(),
        })
        .await;
    assert!(matches!(err, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn provision_failure_and_retry_reset() {
    let store = test_store().await;
    let provision = Arc::new(ProvisionService::new(
        store.clone(),
        "http://master:8080".into(),
        "http://master:8080/bin/{arch}".into(),
    ));

    let cred = provision
        .create_credential(CredentialRequest {
            name: "pw".into(),
            auth_type: AuthType::Password,
            payload: "secret".into(),
        })
        .await
        .unwrap();

    // port 1 on localhost refuses immediately -> ssh_check fails
    let job = provision
        .start(JobRequest {
            host_ip: "127.0.0.1".into(),
            ssh_port: 1,
            ssh_user: "root".into(),
            auth_type: AuthType::Password,
            credential_ref: cred.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(job.status, ProvisionStatus::Pending);

    // a second job for the same host is blocked while this one is active
    let err = provision
        .start(JobRequest {
            host_ip: "127.0.0.1".into(),
            ssh_port: 1,
            ssh_user: "root".into(),
            auth_type: AuthType::Password,
            credential_ref: cred.id,
        })
        .await;
    assert!(matches!(err, Err(ApiError::Conflict(_))));

    // wait for the async worker to park the job in failed(ssh_check)
    let mut failed = None;
    for _ in 0..100 {
        let got = provision.get(&job.id).await.unwrap();
        if got.status == ProvisionStatus::Failed {
            failed = Some(got);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let failed = failed.expect("job should fail fast against a closed port");
    assert_eq!(failed.failed_step, "ssh_check");
    assert!(failed.log.contains("[FAIL]"));

    // retry resets the job before the worker runs again
    let retried = provision.retry(&job.id).await.unwrap();
    assert!(
        retried.status == ProvisionStatus::Pending
            || retried.status == ProvisionStatus::Running
            || retried.status == ProvisionStatus::Failed
    );
    let fresh_attempt = provision.get(&job.id).await.unwrap();
    assert!(fresh_attempt.agent_id.is_empty());

    // only failed jobs can be retried: wait until terminal, then flip to
    // success-like state manually and confirm rejection
    for _ in 0..100 {
        if provision.get(&job.id).await.unwrap().status == ProvisionStatus::Failed {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    store
        .update_provision_status(&job.id, ProvisionStatus::Success, "done")
        .await
        .unwrap();
    let err = provision.retry(&job.id).await;
    assert!(matches!(err, Err(ApiError::Validation(_))));
}
