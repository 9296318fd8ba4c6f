//! ngoogle master: the central control plane. Holds fleet state, schedules
//! task lifecycles and provisions new agents over SSH.

use std::sync::Arc;

use anyhow::Result;
use ngoogle_master::provision::ProvisionService;
use ngoogle_master::scheduler::Scheduler;
use ngoogle_master::services::{AgentService, DashboardService, TaskService};
use ngoogle_master::web::{server, AppState};
use ngoogle_master::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("ngoogle_master=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);
    fmt().with_env_filter(env_filter).init();

    let addr = env_or("MASTER_ADDR", ":8080");
    let dsn = env_or("SQLITE_DSN", "sqlite:master.db?mode=rwc");
    let master_url = env_or("MASTER_URL", "http://localhost:8080");
    // URL template for the agent binary; {arch} is substituted per host.
    let agent_bin_url = env_or("AGENT_BIN_PATH", "");

    let store = Arc::new(Store::connect(&dsn).await?);

    let agents = Arc::new(AgentService::new(store.clone()));
    let tasks = Arc::new(TaskService::new(store.clone()));
    let dashboard = Arc::new(DashboardService::new(store.clone()));
    let provision = Arc::new(ProvisionService::new(
        store.clone(),
        master_url,
        agent_bin_url,
    ));
    let scheduler = Arc::new(Scheduler::new(store.clone()));

    // Background loops, all cancelled through the process root token.
    let root = CancellationToken::new();
    tokio::spawn(scheduler.run(root.child_token()));
    tokio::spawn(agents.clone().run_offline_sweep(root.child_token()));
    tokio::spawn(dashboard.clone().run_purge(root.child_token()));

    let state = AppState::new(store, agents, tasks, dashboard, provision);
    let app = server::create_router(state);

    // ":8080" means all interfaces
    let bind_addr = if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr
    };
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("master listening on http://{bind_addr}");

    let shutdown_root = root.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutting down...");
        shutdown_root.cancel();
    });

    // Drain in-flight requests for at most 10 s after the signal.
    tokio::select! {
        res = server => res?,
        _ = async {
            root.cancelled().await;
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        } => {
            warn!("graceful shutdown timed out, exiting");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
