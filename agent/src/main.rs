//! ngoogle agent: registers with the master, then heartbeats and pulls
//! assigned tasks until shut down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod client;
mod executor;
mod reporter;
mod runner;

use client::MasterClient;
use runner::TaskRunner;

const REGISTER_BACKOFF: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const PULL_INTERVAL: Duration = Duration::from_secs(5);

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("ngoogle_agent=info".parse()?)
        .add_directive("reqwest=warn".parse()?);
    fmt().with_env_filter(env_filter).init();

    let master_url = env_or("MASTER_URL", "http://localhost:8080");
    let host_ip = match std::env::var("AGENT_HOST_IP") {
        Ok(ip) if !ip.is_empty() => ip,
        _ => detect_ip(),
    };
    let hostname = read_hostname().await;

    info!(master = %master_url, ip = %host_ip, "agent starting");

    let mut client = MasterClient::new(&master_url)?;

    // ── Register with retry ──────────────────────────────────────────────
    let root = CancellationToken::new();
    spawn_signal_handler(root.clone());

    loop {
        match client
            .register(&hostname, &host_ip, 0, env!("CARGO_PKG_VERSION"))
            .await
        {
            Ok(resp) => {
                info!(agent_id = %resp.id, "registered");
                break;
            }
            Err(e) => error!("register failed, retrying in 5s: {e}"),
        }
        tokio::select! {
            _ = root.cancelled() => return Ok(()),
            _ = tokio::time::sleep(REGISTER_BACKOFF) => {}
        }
    }

    let agent_id = client.agent_id().to_string();
    let client = Arc::new(client);
    let runner = Arc::new(TaskRunner::new(client.clone(), agent_id));

    // ── Heartbeat + pull loops ───────────────────────────────────────────
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut pull = tokio::time::interval(PULL_INTERVAL);

    loop {
        tokio::select! {
            _ = root.cancelled() => {
                info!("agent shutting down...");
                runner.shutdown().await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                if let Err(e) = client.heartbeat(runner.total_rate()).await {
                    error!("heartbeat failed: {e}");
                }
            }
            _ = pull.tick() => {
                runner.clone().pull(root.clone()).await;
            }
        }
    }
}

fn spawn_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
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
        root.cancel();
    });
}

async fn read_hostname() -> String {
    tokio::fs::read_to_string("/proc/sys/kernel/hostname")
        .await
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Best-effort local IP discovery: the address a UDP socket would use to
/// reach a public host. No packets are sent.
fn detect_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}
