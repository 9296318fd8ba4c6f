//! SQLite persistence layer.
//!
//! One `Store` over a single-connection pool; SQLite serializes readers and
//! writers there. Entity operations live in submodules:
//! - `agents` - agent registry records
//! - `tasks` - task records and status transitions
//! - `metrics` - task metric samples and bandwidth samples
//! - `profiles` - traffic profiles
//! - `provision` - provisioning jobs and credentials

mod agents;
mod metrics;
mod profiles;
mod provision;
mod tasks;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (or creates) the database and runs migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(dsn)
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        info!("store ready: {}", dsn);
        Ok(store)
    }

    /// Exposes the pool for integration test queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        let stmts = [
            "PRAGMA journal_mode=WAL",
            "PRAGMA foreign_keys=ON",
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                hostname TEXT NOT NULL DEFAULT '',
                ip TEXT NOT NULL DEFAULT '',
                port INTEGER NOT NULL DEFAULT 0,
                token TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'offline',
                version TEXT NOT NULL DEFAULT '',
                current_rate_mbps REAL NOT NULL DEFAULT 0,
                last_heartbeat DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT 'static',
                target_url TEXT NOT NULL DEFAULT '',
                agent_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                target_rate_mbps REAL NOT NULL DEFAULT 0,
                start_at DATETIME,
                end_at DATETIME,
                duration_sec INTEGER NOT NULL DEFAULT 0,
                total_bytes_target INTEGER NOT NULL DEFAULT 0,
                total_requests_target INTEGER NOT NULL DEFAULT 0,
                dispatch_rate_tpm INTEGER NOT NULL DEFAULT 0,
                dispatch_batch_size INTEGER NOT NULL DEFAULT 1,
                distribution TEXT NOT NULL DEFAULT 'flat',
                jitter_pct REAL NOT NULL DEFAULT 0,
                ramp_up_sec INTEGER NOT NULL DEFAULT 0,
                ramp_down_sec INTEGER NOT NULL DEFAULT 0,
                traffic_profile_id TEXT NOT NULL DEFAULT '',
                concurrent_fragments INTEGER NOT NULL DEFAULT 1,
                retries INTEGER NOT NULL DEFAULT 3,
                total_bytes_done INTEGER NOT NULL DEFAULT 0,
                error_message TEXT NOT NULL DEFAULT '',
                dispatched_at DATETIME,
                started_at DATETIME,
                finished_at DATETIME,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS task_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                bytes_delta INTEGER NOT NULL DEFAULT 0,
                rate_mbps_5s REAL NOT NULL DEFAULT 0,
                rate_mbps_30s REAL NOT NULL DEFAULT 0,
                request_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                recorded_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_task_metrics_task_id ON task_metrics(task_id, recorded_at)",
            r#"
            CREATE TABLE IF NOT EXISTS traffic_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                distribution TEXT NOT NULL DEFAULT 'flat',
                points TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS provision_jobs (
                id TEXT PRIMARY KEY,
                host_ip TEXT NOT NULL DEFAULT '',
                ssh_port INTEGER NOT NULL DEFAULT 22,
                ssh_user TEXT NOT NULL DEFAULT '',
                auth_type TEXT NOT NULL DEFAULT 'key',
                credential_ref TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                current_step TEXT NOT NULL DEFAULT '',
                log TEXT NOT NULL DEFAULT '',
                agent_id TEXT NOT NULL DEFAULT '',
                failed_step TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bandwidth_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                rate_mbps REAL NOT NULL DEFAULT 0,
                recorded_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_bandwidth_agent_time ON bandwidth_samples(agent_id, recorded_at)",
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT 'key',
                payload TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        ];
        for stmt in stmts {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}
