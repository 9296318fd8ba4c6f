//! Agent registry records.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ngoogle_common::model::{Agent, AgentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;

fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let status: String = row.try_get("status")?;
    Ok(Agent {
        id: row.try_get("id")?,
        hostname: row.try_get("hostname")?,
        ip: row.try_get("ip")?,
        port: row.try_get("port")?,
        token: row.try_get("token")?,
        status: AgentStatus::from(status.as_str()),
        version: row.try_get("version")?,
        current_rate_mbps: row.try_get("current_rate_mbps")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn upsert_agent(&self, a: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents
                (id, hostname, ip, port, token, status, version,
                 current_rate_mbps, last_heartbeat, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hostname = excluded.hostname,
                ip = excluded.ip,
                port = excluded.port,
                token = excluded.token,
                status = excluded.status,
                version = excluded.version,
                current_rate_mbps = excluded.current_rate_mbps,
                last_heartbeat = excluded.last_heartbeat,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&a.id)
        .bind(&a.hostname)
        .bind(&a.ip)
        .bind(a.port)
        .bind(&a.token)
        .bind(a.status.as_str())
        .bind(&a.version)
        .bind(a.current_rate_mbps)
        .bind(a.last_heartbeat)
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_agent).collect()
    }

    pub async fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        heartbeat: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE agents SET status = ?, last_heartbeat = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(heartbeat)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_agent_rate(&self, id: &str, rate_mbps: f64) -> Result<()> {
        sqlx::query("UPDATE agents SET current_rate_mbps = ?, updated_at = ? WHERE id = ?")
            .bind(rate_mbps)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
