//! Task records and status transitions.
//!
//! Status transitions are single UPDATE statements, so they are linearizable
//! at this layer. Timestamp columns written alongside a transition are named
//! explicitly and validated against an allowlist.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use ngoogle_common::model::{Distribution, Task, TaskStatus, TaskType};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let task_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let distribution: String = row.try_get("distribution")?;
    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        task_type: TaskType::from(task_type.as_str()),
        target_url: row.try_get("target_url")?,
        agent_id: row.try_get("agent_id")?,
        status: TaskStatus::from(status.as_str()),
        target_rate_mbps: row.try_get("target_rate_mbps")?,
        start_at: row.try_get("start_at")?,
        end_at: row.try_get("end_at")?,
        duration_sec: row.try_get("duration_sec")?,
        total_bytes_target: row.try_get("total_bytes_target")?,
        total_requests_target: row.try_get("total_requests_target")?,
        dispatch_rate_tpm: row.try_get("dispatch_rate_tpm")?,
        dispatch_batch_size: row.try_get("dispatch_batch_size")?,
        distribution: Distribution::from(distribution.as_str()),
        jitter_pct: row.try_get("jitter_pct")?,
        ramp_up_sec: row.try_get("ramp_up_sec")?,
        ramp_down_sec: row.try_get("ramp_down_sec")?,
        traffic_profile_id: row.try_get("traffic_profile_id")?,
        concurrent_fragments: row.try_get("concurrent_fragments")?,
        retries: row.try_get("retries")?,
        total_bytes_done: row.try_get("total_bytes_done")?,
        error_message: row.try_get("error_message")?,
        dispatched_at: row.try_get("dispatched_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    pub async fn create_task(&self, t: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, type, target_url, agent_id, status, target_rate_mbps,
                 start_at, end_at, duration_sec, total_bytes_target,
                 total_requests_target, dispatch_rate_tpm, dispatch_batch_size,
                 distribution, jitter_pct, ramp_up_sec, ramp_down_sec,
                 traffic_profile_id, concurrent_fragments, retries,
                 total_bytes_done, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&t.id)
        .bind(&t.name)
        .bind(t.task_type.as_str())
        .bind(&t.target_url)
        .bind(&t.agent_id)
        .bind(t.status.as_str())
        .bind(t.target_rate_mbps)
        .bind(t.start_at)
        .bind(t.end_at)
        .bind(t.duration_sec)
        .bind(t.total_bytes_target)
        .bind(t.total_requests_target)
        .bind(t.dispatch_rate_tpm)
        .bind(t.dispatch_batch_size)
        .bind(t.distribution.as_str())
        .bind(t.jitter_pct)
        .bind(t.ramp_up_sec)
        .bind(t.ramp_down_sec)
        .bind(&t.traffic_profile_id)
        .bind(t.concurrent_fragments)
        .bind(t.retries)
        .bind(t.total_bytes_done)
        .bind(&t.error_message)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn list_tasks_by_agent(
        &self,
        agent_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(",");
        let sql = format!(
            "SELECT * FROM tasks WHERE agent_id = ? AND status IN ({placeholders}) \
             ORDER BY created_at ASC"
        );
        let mut query = sqlx::query(&sql).bind(agent_id);
        for s in statuses {
            query = query.bind(s.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    /// Transitions status and stamps the named timestamp column in the same
    /// statement.
    pub async fn update_task_status_at(
        &self,
        id: &str,
        status: TaskStatus,
        ts: DateTime<Utc>,
        ts_field: &str,
    ) -> Result<()> {
        if !matches!(ts_field, "dispatched_at" | "started_at" | "finished_at") {
            bail!("unknown task timestamp field: {ts_field}");
        }
        let sql =
            format!("UPDATE tasks SET status = ?, {ts_field} = ?, updated_at = ? WHERE id = ?");
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(ts)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Updates `total_bytes_done` monotonically: stale reports never shrink
    /// the recorded progress.
    pub async fn update_task_bytes(&self, id: &str, bytes_total: i64) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET total_bytes_done = MAX(total_bytes_done, ?), updated_at = ? \
             WHERE id = ?",
        )
        .bind(bytes_total)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_task_error(&self, id: &str, msg: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(msg)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
