//! Task metric samples and bandwidth samples. Both are append-only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ngoogle_common::model::{BandwidthPoint, BandwidthSample, TaskMetrics};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;

fn row_to_metrics(row: &SqliteRow) -> Result<TaskMetrics> {
    Ok(TaskMetrics {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        agent_id: row.try_get("agent_id")?,
        bytes_total: row.try_get("bytes_total")?,
        bytes_delta: row.try_get("bytes_delta")?,
        rate_mbps_5s: row.try_get("rate_mbps_5s")?,
        rate_mbps_30s: row.try_get("rate_mbps_30s")?,
        request_count: row.try_get("request_count")?,
        error_count: row.try_get("error_count")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

impl Store {
    pub async fn insert_task_metrics(&self, m: &TaskMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_metrics
                (task_id, agent_id, bytes_total, bytes_delta, rate_mbps_5s,
                 rate_mbps_30s, request_count, error_count, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&m.task_id)
        .bind(&m.agent_id)
        .bind(m.bytes_total)
        .bind(m.bytes_delta)
        .bind(m.rate_mbps_5s)
        .bind(m.rate_mbps_30s)
        .bind(m.request_count)
        .bind(m.error_count)
        .bind(m.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_task_metrics(
        &self,
        task_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskMetrics>> {
        let rows = sqlx::query(
            "SELECT * FROM task_metrics \
             WHERE task_id = ? AND recorded_at BETWEEN ? AND ? \
             ORDER BY recorded_at ASC",
        )
        .bind(task_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_metrics).collect()
    }

    pub async fn latest_task_metrics(&self, task_id: &str) -> Result<Option<TaskMetrics>> {
        let row = sqlx::query(
            "SELECT * FROM task_metrics WHERE task_id = ? ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_metrics).transpose()
    }

    // ========================================================================
    // Bandwidth samples
    // ========================================================================

    pub async fn insert_bandwidth_sample(&self, s: &BandwidthSample) -> Result<()> {
        sqlx::query("INSERT INTO bandwidth_samples (agent_id, rate_mbps, recorded_at) VALUES (?, ?, ?)")
            .bind(&s.agent_id)
            .bind(s.rate_mbps)
            .bind(s.recorded_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bandwidth_history(
        &self,
        agent_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BandwidthSample>> {
        let rows = sqlx::query(
            "SELECT * FROM bandwidth_samples \
             WHERE agent_id = ? AND recorded_at BETWEEN ? AND ? \
             ORDER BY recorded_at ASC",
        )
        .bind(agent_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(BandwidthSample {
                    id: row.try_get("id")?,
                    agent_id: row.try_get("agent_id")?,
                    rate_mbps: row.try_get("rate_mbps")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }

    /// Buckets samples by floor-division of the unix timestamp into
    /// `step_sec`-wide buckets, ascending.
    pub async fn aggregate_bandwidth_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step_sec: i64,
    ) -> Result<Vec<BandwidthPoint>> {
        let step_sec = step_sec.max(1);
        let rows = sqlx::query(
            r#"
            SELECT
                (CAST(strftime('%s', recorded_at) AS INTEGER) / ?1) * ?1 AS bucket,
                AVG(rate_mbps) AS avg_mbps,
                MAX(rate_mbps) AS max_mbps
            FROM bandwidth_samples
            WHERE recorded_at BETWEEN ?2 AND ?3
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )
        .bind(step_sec)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let bucket: i64 = row.try_get("bucket")?;
                Ok(BandwidthPoint {
                    ts: DateTime::from_timestamp(bucket, 0).unwrap_or_default(),
                    avg_mbps: row.try_get("avg_mbps")?,
                    max_mbps: row.try_get("max_mbps")?,
                })
            })
            .collect()
    }

    pub async fn purge_bandwidth_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query("DELETE FROM bandwidth_samples WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
