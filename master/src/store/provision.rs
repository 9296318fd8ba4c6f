//! Provisioning job and credential records.

use anyhow::Result;
use chrono::Utc;
use ngoogle_common::model::{AuthType, Credential, ProvisionJob, ProvisionStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;

fn row_to_job(row: &SqliteRow) -> Result<ProvisionJob> {
    let auth_type: String = row.try_get("auth_type")?;
    let status: String = row.try_get("status")?;
    Ok(ProvisionJob {
        id: row.try_get("id")?,
        host_ip: row.try_get("host_ip")?,
        ssh_port: row.try_get("ssh_port")?,
        ssh_user: row.try_get("ssh_user")?,
        auth_type: AuthType::from(auth_type.as_str()),
        credential_ref: row.try_get("credential_ref")?,
        status: ProvisionStatus::from(status.as_str()),
        current_step: row.try_get("current_step")?,
        log: row.try_get("log")?,
        agent_id: row.try_get("agent_id")?,
        failed_step: row.try_get("failed_step")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_credential(row: &SqliteRow) -> Result<Credential> {
    let auth_type: String = row.try_get("type")?;
    Ok(Credential {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        auth_type: AuthType::from(auth_type.as_str()),
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_provision_job(&self, j: &ProvisionJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provision_jobs
                (id, host_ip, ssh_port, ssh_user, auth_type, credential_ref,
                 status, current_step, log, agent_id, failed_step,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&j.id)
        .bind(&j.host_ip)
        .bind(j.ssh_port)
        .bind(&j.ssh_user)
        .bind(j.auth_type.as_str())
        .bind(&j.credential_ref)
        .bind(j.status.as_str())
        .bind(&j.current_step)
        .bind(&j.log)
        .bind(&j.agent_id)
        .bind(&j.failed_step)
        .bind(j.created_at)
        .bind(j.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_provision_job(&self, id: &str) -> Result<Option<ProvisionJob>> {
        let row = sqlx::query("SELECT * FROM provision_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn list_provision_jobs(&self) -> Result<Vec<ProvisionJob>> {
        let rows = sqlx::query("SELECT * FROM provision_jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// True when any job for the host is still pending or running.
    pub async fn has_active_provision_job(&self, host_ip: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM provision_jobs \
             WHERE host_ip = ? AND status IN ('pending', 'running')",
        )
        .bind(host_ip)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn update_provision_status(
        &self,
        id: &str,
        status: ProvisionStatus,
        step: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE provision_jobs SET status = ?, current_step = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(step)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_provision_log(&self, id: &str, line: &str) -> Result<()> {
        sqlx::query(
            "UPDATE provision_jobs \
             SET log = log || ? || char(10), updated_at = ? WHERE id = ?",
        )
        .bind(line)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_provision_agent(&self, id: &str, agent_id: &str) -> Result<()> {
        sqlx::query("UPDATE provision_jobs SET agent_id = ?, updated_at = ? WHERE id = ?")
            .bind(agent_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_provision_failed(&self, id: &str, step: &str) -> Result<()> {
        sqlx::query(
            "UPDATE provision_jobs \
             SET status = 'failed', failed_step = ?, current_step = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(step)
        .bind(step)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retry reset: back to pending with a clean log and cleared outcome.
    pub async fn reset_provision_job(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE provision_jobs \
             SET status = 'pending', current_step = 'created', log = '', \
                 agent_id = '', failed_step = '', updated_at = ? \
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_provision_job(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM provision_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    pub async fn create_credential(&self, c: &Credential) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (id, name, type, payload, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&c.id)
        .bind(&c.name)
        .bind(c.auth_type.as_str())
        .bind(&c.payload)
        .bind(c.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_credential(&self, id: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_credential).transpose()
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>> {
        let rows = sqlx::query("SELECT * FROM credentials ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_credential).collect()
    }

    pub async fn delete_credential(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
