//! Traffic profile records.

use anyhow::Result;
use ngoogle_common::model::{Distribution, TrafficProfile};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Store;

fn row_to_profile(row: &SqliteRow) -> Result<TrafficProfile> {
    let distribution: String = row.try_get("distribution")?;
    Ok(TrafficProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        distribution: Distribution::from(distribution.as_str()),
        points: row.try_get("points")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn create_profile(&self, p: &TrafficProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO traffic_profiles (id, name, description, distribution, points, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&p.id)
        .bind(&p.name)
        .bind(&p.description)
        .bind(p.distribution.as_str())
        .bind(&p.points)
        .bind(p.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<TrafficProfile>> {
        let row = sqlx::query("SELECT * FROM traffic_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    pub async fn list_profiles(&self) -> Result<Vec<TrafficProfile>> {
        let rows = sqlx::query("SELECT * FROM traffic_profiles ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_profile).collect()
    }
}
