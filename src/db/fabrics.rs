use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::{map_fabric_row, map_fabric_settings};

const SELECT_FABRIC: &str = r#"
    SELECT id, name, fabric_type, settings, created_at, updated_at
    FROM fabrics
"#;

/// Fabric database operations
pub struct FabricRepo;

impl FabricRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Fabric>> {
        let rows = sqlx::query(&format!("{} ORDER BY name", SELECT_FABRIC))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_fabric_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Fabric>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_FABRIC))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_fabric_row))
    }

    pub async fn get_by_name(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Fabric>> {
        let row = sqlx::query(&format!("{} WHERE name = ?", SELECT_FABRIC))
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_fabric_row))
    }

    pub async fn get_settings(pool: &Pool<Sqlite>, id: i64) -> Result<FabricSettings> {
        let row = sqlx::query("SELECT settings FROM fabrics WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| super::NotFoundError::new("Fabric", &id.to_string()))?;
        Ok(map_fabric_settings(&row))
    }

    pub async fn create(
        pool: &Pool<Sqlite>,
        name: &str,
        fabric_type: &str,
        settings: &FabricSettings,
    ) -> Result<Fabric> {
        let now = Utc::now();
        let data = serde_json::to_string(settings)?;
        let result = sqlx::query(
            r#"INSERT INTO fabrics (name, fabric_type, settings, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(name)
        .bind(fabric_type)
        .bind(&data)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, result.last_insert_rowid())
            .await?
            .context("Fabric not found after creation")
    }

    pub async fn update_settings(pool: &Pool<Sqlite>, id: i64, settings: &FabricSettings) -> Result<()> {
        let data = serde_json::to_string(settings)?;
        let result = sqlx::query("UPDATE fabrics SET settings = ?, updated_at = ? WHERE id = ?")
            .bind(&data)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Fabric", &id.to_string()).into());
        }
        Ok(())
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM fabrics WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Fabric", &id.to_string()).into());
        }
        Ok(())
    }
}
