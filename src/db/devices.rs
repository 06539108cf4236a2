use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::{map_device_row, map_rack_row};

const SELECT_DEVICE: &str = r#"
    SELECT id, fabric_id, ip_address, user_name, password, role,
           model, firmware, hostname, created_at, updated_at
    FROM devices
"#;

/// Device database operations
pub struct DeviceRepo;

impl DeviceRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!("{} WHERE fabric_id = ? ORDER BY ip_address", SELECT_DEVICE))
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_device_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_DEVICE))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_device_row))
    }

    pub async fn get_by_ip(pool: &Pool<Sqlite>, ip: &str) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE ip_address = ?", SELECT_DEVICE))
            .bind(ip)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_device_row))
    }

    /// Insert the device or refresh its role and credentials
    pub async fn upsert(
        pool: &Pool<Sqlite>,
        fabric_id: i64,
        ip: &str,
        user_name: &str,
        password: &str,
        role: &str,
    ) -> Result<Device> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO devices (fabric_id, ip_address, user_name, password, role, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(ip_address) DO UPDATE SET
                   user_name = excluded.user_name,
                   password = excluded.password,
                   role = excluded.role,
                   updated_at = excluded.updated_at"#,
        )
        .bind(fabric_id)
        .bind(ip)
        .bind(user_name)
        .bind(password)
        .bind(role)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get_by_ip(pool, ip)
            .await?
            .context("Device not found after creation")
    }

    pub async fn update_detail(pool: &Pool<Sqlite>, id: i64, detail: &DeviceDetail) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET model = ?, firmware = ?, hostname = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&detail.model)
        .bind(&detail.firmware)
        .bind(&detail.hostname)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }
        Ok(())
    }

    /// Delete the device; every derived row cascades with it
    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }
        Ok(())
    }
}

/// Rack database operations
pub struct RackRepo;

impl RackRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<Rack>> {
        let rows = sqlx::query("SELECT * FROM racks WHERE fabric_id = ? ORDER BY id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_rack_row).collect())
    }

    pub async fn create(
        pool: &Pool<Sqlite>,
        fabric_id: i64,
        one: &Device,
        two: &Device,
    ) -> Result<Rack> {
        let result = sqlx::query(
            r#"INSERT INTO racks (fabric_id, ip_one, device_one_id, ip_two, device_two_id)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(fabric_id)
        .bind(&one.ip_address)
        .bind(one.id)
        .bind(&two.ip_address)
        .bind(two.id)
        .execute(pool)
        .await?;

        let row = sqlx::query("SELECT * FROM racks WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_optional(pool)
            .await?
            .context("Rack not found after creation")?;
        Ok(map_rack_row(&row))
    }
}
