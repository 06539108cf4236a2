use anyhow::Result;
use sqlx::{Pool, Row, Sqlite};

use crate::models::*;
use super::row_helpers::map_used_ip_pair_row;

/// A used-ASN row: (device_id, role, asn)
pub type AsnEntry = (i64, String, u64);

/// A used-IP row: (device_id, ip_type, ip_address)
pub type IpEntry = (i64, String, String);

/// Used-resource ledger operations
pub struct LedgerRepo;

impl LedgerRepo {
    pub async fn list_asns(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<AsnEntry>> {
        let rows = sqlx::query("SELECT device_id, role, asn FROM used_asns WHERE fabric_id = ? ORDER BY asn")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("device_id"), r.get("role"), r.get::<i64, _>("asn") as u64))
            .collect())
    }

    pub async fn get_asn(pool: &Pool<Sqlite>, device_id: i64) -> Result<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT asn FROM used_asns WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|(asn,)| asn as u64))
    }

    pub async fn set_asn(pool: &Pool<Sqlite>, fabric_id: i64, device_id: i64, role: &str, asn: u64) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO used_asns (fabric_id, device_id, role, asn) VALUES (?, ?, ?, ?)
               ON CONFLICT(device_id) DO UPDATE SET role = excluded.role, asn = excluded.asn"#,
        )
        .bind(fabric_id)
        .bind(device_id)
        .bind(role)
        .bind(asn as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn release_asn(pool: &Pool<Sqlite>, device_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM used_asns WHERE device_id = ?")
            .bind(device_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_ips(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<IpEntry>> {
        let rows = sqlx::query("SELECT device_id, ip_type, ip_address FROM used_ips WHERE fabric_id = ?")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("device_id"), r.get("ip_type"), r.get("ip_address")))
            .collect())
    }

    pub async fn get_ip(pool: &Pool<Sqlite>, device_id: i64, ip_type: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT ip_address FROM used_ips WHERE device_id = ? AND ip_type = ?")
                .bind(device_id)
                .bind(ip_type)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(ip,)| ip))
    }

    pub async fn set_ip(pool: &Pool<Sqlite>, fabric_id: i64, device_id: i64, ip_type: &str, ip: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO used_ips (fabric_id, device_id, ip_type, ip_address) VALUES (?, ?, ?, ?)
               ON CONFLICT(device_id, ip_type) DO UPDATE SET ip_address = excluded.ip_address"#,
        )
        .bind(fabric_id)
        .bind(device_id)
        .bind(ip_type)
        .bind(ip)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn release_ip(pool: &Pool<Sqlite>, device_id: i64, ip_type: &str) -> Result<()> {
        sqlx::query("DELETE FROM used_ips WHERE device_id = ? AND ip_type = ?")
            .bind(device_id)
            .bind(ip_type)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_pairs(pool: &Pool<Sqlite>, fabric_id: i64, ip_type: &str) -> Result<Vec<UsedIpPair>> {
        let rows = sqlx::query("SELECT * FROM used_ip_pairs WHERE fabric_id = ? AND ip_type = ? ORDER BY id")
            .bind(fabric_id)
            .bind(ip_type)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_used_ip_pair_row).collect())
    }

    pub async fn insert_pair(pool: &Pool<Sqlite>, pair: &UsedIpPair) -> Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO used_ip_pairs
               (fabric_id, ip_type, ip_one, ip_two, device_one_id, device_two_id, interface_one_id, interface_two_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(pair.fabric_id)
        .bind(&pair.ip_type)
        .bind(&pair.ip_one)
        .bind(&pair.ip_two)
        .bind(pair.device_one_id)
        .bind(pair.device_two_id)
        .bind(pair.interface_one_id)
        .bind(pair.interface_two_id)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete_pair(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM used_ip_pairs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Free every ledger entry held by a device
    pub async fn release_device(pool: &Pool<Sqlite>, device_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM used_asns WHERE device_id = ?")
            .bind(device_id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM used_ips WHERE device_id = ?")
            .bind(device_id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM used_ip_pairs WHERE device_one_id = ? OR device_two_id = ?")
            .bind(device_id)
            .bind(device_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
