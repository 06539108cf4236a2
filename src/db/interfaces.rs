use anyhow::Result;
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;

use crate::models::*;
use super::row_helpers::{map_interface_row, map_lldp_neighbor_row, map_lldp_record_row};

/// Discovered interface snapshot operations
pub struct InterfaceRepo;

impl InterfaceRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<Interface>> {
        let rows = sqlx::query("SELECT * FROM interfaces WHERE fabric_id = ? ORDER BY device_id, int_type, int_name")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_interface_row).collect())
    }

    pub async fn list_by_device(pool: &Pool<Sqlite>, device_id: i64) -> Result<Vec<Interface>> {
        let rows = sqlx::query("SELECT * FROM interfaces WHERE device_id = ? ORDER BY int_type, int_name")
            .bind(device_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_interface_row).collect())
    }

    /// Replace a device's snapshot, keeping row ids of interfaces that are
    /// still reported so ledger keys survive rediscovery
    pub async fn sync(
        pool: &Pool<Sqlite>,
        fabric_id: i64,
        device_id: i64,
        discovered: &[DiscoveredInterface],
    ) -> Result<Vec<Interface>> {
        let mut seen = HashSet::new();
        for intf in discovered {
            seen.insert((intf.int_type.clone(), intf.int_name.clone()));
            sqlx::query(
                r#"INSERT INTO interfaces (fabric_id, device_id, int_type, int_name, mac, ip_address, speed)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(device_id, int_type, int_name) DO UPDATE SET
                       mac = excluded.mac,
                       ip_address = excluded.ip_address,
                       speed = excluded.speed"#,
            )
            .bind(fabric_id)
            .bind(device_id)
            .bind(&intf.int_type)
            .bind(&intf.int_name)
            .bind(crate::utils::normalize_mac(&intf.mac))
            .bind(&intf.ip_address)
            .bind(intf.speed)
            .execute(pool)
            .await?;
        }

        for stale in Self::list_by_device(pool, device_id).await? {
            if !seen.contains(&(stale.int_type.clone(), stale.int_name.clone())) {
                sqlx::query("DELETE FROM interfaces WHERE id = ?")
                    .bind(stale.id)
                    .execute(pool)
                    .await?;
            }
        }

        Self::list_by_device(pool, device_id).await
    }
}

/// Link-layer discovery records and resolved link operations
pub struct LldpRepo;

impl LldpRepo {
    pub async fn list_records(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<(i64, AdjacencyRecord)>> {
        let rows = sqlx::query("SELECT * FROM lldp_records WHERE fabric_id = ? ORDER BY device_id, id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_lldp_record_row).collect())
    }

    pub async fn replace_records(
        pool: &Pool<Sqlite>,
        fabric_id: i64,
        device_id: i64,
        records: &[AdjacencyRecord],
    ) -> Result<()> {
        sqlx::query("DELETE FROM lldp_records WHERE device_id = ?")
            .bind(device_id)
            .execute(pool)
            .await?;

        for rec in records {
            sqlx::query(
                r#"INSERT INTO lldp_records
                   (fabric_id, device_id, local_int_type, local_int_name, local_mac, remote_mac, remote_int_name, remote_system)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(fabric_id)
            .bind(device_id)
            .bind(&rec.local_int_type)
            .bind(&rec.local_int_name)
            .bind(crate::utils::normalize_mac(&rec.local_mac))
            .bind(crate::utils::normalize_mac(&rec.remote_mac))
            .bind(&rec.remote_int_name)
            .bind(&rec.remote_system)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_neighbors(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<LldpNeighbor>> {
        let rows = sqlx::query("SELECT * FROM lldp_neighbors WHERE fabric_id = ? ORDER BY id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_lldp_neighbor_row).collect())
    }

    pub async fn upsert_neighbor(pool: &Pool<Sqlite>, link: &LldpNeighbor) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO lldp_neighbors
               (fabric_id, device_one_id, device_two_id, device_one_role, device_two_role,
                interface_one_id, interface_two_id, interface_one_type, interface_one_name,
                interface_two_type, interface_two_name, interface_one_ip, interface_two_ip, config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(interface_one_id, interface_two_id) DO UPDATE SET
                   device_one_role = excluded.device_one_role,
                   device_two_role = excluded.device_two_role,
                   interface_one_ip = excluded.interface_one_ip,
                   interface_two_ip = excluded.interface_two_ip,
                   config_type = excluded.config_type"#,
        )
        .bind(link.fabric_id)
        .bind(link.device_one_id)
        .bind(link.device_two_id)
        .bind(&link.device_one_role)
        .bind(&link.device_two_role)
        .bind(link.interface_one_id)
        .bind(link.interface_two_id)
        .bind(&link.interface_one_type)
        .bind(&link.interface_one_name)
        .bind(&link.interface_two_type)
        .bind(&link.interface_two_name)
        .bind(&link.interface_one_ip)
        .bind(&link.interface_two_ip)
        .bind(link.config_type.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }
}
