use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::{map_bgp_neighbor_row, map_interface_config_row, map_switch_config_row};

/// Device-level allocation operations
pub struct SwitchConfigRepo;

impl SwitchConfigRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<SwitchConfig>> {
        let rows = sqlx::query("SELECT * FROM switch_configs WHERE fabric_id = ? ORDER BY device_id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_switch_config_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, device_id: i64) -> Result<Option<SwitchConfig>> {
        let row = sqlx::query("SELECT * FROM switch_configs WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_switch_config_row))
    }

    pub async fn upsert(pool: &Pool<Sqlite>, cfg: &SwitchConfig) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO switch_configs
               (fabric_id, device_id, role, local_as, as_config_type, loopback_ip, loopback_config_type,
                vtep_loopback_ip, vtep_loopback_config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(device_id) DO UPDATE SET
                   role = excluded.role,
                   local_as = excluded.local_as,
                   as_config_type = excluded.as_config_type,
                   loopback_ip = excluded.loopback_ip,
                   loopback_config_type = excluded.loopback_config_type,
                   vtep_loopback_ip = excluded.vtep_loopback_ip,
                   vtep_loopback_config_type = excluded.vtep_loopback_config_type"#,
        )
        .bind(cfg.fabric_id)
        .bind(cfg.device_id)
        .bind(&cfg.role)
        .bind(&cfg.local_as)
        .bind(cfg.as_config_type.as_str())
        .bind(&cfg.loopback_ip)
        .bind(cfg.loopback_config_type.as_str())
        .bind(&cfg.vtep_loopback_ip)
        .bind(cfg.vtep_loopback_config_type.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Interface intent operations
pub struct InterfaceConfigRepo;

impl InterfaceConfigRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<InterfaceConfig>> {
        let rows = sqlx::query("SELECT * FROM interface_configs WHERE fabric_id = ? ORDER BY device_id, int_type, int_name")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_interface_config_row).collect())
    }

    pub async fn list_by_device(pool: &Pool<Sqlite>, device_id: i64) -> Result<Vec<InterfaceConfig>> {
        let rows = sqlx::query("SELECT * FROM interface_configs WHERE device_id = ? ORDER BY int_type, int_name")
            .bind(device_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_interface_config_row).collect())
    }

    pub async fn upsert(pool: &Pool<Sqlite>, cfg: &InterfaceConfig) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO interface_configs
               (fabric_id, device_id, interface_id, int_type, int_name, ip_address, donor_type, donor_name, description, config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(device_id, int_type, int_name) DO UPDATE SET
                   interface_id = excluded.interface_id,
                   ip_address = excluded.ip_address,
                   donor_type = excluded.donor_type,
                   donor_name = excluded.donor_name,
                   description = excluded.description,
                   config_type = excluded.config_type"#,
        )
        .bind(cfg.fabric_id)
        .bind(cfg.device_id)
        .bind(cfg.interface_id)
        .bind(&cfg.int_type)
        .bind(&cfg.int_name)
        .bind(&cfg.ip_address)
        .bind(&cfg.donor_type)
        .bind(&cfg.donor_name)
        .bind(&cfg.description)
        .bind(cfg.config_type.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_config_type(pool: &Pool<Sqlite>, id: i64, config_type: ConfigType) -> Result<()> {
        sqlx::query("UPDATE interface_configs SET config_type = ? WHERE id = ?")
            .bind(config_type.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// BGP neighbor intent operations
pub struct BgpNeighborRepo;

impl BgpNeighborRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<BgpNeighborConfig>> {
        let rows = sqlx::query("SELECT * FROM bgp_neighbors WHERE fabric_id = ? ORDER BY device_id, neighbor_class, remote_ip")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_bgp_neighbor_row).collect())
    }

    pub async fn list_by_device(pool: &Pool<Sqlite>, device_id: i64) -> Result<Vec<BgpNeighborConfig>> {
        let rows = sqlx::query("SELECT * FROM bgp_neighbors WHERE device_id = ? ORDER BY neighbor_class, remote_ip")
            .bind(device_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_bgp_neighbor_row).collect())
    }

    pub async fn upsert(pool: &Pool<Sqlite>, cfg: &BgpNeighborConfig) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO bgp_neighbors
               (fabric_id, device_id, remote_device_id, remote_ip, remote_as, encap_type, neighbor_class, config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(device_id, neighbor_class, remote_ip) DO UPDATE SET
                   remote_device_id = excluded.remote_device_id,
                   remote_as = excluded.remote_as,
                   encap_type = excluded.encap_type,
                   config_type = excluded.config_type"#,
        )
        .bind(cfg.fabric_id)
        .bind(cfg.device_id)
        .bind(cfg.remote_device_id)
        .bind(&cfg.remote_ip)
        .bind(&cfg.remote_as)
        .bind(&cfg.encap_type)
        .bind(&cfg.neighbor_class)
        .bind(cfg.config_type.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_config_type(pool: &Pool<Sqlite>, id: i64, config_type: ConfigType) -> Result<()> {
        sqlx::query("UPDATE bgp_neighbors SET config_type = ? WHERE id = ?")
            .bind(config_type.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
