use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::{map_mct_cluster_row, map_member_port_row};

/// MCT cluster and member port operations
pub struct ClusterRepo;

impl ClusterRepo {
    pub async fn list(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<MctCluster>> {
        let rows = sqlx::query("SELECT * FROM mct_clusters WHERE fabric_id = ? ORDER BY cluster_id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_mct_cluster_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<MctCluster>> {
        let row = sqlx::query("SELECT * FROM mct_clusters WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_mct_cluster_row))
    }

    /// Smallest positive cluster id not used in the fabric
    pub async fn next_cluster_id(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<i64> {
        let used: Vec<(i64,)> = sqlx::query_as("SELECT cluster_id FROM mct_clusters WHERE fabric_id = ? ORDER BY cluster_id")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        let mut next = 1;
        for (id,) in used {
            if id == next {
                next += 1;
            } else if id > next {
                break;
            }
        }
        Ok(next)
    }

    pub async fn create(pool: &Pool<Sqlite>, c: &MctCluster) -> Result<MctCluster> {
        let result = sqlx::query(
            r#"INSERT INTO mct_clusters
               (fabric_id, cluster_id, name, device_one_id, device_two_id, device_one_ip, device_two_ip,
                peer_one_ip, peer_two_ip, control_vlan, control_ve, peer_interface_type, peer_interface_name,
                peer_interface_speed, principal_priority, operation_bitmap, config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(c.fabric_id)
        .bind(c.cluster_id)
        .bind(&c.name)
        .bind(c.device_one_id)
        .bind(c.device_two_id)
        .bind(&c.device_one_ip)
        .bind(&c.device_two_ip)
        .bind(&c.peer_one_ip)
        .bind(&c.peer_two_ip)
        .bind(&c.control_vlan)
        .bind(&c.control_ve)
        .bind(&c.peer_interface_type)
        .bind(&c.peer_interface_name)
        .bind(c.peer_interface_speed)
        .bind(&c.principal_priority)
        .bind(c.operation_bitmap as i64)
        .bind(c.config_type.as_str())
        .execute(pool)
        .await?;

        Self::get(pool, result.last_insert_rowid())
            .await?
            .context("Cluster not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, c: &MctCluster) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE mct_clusters SET
                   peer_one_ip = ?, peer_two_ip = ?, control_vlan = ?, control_ve = ?,
                   peer_interface_type = ?, peer_interface_name = ?, peer_interface_speed = ?,
                   principal_priority = ?, operation_bitmap = ?, config_type = ?
               WHERE id = ?"#,
        )
        .bind(&c.peer_one_ip)
        .bind(&c.peer_two_ip)
        .bind(&c.control_vlan)
        .bind(&c.control_ve)
        .bind(&c.peer_interface_type)
        .bind(&c.peer_interface_name)
        .bind(c.peer_interface_speed)
        .bind(&c.principal_priority)
        .bind(c.operation_bitmap as i64)
        .bind(c.config_type.as_str())
        .bind(c.id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Cluster", &c.id.to_string()).into());
        }
        Ok(())
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM mct_clusters WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_member_ports(pool: &Pool<Sqlite>, fabric_id: i64) -> Result<Vec<MctMemberPort>> {
        let rows = sqlx::query("SELECT * FROM mct_member_ports WHERE fabric_id = ? ORDER BY device_id, int_name")
            .bind(fabric_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_member_port_row).collect())
    }

    pub async fn upsert_member_port(pool: &Pool<Sqlite>, p: &MctMemberPort) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO mct_member_ports
               (fabric_id, device_id, remote_device_id, interface_id, remote_interface_id,
                int_type, int_name, remote_int_name, speed, config_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(device_id, int_type, int_name) DO UPDATE SET
                   remote_device_id = excluded.remote_device_id,
                   interface_id = excluded.interface_id,
                   remote_interface_id = excluded.remote_interface_id,
                   remote_int_name = excluded.remote_int_name,
                   speed = excluded.speed,
                   config_type = excluded.config_type"#,
        )
        .bind(p.fabric_id)
        .bind(p.device_id)
        .bind(p.remote_device_id)
        .bind(p.interface_id)
        .bind(p.remote_interface_id)
        .bind(&p.int_type)
        .bind(&p.int_name)
        .bind(&p.remote_int_name)
        .bind(p.speed)
        .bind(p.config_type.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }
}
