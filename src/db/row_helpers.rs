use sqlx::{Row, sqlite::SqliteRow};

use crate::models::*;

/// Read a stored ConfigType tag, treating unknown text as None
fn config_type(row: &SqliteRow, column: &str) -> ConfigType {
    row.get::<String, _>(column).parse().unwrap_or_default()
}

pub fn map_fabric_row(row: &SqliteRow) -> Fabric {
    Fabric {
        id: row.get("id"),
        name: row.get("name"),
        fabric_type: row.get("fabric_type"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Decode the settings document, falling back to defaults for missing keys
pub fn map_fabric_settings(row: &SqliteRow) -> FabricSettings {
    let data: String = row.get("settings");
    serde_json::from_str(&data).unwrap_or_default()
}

/// Map a SQLite row to a Device struct
pub fn map_device_row(row: &SqliteRow) -> Device {
    Device {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        ip_address: row.get("ip_address"),
        user_name: row.get("user_name"),
        password: row.get("password"),
        role: row.get("role"),
        model: row.get("model"),
        firmware: row.get("firmware"),
        hostname: row.get("hostname"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub fn map_rack_row(row: &SqliteRow) -> Rack {
    Rack {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        ip_one: row.get("ip_one"),
        device_one_id: row.get("device_one_id"),
        ip_two: row.get("ip_two"),
        device_two_id: row.get("device_two_id"),
    }
}

pub fn map_interface_row(row: &SqliteRow) -> Interface {
    Interface {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_id: row.get("device_id"),
        int_type: row.get("int_type"),
        int_name: row.get("int_name"),
        mac: row.get("mac"),
        ip_address: row.get("ip_address"),
        speed: row.get("speed"),
        config_type: config_type(row, "config_type"),
    }
}

/// Map an adjacency row; returns the owning device id alongside the record
pub fn map_lldp_record_row(row: &SqliteRow) -> (i64, AdjacencyRecord) {
    (
        row.get("device_id"),
        AdjacencyRecord {
            local_int_type: row.get("local_int_type"),
            local_int_name: row.get("local_int_name"),
            local_mac: row.get("local_mac"),
            remote_mac: row.get("remote_mac"),
            remote_int_name: row.get("remote_int_name"),
            remote_system: row.get("remote_system"),
        },
    )
}

pub fn map_lldp_neighbor_row(row: &SqliteRow) -> LldpNeighbor {
    LldpNeighbor {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_one_id: row.get("device_one_id"),
        device_two_id: row.get("device_two_id"),
        device_one_role: row.get("device_one_role"),
        device_two_role: row.get("device_two_role"),
        interface_one_id: row.get("interface_one_id"),
        interface_two_id: row.get("interface_two_id"),
        interface_one_type: row.get("interface_one_type"),
        interface_one_name: row.get("interface_one_name"),
        interface_two_type: row.get("interface_two_type"),
        interface_two_name: row.get("interface_two_name"),
        interface_one_ip: row.get("interface_one_ip"),
        interface_two_ip: row.get("interface_two_ip"),
        config_type: config_type(row, "config_type"),
    }
}

pub fn map_switch_config_row(row: &SqliteRow) -> SwitchConfig {
    SwitchConfig {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_id: row.get("device_id"),
        role: row.get("role"),
        local_as: row.get("local_as"),
        as_config_type: config_type(row, "as_config_type"),
        loopback_ip: row.get("loopback_ip"),
        loopback_config_type: config_type(row, "loopback_config_type"),
        vtep_loopback_ip: row.get("vtep_loopback_ip"),
        vtep_loopback_config_type: config_type(row, "vtep_loopback_config_type"),
    }
}

pub fn map_interface_config_row(row: &SqliteRow) -> InterfaceConfig {
    InterfaceConfig {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_id: row.get("device_id"),
        interface_id: row.get("interface_id"),
        int_type: row.get("int_type"),
        int_name: row.get("int_name"),
        ip_address: row.get("ip_address"),
        donor_type: row.get("donor_type"),
        donor_name: row.get("donor_name"),
        description: row.get("description"),
        config_type: config_type(row, "config_type"),
    }
}

pub fn map_bgp_neighbor_row(row: &SqliteRow) -> BgpNeighborConfig {
    BgpNeighborConfig {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_id: row.get("device_id"),
        remote_device_id: row.get("remote_device_id"),
        remote_ip: row.get("remote_ip"),
        remote_as: row.get("remote_as"),
        encap_type: row.get("encap_type"),
        neighbor_class: row.get("neighbor_class"),
        config_type: config_type(row, "config_type"),
    }
}

pub fn map_used_ip_pair_row(row: &SqliteRow) -> UsedIpPair {
    UsedIpPair {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        ip_type: row.get("ip_type"),
        ip_one: row.get("ip_one"),
        ip_two: row.get("ip_two"),
        device_one_id: row.get("device_one_id"),
        device_two_id: row.get("device_two_id"),
        interface_one_id: row.get("interface_one_id"),
        interface_two_id: row.get("interface_two_id"),
    }
}

pub fn map_mct_cluster_row(row: &SqliteRow) -> MctCluster {
    MctCluster {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        cluster_id: row.get("cluster_id"),
        name: row.get("name"),
        device_one_id: row.get("device_one_id"),
        device_two_id: row.get("device_two_id"),
        device_one_ip: row.get("device_one_ip"),
        device_two_ip: row.get("device_two_ip"),
        peer_one_ip: row.get("peer_one_ip"),
        peer_two_ip: row.get("peer_two_ip"),
        control_vlan: row.get("control_vlan"),
        control_ve: row.get("control_ve"),
        peer_interface_type: row.get("peer_interface_type"),
        peer_interface_name: row.get("peer_interface_name"),
        peer_interface_speed: row.get("peer_interface_speed"),
        principal_priority: row.get("principal_priority"),
        operation_bitmap: row.get::<i64, _>("operation_bitmap") as u64,
        config_type: config_type(row, "config_type"),
    }
}

pub fn map_member_port_row(row: &SqliteRow) -> MctMemberPort {
    MctMemberPort {
        id: row.get("id"),
        fabric_id: row.get("fabric_id"),
        device_id: row.get("device_id"),
        remote_device_id: row.get("remote_device_id"),
        interface_id: row.get("interface_id"),
        remote_interface_id: row.get("remote_interface_id"),
        int_type: row.get("int_type"),
        int_name: row.get("int_name"),
        remote_int_name: row.get("remote_int_name"),
        speed: row.get("speed"),
        config_type: config_type(row, "config_type"),
    }
}
