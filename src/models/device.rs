use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConfigType;

/// Canonical fabric role values
pub mod device_role {
    pub const SPINE: &str = "Spine";
    pub const LEAF: &str = "Leaf";
    pub const RACK: &str = "Rack";

    pub const ALL: &[&str] = &[SPINE, LEAF, RACK];

    pub fn is_valid(role: &str) -> bool {
        ALL.contains(&role)
    }

    /// Roles that terminate the overlay and carry a VTEP loopback
    pub fn is_edge(role: &str) -> bool {
        role == LEAF || role == RACK
    }
}

/// Canonical interface type values
pub mod interface_type {
    pub const ETHERNET: &str = "ethernet";
    pub const LOOPBACK: &str = "loopback";
    pub const VE: &str = "ve";
    pub const PORT_CHANNEL: &str = "Port-channel";
}

/// Device is a switch registered in a fabric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub fabric_id: i64,
    pub ip_address: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub firmware: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Model/firmware/hostname reported by a device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDetail {
    pub model: String,
    pub firmware: String,
    pub hostname: String,
}

/// DiscoveredInterface is one interface as reported by the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredInterface {
    pub int_type: String,
    pub int_name: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub speed: i64,
}

/// Interface is a persisted snapshot of a device interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub id: i64,
    pub fabric_id: i64,
    pub device_id: i64,
    pub int_type: String,
    pub int_name: String,
    pub mac: String,
    pub ip_address: String,
    pub speed: i64,
    pub config_type: ConfigType,
}

/// AdjacencyRecord is one link-layer discovery entry seen on a local port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyRecord {
    pub local_int_type: String,
    pub local_int_name: String,
    pub local_mac: String,
    pub remote_mac: String,
    #[serde(default)]
    pub remote_int_name: String,
    #[serde(default)]
    pub remote_system: String,
}

/// LldpNeighbor is one resolved physical link between two fabric devices,
/// stored once per direction so either end can look it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub id: i64,
    pub fabric_id: i64,
    pub device_one_id: i64,
    pub device_two_id: i64,
    pub device_one_role: String,
    pub device_two_role: String,
    pub interface_one_id: i64,
    pub interface_two_id: i64,
    pub interface_one_type: String,
    pub interface_one_name: String,
    pub interface_two_type: String,
    pub interface_two_name: String,
    pub interface_one_ip: String,
    pub interface_two_ip: String,
    pub config_type: ConfigType,
}

/// Rack is an explicitly paired set of two switches in a non-CLOS fabric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rack {
    pub id: i64,
    pub fabric_id: i64,
    pub ip_one: String,
    pub device_one_id: i64,
    pub ip_two: String,
    pub device_two_id: i64,
}

/// RackPair names the two management IPs of a rack in requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RackPair {
    pub ip_one: String,
    pub ip_two: String,
}

impl RackPair {
    pub fn contains(&self, ip: &str) -> bool {
        self.ip_one == ip || self.ip_two == ip
    }
}
