use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reconciliation tag describing what must be pushed for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Create,
    Update,
    #[default]
    None,
    Delete,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Create => "create",
            ConfigType::Update => "update",
            ConfigType::None => "none",
            ConfigType::Delete => "delete",
        }
    }

    /// Create and Update both require a push
    pub fn is_pending(&self) -> bool {
        matches!(self, ConfigType::Create | ConfigType::Update)
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ConfigType::Create),
            "update" => Ok(ConfigType::Update),
            "none" | "" => Ok(ConfigType::None),
            "delete" => Ok(ConfigType::Delete),
            other => Err(format!("unknown config type '{}'", other)),
        }
    }
}

/// BGP neighbor classes
pub mod neighbor_class {
    pub const FABRIC: &str = "fabric";
    pub const MCT_L3_BACKUP: &str = "mct-l3-backup";
    pub const MCT_DATA_PLANE: &str = "mct-data-plane";
    pub const EVPN: &str = "evpn";
}

/// Encapsulation carried on BGP neighbors
pub mod encap_type {
    pub const VXLAN: &str = "vxlan";
    pub const NSH: &str = "nsh";
}

/// SwitchConfig holds the device-level allocations and their tags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub id: i64,
    pub fabric_id: i64,
    pub device_id: i64,
    pub role: String,
    pub local_as: String,
    pub as_config_type: ConfigType,
    pub loopback_ip: String,
    pub loopback_config_type: ConfigType,
    pub vtep_loopback_ip: String,
    pub vtep_loopback_config_type: ConfigType,
}

/// InterfaceConfig is the intended addressing of one fabric-facing port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub id: i64,
    pub fabric_id: i64,
    pub device_id: i64,
    pub interface_id: i64,
    pub int_type: String,
    pub int_name: String,
    pub ip_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub donor_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub donor_name: String,
    pub description: String,
    pub config_type: ConfigType,
}

/// BgpNeighborConfig is one intended BGP session on a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BgpNeighborConfig {
    pub id: i64,
    pub fabric_id: i64,
    pub device_id: i64,
    pub remote_device_id: i64,
    pub remote_ip: String,
    pub remote_as: String,
    pub encap_type: String,
    pub neighbor_class: String,
    pub config_type: ConfigType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_type_parse() {
        assert_eq!("create".parse::<ConfigType>(), Ok(ConfigType::Create));
        assert_eq!("".parse::<ConfigType>(), Ok(ConfigType::None));
        assert!("bogus".parse::<ConfigType>().is_err());
        assert!(ConfigType::Update.is_pending());
        assert!(!ConfigType::Delete.is_pending());
    }
}
