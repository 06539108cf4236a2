use serde::{Deserialize, Serialize};

use super::ConfigType;

/// Bit positions of the MCT cluster OperationBitMap.
///
/// One bit per mutable cluster attribute. Positions are part of the
/// persisted state and of the adapter contract, so never renumber them.
pub mod mct_bit {
    pub const PEER_IP: u32 = 0;
    pub const CONTROL_VE: u32 = 1;
    pub const MEMBER_PORT_ADD: u32 = 2;
    pub const MEMBER_PORT_DELETE: u32 = 3;
    pub const PEER_SPEED: u32 = 4;
    pub const PRIORITY: u32 = 5;
    pub const PEER_INTERFACE: u32 = 6;
    pub const CREATE: u32 = 30;

    pub const ALL: &[(u32, &str)] = &[
        (PEER_IP, "peer-ip"),
        (CONTROL_VE, "control-ve"),
        (MEMBER_PORT_ADD, "member-port-add"),
        (MEMBER_PORT_DELETE, "member-port-delete"),
        (PEER_SPEED, "peer-speed"),
        (PRIORITY, "principal-priority"),
        (PEER_INTERFACE, "peer-interface"),
        (CREATE, "create"),
    ];

    /// Bits an in-place update can act on
    pub const UPDATABLE: &[u32] = &[
        PEER_IP,
        CONTROL_VE,
        MEMBER_PORT_ADD,
        MEMBER_PORT_DELETE,
        PEER_SPEED,
        PRIORITY,
        PEER_INTERFACE,
    ];

    pub fn mask(bit: u32) -> u64 {
        1u64 << bit
    }

    pub fn is_set(bitmap: u64, bit: u32) -> bool {
        bitmap & mask(bit) != 0
    }

    /// Names of the bits set in a bitmap, in table order
    pub fn names(bitmap: u64) -> Vec<&'static str> {
        ALL.iter()
            .filter(|(bit, _)| is_set(bitmap, *bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// MctCluster is a two-node MCT cluster as persisted for a fabric.
/// Node one is always the member with the lower management IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MctCluster {
    pub id: i64,
    pub fabric_id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub device_one_id: i64,
    pub device_two_id: i64,
    pub device_one_ip: String,
    pub device_two_ip: String,
    pub peer_one_ip: String,
    pub peer_two_ip: String,
    pub control_vlan: String,
    pub control_ve: String,
    pub peer_interface_type: String,
    pub peer_interface_name: String,
    pub peer_interface_speed: i64,
    pub principal_priority: String,
    pub operation_bitmap: u64,
    pub config_type: ConfigType,
}

impl MctCluster {
    pub fn has_member(&self, device_id: i64) -> bool {
        self.device_one_id == device_id || self.device_two_id == device_id
    }

    /// The other member of the cluster
    pub fn peer_of(&self, device_id: i64) -> Option<i64> {
        if self.device_one_id == device_id {
            Some(self.device_two_id)
        } else if self.device_two_id == device_id {
            Some(self.device_one_id)
        } else {
            None
        }
    }
}

/// MctMemberPort is one inter-node link carried in the cluster peer interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MctMemberPort {
    pub id: i64,
    pub fabric_id: i64,
    pub device_id: i64,
    pub remote_device_id: i64,
    pub interface_id: i64,
    pub remote_interface_id: i64,
    pub int_type: String,
    pub int_name: String,
    pub remote_int_name: String,
    pub speed: i64,
    pub config_type: ConfigType,
}

impl MctMemberPort {
    /// Stable identity of a member port across discovery runs
    pub fn key(&self) -> String {
        format!("{}:{}:{}:{}", self.device_id, self.remote_device_id, self.int_name, self.remote_int_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_names() {
        let bitmap = mct_bit::mask(mct_bit::PEER_IP) | mct_bit::mask(mct_bit::PEER_SPEED);
        assert_eq!(bitmap, 17);
        assert_eq!(mct_bit::names(bitmap), vec!["peer-ip", "peer-speed"]);
        assert!(mct_bit::is_set(bitmap, mct_bit::PEER_SPEED));
        assert!(!mct_bit::is_set(bitmap, mct_bit::CONTROL_VE));
    }

    #[test]
    fn test_peer_of() {
        let cluster = MctCluster { device_one_id: 1, device_two_id: 2, ..Default::default() };
        assert_eq!(cluster.peer_of(1), Some(2));
        assert_eq!(cluster.peer_of(2), Some(1));
        assert_eq!(cluster.peer_of(3), None);
    }
}
