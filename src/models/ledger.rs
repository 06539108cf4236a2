use serde::{Deserialize, Serialize};

/// Ledger address kinds
pub mod ip_type {
    pub const LOOPBACK: &str = "loopback";
    pub const VTEP_LOOPBACK: &str = "vtep-loopback";
    pub const P2P: &str = "p2p";
    pub const MCT: &str = "mct";
    pub const MCT_L3_BACKUP: &str = "mct-l3-backup";
}

/// UsedIpPair records both ends of an allocated /31.
/// Either end may be used as the lookup key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsedIpPair {
    pub id: i64,
    pub fabric_id: i64,
    pub ip_type: String,
    pub ip_one: String,
    pub ip_two: String,
    pub device_one_id: i64,
    pub device_two_id: i64,
    pub interface_one_id: i64,
    pub interface_two_id: i64,
}

impl UsedIpPair {
    /// (local, remote) addresses as seen from `interface_id`
    pub fn oriented(&self, interface_id: i64) -> Option<(String, String)> {
        if self.interface_one_id == interface_id {
            Some((self.ip_one.clone(), self.ip_two.clone()))
        } else if self.interface_two_id == interface_id {
            Some((self.ip_two.clone(), self.ip_one.clone()))
        } else {
            None
        }
    }

    /// (local, remote) addresses as seen from `device_id`
    pub fn oriented_for_device(&self, device_id: i64) -> Option<(String, String)> {
        if self.device_one_id == device_id {
            Some((self.ip_one.clone(), self.ip_two.clone()))
        } else if self.device_two_id == device_id {
            Some((self.ip_two.clone(), self.ip_one.clone()))
        } else {
            None
        }
    }

    pub fn joins_interfaces(&self, a: i64, b: i64) -> bool {
        (self.interface_one_id == a && self.interface_two_id == b)
            || (self.interface_one_id == b && self.interface_two_id == a)
    }

    pub fn joins_devices(&self, a: i64, b: i64) -> bool {
        (self.device_one_id == a && self.device_two_id == b)
            || (self.device_one_id == b && self.device_two_id == a)
    }

    pub fn holds_ip(&self, ip: &str) -> bool {
        self.ip_one == ip || self.ip_two == ip
    }
}
