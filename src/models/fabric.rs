use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical fabric type values
pub mod fabric_type {
    pub const CLOS: &str = "clos";
    pub const NON_CLOS: &str = "non-clos";

    pub const ALL: &[&str] = &[CLOS, NON_CLOS];

    pub fn is_valid(kind: &str) -> bool {
        ALL.contains(&kind)
    }
}

/// Point-to-point addressing modes
pub mod p2p_ip_type {
    pub const NUMBERED: &str = "numbered";
    pub const UNNUMBERED: &str = "unnumbered";

    pub fn is_valid(kind: &str) -> bool {
        kind == NUMBERED || kind == UNNUMBERED
    }
}

/// Fabric is a named set of devices provisioned together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fabric {
    pub id: i64,
    pub name: String,
    pub fabric_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fabric {
    pub fn is_clos(&self) -> bool {
        self.fabric_type != fabric_type::NON_CLOS
    }
}

/// FabricSettings holds the per-fabric pools, ports and protocol timers.
///
/// Stored as a JSON document next to the fabric row. A reconciliation run
/// reads it once and never observes a change mid-flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricSettings {
    pub spine_asn_block: String,
    pub leaf_asn_block: String,
    pub rack_asn_block: String,
    pub p2p_link_range: String,
    pub p2p_ip_type: String,
    pub loopback_ip_range: String,
    pub loopback_port_number: String,
    pub vtep_loopback_port_number: String,
    pub mct_link_ip_range: String,
    pub mct_l3_backup_ip_range: String,
    pub control_vlan: String,
    pub control_ve: String,
    pub mct_port_channel: String,
    /// Peer port-channel used when the second node is a routing platform
    pub routing_mct_port_channel: String,
    pub mct_principal_priority: String,
    pub any_cast_mac: String,
    pub ipv6_any_cast_mac: String,
    pub configure_overlay_gateway: bool,
    pub vni_auto_map: bool,
    pub bfd_enable: bool,
    pub bfd_tx: String,
    pub bfd_rx: String,
    pub bfd_multiplier: String,
    pub bgp_multihop: String,
    pub max_paths: String,
    pub allow_as_in: String,
    pub mtu: String,
    pub ip_mtu: String,
    pub leaf_peer_group: String,
    pub spine_peer_group: String,
    pub arp_aging_timeout: String,
    pub mac_aging_timeout: String,
    pub mac_aging_conversational_timeout: String,
    pub mac_move_limit: String,
    pub duplicate_mac_timer: String,
    pub duplicate_mac_timer_max_count: String,
    pub rack_underlay_ebgp_group: String,
    pub rack_overlay_ebgp_group: String,
    pub rack_mct_ports: Vec<String>,
    pub rack_l3_backup_port: String,
}

impl Default for FabricSettings {
    fn default() -> Self {
        Self {
            spine_asn_block: "64512".to_string(),
            leaf_asn_block: "65000-65534".to_string(),
            rack_asn_block: "4200000000-4200065534".to_string(),
            p2p_link_range: "10.10.10.0/23".to_string(),
            p2p_ip_type: p2p_ip_type::NUMBERED.to_string(),
            loopback_ip_range: "172.31.254.0/24".to_string(),
            loopback_port_number: "1".to_string(),
            vtep_loopback_port_number: "2".to_string(),
            mct_link_ip_range: "10.20.20.0/24".to_string(),
            mct_l3_backup_ip_range: "10.30.30.0/24".to_string(),
            control_vlan: "4090".to_string(),
            control_ve: "4090".to_string(),
            mct_port_channel: "1024".to_string(),
            routing_mct_port_channel: "64".to_string(),
            mct_principal_priority: "0".to_string(),
            any_cast_mac: "0201.0101.0101".to_string(),
            ipv6_any_cast_mac: "0201.0101.0102".to_string(),
            configure_overlay_gateway: true,
            vni_auto_map: true,
            bfd_enable: false,
            bfd_tx: "300".to_string(),
            bfd_rx: "300".to_string(),
            bfd_multiplier: "3".to_string(),
            bgp_multihop: "2".to_string(),
            max_paths: "8".to_string(),
            allow_as_in: "0".to_string(),
            mtu: "9216".to_string(),
            ip_mtu: "9100".to_string(),
            leaf_peer_group: "spine-group".to_string(),
            spine_peer_group: "leaf-group".to_string(),
            arp_aging_timeout: "300".to_string(),
            mac_aging_timeout: "1800".to_string(),
            mac_aging_conversational_timeout: "300".to_string(),
            mac_move_limit: "20".to_string(),
            duplicate_mac_timer: "5".to_string(),
            duplicate_mac_timer_max_count: "3".to_string(),
            rack_underlay_ebgp_group: "underlay-ebgp-group".to_string(),
            rack_overlay_ebgp_group: "overlay-ebgp-group".to_string(),
            rack_mct_ports: vec!["0/46".to_string(), "0/47".to_string()],
            rack_l3_backup_port: "0/48".to_string(),
        }
    }
}

impl FabricSettings {
    pub fn is_numbered(&self) -> bool {
        self.p2p_ip_type != p2p_ip_type::UNNUMBERED
    }

    /// Check that every range parses before the settings are stored
    pub fn validate(&self) -> Result<(), String> {
        for (name, block) in [
            ("spine_asn_block", &self.spine_asn_block),
            ("leaf_asn_block", &self.leaf_asn_block),
            ("rack_asn_block", &self.rack_asn_block),
        ] {
            crate::utils::parse_asn_block(block)
                .ok_or_else(|| format!("{} '{}' is not a valid ASN block", name, block))?;
        }
        for (name, range) in [
            ("p2p_link_range", &self.p2p_link_range),
            ("loopback_ip_range", &self.loopback_ip_range),
            ("mct_link_ip_range", &self.mct_link_ip_range),
            ("mct_l3_backup_ip_range", &self.mct_l3_backup_ip_range),
        ] {
            crate::utils::parse_cidr(range)
                .ok_or_else(|| format!("{} '{}' is not a valid CIDR", name, range))?;
        }
        if !p2p_ip_type::is_valid(&self.p2p_ip_type) {
            return Err(format!("p2p_ip_type '{}' must be numbered or unnumbered", self.p2p_ip_type));
        }
        Ok(())
    }
}

/// CreateFabricRequest for creating a new fabric
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFabricRequest {
    pub name: String,
    #[serde(default)]
    pub fabric_type: Option<String>,
    #[serde(default)]
    pub settings: Option<FabricSettings>,
}
