use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{ConfigType, FabricSettings};

/// Whole-cluster operation, also the dispatch order of the cluster fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterOperation {
    Delete,
    Update,
    Create,
}

impl ClusterOperation {
    pub const DISPATCH_ORDER: [ClusterOperation; 3] =
        [ClusterOperation::Delete, ClusterOperation::Update, ClusterOperation::Create];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterOperation::Create => "configure",
            ClusterOperation::Update => "update",
            ClusterOperation::Delete => "deconfigure",
        }
    }
}

impl fmt::Display for ClusterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FabricActionRequest is everything the orchestration engine needs to
/// push (or remove) a fabric, built from the reconciled store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricActionRequest {
    pub fabric_name: String,
    pub fabric_type: String,
    pub settings: FabricSettings,
    pub hosts: Vec<HostConfig>,
    pub clusters: BTreeMap<ClusterOperation, Vec<ClusterConfig>>,
}

impl FabricActionRequest {
    pub fn cluster_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }
}

/// HostConfig is the per-switch slice of an action request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub device_id: i64,
    pub host: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub model: String,
    pub role: String,
    pub local_as: String,
    pub as_config_type: ConfigType,
    pub loopback_port_number: String,
    pub loopback_ip: String,
    pub loopback_config_type: ConfigType,
    pub vtep_loopback_port_number: String,
    pub vtep_loopback_ip: String,
    pub vtep_loopback_config_type: ConfigType,
    pub interfaces: Vec<ConfigInterface>,
    pub bgp_neighbors: Vec<ConfigBgpNeighbor>,
    pub mct_neighbors: Vec<ConfigBgpNeighbor>,
    pub configure_overlay_gateway: bool,
    pub mct_secondary_node: bool,
}

impl HostConfig {
    pub fn is_edge(&self) -> bool {
        super::device_role::is_edge(&self.role)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigInterface {
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBgpNeighbor {
    pub remote_ip: String,
    pub remote_as: String,
    pub encap_type: String,
    pub neighbor_class: String,
    pub config_type: ConfigType,
}

/// ClusterConfig is one MCT cluster in an action request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub fabric_name: String,
    pub cluster_name: String,
    pub cluster_id: String,
    pub control_vlan: String,
    pub control_ve: String,
    pub operation_bitmap: u64,
    pub members: Vec<ClusterMemberNode>,
}

/// ClusterMemberNode is one node's view of its cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterMemberNode {
    pub device_id: i64,
    pub mgmt_ip: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub model: String,
    pub node_id: String,
    /// This node's address on the control VE, with prefix
    pub local_peer_ip: String,
    /// The partner's control VE address, without prefix
    pub peer_ip: String,
    pub peer_loopback_ip: String,
    pub principal_priority: String,
    pub peer_interface_type: String,
    pub peer_interface_name: String,
    pub peer_interface_speed: String,
    pub member_ports: Vec<InterNodeLinkPort>,
    pub bfd_rx: String,
    pub bfd_tx: String,
    pub bfd_multiplier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterNodeLinkPort {
    pub int_type: String,
    pub int_name: String,
    pub config_type: ConfigType,
}
