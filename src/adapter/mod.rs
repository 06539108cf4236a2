//! Device adapter boundary.
//!
//! The orchestration core only ever talks to switches through
//! `DeviceAdapter`. An `AdapterFactory` picks the implementation for a
//! device model string.

mod cli;
mod platform;
#[cfg(test)]
pub(crate) mod sim;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use cli::{CliAdapter, CliAdapterFactory};
pub use platform::{is_routing_device, mct_compatible, Platform};

use crate::models::*;

/// Wire marker of a successful configuration push
pub const OK_RESPONSE: &str = "<ok/>";

/// True only when the call succeeded and the device answered with the ok marker
pub fn is_ok_response(result: &Result<String>) -> bool {
    matches!(result, Ok(resp) if resp.trim() == OK_RESPONSE)
}

/// Where and how to reach one switch
#[derive(Debug, Clone, Default)]
pub struct DeviceTarget {
    pub host: String,
    pub user_name: String,
    pub password: String,
    /// Model string `<type>_<firmware>`, empty before first discovery
    pub model: String,
}

impl DeviceTarget {
    pub fn from_device(device: &Device) -> Self {
        Self {
            host: device.ip_address.clone(),
            user_name: device.user_name.clone(),
            password: device.password.clone(),
            model: device.model.clone(),
        }
    }

    pub fn from_host(host: &HostConfig) -> Self {
        Self {
            host: host.host.clone(),
            user_name: host.user_name.clone(),
            password: host.password.clone(),
            model: host.model.clone(),
        }
    }

    pub fn from_node(node: &ClusterMemberNode) -> Self {
        Self {
            host: node.mgmt_ip.clone(),
            user_name: node.user_name.clone(),
            password: node.password.clone(),
            model: node.model.clone(),
        }
    }
}

/// Direction of a configuration stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOp {
    Apply,
    Teardown,
}

/// Per-device configuration stages, in apply order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SystemProperties,
    Interfaces,
    MctNeighbors,
    Bgp,
    Evpn,
    OverlayGateway,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SystemProperties => "system properties",
            Stage::Interfaces => "interfaces",
            Stage::MctNeighbors => "mct data plane neighbors",
            Stage::Bgp => "bgp",
            Stage::Evpn => "evpn",
            Stage::OverlayGateway => "overlay gateway",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a stage push needs about the fabric and the host
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub fabric_name: String,
    pub settings: Arc<FabricSettings>,
    pub host: Arc<HostConfig>,
    pub op: StageOp,
}

/// Operational view of a cluster as reported by one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterStatus {
    pub member_count: usize,
}

/// One switch, as seen by discovery and by the orchestration engine.
///
/// Stage operations return the raw wire response. A call that returns
/// `Ok` with anything other than `OK_RESPONSE` still failed.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn login(&self) -> Result<()>;
    async fn close(&self);

    async fn get_device_detail(&self) -> Result<DeviceDetail>;
    async fn get_interfaces(&self) -> Result<Vec<DiscoveredInterface>>;
    async fn get_lldps(&self) -> Result<Vec<AdjacencyRecord>>;
    async fn get_asn(&self) -> Result<String>;

    async fn system_properties(&self, req: &StageRequest) -> Result<String>;
    async fn interfaces(&self, req: &StageRequest) -> Result<String>;
    async fn mct_neighbors(&self, req: &StageRequest) -> Result<String>;
    async fn bgp(&self, req: &StageRequest) -> Result<String>;
    async fn evpn(&self, req: &StageRequest) -> Result<String>;
    async fn overlay_gateway(&self, req: &StageRequest) -> Result<String>;
    async fn persist(&self) -> Result<String>;

    async fn cluster(&self, cluster: &ClusterConfig, node: &ClusterMemberNode, op: ClusterOperation) -> Result<String>;
    async fn cluster_status(&self, cluster: &ClusterConfig) -> Result<ClusterStatus>;

    /// Dispatch one per-device stage
    async fn run_stage(&self, stage: Stage, req: &StageRequest) -> Result<String> {
        match stage {
            Stage::SystemProperties => self.system_properties(req).await,
            Stage::Interfaces => self.interfaces(req).await,
            Stage::MctNeighbors => self.mct_neighbors(req).await,
            Stage::Bgp => self.bgp(req).await,
            Stage::Evpn => self.evpn(req).await,
            Stage::OverlayGateway => self.overlay_gateway(req).await,
            Stage::Persist => self.persist().await,
        }
    }
}

/// Resolves the adapter implementation for a device model
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceAdapter>>;

    fn is_mct_leaves_compatible(&self, model_a: &str, model_b: &str) -> bool {
        mct_compatible(model_a, model_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_needs_both_checks() {
        assert!(is_ok_response(&Ok("<ok/>".to_string())));
        assert!(is_ok_response(&Ok("<ok/>\n".to_string())));
        assert!(!is_ok_response(&Ok("<rpc-error>bad</rpc-error>".to_string())));
        assert!(!is_ok_response(&Err(anyhow::anyhow!("timeout"))));
    }
}
