//! In-memory switch fleet for tests.
//!
//! Configuration pushes mutate the simulated switches, so a second
//! discovery run observes whatever the first configure run applied.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AdapterFactory, ClusterStatus, DeviceAdapter, DeviceTarget, Stage, StageOp, StageRequest, OK_RESPONSE};
use crate::models::*;
use crate::utils::ip_to_u32;

pub const SIM_MODEL: &str = "3001_20.2.3";
const PORT_COUNT: u32 = 54;
const TEN_GIG: i64 = 10_000_000_000;

#[derive(Debug, Clone, Default)]
pub struct SimSwitch {
    pub detail: DeviceDetail,
    pub interfaces: Vec<DiscoveredInterface>,
    pub lldps: Vec<AdjacencyRecord>,
    pub asn: String,
    pub fail_login: bool,
    pub fail_stage: Option<Stage>,
    /// Stage pushes in the order they arrived, e.g. "bgp:apply"
    pub pushes: Vec<String>,
}

impl SimSwitch {
    fn new(host: &str) -> Self {
        let octets = ip_to_u32(host).unwrap_or(0).to_be_bytes();
        let interfaces = (1..=PORT_COUNT)
            .map(|port| DiscoveredInterface {
                int_type: interface_type::ETHERNET.to_string(),
                int_name: format!("0/{}", port),
                mac: format!("02:00:{:02x}:{:02x}:00:{:02x}", octets[2], octets[3], port),
                ip_address: String::new(),
                speed: TEN_GIG,
            })
            .collect();
        Self {
            detail: DeviceDetail {
                model: SIM_MODEL.to_string(),
                firmware: "20.2.3".to_string(),
                hostname: format!("sw-{}", octets[3]),
            },
            interfaces,
            ..Default::default()
        }
    }

    fn port(&self, name: &str) -> Option<&DiscoveredInterface> {
        self.interfaces
            .iter()
            .find(|i| i.int_type == interface_type::ETHERNET && i.int_name == name)
    }

    pub fn set_ip(&mut self, int_type: &str, int_name: &str, ip: &str) {
        match self.interfaces.iter_mut().find(|i| i.int_type == int_type && i.int_name == int_name) {
            Some(intf) => intf.ip_address = ip.to_string(),
            None if !ip.is_empty() => self.interfaces.push(DiscoveredInterface {
                int_type: int_type.to_string(),
                int_name: int_name.to_string(),
                ip_address: ip.to_string(),
                ..Default::default()
            }),
            None => {}
        }
    }

    fn remove_loopback(&mut self, port: &str) {
        self.interfaces
            .retain(|i| !(i.int_type == interface_type::LOOPBACK && i.int_name == port));
    }

    fn apply(&mut self, stage: Stage, req: &StageRequest) {
        let host = &req.host;
        let teardown = req.op == StageOp::Teardown;
        match stage {
            Stage::SystemProperties if teardown => {
                self.remove_loopback(&host.loopback_port_number);
                if host.is_edge() {
                    self.remove_loopback(&host.vtep_loopback_port_number);
                }
            }
            Stage::SystemProperties => {
                if host.loopback_config_type.is_pending() {
                    self.set_ip(
                        interface_type::LOOPBACK,
                        &host.loopback_port_number,
                        &format!("{}/32", host.loopback_ip),
                    );
                }
                if host.is_edge() && host.vtep_loopback_config_type.is_pending() {
                    self.set_ip(
                        interface_type::LOOPBACK,
                        &host.vtep_loopback_port_number,
                        &format!("{}/32", host.vtep_loopback_ip),
                    );
                }
            }
            Stage::Interfaces => {
                for intf in &host.interfaces {
                    if !intf.donor_type.is_empty() {
                        continue;
                    }
                    if teardown || intf.config_type == ConfigType::Delete {
                        self.set_ip(&intf.int_type, &intf.int_name, "");
                    } else if intf.config_type.is_pending() {
                        self.set_ip(&intf.int_type, &intf.int_name, &intf.ip_address);
                    }
                }
            }
            Stage::Bgp if teardown => self.asn.clear(),
            Stage::Bgp => {
                if host.as_config_type.is_pending() {
                    self.asn = host.local_as.clone();
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct FleetState {
    switches: HashMap<String, SimSwitch>,
    /// Cluster name to the hosts that have it configured
    clusters: HashMap<String, BTreeSet<String>>,
}

/// A set of simulated switches shared by every adapter it hands out
#[derive(Clone, Default)]
pub struct SimulatedFleet {
    state: Arc<Mutex<FleetState>>,
}

impl SimulatedFleet {
    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_switch(&self, host: &str) {
        self.lock()
            .switches
            .entry(host.to_string())
            .or_insert_with(|| SimSwitch::new(host));
    }

    /// Cable two ports together; both ends see the other in LLDP
    pub fn link(&self, host_a: &str, port_a: &str, host_b: &str, port_b: &str) {
        self.add_switch(host_a);
        self.add_switch(host_b);
        let mut state = self.lock();
        let (Some(a), Some(b)) = (
            state.switches.get(host_a).and_then(|s| s.port(port_a)).cloned(),
            state.switches.get(host_b).and_then(|s| s.port(port_b)).cloned(),
        ) else {
            return;
        };
        for (local, local_host, remote, remote_host) in [(&a, host_a, &b, host_b), (&b, host_b, &a, host_a)] {
            if let Some(sw) = state.switches.get_mut(local_host) {
                sw.lldps.push(AdjacencyRecord {
                    local_int_type: local.int_type.clone(),
                    local_int_name: local.int_name.clone(),
                    local_mac: local.mac.clone(),
                    remote_mac: remote.mac.clone(),
                    remote_int_name: remote.int_name.clone(),
                    remote_system: remote_host.to_string(),
                });
            }
        }
    }

    /// Remove the cable on a port, from both ends
    pub fn unlink(&self, host: &str, port: &str) {
        let mut state = self.lock();
        let Some(mac) = state.switches.get(host).and_then(|s| s.port(port)).map(|p| p.mac.clone()) else {
            return;
        };
        for sw in state.switches.values_mut() {
            sw.lldps.retain(|r| r.local_mac != mac && r.remote_mac != mac);
        }
    }

    /// Spines on ports 0/1.., leaves uplink on 0/49.., leaf pairs on 0/40
    pub fn clos(spines: &[&str], leaves: &[&str], leaf_pairs: &[(&str, &str)]) -> Self {
        let fleet = Self::default();
        for (si, spine) in spines.iter().enumerate() {
            for (li, leaf) in leaves.iter().enumerate() {
                fleet.link(spine, &format!("0/{}", li + 1), leaf, &format!("0/{}", 49 + si));
            }
        }
        for (a, b) in leaf_pairs {
            fleet.link(a, "0/40", b, "0/40");
        }
        for host in spines.iter().chain(leaves) {
            fleet.add_switch(host);
        }
        fleet
    }

    /// Racks joined on 0/46, 0/47 (MCT) and 0/48 (L3 backup); consecutive
    /// racks are cabled member to member on 0/10 and 0/20.
    pub fn racks(racks: &[(&str, &str)]) -> Self {
        let fleet = Self::default();
        for (one, two) in racks {
            for port in ["0/46", "0/47", "0/48"] {
                fleet.link(one, port, two, port);
            }
        }
        for pair in racks.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            fleet.link(a.0, "0/10", b.0, "0/20");
            fleet.link(a.1, "0/10", b.1, "0/20");
        }
        fleet
    }

    pub fn update<F: FnOnce(&mut SimSwitch)>(&self, host: &str, f: F) {
        if let Some(sw) = self.lock().switches.get_mut(host) {
            f(sw);
        }
    }

    pub fn switch(&self, host: &str) -> Option<SimSwitch> {
        self.lock().switches.get(host).cloned()
    }

    pub fn set_speed(&self, host: &str, port: &str, speed: i64) {
        self.update(host, |sw| {
            if let Some(intf) = sw.interfaces.iter_mut().find(|i| i.int_name == port) {
                intf.speed = speed;
            }
        });
    }

    pub fn set_model(&self, host: &str, model: &str) {
        self.update(host, |sw| sw.detail.model = model.to_string());
    }

    pub fn interface_ip(&self, host: &str, int_type: &str, int_name: &str) -> String {
        self.switch(host)
            .and_then(|sw| {
                sw.interfaces
                    .into_iter()
                    .find(|i| i.int_type == int_type && i.int_name == int_name)
                    .map(|i| i.ip_address)
            })
            .unwrap_or_default()
    }

    pub fn cluster_members(&self, name: &str) -> usize {
        self.lock().clusters.get(name).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn pushes(&self, host: &str) -> Vec<String> {
        self.switch(host).map(|sw| sw.pushes).unwrap_or_default()
    }
}

impl AdapterFactory for SimulatedFleet {
    fn adapter(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceAdapter>> {
        Ok(Arc::new(SimAdapter { host: target.host.clone(), fleet: self.clone() }))
    }
}

pub struct SimAdapter {
    host: String,
    fleet: SimulatedFleet,
}

impl SimAdapter {
    fn with_switch<T>(&self, f: impl FnOnce(&mut SimSwitch) -> T) -> Result<T> {
        let mut state = self.fleet.lock();
        let sw = state
            .switches
            .get_mut(&self.host)
            .ok_or_else(|| anyhow!("No route to host {}", self.host))?;
        Ok(f(sw))
    }

    fn stage(&self, stage: Stage, req: &StageRequest) -> Result<String> {
        self.with_switch(|sw| {
            let op = if req.op == StageOp::Apply { "apply" } else { "teardown" };
            sw.pushes.push(format!("{}:{}", stage.as_str(), op));
            if sw.fail_stage == Some(stage) {
                return format!("<rpc-error>{} rejected</rpc-error>", stage);
            }
            sw.apply(stage, req);
            OK_RESPONSE.to_string()
        })
    }
}

#[async_trait]
impl DeviceAdapter for SimAdapter {
    async fn login(&self) -> Result<()> {
        let refused = self.with_switch(|sw| sw.fail_login)?;
        if refused {
            return Err(anyhow!("Authentication failed for {}", self.host));
        }
        Ok(())
    }

    async fn close(&self) {}

    async fn get_device_detail(&self) -> Result<DeviceDetail> {
        self.with_switch(|sw| sw.detail.clone())
    }

    async fn get_interfaces(&self) -> Result<Vec<DiscoveredInterface>> {
        self.with_switch(|sw| sw.interfaces.clone())
    }

    async fn get_lldps(&self) -> Result<Vec<AdjacencyRecord>> {
        self.with_switch(|sw| sw.lldps.clone())
    }

    async fn get_asn(&self) -> Result<String> {
        self.with_switch(|sw| sw.asn.clone())
    }

    async fn system_properties(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::SystemProperties, req)
    }

    async fn interfaces(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::Interfaces, req)
    }

    async fn mct_neighbors(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::MctNeighbors, req)
    }

    async fn bgp(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::Bgp, req)
    }

    async fn evpn(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::Evpn, req)
    }

    async fn overlay_gateway(&self, req: &StageRequest) -> Result<String> {
        self.stage(Stage::OverlayGateway, req)
    }

    async fn persist(&self) -> Result<String> {
        self.with_switch(|sw| {
            sw.pushes.push("persist".to_string());
            OK_RESPONSE.to_string()
        })
    }

    async fn cluster(&self, cluster: &ClusterConfig, _node: &ClusterMemberNode, op: ClusterOperation) -> Result<String> {
        self.with_switch(|sw| sw.pushes.push(format!("cluster:{}", op)))?;
        let mut state = self.fleet.lock();
        let members = state.clusters.entry(cluster.cluster_name.clone()).or_default();
        match op {
            ClusterOperation::Delete => {
                members.remove(&self.host);
            }
            ClusterOperation::Create | ClusterOperation::Update => {
                members.insert(self.host.clone());
            }
        }
        Ok(OK_RESPONSE.to_string())
    }

    async fn cluster_status(&self, cluster: &ClusterConfig) -> Result<ClusterStatus> {
        Ok(ClusterStatus { member_count: self.fleet.cluster_members(&cluster.cluster_name) })
    }
}
