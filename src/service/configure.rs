use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use tracing::Instrument;
use uuid::Uuid;

use super::FabricService;
use crate::mct::partition;
use crate::models::*;
use crate::utils::strip_prefix;

/// Promote untouched entries so a forced request pushes everything
fn retag(tag: ConfigType, force: bool) -> ConfigType {
    if force && tag == ConfigType::None {
        ConfigType::Create
    } else {
        tag
    }
}

fn config_interface(cfg: &InterfaceConfig, force: bool) -> ConfigInterface {
    ConfigInterface {
        int_type: cfg.int_type.clone(),
        int_name: cfg.int_name.clone(),
        ip_address: cfg.ip_address.clone(),
        donor_type: cfg.donor_type.clone(),
        donor_name: cfg.donor_name.clone(),
        description: cfg.description.clone(),
        config_type: retag(cfg.config_type, force),
    }
}

fn config_neighbor(cfg: &BgpNeighborConfig, force: bool) -> ConfigBgpNeighbor {
    ConfigBgpNeighbor {
        remote_ip: cfg.remote_ip.clone(),
        remote_as: cfg.remote_as.clone(),
        encap_type: cfg.encap_type.clone(),
        neighbor_class: cfg.neighbor_class.clone(),
        config_type: retag(cfg.config_type, force),
    }
}

/// Stored rows of a fabric, grouped the way the action request needs them
struct FabricRows {
    devices: Vec<Device>,
    configs: HashMap<i64, SwitchConfig>,
    interfaces: HashMap<i64, Vec<InterfaceConfig>>,
    neighbors: HashMap<i64, Vec<BgpNeighborConfig>>,
    clusters: Vec<MctCluster>,
    ports: Vec<MctMemberPort>,
}

impl FabricRows {
    async fn load(svc: &FabricService, fabric_id: i64) -> Result<Self> {
        let mut interfaces: HashMap<i64, Vec<InterfaceConfig>> = HashMap::new();
        for cfg in svc.store.list_interface_configs(fabric_id).await? {
            interfaces.entry(cfg.device_id).or_default().push(cfg);
        }
        let mut neighbors: HashMap<i64, Vec<BgpNeighborConfig>> = HashMap::new();
        for cfg in svc.store.list_bgp_neighbors(fabric_id).await? {
            neighbors.entry(cfg.device_id).or_default().push(cfg);
        }
        Ok(Self {
            devices: svc.store.list_devices(fabric_id).await?,
            configs: svc
                .store
                .list_switch_configs(fabric_id)
                .await?
                .into_iter()
                .map(|c| (c.device_id, c))
                .collect(),
            interfaces,
            neighbors,
            clusters: svc.store.list_clusters(fabric_id).await?,
            ports: svc.store.list_member_ports(fabric_id).await?,
        })
    }

    fn device(&self, id: i64) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn is_secondary(&self, device_id: i64) -> bool {
        self.clusters
            .iter()
            .any(|c| c.config_type != ConfigType::Delete && c.device_two_id == device_id)
    }

    fn host_config(&self, device: &Device, cfg: &SwitchConfig, settings: &FabricSettings, force: bool) -> HostConfig {
        let secondary = self.is_secondary(device.id);
        let (mct_neighbors, bgp_neighbors): (Vec<&BgpNeighborConfig>, Vec<&BgpNeighborConfig>) = self
            .neighbors
            .get(&device.id)
            .map(|n| n.iter().partition(|n| n.neighbor_class == neighbor_class::MCT_DATA_PLANE))
            .unwrap_or_default();

        HostConfig {
            device_id: device.id,
            host: device.ip_address.clone(),
            user_name: device.user_name.clone(),
            password: device.password.clone(),
            model: device.model.clone(),
            role: device.role.clone(),
            local_as: cfg.local_as.clone(),
            as_config_type: retag(cfg.as_config_type, force),
            loopback_port_number: settings.loopback_port_number.clone(),
            loopback_ip: cfg.loopback_ip.clone(),
            loopback_config_type: retag(cfg.loopback_config_type, force),
            vtep_loopback_port_number: settings.vtep_loopback_port_number.clone(),
            vtep_loopback_ip: cfg.vtep_loopback_ip.clone(),
            vtep_loopback_config_type: if cfg.vtep_loopback_ip.is_empty() {
                cfg.vtep_loopback_config_type
            } else {
                retag(cfg.vtep_loopback_config_type, force)
            },
            interfaces: self
                .interfaces
                .get(&device.id)
                .map(|list| list.iter().map(|i| config_interface(i, force)).collect())
                .unwrap_or_default(),
            bgp_neighbors: bgp_neighbors.into_iter().map(|n| config_neighbor(n, force)).collect(),
            mct_neighbors: mct_neighbors.into_iter().map(|n| config_neighbor(n, force)).collect(),
            configure_overlay_gateway: settings.configure_overlay_gateway
                && device_role::is_edge(&device.role)
                && !secondary,
            mct_secondary_node: secondary,
        }
    }

    /// Both node views of one cluster. A member no longer in the fabric
    /// is left out.
    fn cluster_config(&self, fabric: &Fabric, settings: &FabricSettings, cluster: &MctCluster) -> ClusterConfig {
        let nodes = [
            (cluster.device_one_id, "1", &cluster.peer_one_ip, &cluster.peer_two_ip, cluster.device_two_id),
            (cluster.device_two_id, "2", &cluster.peer_two_ip, &cluster.peer_one_ip, cluster.device_one_id),
        ];
        let members = nodes
            .into_iter()
            .filter_map(|(device_id, node_id, own_ip, peer_ip, partner_id)| {
                let device = self.device(device_id)?;
                Some(ClusterMemberNode {
                    device_id,
                    mgmt_ip: device.ip_address.clone(),
                    user_name: device.user_name.clone(),
                    password: device.password.clone(),
                    model: device.model.clone(),
                    node_id: node_id.to_string(),
                    local_peer_ip: format!("{}/31", strip_prefix(own_ip)),
                    peer_ip: strip_prefix(peer_ip).to_string(),
                    peer_loopback_ip: self
                        .configs
                        .get(&partner_id)
                        .map(|c| c.loopback_ip.clone())
                        .unwrap_or_default(),
                    principal_priority: cluster.principal_priority.clone(),
                    peer_interface_type: cluster.peer_interface_type.clone(),
                    peer_interface_name: cluster.peer_interface_name.clone(),
                    peer_interface_speed: cluster.peer_interface_speed.to_string(),
                    member_ports: self
                        .ports
                        .iter()
                        .filter(|p| p.device_id == device_id)
                        .map(|p| InterNodeLinkPort {
                            int_type: p.int_type.clone(),
                            int_name: p.int_name.clone(),
                            config_type: p.config_type,
                        })
                        .collect(),
                    bfd_rx: settings.bfd_rx.clone(),
                    bfd_tx: settings.bfd_tx.clone(),
                    bfd_multiplier: settings.bfd_multiplier.clone(),
                })
            })
            .collect();

        ClusterConfig {
            fabric_name: fabric.name.clone(),
            cluster_name: cluster.name.clone(),
            cluster_id: cluster.cluster_id.to_string(),
            control_vlan: cluster.control_vlan.clone(),
            control_ve: cluster.control_ve.clone(),
            operation_bitmap: cluster.operation_bitmap,
            members,
        }
    }
}

impl FabricService {
    /// The action request the next configure call would push
    pub async fn get_action_request_object(&self, name: &str, force: bool) -> Result<FabricActionRequest> {
        let fabric = self.get_fabric(name).await?;
        let settings = self.store.get_fabric_settings(fabric.id).await?;
        self.action_request(&fabric, &settings, force).await
    }

    async fn action_request(&self, fabric: &Fabric, settings: &FabricSettings, force: bool) -> Result<FabricActionRequest> {
        let rows = FabricRows::load(self, fabric.id).await?;
        let hosts = rows
            .devices
            .iter()
            .filter_map(|d| rows.configs.get(&d.id).map(|cfg| rows.host_config(d, cfg, settings, force)))
            .collect();
        let clusters = partition(&rows.clusters, force)
            .into_iter()
            .map(|(op, batch)| (op, batch.iter().map(|c| rows.cluster_config(fabric, settings, c)).collect()))
            .collect();

        Ok(FabricActionRequest {
            fabric_name: fabric.name.clone(),
            fabric_type: fabric.fabric_type.clone(),
            settings: settings.clone(),
            hosts,
            clusters,
        })
    }

    /// Teardown of a set of devices: their hosts plus every cluster one of
    /// them belongs to, scheduled for deletion
    pub(super) async fn teardown_request(
        &self,
        fabric: &Fabric,
        settings: &FabricSettings,
        targets: &[Device],
    ) -> Result<FabricActionRequest> {
        let rows = FabricRows::load(self, fabric.id).await?;
        let hosts = targets
            .iter()
            .map(|d| {
                let cfg = rows.configs.get(&d.id).cloned().unwrap_or_else(|| SwitchConfig {
                    device_id: d.id,
                    role: d.role.clone(),
                    ..Default::default()
                });
                rows.host_config(d, &cfg, settings, false)
            })
            .collect();
        let doomed: Vec<ClusterConfig> = rows
            .clusters
            .iter()
            .filter(|c| targets.iter().any(|d| c.has_member(d.id)))
            .map(|c| rows.cluster_config(fabric, settings, c))
            .collect();

        let mut clusters = BTreeMap::new();
        if !doomed.is_empty() {
            clusters.insert(ClusterOperation::Delete, doomed);
        }
        Ok(FabricActionRequest {
            fabric_name: fabric.name.clone(),
            fabric_type: fabric.fabric_type.clone(),
            settings: settings.clone(),
            hosts,
            clusters,
        })
    }

    /// Push the fabric. When every operation succeeded the stored tags are
    /// confirmed; otherwise they stay pending for the next run.
    pub async fn configure_fabric(&self, name: &str, req: &ConfigureFabricRequest) -> Result<ConfigureFabricResponse> {
        let fabric = self.get_fabric(name).await?;
        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;
        let settings = self.store.get_fabric_settings(fabric.id).await?;

        let request = self.action_request(&fabric, &settings, req.force).await?;
        let span = tracing::info_span!("configure", fabric = %fabric.name, run = %Uuid::new_v4());
        let errors = self.engine.configure(&request, req.persist).instrument(span).await?;
        if errors.is_empty() {
            self.cleanup_fabric_state(&fabric, &settings).await?;
        } else {
            tracing::warn!(
                "Configure of fabric {} had {} errors, keeping pending state",
                fabric.name,
                errors.len()
            );
        }

        Ok(ConfigureFabricResponse { fabric_name: fabric.name, fabric_id: fabric.id, errors })
    }

    /// Confirm the stored state of a fabric as applied
    pub async fn cleanup_db_after_configure_success(&self, name: &str) -> Result<()> {
        let fabric = self.get_fabric(name).await?;
        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;
        let settings = self.store.get_fabric_settings(fabric.id).await?;
        self.cleanup_fabric_state(&fabric, &settings).await
    }

    async fn cleanup_fabric_state(&self, fabric: &Fabric, settings: &FabricSettings) -> Result<()> {
        let allocator = self.allocator(fabric, settings);
        let gone: Vec<LldpNeighbor> = self
            .store
            .list_lldp_neighbors(fabric.id)
            .await?
            .into_iter()
            .filter(|l| l.config_type == ConfigType::Delete)
            .collect();
        for link in &gone {
            for kind in [ip_type::P2P, ip_type::MCT_L3_BACKUP] {
                allocator
                    .release_pair(kind, link.interface_one_id, link.interface_two_id)
                    .await?;
            }
        }

        let dissolved: Vec<MctCluster> = self
            .store
            .list_clusters(fabric.id)
            .await?
            .into_iter()
            .filter(|c| c.config_type == ConfigType::Delete)
            .collect();
        for cluster in &dissolved {
            allocator
                .release_mct_pair(cluster.device_one_id, cluster.device_two_id)
                .await?;
        }

        self.store.cleanup_fabric(fabric.id).await?;
        tracing::info!(
            "Fabric {} state confirmed, {} stale links and {} clusters released",
            fabric.name,
            gone.len(),
            dissolved.len()
        );
        Ok(())
    }
}
