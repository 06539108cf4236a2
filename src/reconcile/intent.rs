use anyhow::Result;
use std::collections::{HashMap, HashSet};

use super::{carry_tag, compare, tag_delta};
use crate::allocator::{Allocator, PairRequest};
use crate::db::Store;
use crate::models::*;
use crate::topology::{link_kind, LinkKind};
use crate::utils::strip_prefix;

/// Snapshot of a fabric's persisted state that device intent is derived from
#[derive(Debug, Clone)]
pub struct FabricView {
    pub fabric: Fabric,
    pub settings: FabricSettings,
    pub devices: HashMap<i64, Device>,
    pub switch_configs: HashMap<i64, SwitchConfig>,
    pub interfaces: HashMap<i64, Interface>,
    /// Links not scheduled for deletion
    pub links: Vec<LldpNeighbor>,
    /// Clusters not scheduled for deletion
    pub clusters: Vec<MctCluster>,
    pub racks: Vec<Rack>,
}

impl FabricView {
    pub async fn load(store: &Store, fabric: &Fabric, settings: &FabricSettings) -> Result<Self> {
        let devices = store.list_devices(fabric.id).await?;
        let switch_configs = store.list_switch_configs(fabric.id).await?;
        let interfaces = store.list_interfaces(fabric.id).await?;
        let links = store.list_lldp_neighbors(fabric.id).await?;
        let clusters = store.list_clusters(fabric.id).await?;
        let racks = store.list_racks(fabric.id).await?;

        Ok(Self {
            fabric: fabric.clone(),
            settings: settings.clone(),
            devices: devices.into_iter().map(|d| (d.id, d)).collect(),
            switch_configs: switch_configs.into_iter().map(|c| (c.device_id, c)).collect(),
            interfaces: interfaces.into_iter().map(|i| (i.id, i)).collect(),
            links: links.into_iter().filter(|l| l.config_type != ConfigType::Delete).collect(),
            clusters: clusters.into_iter().filter(|c| c.config_type != ConfigType::Delete).collect(),
            racks,
        })
    }

    fn observed_ip(&self, interface_id: i64) -> String {
        self.interfaces
            .get(&interface_id)
            .map(|i| i.ip_address.clone())
            .unwrap_or_default()
    }

    fn rack_of(&self, device_id: i64) -> Option<&Rack> {
        self.racks
            .iter()
            .find(|r| r.device_one_id == device_id || r.device_two_id == device_id)
    }
}

/// Interface and BGP neighbor configuration wanted on one device
#[derive(Debug, Clone, Default)]
pub struct DeviceIntent {
    pub interfaces: Vec<InterfaceConfig>,
    pub neighbors: Vec<BgpNeighborConfig>,
}

/// Derive the interface and neighbor intent of one device.
///
/// Numbered interfaces carry the tag of their pair reservation; every other
/// entry is left at None for `tag_interfaces`/`tag_neighbors` to decide.
pub async fn build_device_intent(view: &FabricView, allocator: &Allocator, device_id: i64) -> Result<DeviceIntent> {
    let mut intent = DeviceIntent::default();
    let (Some(device), Some(_)) = (view.devices.get(&device_id), view.switch_configs.get(&device_id)) else {
        return Ok(intent);
    };
    let settings = &view.settings;
    let clos = view.fabric.is_clos();

    for link in view.links.iter().filter(|l| l.device_one_id == device_id) {
        let Some(remote) = view.devices.get(&link.device_two_id) else {
            continue;
        };
        let remote_cfg = view.switch_configs.get(&remote.id);
        let kind = link_kind(link, &view.racks);
        let description = format!("Link to {} {}", remote.ip_address, remote.role);

        if kind.is_underlay() {
            if settings.is_numbered() {
                let pair = allocator
                    .reserve_or_obtain_pair(&PairRequest {
                        ip_type: ip_type::P2P.to_string(),
                        device_id,
                        interface_id: link.interface_one_id,
                        remote_device_id: remote.id,
                        remote_interface_id: link.interface_two_id,
                        observed_local: view.observed_ip(link.interface_one_id),
                        observed_remote: view.observed_ip(link.interface_two_id),
                        device_name: device.ip_address.clone(),
                    })
                    .await?;
                intent.interfaces.push(interface_config(device, link, &pair.local_ip, description, pair.config_type));
                if let Some(rc) = remote_cfg {
                    intent.neighbors.push(neighbor(
                        device,
                        remote.id,
                        strip_prefix(&pair.remote_ip),
                        &rc.local_as,
                        if clos { encap_type::VXLAN } else { "" },
                        neighbor_class::FABRIC,
                    ));
                }
            } else {
                let mut cfg = interface_config(device, link, "", description, ConfigType::None);
                cfg.donor_type = interface_type::LOOPBACK.to_string();
                cfg.donor_name = settings.loopback_port_number.clone();
                intent.interfaces.push(cfg);
                if let Some(rc) = remote_cfg.filter(|rc| !rc.loopback_ip.is_empty()) {
                    intent.neighbors.push(neighbor(
                        device,
                        remote.id,
                        &rc.loopback_ip,
                        &rc.local_as,
                        if clos { encap_type::VXLAN } else { "" },
                        neighbor_class::FABRIC,
                    ));
                }
            }
        } else if kind == LinkKind::IntraRack && link.interface_one_name == settings.rack_l3_backup_port {
            let pair = allocator
                .reserve_or_obtain_pair(&PairRequest {
                    ip_type: ip_type::MCT_L3_BACKUP.to_string(),
                    device_id,
                    interface_id: link.interface_one_id,
                    remote_device_id: remote.id,
                    remote_interface_id: link.interface_two_id,
                    observed_local: view.observed_ip(link.interface_one_id),
                    observed_remote: view.observed_ip(link.interface_two_id),
                    device_name: device.ip_address.clone(),
                })
                .await?;
            intent.interfaces.push(interface_config(device, link, &pair.local_ip, description, pair.config_type));
            if let Some(rc) = remote_cfg {
                intent.neighbors.push(neighbor(
                    device,
                    remote.id,
                    strip_prefix(&pair.remote_ip),
                    &rc.local_as,
                    "",
                    neighbor_class::MCT_L3_BACKUP,
                ));
            }
        }
    }

    if let Some(cluster) = view.clusters.iter().find(|c| c.has_member(device_id)) {
        let peer_ip = if cluster.device_one_id == device_id {
            &cluster.peer_two_ip
        } else {
            &cluster.peer_one_ip
        };
        let peer = cluster.peer_of(device_id).unwrap_or_default();
        if let Some(rc) = view.switch_configs.get(&peer) {
            if !peer_ip.is_empty() {
                intent.neighbors.push(neighbor(
                    device,
                    peer,
                    strip_prefix(peer_ip),
                    &rc.local_as,
                    encap_type::NSH,
                    neighbor_class::MCT_DATA_PLANE,
                ));
            }
        }
    }

    if !clos {
        intent.neighbors.extend(evpn_neighbors(view, device));
    }

    let mut seen = HashSet::new();
    intent
        .neighbors
        .retain(|n| seen.insert((n.neighbor_class.clone(), n.remote_ip.clone())));
    Ok(intent)
}

/// Loopback-to-loopback EVPN sessions towards every device of every rack
/// directly linked to this device's rack
fn evpn_neighbors(view: &FabricView, device: &Device) -> Vec<BgpNeighborConfig> {
    let Some(own) = view.rack_of(device.id) else {
        return Vec::new();
    };
    let members = [own.device_one_id, own.device_two_id];
    let mut remote_racks: Vec<&Rack> = Vec::new();
    for link in view.links.iter().filter(|l| members.contains(&l.device_one_id)) {
        if let Some(rack) = view.rack_of(link.device_two_id) {
            if rack.id != own.id && !remote_racks.iter().any(|r| r.id == rack.id) {
                remote_racks.push(rack);
            }
        }
    }

    let mut out = Vec::new();
    for rack in remote_racks {
        for remote_id in [rack.device_one_id, rack.device_two_id] {
            let Some(rc) = view.switch_configs.get(&remote_id) else {
                continue;
            };
            if rc.loopback_ip.is_empty() {
                continue;
            }
            out.push(neighbor(
                device,
                remote_id,
                &rc.loopback_ip,
                &rc.local_as,
                encap_type::VXLAN,
                neighbor_class::EVPN,
            ));
        }
    }
    out
}

fn interface_config(
    device: &Device,
    link: &LldpNeighbor,
    ip: &str,
    description: String,
    config_type: ConfigType,
) -> InterfaceConfig {
    InterfaceConfig {
        id: 0,
        fabric_id: device.fabric_id,
        device_id: device.id,
        interface_id: link.interface_one_id,
        int_type: link.interface_one_type.clone(),
        int_name: link.interface_one_name.clone(),
        ip_address: ip.to_string(),
        donor_type: String::new(),
        donor_name: String::new(),
        description,
        config_type,
    }
}

fn neighbor(
    device: &Device,
    remote_device_id: i64,
    remote_ip: &str,
    remote_as: &str,
    encap: &str,
    class: &str,
) -> BgpNeighborConfig {
    BgpNeighborConfig {
        id: 0,
        fabric_id: device.fabric_id,
        device_id: device.id,
        remote_device_id,
        remote_ip: remote_ip.to_string(),
        remote_as: remote_as.to_string(),
        encap_type: encap.to_string(),
        neighbor_class: class.to_string(),
        config_type: ConfigType::None,
    }
}

fn interface_changed(old: &InterfaceConfig, new: &InterfaceConfig) -> bool {
    old.ip_address != new.ip_address
        || old.donor_type != new.donor_type
        || old.donor_name != new.donor_name
        || old.description != new.description
}

/// Tag freshly derived interface configs against the persisted ones.
///
/// Addressed interfaces keep their reservation tag, promoted to Update when
/// only the description changed. Unnumbered interfaces have nothing to
/// observe and carry their previous tag. Interfaces no longer wanted are
/// returned tagged Delete.
pub fn tag_interfaces(old: Vec<InterfaceConfig>, new: Vec<InterfaceConfig>) -> Vec<InterfaceConfig> {
    let delta = compare(
        old,
        new,
        |c| (c.int_type.clone(), c.int_name.clone()),
        |a, b| !interface_changed(a, b),
    );

    let mut out = Vec::new();
    for mut cfg in delta.created {
        if !cfg.donor_type.is_empty() {
            cfg.config_type = carry_tag(None, true);
        }
        out.push(cfg);
    }
    for (prev, mut cfg) in delta.updated.into_iter().chain(delta.unchanged) {
        let changed = interface_changed(&prev, &cfg);
        cfg.id = prev.id;
        cfg.config_type = if cfg.donor_type.is_empty() {
            match cfg.config_type {
                ConfigType::None if changed => ConfigType::Update,
                other => other,
            }
        } else {
            carry_tag(Some(prev.config_type), changed)
        };
        out.push(cfg);
    }
    for mut cfg in delta.deleted {
        cfg.config_type = ConfigType::Delete;
        out.push(cfg);
    }
    out
}

/// Tag freshly derived BGP neighbors against the persisted ones
pub fn tag_neighbors(old: Vec<BgpNeighborConfig>, new: Vec<BgpNeighborConfig>) -> Vec<BgpNeighborConfig> {
    tag_delta(compare(
        old,
        new,
        |n| (n.neighbor_class.clone(), n.remote_ip.clone()),
        |a, b| a.remote_as == b.remote_as && a.encap_type == b.encap_type && a.remote_device_id == b.remote_device_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::test_support::*;

    fn iface(name: &str, ip: &str, tag: ConfigType) -> InterfaceConfig {
        InterfaceConfig {
            int_type: interface_type::ETHERNET.into(),
            int_name: name.into(),
            ip_address: ip.into(),
            description: "Link to 10.0.0.1 Spine".into(),
            config_type: tag,
            ..Default::default()
        }
    }

    fn bgp(ip: &str, asn: &str) -> BgpNeighborConfig {
        BgpNeighborConfig {
            remote_ip: ip.into(),
            remote_as: asn.into(),
            encap_type: encap_type::VXLAN.into(),
            neighbor_class: neighbor_class::FABRIC.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_interfaces_keeps_ids_and_deletes_stale() {
        let mut confirmed = iface("0/1", "10.10.10.3/31", ConfigType::None);
        confirmed.id = 4;
        let mut stale = iface("0/9", "10.10.10.5/31", ConfigType::None);
        stale.id = 5;

        let tagged = tag_interfaces(
            vec![confirmed, stale],
            vec![iface("0/1", "10.10.10.3/31", ConfigType::None), iface("0/2", "10.10.10.7/31", ConfigType::Create)],
        );
        let by_name: HashMap<&str, &InterfaceConfig> = tagged.iter().map(|c| (c.int_name.as_str(), c)).collect();
        assert_eq!(by_name["0/1"].id, 4);
        assert_eq!(by_name["0/1"].config_type, ConfigType::None);
        assert_eq!(by_name["0/2"].config_type, ConfigType::Create);
        assert_eq!(by_name["0/9"].config_type, ConfigType::Delete);
    }

    #[test]
    fn test_tag_interfaces_description_change_is_update() {
        let old = iface("0/1", "10.10.10.3/31", ConfigType::None);
        let mut new = iface("0/1", "10.10.10.3/31", ConfigType::None);
        new.description = "Link to 10.0.0.9 Spine".into();
        let tagged = tag_interfaces(vec![old], vec![new]);
        assert_eq!(tagged[0].config_type, ConfigType::Update);
    }

    #[test]
    fn test_tag_unnumbered_carries_pending() {
        let mut old = iface("0/1", "", ConfigType::Create);
        old.donor_type = interface_type::LOOPBACK.into();
        old.donor_name = "1".into();
        let new = old.clone();
        let tagged = tag_interfaces(vec![old.clone()], vec![new.clone()]);
        assert_eq!(tagged[0].config_type, ConfigType::Create);

        old.config_type = ConfigType::None;
        let tagged = tag_interfaces(vec![old], vec![new]);
        assert_eq!(tagged[0].config_type, ConfigType::None);
    }

    #[test]
    fn test_tag_neighbors() {
        let mut known = bgp("10.10.10.2", "64512");
        known.id = 7;
        let tagged = tag_neighbors(
            vec![known, bgp("10.10.10.8", "64512")],
            vec![bgp("10.10.10.2", "64513"), bgp("10.10.10.4", "64512")],
        );
        assert_eq!(tagged.len(), 3);
        assert_eq!(tagged.iter().find(|n| n.remote_ip == "10.10.10.2").map(|n| (n.id, n.config_type)), Some((7, ConfigType::Update)));
        assert_eq!(tagged.iter().find(|n| n.remote_ip == "10.10.10.4").map(|n| n.config_type), Some(ConfigType::Create));
        assert_eq!(tagged.iter().find(|n| n.remote_ip == "10.10.10.8").map(|n| n.config_type), Some(ConfigType::Delete));
    }

    async fn spine_leaf_view(settings: FabricSettings) -> (FabricView, Allocator, Device, Device) {
        let (allocator, store, fabric) = allocator_with(settings.clone()).await;
        let spine = device(&store, &fabric, "10.0.0.1", device_role::SPINE).await;
        let leaf = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;
        let mut view = FabricView {
            fabric,
            settings,
            devices: HashMap::new(),
            switch_configs: HashMap::new(),
            interfaces: HashMap::new(),
            links: Vec::new(),
            clusters: Vec::new(),
            racks: Vec::new(),
        };
        for (dev, asn, lo) in [(&spine, "64512", "172.31.254.1"), (&leaf, "65000", "172.31.254.2")] {
            view.switch_configs.insert(
                dev.id,
                SwitchConfig {
                    device_id: dev.id,
                    role: dev.role.clone(),
                    local_as: asn.into(),
                    loopback_ip: lo.into(),
                    ..Default::default()
                },
            );
            view.devices.insert(dev.id, dev.clone());
        }
        let link = LldpNeighbor {
            id: 1,
            fabric_id: spine.fabric_id,
            device_one_id: leaf.id,
            device_two_id: spine.id,
            device_one_role: leaf.role.clone(),
            device_two_role: spine.role.clone(),
            interface_one_id: 21,
            interface_two_id: 11,
            interface_one_type: interface_type::ETHERNET.into(),
            interface_one_name: "0/49".into(),
            interface_two_type: interface_type::ETHERNET.into(),
            interface_two_name: "0/1".into(),
            interface_one_ip: String::new(),
            interface_two_ip: String::new(),
            config_type: ConfigType::Create,
        };
        view.links.push(link);
        (view, allocator, spine, leaf)
    }

    #[tokio::test]
    async fn test_numbered_leaf_intent() {
        let (view, allocator, _spine, leaf) = spine_leaf_view(FabricSettings::default()).await;
        let intent = build_device_intent(&view, &allocator, leaf.id).await.unwrap();

        assert_eq!(intent.interfaces.len(), 1);
        let intf = &intent.interfaces[0];
        assert_eq!(intf.ip_address, "10.10.10.2/31");
        assert_eq!(intf.description, "Link to 10.0.0.1 Spine");
        assert_eq!(intf.config_type, ConfigType::Create);

        assert_eq!(intent.neighbors.len(), 1);
        assert_eq!(intent.neighbors[0].remote_ip, "10.10.10.3");
        assert_eq!(intent.neighbors[0].remote_as, "64512");
        assert_eq!(intent.neighbors[0].encap_type, encap_type::VXLAN);
    }

    #[tokio::test]
    async fn test_unnumbered_leaf_intent_borrows_loopback() {
        let settings = FabricSettings { p2p_ip_type: p2p_ip_type::UNNUMBERED.into(), ..Default::default() };
        let (view, allocator, _spine, leaf) = spine_leaf_view(settings).await;
        let intent = build_device_intent(&view, &allocator, leaf.id).await.unwrap();

        let intf = &intent.interfaces[0];
        assert!(intf.ip_address.is_empty());
        assert_eq!((intf.donor_type.as_str(), intf.donor_name.as_str()), ("loopback", "1"));
        assert_eq!(intent.neighbors[0].remote_ip, "172.31.254.1");
    }

    #[tokio::test]
    async fn test_missing_switch_config_yields_empty_intent() {
        let (mut view, allocator, spine, _leaf) = spine_leaf_view(FabricSettings::default()).await;
        view.switch_configs.remove(&spine.id);
        let intent = build_device_intent(&view, &allocator, spine.id).await.unwrap();
        assert!(intent.interfaces.is_empty());
        assert!(intent.neighbors.is_empty());
    }
}
