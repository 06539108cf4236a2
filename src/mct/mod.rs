//! MCT cluster formation and change tracking.
//!
//! Clusters are formed from directly linked leaf pairs (CLOS) or from the
//! two members of a rack (non-CLOS). Each run compares the freshly formed
//! clusters with the persisted ones and records what changed in the
//! cluster's OperationBitMap.

mod diff;

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

pub use diff::{cluster_bitmap, has_updatable_bits};

use crate::adapter::is_routing_device;
use crate::allocator::Allocator;
use crate::db::Store;
use crate::errors::FabricError;
use crate::models::*;
use crate::reconcile::intent::FabricView;
use crate::reconcile::{compare, tag_delta};
use crate::topology::{link_kind, LinkKind};
use crate::utils::ip_to_u32;

/// Two devices linked closely enough to form a cluster
#[derive(Debug, Clone)]
pub struct ClusterCandidate {
    pub device_one: Device,
    pub device_two: Device,
    /// Member links, both directions
    pub links: Vec<LldpNeighbor>,
}

/// A cluster ready to be compared with the persisted state
#[derive(Debug, Clone)]
pub struct FormedCluster {
    pub cluster: MctCluster,
    pub ports: Vec<MctMemberPort>,
}

#[derive(Debug, Default)]
pub struct ClusterOutcome {
    /// Every persisted cluster after this run, Delete-tagged ones included
    pub clusters: Vec<MctCluster>,
    pub errors: Vec<OperationError>,
}

fn mgmt_order(a: &Device, b: &Device) -> std::cmp::Ordering {
    match (ip_to_u32(&a.ip_address), ip_to_u32(&b.ip_address)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.ip_address.cmp(&b.ip_address),
    }
}

/// Find the device pairs that should form clusters.
///
/// In a CLOS fabric a pair is two leaves each linked to exactly one other
/// leaf. In a rack fabric each rack is a pair, joined on its MCT ports.
pub fn find_candidates(view: &FabricView) -> Vec<ClusterCandidate> {
    let mut pairs: BTreeMap<(i64, i64), Vec<LldpNeighbor>> = BTreeMap::new();

    if view.fabric.is_clos() {
        let mut leaf_peers: HashMap<i64, Vec<i64>> = HashMap::new();
        for link in &view.links {
            if link_kind(link, &view.racks) == LinkKind::LeafLeaf {
                let peers = leaf_peers.entry(link.device_one_id).or_default();
                if !peers.contains(&link.device_two_id) {
                    peers.push(link.device_two_id);
                }
            }
        }
        for link in &view.links {
            if link_kind(link, &view.racks) != LinkKind::LeafLeaf {
                continue;
            }
            let single = |id: i64| leaf_peers.get(&id).map(|p| p.len() == 1).unwrap_or(false);
            if !single(link.device_one_id) || !single(link.device_two_id) {
                tracing::debug!(
                    "Device {} has more than one leaf neighbor, skipping cluster formation",
                    link.device_one_id
                );
                continue;
            }
            let key = (link.device_one_id.min(link.device_two_id), link.device_one_id.max(link.device_two_id));
            pairs.entry(key).or_default().push(link.clone());
        }
    } else {
        for rack in &view.racks {
            let key = (rack.device_one_id.min(rack.device_two_id), rack.device_one_id.max(rack.device_two_id));
            let links: Vec<LldpNeighbor> = view
                .links
                .iter()
                .filter(|l| {
                    ((l.device_one_id, l.device_two_id) == key || (l.device_two_id, l.device_one_id) == key)
                        && view.settings.rack_mct_ports.contains(&l.interface_one_name)
                })
                .cloned()
                .collect();
            if !links.is_empty() {
                pairs.insert(key, links);
            }
        }
    }

    pairs
        .into_iter()
        .filter_map(|((a, b), links)| {
            let (Some(one), Some(two)) = (view.devices.get(&a), view.devices.get(&b)) else {
                return None;
            };
            let (one, two) = if mgmt_order(one, two).is_le() { (one, two) } else { (two, one) };
            Some(ClusterCandidate { device_one: one.clone(), device_two: two.clone(), links })
        })
        .collect()
}

/// Check a candidate and shape it into a cluster.
///
/// Every member link must report the same non-zero speed and the two
/// platforms must be able to form a cluster together.
pub fn form_cluster<F>(view: &FabricView, candidate: &ClusterCandidate, compatible: F) -> Result<FormedCluster, FabricError>
where
    F: Fn(&str, &str) -> bool,
{
    let one = &candidate.device_one;
    let two = &candidate.device_two;

    if !compatible(&one.model, &two.model) {
        return Err(FabricError::ModelIncompatibility(format!(
            "Devices {} ({}) and {} ({}) are not MCT compatible",
            one.ip_address, one.model, two.ip_address, two.model
        )));
    }

    let mut speed = None;
    let mut ports = Vec::new();
    for link in &candidate.links {
        for (intf_id, device_id) in [(link.interface_one_id, link.device_one_id), (link.interface_two_id, link.device_two_id)] {
            let intf_speed = view.interfaces.get(&intf_id).map(|i| i.speed).unwrap_or(0);
            let name = view
                .interfaces
                .get(&intf_id)
                .map(|i| i.int_name.clone())
                .unwrap_or_default();
            let host = view
                .devices
                .get(&device_id)
                .map(|d| d.ip_address.clone())
                .unwrap_or_default();
            if intf_speed <= 0 {
                return Err(FabricError::SpeedIncompatibility(format!(
                    "Speed of interface {} on {} is unknown",
                    name, host
                )));
            }
            match speed {
                None => speed = Some(intf_speed),
                Some(s) if s != intf_speed => {
                    return Err(FabricError::SpeedIncompatibility(format!(
                        "Interface {} on {} has speed {} but other member links run at {}",
                        name, host, intf_speed, s
                    )))
                }
                Some(_) => {}
            }
        }
        ports.push(MctMemberPort {
            id: 0,
            fabric_id: view.fabric.id,
            device_id: link.device_one_id,
            remote_device_id: link.device_two_id,
            interface_id: link.interface_one_id,
            remote_interface_id: link.interface_two_id,
            int_type: link.interface_one_type.clone(),
            int_name: link.interface_one_name.clone(),
            remote_int_name: link.interface_two_name.clone(),
            speed: speed.unwrap_or_default(),
            config_type: ConfigType::Create,
        });
    }

    let settings = &view.settings;
    let cluster = MctCluster {
        id: 0,
        fabric_id: view.fabric.id,
        cluster_id: 0,
        name: String::new(),
        device_one_id: one.id,
        device_two_id: two.id,
        device_one_ip: one.ip_address.clone(),
        device_two_ip: two.ip_address.clone(),
        peer_one_ip: String::new(),
        peer_two_ip: String::new(),
        control_vlan: settings.control_vlan.clone(),
        control_ve: settings.control_ve.clone(),
        peer_interface_type: interface_type::PORT_CHANNEL.to_string(),
        peer_interface_name: if is_routing_device(&two.model) {
            settings.routing_mct_port_channel.clone()
        } else {
            settings.mct_port_channel.clone()
        },
        peer_interface_speed: speed.unwrap_or_default(),
        principal_priority: settings.mct_principal_priority.clone(),
        operation_bitmap: 0,
        config_type: ConfigType::Create,
    };
    Ok(FormedCluster { cluster, ports })
}

/// Form, diff and persist every cluster of a fabric.
///
/// New clusters are stored tagged Create with an empty bitmap. Known
/// clusters keep their id and name; changes set bits and tag them Update,
/// and a cluster never confirmed on the devices stays Create with the
/// CREATE bit. Clusters whose pair no longer qualifies are tagged Delete.
/// A pair that fails formation is reported and its stored cluster, if
/// any, is left untouched.
pub async fn reconcile_clusters<F>(
    store: &Store,
    allocator: &Allocator,
    view: &FabricView,
    compatible: F,
) -> Result<ClusterOutcome>
where
    F: Fn(&str, &str) -> bool,
{
    let mut outcome = ClusterOutcome::default();
    let persisted = store.list_clusters(view.fabric.id).await?;
    let persisted_ports = store.list_member_ports(view.fabric.id).await?;
    let mut kept: Vec<i64> = Vec::new();

    for candidate in find_candidates(view) {
        let existing = persisted
            .iter()
            .find(|c| c.has_member(candidate.device_one.id) && c.has_member(candidate.device_two.id));

        let formed = match form_cluster(view, &candidate, &compatible) {
            Ok(formed) => formed,
            Err(e) => {
                tracing::warn!(
                    "Cluster formation for {} and {} failed: {}",
                    candidate.device_one.ip_address,
                    candidate.device_two.ip_address,
                    e
                );
                outcome.errors.push(OperationError::new(
                    "MCT cluster formation",
                    &e,
                    &candidate.device_one.ip_address,
                ));
                if let Some(c) = existing {
                    kept.push(c.id);
                }
                continue;
            }
        };

        let (peer_one, peer_two) = match allocator
            .reserve_mct_pair(&candidate.device_one, &candidate.device_two)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(
                    "No peer pair for {} and {}: {}",
                    candidate.device_one.ip_address,
                    candidate.device_two.ip_address,
                    e
                );
                outcome.errors.push(OperationError::new(
                    "MCT peer IP reservation",
                    &e,
                    &candidate.device_one.ip_address,
                ));
                if let Some(c) = existing {
                    kept.push(c.id);
                }
                continue;
            }
        };
        let mut cluster = formed.cluster;
        cluster.peer_one_ip = peer_one;
        cluster.peer_two_ip = peer_two;

        let members = [candidate.device_one.id, candidate.device_two.id];
        let old_ports: Vec<MctMemberPort> = persisted_ports
            .iter()
            .filter(|p| members.contains(&p.device_id))
            .cloned()
            .collect();
        let delta = compare(old_ports, formed.ports, |p| p.key(), |a, b| a.speed == b.speed);
        let added = delta.created.len();
        let deleted = delta.deleted.iter().filter(|p| p.config_type != ConfigType::Delete).count();
        let ports = tag_delta(delta);

        match existing {
            None => {
                cluster.cluster_id = store.next_cluster_id(view.fabric.id).await?;
                cluster.name = format!("{}-cluster-{}", view.fabric.name, cluster.cluster_id);
                let created = store.create_cluster(&cluster).await?;
                tracing::info!("Formed cluster {} from {} and {}", created.name, created.device_one_ip, created.device_two_ip);
                kept.push(created.id);
            }
            Some(old) => {
                cluster.id = old.id;
                cluster.cluster_id = old.cluster_id;
                cluster.name = old.name.clone();
                let bitmap = cluster_bitmap(old, &cluster, added, deleted);
                (cluster.config_type, cluster.operation_bitmap) = match old.config_type {
                    ConfigType::Create => (ConfigType::Create, mct_bit::mask(mct_bit::CREATE)),
                    ConfigType::Delete => (ConfigType::Create, 0),
                    _ if bitmap != 0 => (ConfigType::Update, bitmap | old.operation_bitmap),
                    _ => (old.config_type, old.operation_bitmap),
                };
                if bitmap != 0 {
                    tracing::info!("Cluster {} changed: {:?}", cluster.name, mct_bit::names(bitmap));
                }
                store.update_cluster(&cluster).await?;
                kept.push(cluster.id);
            }
        }

        for port in &ports {
            store.upsert_member_port(port).await?;
        }
    }

    for old in persisted.iter().filter(|c| !kept.contains(&c.id) && c.config_type != ConfigType::Delete) {
        tracing::info!("Cluster {} no longer has two linked members, scheduling delete", old.name);
        let mut gone = old.clone();
        gone.config_type = ConfigType::Delete;
        store.update_cluster(&gone).await?;
        for port in persisted_ports.iter().filter(|p| old.has_member(p.device_id)) {
            let mut port = port.clone();
            port.config_type = ConfigType::Delete;
            store.upsert_member_port(&port).await?;
        }
    }

    outcome.clusters = store.list_clusters(view.fabric.id).await?;
    Ok(outcome)
}

/// Split clusters into dispatch batches.
///
/// With `force` every live cluster is re-created from scratch: it lands in
/// the Create batch with the CREATE bit set.
pub fn partition(clusters: &[MctCluster], force: bool) -> BTreeMap<ClusterOperation, Vec<MctCluster>> {
    let mut batches: BTreeMap<ClusterOperation, Vec<MctCluster>> = BTreeMap::new();
    for cluster in clusters {
        let op = match cluster.config_type {
            ConfigType::Delete => Some(ClusterOperation::Delete),
            _ if force => Some(ClusterOperation::Create),
            ConfigType::Create => Some(ClusterOperation::Create),
            ConfigType::Update => Some(ClusterOperation::Update),
            ConfigType::None => None,
        };
        let Some(op) = op else { continue };
        let mut cluster = cluster.clone();
        if force && op == ClusterOperation::Create {
            cluster.operation_bitmap |= mct_bit::mask(mct_bit::CREATE);
        }
        batches.entry(op).or_default().push(cluster);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::test_support::*;

    async fn leaf_pair(speed_one: i64, speed_two: i64) -> (Store, Allocator, FabricView) {
        leaf_pair_with(FabricSettings::default(), speed_one, speed_two).await
    }

    async fn leaf_pair_with(settings: FabricSettings, speed_one: i64, speed_two: i64) -> (Store, Allocator, FabricView) {
        let (allocator, store, fabric) = allocator_with(settings.clone()).await;
        let mut devices = HashMap::new();
        for (ip, model) in [("10.0.0.12", "3000_20.1"), ("10.0.0.11", "3000_20.2")] {
            let d = device(&store, &fabric, ip, device_role::LEAF).await;
            store
                .update_device_detail(d.id, &DeviceDetail { model: model.into(), ..Default::default() })
                .await
                .unwrap();
            let d = store.get_device(d.id).await.unwrap().unwrap();
            devices.insert(d.id, d);
        }
        let mut ids: Vec<i64> = devices.keys().copied().collect();
        ids.sort();
        let (a, b) = (ids[0], ids[1]);

        let mut interfaces = HashMap::new();
        for (id, dev, speed) in [(101, a, speed_one), (201, b, speed_two)] {
            interfaces.insert(
                id,
                Interface {
                    id,
                    fabric_id: fabric.id,
                    device_id: dev,
                    int_type: interface_type::ETHERNET.into(),
                    int_name: "0/50".into(),
                    mac: String::new(),
                    ip_address: String::new(),
                    speed,
                    config_type: ConfigType::None,
                },
            );
        }
        let link = |d1: i64, d2: i64, i1: i64, i2: i64| LldpNeighbor {
            id: 0,
            fabric_id: fabric.id,
            device_one_id: d1,
            device_two_id: d2,
            device_one_role: device_role::LEAF.into(),
            device_two_role: device_role::LEAF.into(),
            interface_one_id: i1,
            interface_two_id: i2,
            interface_one_type: interface_type::ETHERNET.into(),
            interface_one_name: "0/50".into(),
            interface_two_type: interface_type::ETHERNET.into(),
            interface_two_name: "0/50".into(),
            interface_one_ip: String::new(),
            interface_two_ip: String::new(),
            config_type: ConfigType::Create,
        };
        let view = FabricView {
            fabric: fabric.clone(),
            settings,
            devices,
            switch_configs: HashMap::new(),
            interfaces,
            links: vec![link(a, b, 101, 201), link(b, a, 201, 101)],
            clusters: Vec::new(),
            racks: Vec::new(),
        };
        (store, allocator, view)
    }

    fn same_type(a: &str, b: &str) -> bool {
        crate::utils::model_type(a) == crate::utils::model_type(b)
    }

    #[tokio::test]
    async fn test_linked_leaves_form_one_cluster() {
        let (store, allocator, view) = leaf_pair(10_000_000_000, 10_000_000_000).await;
        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.clusters.len(), 1);
        let cluster = &outcome.clusters[0];
        assert_eq!(cluster.operation_bitmap, 0);
        assert_eq!(cluster.config_type, ConfigType::Create);
        assert_eq!(cluster.name, "default-cluster-1");
        assert_eq!(cluster.device_one_ip, "10.0.0.11");
        assert_eq!(cluster.peer_one_ip, "10.20.20.2");
        assert_eq!(cluster.peer_two_ip, "10.20.20.3");
        assert_eq!(store.list_member_ports(view.fabric.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_speed_link_fails_formation() {
        let (store, allocator, view) = leaf_pair(10_000_000_000, 0).await;
        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();

        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].error, "Speed of interface 0/50 on 10.0.0.11 is unknown");
    }

    #[tokio::test]
    async fn test_incompatible_models_fail_formation() {
        let (store, allocator, view) = leaf_pair(10_000_000_000, 10_000_000_000).await;
        let outcome = reconcile_clusters(&store, &allocator, &view, |_, _| false).await.unwrap();
        assert!(outcome.clusters.is_empty());
        assert!(outcome.errors[0].error.contains("are not MCT compatible"));
    }

    #[tokio::test]
    async fn test_exhausted_peer_range_is_reported_per_cluster() {
        let settings = FabricSettings { mct_link_ip_range: "10.20.20.254/31".into(), ..Default::default() };
        let (store, allocator, view) = leaf_pair_with(settings, 10_000_000_000, 10_000_000_000).await;
        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();

        assert!(outcome.clusters.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].operation, "MCT peer IP reservation");
        assert_eq!(outcome.errors[0].host, "10.0.0.11");
        assert!(outcome.errors[0].error.contains("No free MCT peer pair"));
    }

    #[tokio::test]
    async fn test_confirmed_cluster_is_stable_and_removed_when_unlinked() {
        let (store, allocator, mut view) = leaf_pair(10_000_000_000, 10_000_000_000).await;
        reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();
        store.cleanup_fabric(view.fabric.id).await.unwrap();

        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();
        assert_eq!(outcome.clusters[0].config_type, ConfigType::None);
        assert_eq!(outcome.clusters[0].operation_bitmap, 0);

        view.settings.control_ve = "4091".into();
        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();
        assert_eq!(outcome.clusters[0].config_type, ConfigType::Update);
        assert_eq!(outcome.clusters[0].operation_bitmap, mct_bit::mask(mct_bit::CONTROL_VE));

        view.links.clear();
        let outcome = reconcile_clusters(&store, &allocator, &view, same_type).await.unwrap();
        assert_eq!(outcome.clusters[0].config_type, ConfigType::Delete);
        let batches = partition(&outcome.clusters, false);
        assert_eq!(batches[&ClusterOperation::Delete].len(), 1);
    }

    #[test]
    fn test_partition_force_recreates() {
        let clusters = vec![
            MctCluster { id: 1, config_type: ConfigType::None, ..Default::default() },
            MctCluster { id: 2, config_type: ConfigType::Update, operation_bitmap: 1, ..Default::default() },
            MctCluster { id: 3, config_type: ConfigType::Delete, ..Default::default() },
        ];
        let normal = partition(&clusters, false);
        assert!(!normal.contains_key(&ClusterOperation::Create));
        assert_eq!(normal[&ClusterOperation::Update][0].id, 2);

        let forced = partition(&clusters, true);
        assert_eq!(forced[&ClusterOperation::Create].len(), 2);
        assert!(forced[&ClusterOperation::Create]
            .iter()
            .all(|c| mct_bit::is_set(c.operation_bitmap, mct_bit::CREATE)));
        assert_eq!(forced[&ClusterOperation::Delete].len(), 1);
    }
}
