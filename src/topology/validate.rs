use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::models::*;

fn connected_pairs(links: &[LldpNeighbor]) -> HashSet<(i64, i64)> {
    links
        .iter()
        .filter(|l| l.config_type != ConfigType::Delete)
        .flat_map(|l| [(l.device_one_id, l.device_two_id), (l.device_two_id, l.device_one_id)])
        .collect()
}

/// Advisory report for a spine/leaf fabric
pub fn validate_clos(devices: &[Device], links: &[LldpNeighbor]) -> TopologyReport {
    let mut report = TopologyReport::default();
    let spines: Vec<&Device> = devices.iter().filter(|d| d.role == device_role::SPINE).collect();
    let leaves: Vec<&Device> = devices.iter().filter(|d| d.role == device_role::LEAF).collect();

    if spines.is_empty() {
        report.no_spines = true;
    }
    if leaves.is_empty() {
        report.no_leaves = true;
    }
    if report.no_spines || report.no_leaves {
        return report;
    }

    let connected = connected_pairs(links);

    for leaf in &leaves {
        for spine in &spines {
            if !connected.contains(&(leaf.id, spine.id)) {
                report.missing_links.push(format!(
                    "Leaf Device {} not connected to Spine Device {}",
                    leaf.ip_address, spine.ip_address
                ));
            }
        }
    }
    for spine in &spines {
        for leaf in &leaves {
            if !connected.contains(&(spine.id, leaf.id)) {
                report.missing_links.push(format!(
                    "Spine Device {} not connected to Leaf Device {}",
                    spine.ip_address, leaf.ip_address
                ));
            }
        }
    }

    for spine in &spines {
        for other in &spines {
            if spine.id != other.id && connected.contains(&(spine.id, other.id)) {
                report.spine_spine_links.push(format!(
                    "Spine Device {} connected to Spine Device {}",
                    spine.ip_address, other.ip_address
                ));
            }
        }
    }

    let mut leaf_peers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for leaf in &leaves {
        for other in &leaves {
            if leaf.id != other.id && connected.contains(&(leaf.id, other.id)) {
                leaf_peers
                    .entry(leaf.ip_address.as_str())
                    .or_default()
                    .insert(other.ip_address.as_str());
            }
        }
    }
    let mut reported = HashSet::new();
    for (leaf, peers) in &leaf_peers {
        for peer in peers {
            let key = if leaf < peer { (*leaf, *peer) } else { (*peer, *leaf) };
            if reported.insert(key) {
                report
                    .leaf_leaf_links
                    .push(format!("Leaf Device {} connected to Leaf Device {}", key.0, key.1));
            }
        }
        if peers.len() > 1 {
            report
                .leaf_leaf_links
                .push(format!("More than one Leaf Connected to Device {}", leaf));
        }
    }

    report
}

/// Advisory report for a rack fabric. Each rack pair must be joined on
/// every MCT port and on the L3 backup port, and every rack must reach at
/// least one other rack.
pub fn validate_non_clos(
    devices: &[Device],
    racks: &[Rack],
    links: &[LldpNeighbor],
    settings: &FabricSettings,
) -> TopologyReport {
    let mut report = TopologyReport {
        no_leaves: racks.is_empty(),
        ..Default::default()
    };
    let ips: HashMap<i64, &str> = devices.iter().map(|d| (d.id, d.ip_address.as_str())).collect();
    let active: Vec<&LldpNeighbor> = links.iter().filter(|l| l.config_type != ConfigType::Delete).collect();

    let joined_on = |a: i64, b: i64, port: &str| {
        active
            .iter()
            .any(|l| l.device_one_id == a && l.device_two_id == b && l.interface_one_name == port)
    };

    for rack in racks {
        for (a, b, ip_a, ip_b) in [
            (rack.device_one_id, rack.device_two_id, &rack.ip_one, &rack.ip_two),
            (rack.device_two_id, rack.device_one_id, &rack.ip_two, &rack.ip_one),
        ] {
            for port in &settings.rack_mct_ports {
                if !joined_on(a, b, port) {
                    report.missing_links.push(format!(
                        "Device {} is not connected to device {} on Mct port {}",
                        ip_a, ip_b, port
                    ));
                }
            }
            if !joined_on(a, b, &settings.rack_l3_backup_port) {
                report.missing_links.push(format!(
                    "Device {} is not connected to device {} on L3 backup port {}",
                    ip_a, ip_b, settings.rack_l3_backup_port
                ));
            }
        }
    }

    if racks.len() > 1 {
        for rack in racks {
            let members = [rack.device_one_id, rack.device_two_id];
            let reaches_other = active.iter().any(|l| {
                members.contains(&l.device_one_id)
                    && !members.contains(&l.device_two_id)
                    && ips.contains_key(&l.device_two_id)
            });
            if !reaches_other {
                report.missing_links.push(format!(
                    "rack[devices :{}, {}] is not connected to any other rack",
                    rack.ip_one, rack.ip_two
                ));
            }
        }
    }

    report
}
