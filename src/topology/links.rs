use std::collections::{HashMap, HashSet};

use crate::models::*;
use crate::utils::normalize_mac;

/// How a physical link is used by the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    SpineLeaf,
    SpineSpine,
    /// Candidate MCT member link between two leaves
    LeafLeaf,
    /// Underlay link between two different racks
    InterRack,
    /// Link between the two members of one rack
    IntraRack,
    Unknown,
}

impl LinkKind {
    /// Links that carry a routed point-to-point underlay session
    pub fn is_underlay(&self) -> bool {
        matches!(self, LinkKind::SpineLeaf | LinkKind::InterRack)
    }
}

pub fn classify_link(role_one: &str, role_two: &str, same_rack: bool) -> LinkKind {
    match (role_one, role_two) {
        (device_role::SPINE, device_role::LEAF) | (device_role::LEAF, device_role::SPINE) => LinkKind::SpineLeaf,
        (device_role::SPINE, device_role::SPINE) => LinkKind::SpineSpine,
        (device_role::LEAF, device_role::LEAF) => LinkKind::LeafLeaf,
        (device_role::RACK, device_role::RACK) if same_rack => LinkKind::IntraRack,
        (device_role::RACK, device_role::RACK) => LinkKind::InterRack,
        _ => LinkKind::Unknown,
    }
}

/// Kind of a stored link given the fabric's racks
pub fn link_kind(link: &LldpNeighbor, racks: &[Rack]) -> LinkKind {
    let same_rack = racks.iter().any(|r| {
        (r.device_one_id == link.device_one_id && r.device_two_id == link.device_two_id)
            || (r.device_one_id == link.device_two_id && r.device_two_id == link.device_one_id)
    });
    classify_link(&link.device_one_role, &link.device_two_role, same_rack)
}

/// Resolve adjacency records into links between fabric devices.
///
/// Remote ends are found by MAC address; when several interfaces share a
/// MAC the advertised remote port name picks one. Every link is returned
/// once per direction so either end can look it up, even when only one
/// side reported it.
pub fn build_links(
    fabric_id: i64,
    devices: &[Device],
    interfaces: &[Interface],
    records: &[(i64, AdjacencyRecord)],
) -> Vec<LldpNeighbor> {
    let by_id: HashMap<i64, &Device> = devices.iter().map(|d| (d.id, d)).collect();
    let mut by_mac: HashMap<String, Vec<&Interface>> = HashMap::new();
    let mut by_name: HashMap<(i64, &str, &str), &Interface> = HashMap::new();
    for intf in interfaces {
        if !by_id.contains_key(&intf.device_id) {
            continue;
        }
        if !intf.mac.is_empty() {
            by_mac.entry(normalize_mac(&intf.mac)).or_default().push(intf);
        }
        by_name.insert((intf.device_id, intf.int_type.as_str(), intf.int_name.as_str()), intf);
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for (device_id, rec) in records {
        let Some(local) = by_name.get(&(*device_id, rec.local_int_type.as_str(), rec.local_int_name.as_str())) else {
            tracing::debug!("No interface {} {} on device {}", rec.local_int_type, rec.local_int_name, device_id);
            continue;
        };
        let candidates: Vec<&Interface> = by_mac
            .get(&normalize_mac(&rec.remote_mac))
            .map(|list| list.iter().copied().filter(|i| i.device_id != *device_id).collect())
            .unwrap_or_default();
        let remote = match candidates.len() {
            0 => continue,
            1 => candidates[0],
            _ => match candidates.iter().find(|i| i.int_name == rec.remote_int_name) {
                Some(found) => *found,
                None => continue,
            },
        };

        for (one, two) in [(*local, remote), (remote, *local)] {
            if !seen.insert((one.id, two.id)) {
                continue;
            }
            let (Some(d1), Some(d2)) = (by_id.get(&one.device_id), by_id.get(&two.device_id)) else {
                continue;
            };
            links.push(LldpNeighbor {
                id: 0,
                fabric_id,
                device_one_id: d1.id,
                device_two_id: d2.id,
                device_one_role: d1.role.clone(),
                device_two_role: d2.role.clone(),
                interface_one_id: one.id,
                interface_two_id: two.id,
                interface_one_type: one.int_type.clone(),
                interface_one_name: one.int_name.clone(),
                interface_two_type: two.int_type.clone(),
                interface_two_name: two.int_name.clone(),
                interface_one_ip: one.ip_address.clone(),
                interface_two_ip: two.ip_address.clone(),
                config_type: ConfigType::Create,
            });
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dev(id: i64, ip: &str, role: &str) -> Device {
        Device {
            id,
            fabric_id: 1,
            ip_address: ip.into(),
            user_name: "admin".into(),
            password: String::new(),
            role: role.into(),
            model: String::new(),
            firmware: String::new(),
            hostname: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn intf(id: i64, device_id: i64, name: &str, mac: &str) -> Interface {
        Interface {
            id,
            fabric_id: 1,
            device_id,
            int_type: interface_type::ETHERNET.into(),
            int_name: name.into(),
            mac: mac.into(),
            ip_address: String::new(),
            speed: 10_000_000_000,
            config_type: ConfigType::None,
        }
    }

    fn rec(local: &str, local_mac: &str, remote_mac: &str) -> AdjacencyRecord {
        AdjacencyRecord {
            local_int_type: interface_type::ETHERNET.into(),
            local_int_name: local.into(),
            local_mac: local_mac.into(),
            remote_mac: remote_mac.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_link() {
        assert_eq!(classify_link(device_role::SPINE, device_role::LEAF, false), LinkKind::SpineLeaf);
        assert_eq!(classify_link(device_role::LEAF, device_role::LEAF, false), LinkKind::LeafLeaf);
        assert_eq!(classify_link(device_role::RACK, device_role::RACK, true), LinkKind::IntraRack);
        assert_eq!(classify_link(device_role::RACK, device_role::RACK, false), LinkKind::InterRack);
        assert!(LinkKind::InterRack.is_underlay());
        assert!(!LinkKind::LeafLeaf.is_underlay());
    }

    #[test]
    fn test_build_links_both_directions_from_one_report() {
        let devices = vec![dev(1, "10.0.0.1", device_role::SPINE), dev(2, "10.0.0.2", device_role::LEAF)];
        let interfaces = vec![
            intf(11, 1, "0/1", "aa:00:00:00:00:11"),
            intf(21, 2, "0/49", "aa:00:00:00:00:21"),
        ];
        let records = vec![(2, rec("0/49", "aa:00:00:00:00:21", "AA00.0000.0011"))];

        let links = build_links(1, &devices, &interfaces, &records);
        assert_eq!(links.len(), 2);
        assert_eq!((links[0].interface_one_id, links[0].interface_two_id), (21, 11));
        assert_eq!((links[1].interface_one_id, links[1].interface_two_id), (11, 21));
        assert_eq!(links[1].device_one_role, device_role::SPINE);
    }

    #[test]
    fn test_build_links_ignores_unknown_remote() {
        let devices = vec![dev(1, "10.0.0.1", device_role::SPINE)];
        let interfaces = vec![intf(11, 1, "0/1", "aa:00:00:00:00:11")];
        let records = vec![(1, rec("0/1", "aa:00:00:00:00:11", "bb:00:00:00:00:99"))];
        assert!(build_links(1, &devices, &interfaces, &records).is_empty());
    }
}
