use crate::models::{mct_bit, MctCluster};

/// Fold every changed cluster attribute into an OperationBitMap.
/// Member port additions and removals are counted by the caller.
pub fn cluster_bitmap(old: &MctCluster, new: &MctCluster, ports_added: usize, ports_deleted: usize) -> u64 {
    let checks = [
        (
            mct_bit::PEER_IP,
            old.peer_one_ip != new.peer_one_ip || old.peer_two_ip != new.peer_two_ip,
        ),
        (
            mct_bit::CONTROL_VE,
            old.control_ve != new.control_ve || old.control_vlan != new.control_vlan,
        ),
        (mct_bit::MEMBER_PORT_ADD, ports_added > 0),
        (mct_bit::MEMBER_PORT_DELETE, ports_deleted > 0),
        (mct_bit::PEER_SPEED, old.peer_interface_speed != new.peer_interface_speed),
        (mct_bit::PRIORITY, old.principal_priority != new.principal_priority),
        (
            mct_bit::PEER_INTERFACE,
            old.peer_interface_type != new.peer_interface_type || old.peer_interface_name != new.peer_interface_name,
        ),
    ];
    checks
        .iter()
        .filter(|(_, changed)| *changed)
        .fold(0, |bitmap, (bit, _)| bitmap | mct_bit::mask(*bit))
}

/// True when the bitmap carries at least one bit an in-place update can apply
pub fn has_updatable_bits(bitmap: u64) -> bool {
    mct_bit::UPDATABLE.iter().any(|bit| mct_bit::is_set(bitmap, *bit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> MctCluster {
        MctCluster {
            peer_one_ip: "10.20.20.2".into(),
            peer_two_ip: "10.20.20.3".into(),
            control_vlan: "4090".into(),
            control_ve: "4090".into(),
            peer_interface_type: "Port-channel".into(),
            peer_interface_name: "1024".into(),
            peer_interface_speed: 10_000_000_000,
            principal_priority: "0".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unchanged_cluster_has_empty_bitmap() {
        assert_eq!(cluster_bitmap(&cluster(), &cluster(), 0, 0), 0);
    }

    #[test]
    fn test_peer_ip_change_sets_only_peer_ip_bit() {
        let mut new = cluster();
        new.peer_two_ip = "10.20.20.5".into();
        let bitmap = cluster_bitmap(&cluster(), &new, 0, 0);
        assert_eq!(bitmap, mct_bit::mask(mct_bit::PEER_IP));
        assert_eq!(mct_bit::names(bitmap), vec!["peer-ip"]);
    }

    #[test]
    fn test_multi_attribute_change() {
        let mut new = cluster();
        new.peer_one_ip = "10.20.20.4".into();
        new.control_ve = "4091".into();
        new.peer_interface_speed = 25_000_000_000;
        let bitmap = cluster_bitmap(&cluster(), &new, 0, 0);
        assert_eq!(bitmap, 0b1_0011);
        assert!(has_updatable_bits(bitmap));
        assert!(!has_updatable_bits(mct_bit::mask(mct_bit::CREATE)));
    }

    #[test]
    fn test_member_port_changes() {
        let bitmap = cluster_bitmap(&cluster(), &cluster(), 1, 2);
        assert_eq!(
            bitmap,
            mct_bit::mask(mct_bit::MEMBER_PORT_ADD) | mct_bit::mask(mct_bit::MEMBER_PORT_DELETE)
        );
    }
}
