use anyhow::Result;

use super::Allocator;
use crate::errors::FabricError;
use crate::models::*;
use crate::reconcile::classify;
use crate::utils::{cidr_contains, pair_peer, parse_cidr, same_subnet, strip_prefix, u32_to_ip};

/// Usable /31 pairs of a range. Addresses ending in .0, .1, .254 and .255
/// are skipped, the rest are paired as consecutive even/odd addresses.
pub(crate) fn pair_pool(range: &str) -> Vec<(u32, u32)> {
    let Some((network, broadcast, _)) = parse_cidr(range) else {
        return Vec::new();
    };
    let usable = |addr: u32| !matches!(addr & 0xff, 0 | 1 | 254 | 255);
    let start = network & !1;
    (start..broadcast)
        .step_by(2)
        .filter(|a| *a >= network && usable(*a) && usable(a + 1))
        .map(|a| (a, a + 1))
        .collect()
}

/// One end of a point-to-point link asking for its addresses
#[derive(Debug, Clone, Default)]
pub struct PairRequest {
    pub ip_type: String,
    pub device_id: i64,
    pub interface_id: i64,
    pub remote_device_id: i64,
    pub remote_interface_id: i64,
    /// Addresses currently configured on either end, prefix optional
    pub observed_local: String,
    pub observed_remote: String,
    /// Name used in error messages
    pub device_name: String,
}

/// Addresses of both ends with their /31 prefix
#[derive(Debug, Clone, PartialEq)]
pub struct PairReservation {
    pub local_ip: String,
    pub remote_ip: String,
    pub config_type: ConfigType,
}

impl Allocator {
    fn pair_range(&self, kind: &str) -> &str {
        match kind {
            ip_type::MCT => &self.settings.mct_link_ip_range,
            ip_type::MCT_L3_BACKUP => &self.settings.mct_l3_backup_ip_range,
            _ => &self.settings.p2p_link_range,
        }
    }

    /// Reserve the /31 for a link, or hand back the one already recorded.
    ///
    /// Addresses found on the device win when they form a valid pair in the
    /// range. With only one end addressed the other end of its /31 is used.
    /// With nothing on the wire the recorded pair is re-pushed, or the
    /// lowest free pair is taken.
    pub async fn reserve_or_obtain_pair(&self, req: &PairRequest) -> Result<PairReservation> {
        let _guard = self.lock.lock().await;

        let range = self.pair_range(&req.ip_type).to_string();
        let pairs = self.store.list_used_ip_pairs(self.fabric_id, &req.ip_type).await?;
        let existing = pairs
            .iter()
            .find(|p| p.joins_interfaces(req.interface_id, req.remote_interface_id))
            .cloned();

        let local = strip_prefix(&req.observed_local).to_string();
        let remote = strip_prefix(&req.observed_remote).to_string();
        for ip in [&local, &remote] {
            if !ip.is_empty() && !cidr_contains(&range, ip) {
                return Err(FabricError::range(
                    &req.device_name,
                    format!("IP {} on {} not in range {}", ip, req.device_name, range),
                )
                .into());
            }
        }

        let desired = match (local.is_empty(), remote.is_empty()) {
            (false, false) => {
                if local == remote || !same_subnet(&local, &remote, 31) {
                    return Err(FabricError::conflict(
                        &req.device_name,
                        format!("IP pair {}, {} on {} are not in the same /31", local, remote, req.device_name),
                    )
                    .into());
                }
                (local.clone(), remote.clone())
            }
            (false, true) => (local.clone(), pair_peer(&local).unwrap_or_default()),
            (true, false) => (pair_peer(&remote).unwrap_or_default(), remote.clone()),
            (true, true) => match existing.as_ref().and_then(|p| p.oriented(req.interface_id)) {
                Some(pair) => pair,
                None => {
                    let (a, b) = pair_pool(&range)
                        .into_iter()
                        .map(|(a, b)| (u32_to_ip(a), u32_to_ip(b)))
                        .find(|(a, b)| !pairs.iter().any(|p| p.holds_ip(a) || p.holds_ip(b)))
                        .ok_or_else(|| {
                            FabricError::range(&req.device_name, format!("No free IP pair in range {}", range))
                        })?;
                    (a, b)
                }
            },
        };

        let clash = pairs.iter().find(|p| {
            Some(p.id) != existing.as_ref().map(|e| e.id)
                && (p.holds_ip(&desired.0) || p.holds_ip(&desired.1))
        });
        if let Some(other) = clash {
            return Err(FabricError::conflict(
                &req.device_name,
                format!(
                    "IP pair {}, {} is already used by another link",
                    other.ip_one, other.ip_two
                ),
            )
            .into());
        }

        let previous = existing.as_ref().and_then(|p| p.oriented(req.interface_id));
        if previous.as_ref() != Some(&desired) {
            if let Some(old) = &existing {
                self.store.delete_used_ip_pair(old.id).await?;
            }
            self.store
                .insert_used_ip_pair(&UsedIpPair {
                    id: 0,
                    fabric_id: self.fabric_id,
                    ip_type: req.ip_type.clone(),
                    ip_one: desired.0.clone(),
                    ip_two: desired.1.clone(),
                    device_one_id: req.device_id,
                    device_two_id: req.remote_device_id,
                    interface_one_id: req.interface_id,
                    interface_two_id: req.remote_interface_id,
                })
                .await?;
        }

        let with_prefix = |ip: &str| format!("{}/31", ip);
        let config_type = classify(
            &req.observed_local_with_prefix(),
            previous.as_ref().map(|(l, _)| with_prefix(l)).as_deref(),
            &with_prefix(&desired.0),
        );
        Ok(PairReservation {
            local_ip: with_prefix(&desired.0),
            remote_ip: with_prefix(&desired.1),
            config_type,
        })
    }

    /// Control-VE addresses of an MCT pair, keyed by the two devices.
    /// Returns (address of `device_one`, address of `device_two`).
    pub async fn reserve_mct_pair(&self, device_one: &Device, device_two: &Device) -> Result<(String, String)> {
        let _guard = self.lock.lock().await;

        let range = self.settings.mct_link_ip_range.clone();
        let pairs = self.store.list_used_ip_pairs(self.fabric_id, ip_type::MCT).await?;
        if let Some(pair) = pairs.iter().find(|p| p.joins_devices(device_one.id, device_two.id)) {
            if let Some(oriented) = pair.oriented_for_device(device_one.id) {
                return Ok(oriented);
            }
        }

        let (a, b) = pair_pool(&range)
            .into_iter()
            .map(|(a, b)| (u32_to_ip(a), u32_to_ip(b)))
            .find(|(a, b)| !pairs.iter().any(|p| p.holds_ip(a) || p.holds_ip(b)))
            .ok_or_else(|| {
                FabricError::range(&device_one.ip_address, format!("No free MCT peer pair in range {}", range))
            })?;

        self.store
            .insert_used_ip_pair(&UsedIpPair {
                id: 0,
                fabric_id: self.fabric_id,
                ip_type: ip_type::MCT.to_string(),
                ip_one: a.clone(),
                ip_two: b.clone(),
                device_one_id: device_one.id,
                device_two_id: device_two.id,
                interface_one_id: 0,
                interface_two_id: 0,
            })
            .await?;
        Ok((a, b))
    }

    /// Free the control-VE pair of two devices
    pub async fn release_mct_pair(&self, device_one_id: i64, device_two_id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let pairs = self.store.list_used_ip_pairs(self.fabric_id, ip_type::MCT).await?;
        for pair in pairs.iter().filter(|p| p.joins_devices(device_one_id, device_two_id)) {
            self.store.delete_used_ip_pair(pair.id).await?;
        }
        Ok(())
    }

    /// Free the /31 joining two interfaces, if one is recorded
    pub async fn release_pair(&self, kind: &str, interface_one_id: i64, interface_two_id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let pairs = self.store.list_used_ip_pairs(self.fabric_id, kind).await?;
        for pair in pairs.iter().filter(|p| p.joins_interfaces(interface_one_id, interface_two_id)) {
            self.store.delete_used_ip_pair(pair.id).await?;
        }
        Ok(())
    }
}

impl PairRequest {
    fn observed_local_with_prefix(&self) -> String {
        let ip = strip_prefix(&self.observed_local);
        if ip.is_empty() {
            String::new()
        } else {
            format!("{}/31", ip)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tokio_test::assert_err;

    fn request(device: &Device, intf: i64, remote: &Device, remote_intf: i64) -> PairRequest {
        PairRequest {
            ip_type: ip_type::P2P.to_string(),
            device_id: device.id,
            interface_id: intf,
            remote_device_id: remote.id,
            remote_interface_id: remote_intf,
            device_name: device.ip_address.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pair_pool_skips_reserved_octets() {
        let pool = pair_pool("10.10.10.0/23");
        assert_eq!((u32_to_ip(pool[0].0), u32_to_ip(pool[0].1)), ("10.10.10.2".into(), "10.10.10.3".into()));
        assert!(pool.iter().all(|(a, b)| b - a == 1 && a % 2 == 0));
        assert!(!pool.iter().any(|(a, _)| u32_to_ip(*a) == "10.10.11.0"));
        assert_eq!(u32_to_ip(pool.last().unwrap().1), "10.10.11.253");
    }

    #[tokio::test]
    async fn test_pair_lookup_from_either_end() {
        let (allocator, store, fabric) = allocator_with(FabricSettings::default()).await;
        let spine = device(&store, &fabric, "10.0.0.1", device_role::SPINE).await;
        let leaf = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;

        let from_spine = allocator.reserve_or_obtain_pair(&request(&spine, 11, &leaf, 21)).await.unwrap();
        assert_eq!(from_spine.local_ip, "10.10.10.2/31");
        assert_eq!(from_spine.remote_ip, "10.10.10.3/31");
        assert_eq!(from_spine.config_type, ConfigType::Create);

        let from_leaf = allocator.reserve_or_obtain_pair(&request(&leaf, 21, &spine, 11)).await.unwrap();
        assert_eq!(from_leaf.local_ip, "10.10.10.3/31");
        assert_eq!(from_leaf.remote_ip, "10.10.10.2/31");

        let other = allocator.reserve_or_obtain_pair(&request(&spine, 12, &leaf, 22)).await.unwrap();
        assert_eq!(other.local_ip, "10.10.10.4/31");
        assert_eq!(store.list_used_ip_pairs(fabric.id, ip_type::P2P).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_observed_end_derives_the_other() {
        let (allocator, store, fabric) = allocator_with(FabricSettings::default()).await;
        let spine = device(&store, &fabric, "10.0.0.1", device_role::SPINE).await;
        let leaf = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;

        let mut req = request(&leaf, 21, &spine, 11);
        req.observed_remote = "10.10.10.8/31".into();
        let res = allocator.reserve_or_obtain_pair(&req).await.unwrap();
        assert_eq!(res.local_ip, "10.10.10.9/31");
        assert_eq!(res.remote_ip, "10.10.10.8/31");
        assert_eq!(res.config_type, ConfigType::Create);
    }

    #[tokio::test]
    async fn test_observed_pair_in_different_subnets_conflicts() {
        let (allocator, store, fabric) = allocator_with(FabricSettings::default()).await;
        let spine = device(&store, &fabric, "10.0.0.1", device_role::SPINE).await;
        let leaf = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;

        let mut req = request(&spine, 11, &leaf, 21);
        req.observed_local = "10.10.10.3/31".into();
        req.observed_remote = "10.10.10.4/31".into();
        let err = assert_err!(allocator.reserve_or_obtain_pair(&req).await);
        assert!(matches!(
            err.downcast_ref::<FabricError>(),
            Some(FabricError::ConflictViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_pair_held_by_another_link_conflicts() {
        let (allocator, store, fabric) = allocator_with(FabricSettings::default()).await;
        let spine = device(&store, &fabric, "10.0.0.1", device_role::SPINE).await;
        let leaf = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;

        allocator.reserve_or_obtain_pair(&request(&spine, 11, &leaf, 21)).await.unwrap();
        let mut req = request(&spine, 12, &leaf, 22);
        req.observed_local = "10.10.10.2/31".into();
        let err = assert_err!(allocator.reserve_or_obtain_pair(&req).await);
        assert_eq!(err.to_string(), "IP pair 10.10.10.2, 10.10.10.3 is already used by another link");
    }

    #[tokio::test]
    async fn test_mct_pair_is_stable() {
        let (allocator, store, fabric) = allocator_with(FabricSettings::default()).await;
        let a = device(&store, &fabric, "10.0.0.1", device_role::LEAF).await;
        let b = device(&store, &fabric, "10.0.0.2", device_role::LEAF).await;

        let first = allocator.reserve_mct_pair(&a, &b).await.unwrap();
        assert_eq!(first, ("10.20.20.2".to_string(), "10.20.20.3".to_string()));
        let swapped = allocator.reserve_mct_pair(&b, &a).await.unwrap();
        assert_eq!(swapped, ("10.20.20.3".to_string(), "10.20.20.2".to_string()));
    }
}
