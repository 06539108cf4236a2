use anyhow::Result;
use std::collections::HashSet;

use super::{Allocator, Reservation};
use crate::errors::FabricError;
use crate::models::*;
use crate::reconcile::classify;
use crate::utils::{cidr_contains, ip_to_u32, parse_cidr, strip_prefix, u32_to_ip};

/// Usable single addresses of a range: .0, .254 and .255 are never handed out
pub(crate) fn loopback_pool(range: &str) -> Vec<u32> {
    let Some((network, broadcast, _)) = parse_cidr(range) else {
        return Vec::new();
    };
    (network..=broadcast)
        .filter(|addr| !matches!(addr & 0xff, 0 | 254 | 255))
        .collect()
}

impl Allocator {
    /// Reserve the router loopback of a device
    pub async fn reserve_loopback(&self, device: &Device, observed: &str) -> Result<Reservation> {
        let port = self.settings.loopback_port_number.clone();
        self.reserve_single(device, ip_type::LOOPBACK, &port, observed, None).await
    }

    /// Reserve the VTEP loopback of an edge device. MCT partners share one
    /// address, so the partner's value is not treated as taken.
    pub async fn reserve_vtep_loopback(&self, device: &Device, observed: &str) -> Result<Reservation> {
        let port = self.settings.vtep_loopback_port_number.clone();
        let partner = {
            let _guard = self.lock.lock().await;
            self.partner_of(device.id).await?
        };
        self.reserve_single(device, ip_type::VTEP_LOOPBACK, &port, observed, partner).await
    }

    /// Make `device` use its MCT partner's VTEP loopback
    pub async fn adopt_partner_vtep(&self, device: &Device, partner_ip: &str, observed: &str) -> Result<Reservation> {
        let _guard = self.lock.lock().await;
        self.store
            .set_used_ip(self.fabric_id, device.id, ip_type::VTEP_LOOPBACK, partner_ip)
            .await?;
        let observed = strip_prefix(observed);
        let config_type = if observed.is_empty() {
            ConfigType::Create
        } else {
            classify(observed, Some(partner_ip), partner_ip)
        };
        Ok(Reservation { value: partner_ip.to_string(), config_type })
    }

    async fn reserve_single(
        &self,
        device: &Device,
        kind: &str,
        port: &str,
        observed: &str,
        partner: Option<i64>,
    ) -> Result<Reservation> {
        let _guard = self.lock.lock().await;

        let range = self.settings.loopback_ip_range.as_str();
        let observed = strip_prefix(observed);
        let persisted = self.store.get_used_ip(device.id, kind).await?;
        // Router and VTEP loopbacks come out of the same range
        let taken: HashSet<String> = self
            .store
            .list_used_ips(self.fabric_id)
            .await?
            .into_iter()
            .filter(|(owner, t, _)| {
                !(*owner == device.id && t == kind) && !(Some(*owner) == partner && t == kind)
            })
            .map(|(_, _, ip)| ip)
            .collect();

        let next_free = || {
            loopback_pool(range)
                .into_iter()
                .map(u32_to_ip)
                .find(|ip| !taken.contains(ip))
                .ok_or_else(|| {
                    FabricError::range(&device.ip_address, format!("No free loopback address in range {}", range))
                })
        };

        let desired = if observed.is_empty() {
            match persisted.clone() {
                Some(ip) => ip,
                None => next_free()?,
            }
        } else {
            let in_pool = ip_to_u32(observed)
                .map(|addr| cidr_contains(range, observed) && !matches!(addr & 0xff, 0 | 254 | 255))
                .unwrap_or(false);
            if !in_pool {
                return Err(FabricError::range(
                    &device.ip_address,
                    format!("IP loopback {} on loopback {} not in range {}", observed, port, range),
                )
                .into());
            }
            if !taken.contains(observed) {
                observed.to_string()
            } else {
                tracing::warn!(
                    "Loopback {} on {} is held by another device, reassigning",
                    observed,
                    device.ip_address
                );
                match persisted.clone().filter(|p| !taken.contains(p)) {
                    Some(p) => p,
                    None => next_free()?,
                }
            }
        };

        let config_type = classify(observed, persisted.as_deref(), &desired);
        self.store
            .set_used_ip(self.fabric_id, device.id, kind, &desired)
            .await?;
        Ok(Reservation { value: desired, config_type })
    }
}
