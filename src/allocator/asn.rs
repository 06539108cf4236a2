use anyhow::Result;
use std::collections::HashSet;

use super::{Allocator, Reservation};
use crate::errors::FabricError;
use crate::models::*;
use crate::reconcile::classify;
use crate::utils::parse_asn_block;

impl Allocator {
    fn asn_block(&self, role: &str) -> &str {
        match role {
            device_role::SPINE => &self.settings.spine_asn_block,
            device_role::RACK => &self.settings.rack_asn_block,
            _ => &self.settings.leaf_asn_block,
        }
    }

    /// Reserve the local ASN for a device given what the device reports.
    ///
    /// Spines share the spine block. Leaves and racks get a value nobody
    /// else in the fabric holds, except their MCT partner.
    pub async fn reserve_asn(&self, device: &Device, observed: &str) -> Result<Reservation> {
        let _guard = self.lock.lock().await;

        let block = self.asn_block(&device.role);
        let (lo, hi) = parse_asn_block(block)
            .ok_or_else(|| FabricError::InvalidRequest(format!("Invalid ASN block {}", block)))?;
        let shared = device.role == device_role::SPINE;

        let persisted = self.store.get_used_asn(device.id).await?;
        let partner = self.partner_of(device.id).await?;
        let taken: HashSet<u64> = self
            .store
            .list_used_asns(self.fabric_id)
            .await?
            .into_iter()
            .filter(|(owner, role, _)| {
                *owner != device.id && Some(*owner) != partner && role != device_role::SPINE
            })
            .map(|(_, _, asn)| asn)
            .collect();

        let observed = observed.trim();
        let desired = if observed.is_empty() {
            match persisted {
                Some(asn) => asn,
                None => next_free_asn(lo, hi, shared, &taken)
                    .ok_or_else(|| FabricError::range(&device.ip_address, format!("No free ASN in range {}", block)))?,
            }
        } else {
            let asn = observed
                .parse::<u64>()
                .ok()
                .filter(|v| *v >= lo && *v <= hi)
                .ok_or_else(|| {
                    FabricError::range(
                        &device.ip_address,
                        format!("ASN {} not in range {}-{}", observed, lo, hi),
                    )
                })?;
            if shared || !taken.contains(&asn) {
                asn
            } else {
                tracing::warn!(
                    "ASN {} on {} is held by another device, reassigning",
                    asn,
                    device.ip_address
                );
                match persisted.filter(|p| !taken.contains(p)) {
                    Some(p) => p,
                    None => next_free_asn(lo, hi, shared, &taken).ok_or_else(|| {
                        FabricError::range(&device.ip_address, format!("No free ASN in range {}", block))
                    })?,
                }
            }
        };

        let persisted_text = persisted.map(|p| p.to_string());
        let config_type = classify(observed, persisted_text.as_deref(), &desired.to_string());
        self.store
            .set_used_asn(self.fabric_id, device.id, &device.role, desired)
            .await?;

        Ok(Reservation { value: desired.to_string(), config_type })
    }

    /// Make `device` use its MCT partner's ASN, releasing its own value
    pub async fn adopt_partner_asn(&self, device: &Device, partner_asn: &str, observed: &str) -> Result<Reservation> {
        let _guard = self.lock.lock().await;

        let asn: u64 = partner_asn
            .parse()
            .map_err(|_| FabricError::range(&device.ip_address, format!("ASN {} is not a number", partner_asn)))?;
        // The device's own value is replaced, never kept alongside
        self.store
            .set_used_asn(self.fabric_id, device.id, &device.role, asn)
            .await?;

        let config_type = if observed.trim().is_empty() {
            ConfigType::Create
        } else {
            classify(observed, Some(partner_asn), partner_asn)
        };
        Ok(Reservation { value: asn.to_string(), config_type })
    }
}

fn next_free_asn(lo: u64, hi: u64, shared: bool, taken: &HashSet<u64>) -> Option<u64> {
    if shared {
        return Some(lo);
    }
    (lo..=hi).find(|asn| !taken.contains(asn))
}
