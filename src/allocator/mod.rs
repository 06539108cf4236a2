//! Resource pool allocators for ASNs, loopback addresses and /31 pairs.
//!
//! An `Allocator` is scoped to one fabric and one settings snapshot. All
//! reservations go through the fabric's lock so concurrent discovery of
//! several devices never hands out the same pool slot twice.

mod asn;
mod ip;
mod ip_pair;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::Store;
use crate::models::*;

pub use ip_pair::{PairRequest, PairReservation};

/// A reserved value and the tag it needs on the device
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub value: String,
    pub config_type: ConfigType,
}

/// Ledger entries of one device, taken before a group of reservations
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLedger {
    pub device_id: i64,
    pub asn: Option<u64>,
    pub loopback: Option<String>,
    pub vtep_loopback: Option<String>,
}

#[derive(Clone)]
pub struct Allocator {
    store: Store,
    fabric_id: i64,
    settings: Arc<FabricSettings>,
    lock: Arc<Mutex<()>>,
}

impl Allocator {
    pub fn new(store: Store, fabric_id: i64, settings: Arc<FabricSettings>, lock: Arc<Mutex<()>>) -> Self {
        Self { store, fabric_id, settings, lock }
    }

    pub fn settings(&self) -> &FabricSettings {
        &self.settings
    }

    /// What the ledger holds for a device's ASN and loopbacks right now
    pub async fn snapshot_device(&self, device_id: i64) -> anyhow::Result<DeviceLedger> {
        let _guard = self.lock.lock().await;
        Ok(DeviceLedger {
            device_id,
            asn: self.store.get_used_asn(device_id).await?,
            loopback: self.store.get_used_ip(device_id, ip_type::LOOPBACK).await?,
            vtep_loopback: self.store.get_used_ip(device_id, ip_type::VTEP_LOOPBACK).await?,
        })
    }

    /// Put a device's ASN and loopback entries back to `snapshot`, dropping
    /// anything reserved since it was taken
    pub async fn restore_device(&self, snapshot: &DeviceLedger, role: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let id = snapshot.device_id;
        match snapshot.asn {
            Some(asn) => self.store.set_used_asn(self.fabric_id, id, role, asn).await?,
            None => self.store.release_used_asn(id).await?,
        }
        for (kind, value) in [
            (ip_type::LOOPBACK, &snapshot.loopback),
            (ip_type::VTEP_LOOPBACK, &snapshot.vtep_loopback),
        ] {
            match value {
                Some(ip) => self.store.set_used_ip(self.fabric_id, id, kind, ip).await?,
                None => self.store.release_used_ip(id, kind).await?,
            }
        }
        Ok(())
    }

    /// The MCT partner of a device from clusters not scheduled for deletion
    async fn partner_of(&self, device_id: i64) -> anyhow::Result<Option<i64>> {
        let clusters = self.store.list_clusters(self.fabric_id).await?;
        Ok(clusters
            .iter()
            .filter(|c| c.config_type != ConfigType::Delete)
            .find_map(|c| c.peer_of(device_id)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An allocator over a fresh in-memory fabric with default settings
    pub async fn allocator_with(settings: FabricSettings) -> (Allocator, Store, Fabric) {
        let store = Store::in_memory().await.unwrap();
        let fabric = store.create_fabric("default", fabric_type::CLOS, &settings).await.unwrap();
        let allocator = Allocator::new(
            store.clone(),
            fabric.id,
            Arc::new(settings),
            Arc::new(Mutex::new(())),
        );
        (allocator, store, fabric)
    }

    pub async fn device(store: &Store, fabric: &Fabric, ip: &str, role: &str) -> Device {
        store.upsert_device(fabric.id, ip, "admin", "password", role).await.unwrap()
    }
}
