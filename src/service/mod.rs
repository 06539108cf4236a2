//! Fabric service: the operations exposed to callers.
//!
//! Discovery and reconciliation (`discovery`) turn what the switches report
//! into tagged intent in the store; `configure` builds the action request
//! from that intent, hands it to the engine and confirms it afterwards.
//! Mutating calls on one fabric are serialized; resource reservations go
//! through a separate per-fabric ledger lock held by the allocator.

mod configure;
mod discovery;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::allocator::Allocator;
use crate::db::{NotFoundError, Store};
use crate::engine::Engine;
use crate::errors::FabricError;
use crate::models::*;
use crate::topology::{validate_clos, validate_non_clos};

#[derive(Clone, Default)]
struct FabricLocks {
    /// Held for the whole of a mutating call
    run: Arc<AsyncMutex<()>>,
    /// Handed to the allocator
    ledger: Arc<AsyncMutex<()>>,
}

pub struct FabricService {
    store: Store,
    engine: Engine,
    default_username: String,
    default_password: String,
    locks: Mutex<HashMap<i64, FabricLocks>>,
}

impl FabricService {
    pub fn new(
        store: Store,
        engine: Engine,
        default_username: impl Into<String>,
        default_password: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            default_username: default_username.into(),
            default_password: default_password.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn fabric_locks(&self, fabric_id: i64) -> FabricLocks {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(fabric_id).or_default().clone()
    }

    /// An allocator bound to one settings snapshot of the fabric
    fn allocator(&self, fabric: &Fabric, settings: &FabricSettings) -> Allocator {
        Allocator::new(
            self.store.clone(),
            fabric.id,
            Arc::new(settings.clone()),
            self.fabric_locks(fabric.id).ledger,
        )
    }

    fn credentials(&self, username: Option<&str>, password: Option<&str>) -> (String, String) {
        (
            username.filter(|u| !u.is_empty()).unwrap_or(&self.default_username).to_string(),
            password.filter(|p| !p.is_empty()).unwrap_or(&self.default_password).to_string(),
        )
    }

    // ========== Fabric Lifecycle ==========

    pub async fn create_fabric(&self, req: &CreateFabricRequest) -> Result<Fabric> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(FabricError::InvalidRequest("Fabric name is required".to_string()).into());
        }
        let kind = req.fabric_type.as_deref().unwrap_or(fabric_type::CLOS);
        if !fabric_type::is_valid(kind) {
            return Err(FabricError::InvalidRequest(format!(
                "Fabric type '{}' must be one of {:?}",
                kind,
                fabric_type::ALL
            ))
            .into());
        }
        let settings = req.settings.clone().unwrap_or_default();
        settings.validate().map_err(FabricError::InvalidRequest)?;
        if self.store.get_fabric_by_name(name).await?.is_some() {
            return Err(FabricError::InvalidRequest(format!("Fabric {} already exists", name)).into());
        }

        let fabric = self.store.create_fabric(name, kind, &settings).await?;
        tracing::info!("Created {} fabric {} (id {})", fabric.fabric_type, fabric.name, fabric.id);
        Ok(fabric)
    }

    pub async fn get_fabric(&self, name: &str) -> Result<Fabric> {
        Ok(self
            .store
            .get_fabric_by_name(name)
            .await?
            .ok_or_else(|| NotFoundError::new("Fabric", name))?)
    }

    pub async fn get_fabric_settings(&self, name: &str) -> Result<FabricSettings> {
        let fabric = self.get_fabric(name).await?;
        self.store.get_fabric_settings(fabric.id).await
    }

    /// Replace the settings of a fabric that has nothing allocated yet
    pub async fn update_fabric_settings(&self, name: &str, settings: &FabricSettings) -> Result<FabricSettings> {
        let fabric = self.get_fabric(name).await?;
        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;

        settings.validate().map_err(FabricError::InvalidRequest)?;
        let configured = self.store.list_switch_configs(fabric.id).await?;
        if !configured.is_empty() {
            return Err(FabricError::InvalidRequest(format!(
                "Fabric {} has {} configured devices, settings cannot be changed",
                fabric.name,
                configured.len()
            ))
            .into());
        }
        self.store.update_fabric_settings(fabric.id, settings).await?;
        tracing::info!("Updated settings of fabric {}", fabric.name);
        Ok(settings.clone())
    }

    // ========== Validation ==========

    /// Advisory topology report over the links not scheduled for deletion
    pub async fn validate_fabric_topology(&self, name: &str) -> Result<TopologyReport> {
        let fabric = self.get_fabric(name).await?;
        let devices = self.store.list_devices(fabric.id).await?;
        let links: Vec<LldpNeighbor> = self
            .store
            .list_lldp_neighbors(fabric.id)
            .await?
            .into_iter()
            .filter(|l| l.config_type != ConfigType::Delete)
            .collect();

        let mut report = if fabric.is_clos() {
            validate_clos(&devices, &links)
        } else {
            let settings = self.store.get_fabric_settings(fabric.id).await?;
            let racks = self.store.list_racks(fabric.id).await?;
            validate_non_clos(&devices, &racks, &links, &settings)
        };
        report.fabric_name = fabric.name.clone();
        report.fabric_id = fabric.id;

        if !report.is_clean() {
            tracing::warn!(
                "Fabric {} topology: {} missing links, {} spine-spine links",
                fabric.name,
                report.missing_links.len(),
                report.spine_spine_links.len()
            );
        }
        Ok(report)
    }
}

/// Attach an error to the response of `host`, if this call reports on it
fn report_error(responses: &mut [AddDeviceResponse], host: &str, error: impl std::fmt::Display) {
    match responses.iter_mut().find(|r| r.ip_address == host) {
        Some(resp) => resp.errors.push(error.to_string()),
        None => tracing::warn!("{}: {}", host, error),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::adapter::sim::SimulatedFleet;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_create_fabric_defaults_and_duplicates() {
        let svc = service(&SimulatedFleet::default()).await;
        let created = assert_ok!(
            svc.create_fabric(&CreateFabricRequest { name: "default".into(), fabric_type: None, settings: None })
                .await
        );
        assert_eq!(created.fabric_type, fabric_type::CLOS);
        assert_eq!(assert_ok!(svc.get_fabric_settings("default").await), FabricSettings::default());

        let err = assert_err!(
            svc.create_fabric(&CreateFabricRequest { name: "default".into(), fabric_type: None, settings: None })
                .await
        );
        assert!(matches!(err.downcast_ref::<FabricError>(), Some(FabricError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_create_fabric_rejects_bad_settings() {
        let svc = service(&SimulatedFleet::default()).await;
        let settings = FabricSettings { leaf_asn_block: "65000-".into(), ..Default::default() };
        let err = assert_err!(
            svc.create_fabric(&CreateFabricRequest { name: "bad".into(), fabric_type: None, settings: Some(settings) })
                .await
        );
        assert!(err.to_string().contains("leaf_asn_block"));
    }

    #[tokio::test]
    async fn test_unknown_fabric_is_not_found() {
        let svc = service(&SimulatedFleet::default()).await;
        let err = assert_err!(svc.validate_fabric_topology("nope").await);
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_settings_locked_once_devices_are_configured() {
        let fleet = SimulatedFleet::clos(&["10.0.0.1"], &["10.0.0.11"], &[]);
        let svc = service(&fleet).await;
        let created = fabric(&svc, "default", fabric_type::CLOS).await;

        let mut settings = FabricSettings { leaf_asn_block: "65100-65200".into(), ..Default::default() };
        assert_ok!(svc.update_fabric_settings("default", &settings).await);

        let responses = svc.add_devices("default", &clos_request(&["10.0.0.1"], &["10.0.0.11"])).await.unwrap();
        assert!(responses.iter().all(AddDeviceResponse::is_ok), "{:?}", responses);
        let cfg = svc.store.list_switch_configs(created.id).await.unwrap();
        assert!(cfg.iter().any(|c| c.local_as == "65100"));

        settings.leaf_asn_block = "65300-65400".into();
        let err = assert_err!(svc.update_fabric_settings("default", &settings).await);
        assert!(err.to_string().contains("cannot be changed"));
    }

    #[tokio::test]
    async fn test_validate_reports_missing_links() {
        let fleet = SimulatedFleet::clos(&["10.0.0.1", "10.0.0.2"], &["10.0.0.11"], &[]);
        fleet.unlink("10.0.0.2", "0/1");
        let svc = service(&fleet).await;
        fabric(&svc, "default", fabric_type::CLOS).await;
        svc.add_devices("default", &clos_request(&["10.0.0.1", "10.0.0.2"], &["10.0.0.11"]))
            .await
            .unwrap();

        let report = svc.validate_fabric_topology("default").await.unwrap();
        assert_eq!(report.fabric_name, "default");
        assert!(!report.no_spines);
        assert_eq!(report.missing_links.len(), 2);
        assert!(report.missing_links.iter().all(|m| m.contains("10.0.0.2")));
    }
}
