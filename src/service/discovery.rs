use anyhow::Result;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};

use super::{report_error, FabricService};
use crate::adapter::{DeviceAdapter, DeviceTarget};
use crate::allocator::Allocator;
use crate::db::NotFoundError;
use crate::errors::FabricError;
use crate::mct::reconcile_clusters;
use crate::models::*;
use crate::reconcile::intent::{build_device_intent, tag_interfaces, tag_neighbors, FabricView};
use crate::reconcile::{compare, tag_delta};
use crate::topology::build_links;

const MAX_RACKS: usize = 4;

/// A device that answered discovery, with the ASN it reported
struct Discovered {
    device: Device,
    observed_asn: String,
}

/// Everything read from a switch in one session
struct Snapshot {
    detail: DeviceDetail,
    interfaces: Vec<DiscoveredInterface>,
    lldps: Vec<AdjacencyRecord>,
    asn: String,
}

async fn read_snapshot(adapter: &dyn DeviceAdapter) -> Result<Snapshot> {
    Ok(Snapshot {
        detail: adapter.get_device_detail().await?,
        interfaces: adapter.get_interfaces().await?,
        lldps: adapter.get_lldps().await?,
        asn: adapter.get_asn().await?,
    })
}

fn observed_interface_ip(view: &FabricView, device_id: i64, int_type: &str, int_name: &str) -> String {
    view.interfaces
        .values()
        .find(|i| i.device_id == device_id && i.int_type == int_type && i.int_name == int_name)
        .map(|i| i.ip_address.clone())
        .unwrap_or_default()
}

impl FabricService {
    /// Discover spines and leaves into a CLOS fabric and reconcile it.
    /// Returns one response per requested device, in request order.
    pub async fn add_devices(&self, name: &str, req: &AddDevicesRequest) -> Result<Vec<AddDeviceResponse>> {
        let fabric = self.get_fabric(name).await?;
        if !fabric.is_clos() {
            return Err(FabricError::InvalidRequest(format!(
                "Fabric {} is a rack fabric, devices are added as racks",
                fabric.name
            ))
            .into());
        }
        if let Some(ip) = req.leaves.iter().find(|ip| req.spines.contains(ip)) {
            return Err(FabricError::InvalidRequest(format!("Device {} cannot be both a spine and a leaf", ip)).into());
        }

        let mut seen = HashSet::new();
        let requested: Vec<(String, &str)> = req
            .spines
            .iter()
            .map(|ip| (ip.trim().to_string(), device_role::SPINE))
            .chain(req.leaves.iter().map(|ip| (ip.trim().to_string(), device_role::LEAF)))
            .filter(|(ip, _)| seen.insert(ip.clone()))
            .collect();
        let credentials = self.credentials(req.username.as_deref(), req.password.as_deref());

        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;
        let settings = self.store.get_fabric_settings(fabric.id).await?;
        tracing::info!("Adding {} devices to fabric {}", requested.len(), fabric.name);

        let (mut responses, discovered) = self.discover_all(&fabric, &requested, &credentials, req.force).await;
        self.reconcile_fabric(&fabric, &settings, &discovered, &mut responses).await?;
        Ok(responses)
    }

    /// Discover rack pairs into a non-CLOS fabric and reconcile it
    pub async fn add_racks(&self, name: &str, req: &AddRacksRequest) -> Result<Vec<AddDeviceResponse>> {
        let fabric = self.get_fabric(name).await?;
        if fabric.is_clos() {
            return Err(FabricError::InvalidRequest(format!(
                "Fabric {} is a CLOS fabric, racks cannot be added",
                fabric.name
            ))
            .into());
        }

        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;
        let existing = self.store.list_racks(fabric.id).await?;

        let mut seen = HashSet::new();
        let mut new_racks = Vec::new();
        for rack in &req.racks {
            if rack.ip_one == rack.ip_two {
                return Err(FabricError::InvalidRequest(format!("Rack {} cannot pair a device with itself", rack.ip_one)).into());
            }
            for ip in [&rack.ip_one, &rack.ip_two] {
                if !seen.insert(ip.clone()) {
                    return Err(FabricError::InvalidRequest(format!("Device {} is listed in more than one rack", ip)).into());
                }
            }
            match existing.iter().find(|r| r.ip_one == rack.ip_one || r.ip_two == rack.ip_one || r.ip_one == rack.ip_two || r.ip_two == rack.ip_two) {
                Some(r) if rack.contains(&r.ip_one) && rack.contains(&r.ip_two) => {}
                Some(r) => {
                    return Err(FabricError::InvalidRequest(format!(
                        "Device of rack {}-{} already belongs to rack {}-{}",
                        rack.ip_one, rack.ip_two, r.ip_one, r.ip_two
                    ))
                    .into());
                }
                None => new_racks.push(rack.clone()),
            }
        }
        if existing.len() + new_racks.len() > MAX_RACKS {
            return Err(FabricError::InvalidRequest(format!(
                "Maximum Configurable Racks cannot be more than {}",
                MAX_RACKS
            ))
            .into());
        }

        let requested: Vec<(String, &str)> = req
            .racks
            .iter()
            .flat_map(|r| [r.ip_one.clone(), r.ip_two.clone()])
            .map(|ip| (ip, device_role::RACK))
            .collect();
        let credentials = self.credentials(req.username.as_deref(), req.password.as_deref());
        let settings = self.store.get_fabric_settings(fabric.id).await?;
        tracing::info!("Adding {} racks to fabric {}", req.racks.len(), fabric.name);

        let (mut responses, discovered) = self.discover_all(&fabric, &requested, &credentials, req.force).await;

        let by_ip: HashMap<&str, &Device> = discovered.iter().map(|d| (d.device.ip_address.as_str(), &d.device)).collect();
        for rack in &new_racks {
            match (by_ip.get(rack.ip_one.as_str()), by_ip.get(rack.ip_two.as_str())) {
                (Some(one), Some(two)) => {
                    let created = self.store.create_rack(fabric.id, one, two).await?;
                    tracing::info!("Rack {} - {} added to fabric {}", created.ip_one, created.ip_two, fabric.name);
                }
                (Some(_), None) => report_error(&mut responses, &rack.ip_one, format!("Rack peer {} was not discovered", rack.ip_two)),
                (None, Some(_)) => report_error(&mut responses, &rack.ip_two, format!("Rack peer {} was not discovered", rack.ip_one)),
                (None, None) => {}
            }
        }

        self.reconcile_fabric(&fabric, &settings, &discovered, &mut responses).await?;
        Ok(responses)
    }

    /// Remove devices from a fabric, optionally tearing their configuration
    /// down first. A device whose teardown failed is kept unless `force`.
    pub async fn delete_devices(&self, name: &str, req: &DeleteDevicesRequest) -> Result<Vec<AddDeviceResponse>> {
        let fabric = self.get_fabric(name).await?;
        let locks = self.fabric_locks(fabric.id);
        let _run = locks.run.lock().await;
        let settings = self.store.get_fabric_settings(fabric.id).await?;
        let devices = self.store.list_devices(fabric.id).await?;

        let mut responses = Vec::with_capacity(req.devices.len());
        let mut targets: Vec<Device> = Vec::new();
        for ip in &req.devices {
            let mut resp = AddDeviceResponse {
                fabric_name: fabric.name.clone(),
                fabric_id: fabric.id,
                ip_address: ip.clone(),
                ..Default::default()
            };
            match devices.iter().find(|d| &d.ip_address == ip) {
                Some(device) => {
                    resp.role = device.role.clone();
                    if !targets.iter().any(|t| t.id == device.id) {
                        targets.push(device.clone());
                    }
                }
                None => resp.errors.push(format!("Device {} is not part of fabric {}", ip, fabric.name)),
            }
            responses.push(resp);
        }

        if req.device_cleanup && !targets.is_empty() {
            let request = self.teardown_request(&fabric, &settings, &targets).await?;
            for err in self.engine.deconfigure(&request, req.persist).await? {
                report_error(&mut responses, &err.host, format!("{}: {}", err.operation, err.error));
            }
        }

        for device in &targets {
            let failed = responses
                .iter()
                .any(|r| r.ip_address == device.ip_address && !r.errors.is_empty());
            if failed && !req.force {
                tracing::warn!("Keeping device {} in fabric {}, teardown failed", device.ip_address, fabric.name);
                continue;
            }
            self.store.release_device_ledger(device.id).await?;
            self.store.delete_device(device.id).await?;
            tracing::info!("Deleted device {} from fabric {}", device.ip_address, fabric.name);
        }

        self.reconcile_fabric(&fabric, &settings, &[], &mut responses).await?;
        Ok(responses)
    }

    /// Discover every requested device concurrently
    async fn discover_all(
        &self,
        fabric: &Fabric,
        requested: &[(String, &str)],
        credentials: &(String, String),
        force: bool,
    ) -> (Vec<AddDeviceResponse>, Vec<Discovered>) {
        let results = join_all(
            requested
                .iter()
                .map(|(ip, role)| self.discover_device(fabric, ip, role, credentials, force)),
        )
        .await;

        let mut responses = Vec::with_capacity(requested.len());
        let mut discovered = Vec::new();
        for ((ip, role), result) in requested.iter().zip(results) {
            let mut resp = AddDeviceResponse {
                fabric_name: fabric.name.clone(),
                fabric_id: fabric.id,
                ip_address: ip.clone(),
                role: role.to_string(),
                errors: Vec::new(),
            };
            match result {
                Ok(found) => discovered.push(found),
                Err(e) => {
                    tracing::warn!("Discovery of {} failed: {}", ip, e);
                    resp.errors.push(e.to_string());
                }
            }
            responses.push(resp);
        }
        (responses, discovered)
    }

    /// Read one switch and refresh its snapshot in the store
    async fn discover_device(
        &self,
        fabric: &Fabric,
        ip: &str,
        role: &str,
        credentials: &(String, String),
        force: bool,
    ) -> Result<Discovered> {
        let existing = self.store.get_device_by_ip(ip).await?;
        if existing.as_ref().is_some_and(|d| d.fabric_id != fabric.id) {
            return Err(FabricError::InvalidRequest(format!("Device {} already belongs to another fabric", ip)).into());
        }

        let (user_name, password) = credentials;
        let target = DeviceTarget {
            host: ip.to_string(),
            user_name: user_name.clone(),
            password: password.clone(),
            model: existing.map(|d| d.model).unwrap_or_default(),
        };
        let adapter = self.engine.factory().adapter(&target)?;
        adapter
            .login()
            .await
            .map_err(|e| FabricError::session(ip, e.to_string()))?;
        let snapshot = read_snapshot(adapter.as_ref()).await;
        adapter.close().await;
        let snapshot = snapshot?;

        let device = self
            .store
            .upsert_device(fabric.id, ip, user_name, password, role)
            .await?;
        self.store.update_device_detail(device.id, &snapshot.detail).await?;
        if force {
            tracing::info!("Flushing stored state of {}", ip);
            self.store.flush_device_state(device.id).await?;
        }
        self.store
            .sync_interfaces(fabric.id, device.id, &snapshot.interfaces)
            .await?;
        self.store
            .replace_lldp_records(fabric.id, device.id, &snapshot.lldps)
            .await?;
        tracing::debug!(
            "Discovered {} ({}): {} interfaces, {} neighbors",
            ip,
            snapshot.detail.model,
            snapshot.interfaces.len(),
            snapshot.lldps.len()
        );

        let device = self
            .store
            .get_device(device.id)
            .await?
            .ok_or_else(|| NotFoundError::new("Device", ip))?;
        Ok(Discovered { device, observed_asn: snapshot.asn })
    }

    /// Re-derive the fabric from the stored snapshots: links, clusters,
    /// device allocations for the devices just discovered, then interface
    /// and neighbor intent for every configured device.
    async fn reconcile_fabric(
        &self,
        fabric: &Fabric,
        settings: &FabricSettings,
        discovered: &[Discovered],
        responses: &mut [AddDeviceResponse],
    ) -> Result<()> {
        self.reconcile_links(fabric).await?;

        let allocator = self.allocator(fabric, settings);
        let view = FabricView::load(&self.store, fabric, settings).await?;
        let factory = self.engine.factory().clone();
        let outcome = reconcile_clusters(&self.store, &allocator, &view, |a, b| {
            factory.is_mct_leaves_compatible(a, b)
        })
        .await?;
        for err in outcome.errors {
            report_error(responses, &err.host, &err.error);
        }

        // Second nodes go last so they can adopt their partner's values
        let view = FabricView::load(&self.store, fabric, settings).await?;
        let mut ordered: Vec<&Discovered> = discovered.iter().collect();
        ordered.sort_by_key(|d| view.clusters.iter().any(|c| c.device_two_id == d.device.id));
        for found in ordered {
            match self.reconcile_switch_config(&view, &allocator, found).await {
                Ok(cfg) => self.store.upsert_switch_config(&cfg).await?,
                Err(e) => {
                    tracing::warn!("Allocation for {} failed: {}", found.device.ip_address, e);
                    report_error(responses, &found.device.ip_address, e);
                }
            }
        }

        let view = FabricView::load(&self.store, fabric, settings).await?;
        let mut interfaces: HashMap<i64, Vec<InterfaceConfig>> = HashMap::new();
        for cfg in self.store.list_interface_configs(fabric.id).await? {
            interfaces.entry(cfg.device_id).or_default().push(cfg);
        }
        let mut neighbors: HashMap<i64, Vec<BgpNeighborConfig>> = HashMap::new();
        for cfg in self.store.list_bgp_neighbors(fabric.id).await? {
            neighbors.entry(cfg.device_id).or_default().push(cfg);
        }

        let mut configured: Vec<i64> = view.switch_configs.keys().copied().collect();
        configured.sort_unstable();
        for device_id in configured {
            let intent = match build_device_intent(&view, &allocator, device_id).await {
                Ok(intent) => intent,
                Err(e) => {
                    let host = view.devices.get(&device_id).map(|d| d.ip_address.clone()).unwrap_or_default();
                    tracing::warn!("Intent for {} failed: {}", host, e);
                    report_error(responses, &host, e);
                    continue;
                }
            };
            for cfg in tag_interfaces(interfaces.remove(&device_id).unwrap_or_default(), intent.interfaces) {
                self.store.upsert_interface_config(&cfg).await?;
            }
            for cfg in tag_neighbors(neighbors.remove(&device_id).unwrap_or_default(), intent.neighbors) {
                self.store.upsert_bgp_neighbor(&cfg).await?;
            }
        }

        tracing::info!(
            "Reconciled fabric {}: {} devices, {} clusters",
            fabric.name,
            view.devices.len(),
            view.clusters.len()
        );
        Ok(())
    }

    /// Resolve links from every stored adjacency record. Links are matched
    /// on their interface pair; a changed address alone leaves a link as is.
    async fn reconcile_links(&self, fabric: &Fabric) -> Result<()> {
        let devices = self.store.list_devices(fabric.id).await?;
        let interfaces = self.store.list_interfaces(fabric.id).await?;
        let records = self.store.list_lldp_records(fabric.id).await?;
        let fresh = build_links(fabric.id, &devices, &interfaces, &records);
        let persisted = self.store.list_lldp_neighbors(fabric.id).await?;

        let delta = compare(
            persisted,
            fresh,
            |l| (l.interface_one_id, l.interface_two_id),
            |a, b| {
                a.device_one_role == b.device_one_role
                    && a.device_two_role == b.device_two_role
                    && a.interface_one_name == b.interface_one_name
                    && a.interface_two_name == b.interface_two_name
            },
        );
        if !delta.created.is_empty() || !delta.deleted.is_empty() {
            tracing::info!(
                "Fabric {}: {} new links, {} links gone",
                fabric.name,
                delta.created.len(),
                delta.deleted.len()
            );
        }
        for link in tag_delta(delta) {
            self.store.upsert_lldp_neighbor(&link).await?;
        }
        Ok(())
    }

    /// ASN, loopback and VTEP loopback of one device. The second node of
    /// a cluster shares its partner's ASN and VTEP loopback.
    async fn reconcile_switch_config(
        &self,
        view: &FabricView,
        allocator: &Allocator,
        found: &Discovered,
    ) -> Result<SwitchConfig> {
        let device = &found.device;
        let settings = &view.settings;
        let observed_loopback =
            observed_interface_ip(view, device.id, interface_type::LOOPBACK, &settings.loopback_port_number);
        let observed_vtep =
            observed_interface_ip(view, device.id, interface_type::LOOPBACK, &settings.vtep_loopback_port_number);

        let partner = match view.clusters.iter().find(|c| c.device_two_id == device.id) {
            Some(cluster) => self.store.get_switch_config(cluster.device_one_id).await?,
            None => None,
        };

        // A device either gets all of its values or keeps what it had
        let before = allocator.snapshot_device(device.id).await?;
        let reserved = async {
            let asn = match partner.as_ref().filter(|p| !p.local_as.is_empty()) {
                Some(p) => allocator.adopt_partner_asn(device, &p.local_as, &found.observed_asn).await?,
                None => allocator.reserve_asn(device, &found.observed_asn).await?,
            };
            let loopback = allocator.reserve_loopback(device, &observed_loopback).await?;
            let vtep = if device_role::is_edge(&device.role) {
                Some(match partner.as_ref().filter(|p| !p.vtep_loopback_ip.is_empty()) {
                    Some(p) => allocator.adopt_partner_vtep(device, &p.vtep_loopback_ip, &observed_vtep).await?,
                    None => allocator.reserve_vtep_loopback(device, &observed_vtep).await?,
                })
            } else {
                None
            };
            anyhow::Ok((asn, loopback, vtep))
        }
        .await;
        let (asn, loopback, vtep) = match reserved {
            Ok(values) => values,
            Err(e) => {
                allocator.restore_device(&before, &device.role).await?;
                return Err(e);
            }
        };

        Ok(SwitchConfig {
            id: view.switch_configs.get(&device.id).map(|c| c.id).unwrap_or_default(),
            fabric_id: device.fabric_id,
            device_id: device.id,
            role: device.role.clone(),
            local_as: asn.value,
            as_config_type: asn.config_type,
            loopback_ip: loopback.value,
            loopback_config_type: loopback.config_type,
            vtep_loopback_ip: vtep.as_ref().map(|v| v.value.clone()).unwrap_or_default(),
            vtep_loopback_config_type: vtep.map(|v| v.config_type).unwrap_or_default(),
        })
    }
}
