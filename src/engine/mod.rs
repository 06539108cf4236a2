//! Orchestration engine.
//!
//! Pushes a `FabricActionRequest` to the fleet: one task per device runs
//! its stage chain, cluster-wide configuration fans out per member node,
//! and every failure lands on one error channel drained by a collector.
//! A failing device or node never stops its siblings.

mod cluster;

use anyhow::anyhow;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::adapter::{is_ok_response, AdapterFactory, DeviceTarget, Stage, StageOp, StageRequest};
use crate::errors::FabricError;
use crate::models::*;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long cluster status polling may take before it is reported
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    pub error_channel_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(15),
            error_channel_capacity: 64,
        }
    }
}

/// Stages of one device, in the order they are applied
pub fn stage_chain(host: &HostConfig) -> Vec<Stage> {
    let mut chain = vec![Stage::SystemProperties, Stage::Interfaces, Stage::MctNeighbors, Stage::Bgp];
    if host.is_edge() {
        chain.push(Stage::Evpn);
        chain.push(Stage::OverlayGateway);
    }
    chain
}

fn operation_name(stage: Stage, op: StageOp) -> String {
    match op {
        StageOp::Apply => format!("Configure {}", stage),
        StageOp::Teardown => format!("Deconfigure {}", stage),
    }
}

async fn collect(mut rx: mpsc::Receiver<OperationError>) -> Vec<OperationError> {
    let mut errors = Vec::new();
    while let Some(err) = rx.recv().await {
        tracing::warn!("{}", err);
        errors.push(err);
    }
    errors
}

/// Wait for the collector; losing it means losing every reported error
async fn finish(collector: JoinHandle<Vec<OperationError>>) -> anyhow::Result<Vec<OperationError>> {
    collector.await.map_err(|e| {
        tracing::error!("Error collector failed: {}", e);
        FabricError::Orchestration(format!("Error collector failed: {}", e)).into()
    })
}

#[derive(Clone)]
pub struct Engine {
    factory: Arc<dyn AdapterFactory>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(factory: Arc<dyn AdapterFactory>, options: EngineOptions) -> Self {
        Self { factory, options }
    }

    pub fn factory(&self) -> &Arc<dyn AdapterFactory> {
        &self.factory
    }

    /// Apply a fabric: device stage chains, then clusters in Delete, Update,
    /// Create order, then persist. Returns every error seen.
    pub async fn configure(&self, request: &FabricActionRequest, persist: bool) -> anyhow::Result<Vec<OperationError>> {
        tracing::info!(
            "Configuring fabric {} ({} hosts, {} clusters)",
            request.fabric_name,
            request.hosts.len(),
            request.cluster_count()
        );
        let (tx, rx) = mpsc::channel(self.options.error_channel_capacity);
        let collector = tokio::spawn(collect(rx));

        let failed = self.run_devices(request, StageOp::Apply, &tx).await;
        self.run_clusters(&request.clusters, &failed, &tx).await;
        if persist {
            self.persist(request, &failed, &tx).await;
        }

        drop(tx);
        let errors = finish(collector).await?;
        tracing::info!("Configure fabric {} finished with {} errors", request.fabric_name, errors.len());
        Ok(errors)
    }

    /// Remove a fabric's configuration: clusters scheduled for deletion go
    /// first, then every host runs its stage chain in teardown mode.
    pub async fn deconfigure(&self, request: &FabricActionRequest, persist: bool) -> anyhow::Result<Vec<OperationError>> {
        tracing::info!("Deconfiguring {} hosts of fabric {}", request.hosts.len(), request.fabric_name);
        let (tx, rx) = mpsc::channel(self.options.error_channel_capacity);
        let collector = tokio::spawn(collect(rx));

        self.run_clusters(&request.clusters, &HashSet::new(), &tx).await;
        let failed = self.run_devices(request, StageOp::Teardown, &tx).await;
        if persist {
            self.persist(request, &failed, &tx).await;
        }

        drop(tx);
        finish(collector).await
    }

    /// Run every host's chain concurrently; returns the hosts that failed
    async fn run_devices(
        &self,
        request: &FabricActionRequest,
        op: StageOp,
        tx: &mpsc::Sender<OperationError>,
    ) -> HashSet<String> {
        let settings = Arc::new(request.settings.clone());
        let mut handles = Vec::with_capacity(request.hosts.len());
        for host in &request.hosts {
            let req = StageRequest {
                fabric_name: request.fabric_name.clone(),
                settings: settings.clone(),
                host: Arc::new(host.clone()),
                op,
            };
            let engine = self.clone();
            let tx = tx.clone();
            let span = tracing::info_span!("device", host = %host.host);
            handles.push((
                host.host.clone(),
                tokio::spawn(async move { engine.run_device(req, tx).await }.instrument(span)),
            ));
        }

        let (hosts, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let mut failed = HashSet::new();
        for (host, joined) in hosts.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(true) => {}
                Ok(false) => {
                    failed.insert(host);
                }
                Err(e) => {
                    let _ = tx.send(OperationError::new("Device task", anyhow!("Task join error: {}", e), &host)).await;
                    failed.insert(host);
                }
            }
        }
        failed
    }

    /// One device: login, every stage in order, close. A stage only starts
    /// once the task running its predecessor has joined.
    async fn run_device(&self, req: StageRequest, tx: mpsc::Sender<OperationError>) -> bool {
        let host = req.host.host.clone();
        let adapter = match self.factory.adapter(&DeviceTarget::from_host(&req.host)) {
            Ok(adapter) => adapter,
            Err(e) => {
                let _ = tx.send(OperationError::new("Get adapter", e, &host)).await;
                return false;
            }
        };
        if let Err(e) = adapter.login().await {
            let _ = tx.send(OperationError::new("Login", e, &host)).await;
            return false;
        }

        let mut ok = true;
        for stage in stage_chain(&req.host) {
            tracing::debug!("Running {} ({:?}) on {}", stage, req.op, host);
            let task_adapter = adapter.clone();
            let task_req = req.clone();
            let result = tokio::spawn(async move { task_adapter.run_stage(stage, &task_req).await })
                .await
                .unwrap_or_else(|e| Err(anyhow!("Task join error: {}", e)));
            if !is_ok_response(&result) {
                let message = match result {
                    Ok(resp) => resp,
                    Err(e) => e.to_string(),
                };
                let err = FabricError::StageApply { host: host.clone(), stage: stage.to_string(), message };
                let _ = tx.send(OperationError::new(operation_name(stage, req.op), &err, &host)).await;
                ok = false;
                break;
            }
        }

        adapter.close().await;
        ok
    }

    async fn persist(&self, request: &FabricActionRequest, failed: &HashSet<String>, tx: &mpsc::Sender<OperationError>) {
        let mut handles = Vec::new();
        for host in request.hosts.iter().filter(|h| !failed.contains(&h.host)) {
            let target = DeviceTarget::from_host(host);
            let factory = self.factory.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let result = match factory.adapter(&target) {
                    Ok(adapter) => adapter.persist().await,
                    Err(e) => Err(e),
                };
                if !is_ok_response(&result) {
                    let message = match result {
                        Ok(resp) => resp,
                        Err(e) => e.to_string(),
                    };
                    let _ = tx.send(OperationError::new("Persist configuration", message, &target.host)).await;
                }
            }));
        }
        join_all(handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sim::SimulatedFleet;

    fn host(ip: &str, role: &str) -> HostConfig {
        HostConfig {
            host: ip.into(),
            role: role.into(),
            local_as: "65000".into(),
            as_config_type: ConfigType::Create,
            loopback_port_number: "1".into(),
            loopback_ip: "172.31.254.1".into(),
            loopback_config_type: ConfigType::Create,
            ..Default::default()
        }
    }

    fn engine(fleet: &SimulatedFleet) -> Engine {
        Engine::new(
            Arc::new(fleet.clone()),
            EngineOptions {
                poll_timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(5),
                error_channel_capacity: 1,
            },
        )
    }

    #[test]
    fn test_stage_chain_by_role() {
        assert_eq!(stage_chain(&host("10.0.0.1", device_role::SPINE)).len(), 4);
        let leaf = stage_chain(&host("10.0.0.2", device_role::LEAF));
        assert_eq!(leaf.last(), Some(&Stage::OverlayGateway));
        assert_eq!(leaf[4], Stage::Evpn);
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let fleet = SimulatedFleet::clos(&["10.0.0.1"], &["10.0.0.2"], &[]);
        let request = FabricActionRequest {
            fabric_name: "default".into(),
            hosts: vec![host("10.0.0.2", device_role::LEAF)],
            ..Default::default()
        };
        let errors = engine(&fleet).configure(&request, true).await.unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(
            fleet.pushes("10.0.0.2"),
            vec![
                "system properties:apply",
                "interfaces:apply",
                "mct data plane neighbors:apply",
                "bgp:apply",
                "evpn:apply",
                "overlay gateway:apply",
                "persist",
            ]
        );
        assert_eq!(fleet.switch("10.0.0.2").unwrap().asn, "65000");
    }

    #[tokio::test]
    async fn test_one_failing_device_does_not_block_others() {
        let hosts = ["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"];
        let fleet = SimulatedFleet::clos(&["10.0.0.1"], &hosts, &[]);
        fleet.update("10.0.0.3", |sw| sw.fail_login = true);
        fleet.update("10.0.0.4", |sw| sw.fail_stage = Some(Stage::Bgp));
        let request = FabricActionRequest {
            fabric_name: "default".into(),
            hosts: hosts.iter().map(|h| host(h, device_role::LEAF)).collect(),
            ..Default::default()
        };

        let errors = engine(&fleet).configure(&request, false).await.unwrap();
        assert_eq!(errors.len(), 2);
        let login = errors.iter().find(|e| e.host == "10.0.0.3").unwrap();
        assert_eq!(login.operation, "Login");
        let bgp = errors.iter().find(|e| e.host == "10.0.0.4").unwrap();
        assert_eq!(bgp.operation, "Configure bgp");
        assert!(bgp.error.contains("rejected"));

        // the failed chain stops at the rejected stage
        assert_eq!(fleet.pushes("10.0.0.4").last().map(String::as_str), Some("bgp:apply"));
        for ok in ["10.0.0.2", "10.0.0.5"] {
            assert_eq!(fleet.pushes(ok).len(), 6);
            assert_eq!(fleet.switch(ok).unwrap().asn, "65000");
        }
    }

    #[tokio::test]
    async fn test_lost_collector_is_an_error() {
        let collector = tokio::spawn(futures::future::pending::<Vec<OperationError>>());
        collector.abort();
        let err = finish(collector).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<FabricError>(), Some(FabricError::Orchestration(_))));
        assert!(err.to_string().starts_with("Error collector failed"));

        let collector = tokio::spawn(async { vec![OperationError::new("Login", "refused", "10.0.0.2")] });
        assert_eq!(finish(collector).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_clears_device_state() {
        let fleet = SimulatedFleet::clos(&["10.0.0.1"], &["10.0.0.2"], &[]);
        let request = FabricActionRequest {
            fabric_name: "default".into(),
            hosts: vec![host("10.0.0.2", device_role::LEAF)],
            ..Default::default()
        };
        let engine = engine(&fleet);
        assert!(engine.configure(&request, false).await.unwrap().is_empty());
        assert_eq!(fleet.interface_ip("10.0.0.2", interface_type::LOOPBACK, "1"), "172.31.254.1/32");

        assert!(engine.deconfigure(&request, false).await.unwrap().is_empty());
        assert_eq!(fleet.interface_ip("10.0.0.2", interface_type::LOOPBACK, "1"), "");
        assert_eq!(fleet.switch("10.0.0.2").unwrap().asn, "");
    }
}
