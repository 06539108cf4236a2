use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::Engine;
use crate::adapter::{is_ok_response, DeviceAdapter, DeviceTarget};
use crate::mct::has_updatable_bits;
use crate::models::*;

const MAX_CLUSTER_NODES: usize = 2;
const POLL_OPERATION: &str = "Poll for management cluster status";

fn cluster_operation(op: ClusterOperation, cluster: &ClusterConfig) -> String {
    format!("{} MCT cluster {}", op, cluster.cluster_name)
}

impl Engine {
    /// Cluster fan-out. Batches run in Delete, Update, Create order; within
    /// a batch every member node is configured concurrently, and only once
    /// all of them have joined is the operational status polled per node.
    pub(super) async fn run_clusters(
        &self,
        clusters: &BTreeMap<ClusterOperation, Vec<ClusterConfig>>,
        failed_hosts: &HashSet<String>,
        tx: &mpsc::Sender<OperationError>,
    ) {
        for op in ClusterOperation::DISPATCH_ORDER {
            let Some(batch) = clusters.get(&op).filter(|b| !b.is_empty()) else {
                continue;
            };
            tracing::info!("MCT cluster {} batch: {} clusters", op, batch.len());

            let mut pushes = Vec::new();
            for cluster in batch {
                let first_host = cluster.members.first().map(|m| m.mgmt_ip.clone()).unwrap_or_default();
                if let Some(down) = cluster.members.iter().find(|m| failed_hosts.contains(&m.mgmt_ip)) {
                    let _ = tx
                        .send(OperationError::new(
                            cluster_operation(op, cluster),
                            format!("skipped, member {} failed device configuration", down.mgmt_ip),
                            &first_host,
                        ))
                        .await;
                    continue;
                }
                if op == ClusterOperation::Update && !has_updatable_bits(cluster.operation_bitmap) {
                    let _ = tx
                        .send(OperationError::new(
                            cluster_operation(op, cluster),
                            "unsupported update operation",
                            &first_host,
                        ))
                        .await;
                    continue;
                }

                // A cluster never confirmed on the devices is cleared before it is created
                let steps: Vec<ClusterOperation> =
                    if op == ClusterOperation::Create && mct_bit::is_set(cluster.operation_bitmap, mct_bit::CREATE) {
                        vec![ClusterOperation::Delete, ClusterOperation::Create]
                    } else {
                        vec![op]
                    };
                let mut config = cluster.clone();
                config.operation_bitmap &= !mct_bit::mask(mct_bit::CREATE);
                let config = Arc::new(config);

                let handles: Vec<_> = config
                    .members
                    .iter()
                    .map(|node| {
                        let engine = self.clone();
                        let config = config.clone();
                        let node = node.clone();
                        let steps = steps.clone();
                        let tx = tx.clone();
                        let span = tracing::info_span!("cluster", cluster = %config.cluster_name, host = %node.mgmt_ip);
                        tokio::spawn(
                            async move { engine.cluster_on_node(&config, &node, &steps, op, &tx).await }.instrument(span),
                        )
                    })
                    .collect();
                pushes.push((config, handles));
            }

            let mut to_poll = Vec::new();
            for (config, handles) in pushes {
                let results = join_all(handles).await;
                if results.iter().all(|r| matches!(r, Ok(true))) {
                    to_poll.push(config);
                }
            }

            let expected = |config: &ClusterConfig| match op {
                ClusterOperation::Delete => 0,
                _ => config.members.len(),
            };
            let polls: Vec<_> = to_poll
                .iter()
                .flat_map(|config| {
                    config.members.iter().map(move |node| {
                        let engine = self.clone();
                        let config = config.clone();
                        let node = node.clone();
                        let want = expected(&config);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = engine.poll_cluster(&config, &node, want).await {
                                let _ = tx.send(OperationError::new(POLL_OPERATION, e, &node.mgmt_ip)).await;
                            }
                        })
                    })
                })
                .collect();
            join_all(polls).await;
        }
    }

    async fn cluster_on_node(
        &self,
        config: &ClusterConfig,
        node: &ClusterMemberNode,
        steps: &[ClusterOperation],
        op: ClusterOperation,
        tx: &mpsc::Sender<OperationError>,
    ) -> bool {
        let adapter = match self.login(node).await {
            Ok(adapter) => adapter,
            Err(e) => {
                let _ = tx.send(OperationError::new(cluster_operation(op, config), e, &node.mgmt_ip)).await;
                return false;
            }
        };

        let mut ok = true;
        for step in steps {
            let result = adapter.cluster(config, node, *step).await;
            if !is_ok_response(&result) {
                let message = match result {
                    Ok(resp) => resp,
                    Err(e) => e.to_string(),
                };
                let _ = tx
                    .send(OperationError::new(cluster_operation(*step, config), message, &node.mgmt_ip))
                    .await;
                ok = false;
                break;
            }
        }
        adapter.close().await;
        ok
    }

    async fn login(&self, node: &ClusterMemberNode) -> Result<Arc<dyn DeviceAdapter>> {
        let adapter = self.factory.adapter(&DeviceTarget::from_node(node))?;
        adapter.login().await?;
        Ok(adapter)
    }

    /// Wait until the node reports `expected` cluster members
    async fn poll_cluster(&self, config: &ClusterConfig, node: &ClusterMemberNode, expected: usize) -> Result<()> {
        if config.members.len() > MAX_CLUSTER_NODES {
            return Err(anyhow!("Management cluster is supported for a maximum of 2 nodes"));
        }
        let adapter = self.login(node).await?;
        let interval = self.options.poll_interval.max(Duration::from_millis(1));

        let polled = tokio::time::timeout(self.options.poll_timeout, async {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let status = adapter.cluster_status(config).await?;
                if status.member_count == expected {
                    return Ok::<_, anyhow::Error>(());
                }
                tracing::debug!(
                    "Cluster {} on {} has {} of {} members",
                    config.cluster_name,
                    node.mgmt_ip,
                    status.member_count,
                    expected
                );
            }
        })
        .await;
        adapter.close().await;

        match polled {
            Ok(result) => result,
            Err(_) => Err(anyhow!("Management Cluster is not operational. Polling timed out")),
        }
    }
}
