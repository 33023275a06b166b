use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::core::v1::Node;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::nodes;
use crate::probe::Prober;
use crate::report::ReachabilityReport;
use crate::store::Store;

const CYCLE_INTERVAL: Duration = Duration::from_secs(5);
const BACKOFF_INTERVAL: Duration = Duration::from_secs(10);

/// Publishes this replica's opinion of which unready nodes it cannot
/// reach. Active on every replica, leader or not.
pub struct Detector {
    store: Store,
    prober: Arc<dyn Prober>,
    host_ip: String,
}

struct ProbeOutcome {
    node: String,
    addr: IpAddr,
    result: Result<bool>,
}

impl Detector {
    pub fn new(store: Store, prober: Arc<dyn Prober>, host_ip: &str) -> Self {
        Self {
            store,
            prober,
            host_ip: host_ip.to_string(),
        }
    }

    /// Detection loop; does not return under normal operation.
    pub async fn run(&self) -> Result<()> {
        info!("node down detector started");
        loop {
            sleep(CYCLE_INTERVAL).await;

            let all_nodes = match self.store.list_nodes().await {
                Ok(nodes) => nodes,
                Err(e) => {
                    error!("error listing nodes: {e:#}");
                    sleep(BACKOFF_INTERVAL).await;
                    continue;
                }
            };
            let unready = nodes::unready_nodes(&all_nodes);
            if unready.is_empty() {
                debug!("node down detector - all nodes ready");
                sleep(BACKOFF_INTERVAL).await;
                continue;
            }

            info!("unready nodes detected");
            let targets = probe_targets(&unready);
            let unreachable = probe_all(self.prober.clone(), targets).await;

            // An empty unreachable set is still published; it replaces
            // this reporter's previous contribution in place.
            let report = ReachabilityReport::new(&self.host_ip, unreachable);
            if let Err(e) = self.store.upsert_report(&report).await {
                error!("error publishing reachability report: {e:#}");
            }
        }
    }
}

/// The unready nodes that can actually be probed. Nodes without a usable
/// internal address are logged and skipped.
pub fn probe_targets(unready: &[&Node]) -> Vec<(String, IpAddr)> {
    let mut targets = Vec::new();
    for node in unready {
        let name = nodes::node_name(node).to_string();
        let Some(ip) = nodes::internal_ip(node) else {
            error!("will not check node {name}: no internal address");
            continue;
        };
        match ip.parse::<IpAddr>() {
            Ok(addr) => targets.push((name, addr)),
            Err(e) => error!("will not check node {name}: bad internal address {ip:?}: {e}"),
        }
    }
    targets
}

/// Fan out one probe task per target and gather every outcome before
/// returning, so cycle latency is the slowest single probe. Returns the
/// sorted names confirmed down with no probe error.
pub async fn probe_all(prober: Arc<dyn Prober>, targets: Vec<(String, IpAddr)>) -> Vec<String> {
    // Capacity covers every outcome, so no probe task ever blocks on send.
    let (tx, mut rx) = mpsc::channel::<ProbeOutcome>(targets.len().max(1));
    for (node, addr) in targets {
        let prober = prober.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = prober.is_down(addr).await;
            let _ = tx.send(ProbeOutcome { node, addr, result }).await;
        });
    }
    drop(tx);

    let mut unreachable = Vec::new();
    while let Some(outcome) = rx.recv().await {
        match outcome.result {
            Err(e) => error!(
                "problem probing node {} at {}: {e:#}",
                outcome.node, outcome.addr
            ),
            Ok(true) => {
                info!("unreachable node detected: {}", outcome.node);
                unreachable.push(outcome.node);
            }
            Ok(false) => {}
        }
    }
    unreachable.sort();
    unreachable
}
