use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use log::debug;

use crate::nodes;
use crate::report::ReachabilityReport;

/// Per-node count of fresh reports naming it unreachable. Stale reports
/// contribute nothing to any counter.
pub fn tally(reports: &[ReachabilityReport], now: DateTime<Utc>) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for report in reports {
        if !report.is_fresh(now) {
            debug!("ignoring stale report from {}", report.checked_by);
            continue;
        }
        for name in &report.unreachable {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Nodes that are presently unready and that every potential reporter
/// agrees are unreachable.
///
/// The threshold is the number of Ready nodes, the replicas assumed
/// alive and reporting; unanimity among them protects against a
/// partitioned minority of reporters. At least one agreeing report is
/// always required, so nothing is reaped when no node is Ready.
pub fn reap_candidates(
    all_nodes: &[Node],
    reports: &[ReachabilityReport],
    now: DateTime<Utc>,
) -> Vec<String> {
    let unready = nodes::unready_nodes(all_nodes);
    let threshold = (all_nodes.len() - unready.len()).max(1);
    let counts = tally(reports, now);

    unready
        .iter()
        .filter_map(|node| {
            let name = nodes::node_name(node);
            let agreed = counts.get(name).copied().unwrap_or(0);
            (agreed >= threshold).then(|| name.to_string())
        })
        .collect()
}
