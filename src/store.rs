use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use log::error;

use crate::report::{REPORT_LABEL_KEY, REPORT_LABEL_VALUE, ReachabilityReport};

/// Typed access to the cluster objects the daemon coordinates through:
/// nodes, reachability-report ConfigMaps, pods and the lease namespace.
#[derive(Clone)]
pub struct Store {
    client: Client,
    namespace: String,
}

impl Store {
    /// KUBECONFIG selects out-of-cluster configuration; the in-cluster
    /// service account is used otherwise.
    pub async fn new(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("cannot build cluster client")?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .context("cannot list nodes")?;
        Ok(nodes.items)
    }

    /// All reachability reports in the namespace, discovered by the shared
    /// label pair. Records that fail to parse are dropped with a log line.
    pub async fn list_reports(&self) -> Result<Vec<ReachabilityReport>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{REPORT_LABEL_KEY}={REPORT_LABEL_VALUE}");
        let cms = api
            .list(&ListParams::default().labels(&selector))
            .await
            .context("cannot list reachability reports")?;

        let mut reports = Vec::new();
        for cm in cms.items {
            match ReachabilityReport::from_config_map(&cm) {
                Ok(report) => reports.push(report),
                Err(e) => error!(
                    "dropping report {}: {e:#}",
                    cm.metadata.name.as_deref().unwrap_or("<unnamed>")
                ),
            }
        }
        Ok(reports)
    }

    /// Create the reporter's record if absent, replace it otherwise.
    /// Absence is decided by the store's typed not-found signal.
    pub async fn upsert_report(&self, report: &ReachabilityReport) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = report.name();
        let mut cm = report.to_config_map(&self.namespace);
        match api
            .get_opt(&name)
            .await
            .context("cannot read existing report")?
        {
            None => {
                api.create(&PostParams::default(), &cm)
                    .await
                    .with_context(|| format!("cannot create report {name}"))?;
            }
            Some(existing) => {
                cm.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&name, &PostParams::default(), &cm)
                    .await
                    .with_context(|| format!("cannot update report {name}"))?;
            }
        }
        Ok(())
    }

    /// Pods bound to the node, across all namespaces.
    pub async fn pods_bound_to(&self, node_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let pods = api
            .list(&params)
            .await
            .with_context(|| format!("cannot list pods bound to {node_name}"))?;
        Ok(pods.items)
    }

    pub async fn force_delete_pod(&self, namespace: &str, name: &str, dry_run: bool) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &reap_delete_params(dry_run))
            .await
            .with_context(|| format!("cannot delete pod {namespace}/{name}"))?;
        Ok(())
    }
}

/// Grace 0 makes the delete immediate; dependents are orphaned so the
/// owning controllers reschedule replacements. With dry-run the request
/// is validated server-side but never persisted.
pub fn reap_delete_params(dry_run: bool) -> DeleteParams {
    DeleteParams {
        dry_run,
        grace_period_seconds: Some(0),
        propagation_policy: Some(PropagationPolicy::Orphan),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_deletes_are_immediate_and_orphaning() {
        let params = reap_delete_params(false);
        assert!(!params.dry_run);
        assert_eq!(params.grace_period_seconds, Some(0));
        assert!(matches!(
            params.propagation_policy,
            Some(PropagationPolicy::Orphan)
        ));
    }

    #[test]
    fn dry_run_deletes_carry_the_directive() {
        let params = reap_delete_params(true);
        assert!(params.dry_run);
        assert_eq!(params.grace_period_seconds, Some(0));
    }
}
