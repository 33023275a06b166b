use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use log::{debug, error, info};

use crate::store::Store;

/// The slice of the store the reaper needs. Tests substitute a fake so
/// delete semantics can be exercised without a cluster.
#[async_trait]
pub trait PodDeleter: Send + Sync {
    /// (namespace, name) of every pod bound to the node.
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<(String, String)>>;

    async fn delete_pod(&self, namespace: &str, name: &str, dry_run: bool) -> Result<()>;
}

#[async_trait]
impl PodDeleter for Store {
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<(String, String)>> {
        let pods = self.pods_bound_to(node_name).await?;
        Ok(pods.into_iter().filter_map(pod_key).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str, dry_run: bool) -> Result<()> {
        self.force_delete_pod(namespace, name, dry_run).await
    }
}

fn pod_key(pod: Pod) -> Option<(String, String)> {
    Some((pod.metadata.namespace?, pod.metadata.name?))
}

/// Force-delete every pod bound to `node_name` so the orchestrator's
/// controllers reschedule their workloads. Individual delete failures
/// are logged and the remaining pods are still reaped; repeated deletes
/// of an already-gone pod are harmless.
pub async fn reap_node<D: PodDeleter + ?Sized>(
    deleter: &D,
    node_name: &str,
    dry_run: bool,
) -> Result<()> {
    let pods = deleter.pods_on_node(node_name).await?;
    debug!("set to reap {} pods from {node_name}", pods.len());
    for (namespace, name) in pods {
        info!("reaping {namespace}/{name} from {node_name} (dry-run={dry_run})");
        if let Err(e) = deleter.delete_pod(&namespace, &name, dry_run).await {
            error!("error reaping pod {namespace}/{name} from {node_name}: {e:#}");
        }
    }
    Ok(())
}
