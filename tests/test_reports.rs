use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams};
use mpodr::report::ReachabilityReport;
use mpodr::store::Store;
use serial_test::serial;

const TEST_NAMESPACE: &str = "default";
const TEST_REPORTER: &str = "203.0.113.77";

// These checks need a reachable cluster (kubeconfig or in-cluster) and
// skip themselves otherwise.
async fn get_store() -> Option<Store> {
    let store = match Store::new(TEST_NAMESPACE).await {
        Ok(store) => store,
        Err(_) => {
            println!("Skipping test - no cluster configuration");
            return None;
        }
    };
    if store.list_nodes().await.is_err() {
        println!("Skipping test - cluster not reachable");
        return None;
    }
    Some(store)
}

async fn cleanup(store: &Store, name: &str) {
    let api: Api<ConfigMap> = Api::namespaced(store.client(), TEST_NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}

#[tokio::test]
#[serial]
async fn repeated_upserts_keep_a_single_record() {
    let Some(store) = get_store().await else {
        return;
    };

    let first = ReachabilityReport::new(TEST_REPORTER, vec!["node-x".to_string()]);
    store.upsert_report(&first).await.unwrap();
    let second = ReachabilityReport::new(TEST_REPORTER, Vec::new());
    store.upsert_report(&second).await.unwrap();

    let reports = store.list_reports().await.unwrap();
    let mine: Vec<_> = reports
        .iter()
        .filter(|r| r.checked_by == TEST_REPORTER)
        .collect();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].unreachable.is_empty());

    cleanup(&store, &second.name()).await;
}

#[tokio::test]
#[serial]
async fn reports_are_discoverable_by_label() {
    let Some(store) = get_store().await else {
        return;
    };

    let report = ReachabilityReport::new(TEST_REPORTER, vec!["node-y".to_string()]);
    store.upsert_report(&report).await.unwrap();

    let reports = store.list_reports().await.unwrap();
    assert!(reports.iter().any(|r| r.checked_by == TEST_REPORTER));

    cleanup(&store, &report.name()).await;
}
