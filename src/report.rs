use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;

pub const REPORT_NAME_PREFIX: &str = "unreachable-nodes-from.mpodr";
pub const REPORT_LABEL_KEY: &str = "unreachable-nodes-from.mpodr";
pub const REPORT_LABEL_VALUE: &str = "true";

const KEY_LAST_CHECKED: &str = "lastChecked";
const KEY_UNREACHABLE_NODES: &str = "unreachableNodesCSV";
const KEY_CHECKED_BY: &str = "checkedByIP";

const REPORT_VALID_SECS: i64 = 60;

/// One reporter's current opinion of which nodes it cannot reach.
/// Persisted as a labelled ConfigMap in the daemon's namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityReport {
    pub checked_at: DateTime<Utc>,
    pub unreachable: Vec<String>,
    pub checked_by: String,
}

/// The record name is a pure function of the reporter identity, so each
/// reporter overwrites its own previous report and never creates a second
/// one.
pub fn report_name(reporter_ip: &str) -> String {
    format!("{REPORT_NAME_PREFIX}.{reporter_ip}")
}

impl ReachabilityReport {
    pub fn new(checked_by: &str, unreachable: Vec<String>) -> Self {
        Self {
            checked_at: Utc::now(),
            unreachable,
            checked_by: checked_by.to_string(),
        }
    }

    pub fn name(&self) -> String {
        report_name(&self.checked_by)
    }

    pub fn to_config_map(&self, namespace: &str) -> ConfigMap {
        let labels = BTreeMap::from([(
            REPORT_LABEL_KEY.to_string(),
            REPORT_LABEL_VALUE.to_string(),
        )]);
        // Node names never contain commas, so the list needs no escaping.
        let data = BTreeMap::from([
            (KEY_LAST_CHECKED.to_string(), self.checked_at.to_rfc3339()),
            (
                KEY_UNREACHABLE_NODES.to_string(),
                self.unreachable.join(","),
            ),
            (KEY_CHECKED_BY.to_string(), self.checked_by.clone()),
        ]);
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        let data = cm
            .data
            .as_ref()
            .ok_or_else(|| anyhow!("report carries no data"))?;
        let raw = data
            .get(KEY_LAST_CHECKED)
            .ok_or_else(|| anyhow!("report carries no {KEY_LAST_CHECKED} value"))?;
        let checked_at = DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("cannot parse {KEY_LAST_CHECKED} value {raw:?}"))?
            .with_timezone(&Utc);
        let unreachable = data
            .get(KEY_UNREACHABLE_NODES)
            .map(String::as_str)
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let checked_by = data.get(KEY_CHECKED_BY).cloned().unwrap_or_default();
        Ok(Self {
            checked_at,
            unreachable,
            checked_by,
        })
    }

    /// A report is stale once it predates the validity window; stale
    /// contributions age out instead of being deleted.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.checked_at >= now - Duration::seconds(REPORT_VALID_SECS)
    }
}
