use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::Client;
use kube::api::{Api, ObjectMeta, PostParams};
use log::{debug, info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const LEASE_NAME: &str = "metal-pod-reaper";

const LEASE_DURATION_SECS: i32 = 15;
pub const RENEW_DEADLINE: Duration = Duration::from_secs(10);
pub const RETRY_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("lease {LEASE_NAME} is held by another replica")]
    LeaseLost,
}

/// Lease-based mutual exclusion over a single named Lease object. The
/// holder identity is the replica's host ip, the same identity the
/// detector reports under.
pub struct LeaseLock {
    api: Api<Lease>,
    identity: String,
}

impl LeaseLock {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity: identity.to_string(),
        }
    }

    /// Block until this replica holds the lease or the token is
    /// cancelled.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<()> {
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!("{}: acquired lease {LEASE_NAME}", self.identity);
                    return Ok(());
                }
                Ok(false) => debug!("lease {LEASE_NAME} held elsewhere, waiting"),
                Err(e) => warn!("lease acquisition attempt failed: {e:#}"),
            }
            tokio::select! {
                _ = token.cancelled() => bail!("termination requested before acquiring the lease"),
                _ = sleep(RETRY_PERIOD) => {}
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool> {
        let now = Utc::now();
        match self.api.get_opt(LEASE_NAME).await? {
            None => {
                let lease = desired_lease(&self.identity, now, now, 1);
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    // Another contender created it first.
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e).context("creating lease"),
                }
            }
            Some(current) => {
                let spec = current.spec.clone().unwrap_or_default();
                let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                if !held_by_us && !expired(&spec, now) {
                    return Ok(false);
                }
                let acquire_time = match (&spec.acquire_time, held_by_us) {
                    (Some(acquired), true) => acquired.0,
                    _ => now,
                };
                let transitions =
                    spec.lease_transitions.unwrap_or(0) + if held_by_us { 0 } else { 1 };
                let mut lease = desired_lease(&self.identity, acquire_time, now, transitions);
                lease.metadata.resource_version = current.metadata.resource_version.clone();
                match self.api.replace(LEASE_NAME, &PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    // Lost the write race against another contender.
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e).context("taking over lease"),
                }
            }
        }
    }

    /// Re-assert holdership by advancing the renew time. Returns
    /// `ElectionError::LeaseLost` once another holder has the lease.
    pub async fn renew(&self) -> Result<()> {
        let now = Utc::now();
        let current = self
            .api
            .get_opt(LEASE_NAME)
            .await?
            .ok_or(ElectionError::LeaseLost)?;
        let spec = current.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Err(ElectionError::LeaseLost.into());
        }
        let acquire_time = spec.acquire_time.as_ref().map(|t| t.0).unwrap_or(now);
        let mut lease = desired_lease(
            &self.identity,
            acquire_time,
            now,
            spec.lease_transitions.unwrap_or(1),
        );
        lease.metadata.resource_version = current.metadata.resource_version.clone();
        self.api
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
            .context("renewing lease")?;
        Ok(())
    }

    /// Voluntarily step down so the next election settles without
    /// waiting out the lease duration. Best effort.
    pub async fn release(&self) {
        let result = async {
            let Some(current) = self.api.get_opt(LEASE_NAME).await? else {
                return Ok(());
            };
            let spec = current.spec.clone().unwrap_or_default();
            if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
                return Ok(());
            }
            let mut lease = current.clone();
            lease.spec = Some(LeaseSpec {
                holder_identity: None,
                acquire_time: None,
                renew_time: None,
                lease_duration_seconds: spec.lease_duration_seconds,
                lease_transitions: spec.lease_transitions,
                ..Default::default()
            });
            self.api
                .replace(LEASE_NAME, &PostParams::default(), &lease)
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        match result {
            Ok(()) => info!("{}: released lease {LEASE_NAME}", self.identity),
            Err(e) => warn!("failed to release lease {LEASE_NAME}: {e:#}"),
        }
    }
}

fn desired_lease(
    identity: &str,
    acquired: DateTime<Utc>,
    renewed: DateTime<Utc>,
    transitions: i32,
) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            acquire_time: Some(MicroTime(acquired)),
            renew_time: Some(MicroTime(renewed)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }),
    }
}

/// A lease with no renew time, or one renewed longer than its duration
/// ago, is up for grabs.
fn expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let Some(renewed) = spec.renew_time.as_ref() else {
        return true;
    };
    let duration = chrono::Duration::seconds(
        spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECS) as i64,
    );
    renewed.0 + duration < now
}
