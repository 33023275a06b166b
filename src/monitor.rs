use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::election::{ElectionError, LeaseLock, RENEW_DEADLINE, RETRY_PERIOD};
use crate::quorum;
use crate::reaper;
use crate::store::Store;

const CYCLE_INTERVAL: Duration = Duration::from_secs(5);

/// Aggregates the detectors' reports into a cluster view and reaps
/// quorum-agreed unreachable nodes. Runs on the one replica holding the
/// lease; losing the lease is fatal so the replica rejoins election
/// fresh after a restart.
pub struct Monitor {
    store: Store,
    reap: bool,
    dry_run: bool,
    host_ip: String,
}

impl Monitor {
    pub fn new(store: Store, reap: bool, dry_run: bool, host_ip: &str) -> Self {
        Self {
            store,
            reap,
            dry_run,
            host_ip: host_ip.to_string(),
        }
    }

    /// Contend for the lease, then run reap cycles and lease renewals in
    /// one loop until the lease is lost or the token is cancelled.
    /// Always exits with an error.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let lock = LeaseLock::new(self.store.client(), self.store.namespace(), &self.host_ip);
        info!("{}: contending for lease", self.host_ip);
        lock.acquire(&token).await?;
        info!("{}: leading", self.host_ip);

        let mut renew_ticks = interval_at(Instant::now() + RETRY_PERIOD, RETRY_PERIOD);
        renew_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle_ticks = interval_at(Instant::now() + CYCLE_INTERVAL, CYCLE_INTERVAL);
        cycle_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    lock.release().await;
                    bail!("termination requested while leading");
                }
                _ = renew_ticks.tick() => {
                    match lock.renew().await {
                        Ok(()) => last_renewed = Instant::now(),
                        Err(e) if e.downcast_ref::<ElectionError>().is_some() => {
                            return Err(e).context("lost the lease");
                        }
                        Err(e) => {
                            warn!("lease renewal failed: {e:#}");
                            if last_renewed.elapsed() >= RENEW_DEADLINE {
                                bail!("could not renew the lease within {RENEW_DEADLINE:?}");
                            }
                        }
                    }
                }
                _ = cycle_ticks.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!("monitor cycle failed: {e:#}");
                    }
                }
            }
        }
    }

    /// One aggregation pass: score the fresh reports, pick the
    /// quorum-agreed unready nodes, and reap them when enabled.
    async fn cycle(&self) -> Result<()> {
        let reports = self.store.list_reports().await?;
        let all_nodes = self.store.list_nodes().await?;
        let candidates = quorum::reap_candidates(&all_nodes, &reports, Utc::now());
        if candidates.is_empty() {
            debug!("no quorum-agreed unreachable nodes");
            return Ok(());
        }
        for node in candidates {
            if !self.reap {
                info!("reaping disabled; node {node} is unreachable by quorum");
                continue;
            }
            if let Err(e) = reaper::reap_node(&self.store, &node, self.dry_run).await {
                error!("error reaping node {node}: {e:#}");
            }
        }
        Ok(())
    }
}
