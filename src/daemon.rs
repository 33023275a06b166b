use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::detector::Detector;
use crate::monitor::Monitor;
use crate::probe::IcmpProber;
use crate::store::Store;

/// Compose the monitor and the detector and block until the first of
/// them fails. Both are specified never to return cleanly, so a clean
/// close of both error channels is itself a fatal invariant violation.
pub async fn run(cli: Cli) -> Result<()> {
    let store = Store::new(&cli.namespace).await?;

    // The token covers the monitor's leading scope; the detector does
    // not participate and dies with the process.
    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());

    let (monitor_tx, mut monitor_rx) = mpsc::channel::<anyhow::Error>(1);
    let monitor = Monitor::new(store.clone(), !cli.no_reap, cli.dry_run, &cli.host_ip);
    let monitor_token = token.clone();
    tokio::spawn(async move {
        if let Err(e) = monitor.run(monitor_token).await {
            let _ = monitor_tx.send(e).await;
        }
    });
    info!("starting monitor");

    let (detector_tx, mut detector_rx) = mpsc::channel::<anyhow::Error>(1);
    let detector = Detector::new(store, Arc::new(IcmpProber), &cli.host_ip);
    tokio::spawn(async move {
        if let Err(e) = detector.run().await {
            let _ = detector_tx.send(e).await;
        }
    });
    info!("starting node down detector");

    let mut monitor_open = true;
    let mut detector_open = true;
    loop {
        tokio::select! {
            received = monitor_rx.recv(), if monitor_open => match received {
                Some(e) => return Err(e).context("monitor failed"),
                None => monitor_open = false,
            },
            received = detector_rx.recv(), if detector_open => match received {
                Some(e) => return Err(e).context("node down detector failed"),
                None => detector_open = false,
            },
            else => break,
        }
    }
    bail!("all daemon threads exited without reporting an error")
}

fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("received termination, signaling shutdown");
        token.cancel();
    });
}
