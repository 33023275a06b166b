use anyhow::Result;
use clap::Parser;
use log::info;
use mpodr::cli::Cli;
use mpodr::daemon;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    info!(
        "metal pod reaper starting (dry-run={}, reap={}, namespace={}, host-ip={})",
        cli.dry_run, !cli.no_reap, cli.namespace, cli.host_ip
    );
    daemon::run(cli).await
}
