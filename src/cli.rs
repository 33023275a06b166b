use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "mpodr", version, about = "Metal pod reaper daemon")]
pub struct Cli {
    /// Only report on potential changes; deletes carry the dry-run directive
    #[arg(
        long,
        env = "DRY_RUN",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub dry_run: bool,

    /// Do not run the reap facility
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub no_reap: bool,

    /// Namespace for the lease lock and the reachability reports
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// This replica's host ip, used as its reporter identity
    #[arg(long, env = "HOST_IP")]
    pub host_ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flags_default_on() {
        let cli = Cli::parse_from(["mpodr", "--namespace", "kube-system", "--host-ip", "10.0.0.1"]);
        assert!(cli.dry_run);
        assert!(cli.no_reap);
        assert_eq!(cli.namespace, "kube-system");
        assert_eq!(cli.host_ip, "10.0.0.1");
    }

    #[test]
    fn bool_flags_can_be_disabled() {
        let cli = Cli::parse_from([
            "mpodr",
            "--namespace",
            "kube-system",
            "--host-ip",
            "10.0.0.1",
            "--dry-run=false",
            "--no-reap=false",
        ]);
        assert!(!cli.dry_run);
        assert!(!cli.no_reap);
    }

    #[test]
    fn namespace_is_required() {
        assert!(Cli::try_parse_from(["mpodr", "--host-ip", "10.0.0.1"]).is_err());
    }
}
