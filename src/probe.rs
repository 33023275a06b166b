use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};

pub const PING_COUNT: u16 = 5;
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Liveness probe for a single node address.
///
/// Implementations report `true` only when the address answered none of
/// the echoes; partial loss still counts as reachable.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn is_down(&self, addr: IpAddr) -> Result<bool>;
}

/// ICMP echo prober. Raw sockets need CAP_NET_RAW; each probe opens its
/// own socket and construction is a per-probe failure.
pub struct IcmpProber;

#[async_trait]
impl Prober for IcmpProber {
    async fn is_down(&self, addr: IpAddr) -> Result<bool> {
        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).context("cannot open icmp socket")?;
        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(PING_TIMEOUT);

        let payload = [0u8; 56];
        let mut received = 0u16;
        for seq in 0..PING_COUNT {
            if pinger.ping(PingSequence(seq), &payload).await.is_ok() {
                received += 1;
            }
        }
        Ok(received == 0)
    }
}
