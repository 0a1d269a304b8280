//! Server-side heartbeat helper.
//!
//! Sends one POST immediately (its failure is the caller's to handle),
//! then keeps beating from a background task that stops on the first
//! send error.

use std::time::Duration;

use myrpc_core::{Result, RpcError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::registry::DEFAULT_TIMEOUT;

/// Derives a beat period from a registry TTL: one minute of lead time,
/// clamped so small TTLs still get at least two beats per TTL, and never
/// below one second. A zero TTL (entries never expire) beats on the
/// default TTL's schedule.
pub fn heartbeat_period(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        return heartbeat_period(DEFAULT_TIMEOUT);
    }
    let lead = ttl.saturating_sub(Duration::from_secs(60));
    lead.max(ttl / 2).max(Duration::from_secs(1))
}

/// Registers `server_addr` with the registry and keeps it alive. With no
/// explicit period the default-TTL schedule is used. Returns the handle
/// of the beating task; aborting it stops the heartbeat.
pub async fn heartbeat(
    registry: &str,
    server_addr: &str,
    period: Option<Duration>,
) -> Result<JoinHandle<()>> {
    let period = period.unwrap_or_else(|| heartbeat_period(DEFAULT_TIMEOUT));
    let http = reqwest::Client::new();
    send_heartbeat(&http, registry, server_addr).await?;

    let registry = registry.to_string();
    let server_addr = server_addr.to_string();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; the initial beat already
        // went out above.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry, &server_addr).await {
                error!("rpc server: heart beat err: {e}");
                break;
            }
        }
    });
    Ok(handle)
}

async fn send_heartbeat(http: &reqwest::Client, registry: &str, server_addr: &str) -> Result<()> {
    info!("{server_addr} send heart beat to registry {registry}");
    http.post(registry)
        .header("X-Myrpc-Server", server_addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_leaves_a_minute_of_lead_time() {
        assert_eq!(
            heartbeat_period(Duration::from_secs(5 * 60)),
            Duration::from_secs(4 * 60)
        );
        assert_eq!(
            heartbeat_period(Duration::from_secs(10 * 60)),
            Duration::from_secs(9 * 60)
        );
    }

    #[test]
    fn small_ttls_are_clamped_to_half() {
        assert_eq!(heartbeat_period(Duration::from_secs(4)), Duration::from_secs(2));
        assert_eq!(heartbeat_period(Duration::from_secs(90)), Duration::from_secs(45));
    }

    #[test]
    fn period_never_drops_below_a_second() {
        assert_eq!(heartbeat_period(Duration::from_millis(500)), Duration::from_secs(1));
    }

    #[test]
    fn zero_ttl_uses_the_default_schedule() {
        assert_eq!(heartbeat_period(Duration::ZERO), Duration::from_secs(4 * 60));
    }

    #[tokio::test]
    async fn unreachable_registry_fails_the_first_beat() {
        let result = heartbeat("http://127.0.0.1:1/myRPC/registry", "tcp@server0", None).await;
        assert!(matches!(result, Err(RpcError::Registry(_))));
    }
}
