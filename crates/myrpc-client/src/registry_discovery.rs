//! Registry-backed discovery.
//!
//! Wraps [`MultiServersDiscovery`] with a cached refresh against the
//! registry's HTTP surface: `get`/`get_all` first call `refresh`, which
//! is a no-op while the last successful refresh is younger than the
//! update TTL and otherwise replaces the list from the
//! `X-Myrpc-Servers` response header.

use std::time::{Duration, Instant};

use myrpc_core::{Result, RpcError};
use tokio::sync::Mutex;
use tracing::info;

use crate::discovery::{MultiServersDiscovery, SelectMode};

/// How long a fetched server list stays fresh by default.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry_url: String,
    update_timeout: Duration,
    /// Guarded by an async mutex held across the refresh GET, so
    /// concurrent callers wait for one refresh instead of racing their
    /// own.
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `update_timeout` of `None` uses [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry_url: impl Into<String>, update_timeout: Option<Duration>) -> Self {
        RegistryDiscovery {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            update_timeout: update_timeout.unwrap_or(DEFAULT_UPDATE_TIMEOUT),
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub async fn update(&self, servers: Vec<String>) {
        let mut last_update = self.last_update.lock().await;
        self.servers.update(servers);
        *last_update = Some(Instant::now());
    }

    /// Fetches the live set from the registry unless the cache is still
    /// fresh.
    pub async fn refresh(&self) -> Result<()> {
        let mut last_update = self.last_update.lock().await;
        if let Some(at) = *last_update {
            if at.elapsed() < self.update_timeout {
                return Ok(());
            }
        }
        info!("rpc registry: refresh servers from registry {}", self.registry_url);
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?;
        let servers = response
            .headers()
            .get("X-Myrpc-Servers")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(String::from)
            .collect();
        self.servers.update(servers);
        *last_update = Some(Instant::now());
        Ok(())
    }

    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.get(mode)
    }

    pub async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.servers.get_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_primes_the_cache() {
        // A manual update stamps the cache, so get() does not try to
        // reach the (nonexistent) registry inside the TTL.
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/myRPC/registry", None);
        discovery.update(vec!["tcp@server0".into()]).await;
        assert_eq!(
            discovery.get(SelectMode::RoundRobin).await.unwrap(),
            "tcp@server0"
        );
    }

    #[tokio::test]
    async fn stale_cache_refreshes_and_propagates_errors() {
        // Zero TTL forces a refresh, which fails against a dead address.
        let discovery =
            RegistryDiscovery::new("http://127.0.0.1:1/myRPC/registry", Some(Duration::ZERO));
        discovery.update(vec!["tcp@server0".into()]).await;
        let err = discovery.get(SelectMode::RoundRobin).await.unwrap_err();
        assert!(matches!(err, RpcError::Registry(_)));
    }
}
