//! Server address sources and selection.
//!
//! A discovery resolves a [`SelectMode`] to one concrete server address
//! (or all of them, for broadcast). [`MultiServersDiscovery`] serves a
//! static list; [`RegistryDiscovery`](crate::registry_discovery) layers a
//! cached registry refresh on top. [`Discovery`] dispatches between the
//! two, the same closed-enum shape the codec registry uses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use myrpc_core::{Result, RpcError};

use crate::registry_discovery::RegistryDiscovery;

/// Load-balancing policy for [`Discovery::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniform draw over the live set.
    Random,
    /// Next index modulo the live set size.
    RoundRobin,
}

/// Discovery over a caller-maintained address list.
pub struct MultiServersDiscovery {
    servers: RwLock<Vec<String>>,
    /// Round-robin cursor, seeded randomly so restarted clients don't
    /// gang up on the first server.
    index: AtomicUsize,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        MultiServersDiscovery {
            servers: RwLock::new(servers),
            index: AtomicUsize::new(rand::random::<u32>() as usize),
        }
    }

    /// Replaces the address list.
    pub fn update(&self, servers: Vec<String>) {
        *self.servers.write().unwrap() = servers;
    }

    pub fn get(&self, mode: SelectMode) -> Result<String> {
        let servers = self.servers.read().unwrap();
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }
        let n = servers.len();
        let picked = match mode {
            SelectMode::Random => &servers[rand::random::<u32>() as usize % n],
            SelectMode::RoundRobin => &servers[self.index.fetch_add(1, Ordering::Relaxed) % n],
        };
        Ok(picked.clone())
    }

    pub fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.servers.read().unwrap().clone())
    }
}

/// An address source: a static list or a registry-backed one.
pub enum Discovery {
    MultiServers(MultiServersDiscovery),
    Registry(RegistryDiscovery),
}

impl Discovery {
    /// Re-reads the backing source. A no-op for static lists and for
    /// registry discoveries inside their refresh TTL.
    pub async fn refresh(&self) -> Result<()> {
        match self {
            Discovery::MultiServers(_) => Ok(()),
            Discovery::Registry(discovery) => discovery.refresh().await,
        }
    }

    /// Replaces the address list.
    pub async fn update(&self, servers: Vec<String>) {
        match self {
            Discovery::MultiServers(discovery) => discovery.update(servers),
            Discovery::Registry(discovery) => discovery.update(servers).await,
        }
    }

    /// Picks one address according to the selection mode.
    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        match self {
            Discovery::MultiServers(discovery) => discovery.get(mode),
            Discovery::Registry(discovery) => discovery.get(mode).await,
        }
    }

    /// Returns the whole live set.
    pub async fn get_all(&self) -> Result<Vec<String>> {
        match self {
            Discovery::MultiServers(discovery) => discovery.get_all(),
            Discovery::Registry(discovery) => discovery.get_all().await,
        }
    }
}

impl From<MultiServersDiscovery> for Discovery {
    fn from(discovery: MultiServersDiscovery) -> Self {
        Discovery::MultiServers(discovery)
    }
}

impl From<RegistryDiscovery> for Discovery {
    fn from(discovery: RegistryDiscovery) -> Self {
        Discovery::Registry(discovery)
    }
}
