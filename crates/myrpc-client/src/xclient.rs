//! Load-balanced client facade.
//!
//! An [`XClient`] combines a [`Discovery`] with a cache of one [`Client`]
//! per server address. Cached clients are reused across calls; a client
//! that went unavailable is closed, evicted, and re-dialled on demand.
//! `broadcast` fans a call out to every known server and collapses to
//! the first error, cancelling the stragglers.

use std::collections::HashMap;

use myrpc_core::protocol::ConnectOptions;
use myrpc_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::client::Client;
use crate::dial::xdial_with;
use crate::discovery::{Discovery, SelectMode};

pub struct XClient {
    discovery: Discovery,
    mode: SelectMode,
    options: ConnectOptions,
    clients: Mutex<HashMap<String, Client>>,
}

impl XClient {
    pub fn new(discovery: impl Into<Discovery>, mode: SelectMode, options: ConnectOptions) -> Self {
        XClient {
            discovery: discovery.into(),
            mode,
            options: options.normalized(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Closes and evicts every cached client.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }

    /// Returns a live client for the address, reusing the cache when the
    /// cached entry is still available.
    async fn dial(&self, rpc_addr: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(client.clone());
            }
            if let Some(stale) = clients.remove(rpc_addr) {
                let _ = stale.close().await;
            }
        }
        let client = xdial_with(rpc_addr, &self.options).await?;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    /// One call against a discovered server.
    pub async fn call<A, R>(&self, service_method: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Fans the call out to every discovered server. The first error
    /// cancels the calls still in flight and is returned once every
    /// branch has settled; otherwise the first reply to have completed is
    /// returned (later successes do not overwrite it).
    pub async fn broadcast<A>(&self, service_method: &str, args: A) -> Result<Value>
    where
        A: Serialize,
    {
        let servers = self.discovery.get_all().await?;
        let args = serde_json::to_value(args)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut branches = JoinSet::new();
        let mut first_error = None;

        for rpc_addr in servers {
            let client = match self.dial(&rpc_addr).await {
                Ok(client) => client,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        let _ = cancel_tx.send(true);
                    }
                    continue;
                }
            };
            let args = args.clone();
            let service_method = service_method.to_string();
            let mut cancelled = cancel_rx.clone();
            branches.spawn(async move {
                tokio::select! {
                    // A sibling failed first: drop the in-flight call,
                    // which unregisters it.
                    _ = cancelled.changed() => None,
                    result = client.call_value(&service_method, args) => Some(result),
                }
            });
        }

        let mut reply = None;
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(Some(Ok(value))) => {
                    if reply.is_none() {
                        reply = Some(value);
                    }
                }
                Ok(Some(Err(e))) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        let _ = cancel_tx.send(true);
                    }
                }
                Ok(None) | Err(_) => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reply.unwrap_or(Value::Null)),
        }
    }
}
