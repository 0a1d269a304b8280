//! myrpc, a multiplexed RPC runtime.
//!
//! One connection carries many concurrent calls: the client writes
//! `(Header, Body)` frames under a send lock and a background task pairs
//! responses back by sequence number. Servers dispatch requests into
//! per-request tasks with an optional handling deadline. Around that
//! core sit an HTTP `CONNECT` tunnel, a heartbeat registry, and a
//! discovery-driven load-balanced client.
//!
//! This crate is a facade re-exporting the workspace members:
//! [`myrpc_core`], [`myrpc_server`], [`myrpc_client`], and
//! [`myrpc_registry`].

pub use myrpc_client::{
    dial, dial_http, dial_http_with, dial_with, xdial, xdial_with, Call, CallReceiver, CallSender,
    Client, Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient,
};
#[cfg(unix)]
pub use myrpc_client::dial_unix_with;
pub use myrpc_core::codec::CodecKind;
pub use myrpc_core::protocol::{ConnectOptions, Header, CONNECTED, DEFAULT_RPC_PATH, MAGIC};
pub use myrpc_core::{Result, RpcError};
pub use myrpc_registry::{heartbeat, heartbeat_period, Registry, DEFAULT_REGISTRY_PATH};
pub use myrpc_server::{Method, Server, Service, ServiceBuilder};
