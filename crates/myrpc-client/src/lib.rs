//! myrpc client
//!
//! The client half of the runtime:
//!
//! - [`client`]: the multiplexed [`Client`] with many in-flight calls over
//!   one duplex connection, correlated by sequence number, with a single
//!   background receive task.
//! - [`dial`]: connection establishment with connect timeouts, the
//!   `protocol@addr` grammar, and `CONNECT` tunnel dialing.
//! - [`discovery`] / [`registry_discovery`]: server address sources with
//!   Random and RoundRobin selection, static or registry-backed.
//! - [`xclient`]: the load-balanced facade caching one client per
//!   address, with `call` and cancel-on-first-failure `broadcast`.

pub mod client;
pub mod dial;
pub mod discovery;
pub mod registry_discovery;
pub mod xclient;

pub use client::{Call, CallReceiver, CallSender, Client};
#[cfg(unix)]
pub use dial::dial_unix_with;
pub use dial::{dial, dial_http, dial_http_with, dial_with, xdial, xdial_with};
pub use discovery::{Discovery, MultiServersDiscovery, SelectMode};
pub use registry_discovery::RegistryDiscovery;
pub use xclient::XClient;
