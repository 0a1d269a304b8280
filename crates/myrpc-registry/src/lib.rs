//! myrpc registry
//!
//! A lightweight liveness directory over HTTP: servers POST heartbeats,
//! clients GET the live set from a response header. Entries expire when
//! their last heartbeat is older than the registry's TTL.
//!
//! - [`registry`]: the TTL map and its axum surface.
//! - [`heartbeat`]: the server-side helper that keeps an address
//!   registered.

pub mod heartbeat;
pub mod registry;

pub use heartbeat::{heartbeat, heartbeat_period};
pub use registry::{Registry, DEFAULT_REGISTRY_PATH, DEFAULT_TIMEOUT};
