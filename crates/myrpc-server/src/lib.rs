//! myrpc server
//!
//! This crate hosts the server half of the runtime:
//!
//! - [`service`]: typed method registration behind a uniform dispatch
//!   surface ([`Service`], [`ServiceBuilder`], per-method call counters).
//! - [`server`]: the connection engine with the options handshake, serial frame
//!   reads, concurrent per-request handlers with an optional handling
//!   deadline, serialized response writes.
//! - [`http`]: a `CONNECT` tunnel that hijacks the byte stream and runs
//!   the same frame protocol over it.
//!
//! A minimal server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use myrpc_server::{Server, ServiceBuilder};
//!
//! #[derive(serde::Deserialize)]
//! struct SumArgs { a: i64, b: i64 }
//!
//! # async fn run() -> myrpc_core::Result<()> {
//! let service = ServiceBuilder::new("Arith")
//!     .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
//!     .build()?;
//!
//! let server = Arc::new(Server::new());
//! server.register(service)?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{Method, Service, ServiceBuilder};
