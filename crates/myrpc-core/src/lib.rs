//! myrpc protocol core
//!
//! This crate provides the shared protocol layer for the myrpc workspace:
//!
//! - **Protocol types**: the request/response [`Header`](protocol::Header),
//!   the [`ConnectOptions`](protocol::ConnectOptions) handshake record, and
//!   the canonical wire constants.
//! - **Codec layer**: a pluggable frame codec for `(Header, Body)` pairs
//!   over any byte stream, negotiated per connection via
//!   [`CodecKind`](codec::CodecKind).
//! - **Error type**: the workspace-wide [`RpcError`](error::RpcError).
//!
//! # Wire format
//!
//! Every connection starts with a single options record encoded as one
//! line of compact JSON. After the server validates the magic number and
//! codec tag, all further traffic is `(Header, Body)` frame pairs in the
//! negotiated codec.

pub mod codec;
pub mod error;
pub mod protocol;

pub use codec::{BoxReader, BoxWriter, CodecKind, CodecReader, CodecWriter};
pub use error::{Result, RpcError};
pub use protocol::{read_options, write_options, ConnectOptions, Header, MAGIC};
