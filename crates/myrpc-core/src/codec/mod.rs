//! Frame codecs.
//!
//! A codec turns a byte stream into `(Header, Body)` frames. The kind is
//! negotiated once per connection through the options handshake and the
//! remaining stream is wrapped accordingly. Bodies cross this layer as
//! [`serde_json::Value`] so arbitrary user types round-trip without any
//! schema; typed conversion happens at the client and service edges.
//!
//! JSON is currently the only wire format, but the enum keeps the
//! registry open: a new format is a new [`CodecKind`] variant plus a
//! reader/writer pair dispatched below.

mod json;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::error::Result;
use crate::protocol::Header;

/// Upper bound on a single frame, guarding the length-prefix allocation.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Type-erased stream halves, so TCP, Unix sockets, hijacked HTTP
/// connections, and in-memory test streams all run the same code.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Codec registry tag carried in the options handshake.
///
/// The default entry is JSON; an options record without a codec field
/// negotiates it implicitly. Unknown tags fail option decoding, which the
/// server treats as a handshake failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodecKind {
    #[default]
    #[serde(rename = "application/json")]
    Json,
}

impl CodecKind {
    /// Wraps the read half of a negotiated connection. The buffered
    /// reader is handed over as-is so bytes already buffered during the
    /// handshake are not lost.
    pub fn reader(self, reader: BufReader<BoxReader>) -> CodecReader {
        match self {
            CodecKind::Json => CodecReader(ReaderKind::Json(json::JsonReader::new(reader))),
        }
    }

    /// Wraps the write half of a negotiated connection.
    pub fn writer(self, writer: BoxWriter) -> CodecWriter {
        match self {
            CodecKind::Json => CodecWriter(WriterKind::Json(json::JsonWriter::new(writer))),
        }
    }
}

/// Decoding side of a codec. Owned by exactly one task (the client's
/// receive pump or the server's serve loop).
pub struct CodecReader(ReaderKind);

enum ReaderKind {
    Json(json::JsonReader),
}

impl CodecReader {
    pub async fn read_header(&mut self) -> Result<Header> {
        match &mut self.0 {
            ReaderKind::Json(codec) => codec.read_frame().await,
        }
    }

    pub async fn read_body(&mut self) -> Result<Value> {
        match &mut self.0 {
            ReaderKind::Json(codec) => codec.read_frame().await,
        }
    }
}

/// Encoding side of a codec. Callers serialize access with a mutex held
/// across [`CodecWriter::write`] so header and body frames stay adjacent
/// on the wire.
pub struct CodecWriter(WriterKind);

enum WriterKind {
    Json(json::JsonWriter),
}

impl CodecWriter {
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        match &mut self.0 {
            WriterKind::Json(codec) => codec.write(header, body).await,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match &mut self.0 {
            WriterKind::Json(codec) => codec.close().await,
        }
    }
}
