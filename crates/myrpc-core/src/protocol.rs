use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecKind;
use crate::error::Result;

/// Fixed sentinel identifying the myrpc protocol. Every options record on
/// the wire carries this value; the server rejects anything else.
pub const MAGIC: u32 = 0x3bef5c;

/// Default HTTP tunnel mount point for `CONNECT` dialing.
pub const DEFAULT_RPC_PATH: &str = "/_myRPC_";

/// Status text the server answers a successful `CONNECT` with.
pub const CONNECTED: &str = "200 Connected to myRPC";

/// One frame header. A request and a response each consist of a header
/// frame followed by a body frame.
///
/// `seq` is assigned by the client, strictly increasing per connection,
/// and is the sole correlator between a request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Target in `Service.Method` form.
    pub service_method: String,
    /// Per-client request id, starting at 1.
    pub seq: u64,
    /// Error text, empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Header {
    /// Builds a request header with an empty error field.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Connection-level handshake record.
///
/// Sent once by the client as the first bytes on every connection,
/// encoded as a single line of compact JSON regardless of the codec it
/// negotiates. Timeouts of zero mean "no deadline".
///
/// There is no mutable process-wide default; [`ConnectOptions::default`]
/// plays that role explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub magic: u32,
    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default)]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub handle_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            magic: MAGIC,
            codec: CodecKind::default(),
            connect_timeout_ms: 10_000,
            handle_timeout_ms: 0,
        }
    }
}

impl ConnectOptions {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Forces the magic number back to the canonical sentinel. The field
    /// is part of the wire format but not configurable; every dial path
    /// normalizes before sending.
    pub fn normalized(mut self) -> Self {
        self.magic = MAGIC;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handle_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_timeout_ms)
    }
}

/// Writes the options record as one newline-terminated line of JSON.
pub async fn write_options<W>(writer: &mut W, options: &ConnectOptions) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(options)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one options line from a buffered reader. The reader is
/// shared with the codec constructed afterwards, so nothing past the
/// newline is consumed.
pub async fn read_options<R>(reader: &mut R) -> Result<ConnectOptions>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before options",
        )
        .into());
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
