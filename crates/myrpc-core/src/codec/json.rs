//! JSON frame codec.
//!
//! Wire format per frame:
//!
//! ```text
//! [4-byte length, u32 big-endian] [compact JSON]
//! ```
//!
//! A request or response is two consecutive frames, header then body,
//! flushed together.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::{BoxReader, BoxWriter, MAX_FRAME_SIZE};
use crate::error::{Result, RpcError};
use crate::protocol::Header;

pub(super) struct JsonReader {
    reader: BufReader<BoxReader>,
}

impl JsonReader {
    pub(super) fn new(reader: BufReader<BoxReader>) -> Self {
        JsonReader { reader }
    }

    pub(super) async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(serde_json::from_slice(&buf)?)
    }
}

pub(super) struct JsonWriter {
    writer: BoxWriter,
}

impl JsonWriter {
    pub(super) fn new(writer: BoxWriter) -> Self {
        JsonWriter { writer }
    }

    async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let buf = serde_json::to_vec(value)?;
        self.writer.write_all(&(buf.len() as u32).to_be_bytes()).await?;
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    pub(super) async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        self.write_frame(header).await?;
        self.write_frame(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub(super) async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
