//! HTTP `CONNECT` tunnel.
//!
//! An alternate entry point for environments where only an HTTP port is
//! reachable: the client sends `CONNECT <path> HTTP/1.0`, the server
//! hijacks the byte stream, answers with a `200` banner, and the two
//! sides continue with the normal options handshake and frame protocol
//! on the same stream. The request head is parsed directly off the raw
//! socket; after `CONNECT` there is no HTTP left, so an HTTP library
//! would only get in the way.

use std::sync::Arc;

use myrpc_core::protocol::{CONNECTED, DEFAULT_RPC_PATH};
use myrpc_core::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::debug;

use crate::server::Server;

const MAX_HEAD_LINE: usize = 8 * 1024;

impl Server {
    /// Accepts HTTP tunnel connections on the default RPC path.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        self.serve_http_path(listener, DEFAULT_RPC_PATH).await
    }

    /// Accepts HTTP tunnel connections on a custom path.
    pub async fn serve_http_path(
        self: Arc<Self>,
        listener: TcpListener,
        path: &str,
    ) -> std::io::Result<()> {
        let path: Arc<str> = path.into();
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "rpc server: http connection accepted");
            let server = self.clone();
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(e) = server.tunnel(stream, &path).await {
                    debug!("rpc server: http tunnel error: {e}");
                }
            });
        }
    }

    /// Handles one tunnel connection: parse the request head, answer
    /// non-CONNECT traffic with plain HTTP errors, otherwise write the
    /// banner and hand the hijacked stream to the serve loop.
    async fn tunnel<S>(self: Arc<Self>, mut stream: S, path: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let request_line = read_head_line(&mut stream).await?;
        loop {
            // Drain the rest of the head; tunnel requests carry no body.
            let line = read_head_line(&mut stream).await?;
            if line.is_empty() {
                break;
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default();

        if method != "CONNECT" {
            stream.write_all(b"HTTP/1.0 405 must CONNECT\r\n\r\n").await?;
            stream.flush().await?;
            return Ok(());
        }
        if target != path {
            stream.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await?;
            stream.flush().await?;
            return Ok(());
        }

        stream
            .write_all(format!("HTTP/1.0 {CONNECTED}\n\n").as_bytes())
            .await?;
        stream.flush().await?;
        self.serve_conn(stream).await;
        Ok(())
    }
}

/// Reads one head line byte by byte. Nothing past the terminating
/// newline is consumed; the remaining bytes belong to the RPC stream.
async fn read_head_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_HEAD_LINE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "http request head line too long",
            )
            .into());
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;
    use myrpc_core::codec::{BoxReader, BoxWriter};
    use myrpc_core::protocol::{self, ConnectOptions, Header};
    use serde::Deserialize;
    use serde_json::json;
    use tokio::io::BufReader;

    #[derive(Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    fn server_with_arith() -> Arc<Server> {
        let server = Arc::new(Server::new());
        server
            .register(
                ServiceBuilder::new("Arith")
                    .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        server
    }

    fn spawn_tunnel(server: Arc<Server>, far: tokio::io::DuplexStream) {
        tokio::spawn(async move {
            let _ = server.tunnel(far, DEFAULT_RPC_PATH).await;
        });
    }

    async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
        let status = read_head_line(stream).await.unwrap();
        loop {
            if read_head_line(stream).await.unwrap().is_empty() {
                break;
            }
        }
        status
    }

    #[tokio::test]
    async fn connect_switches_to_the_rpc_protocol() {
        let server = server_with_arith();
        let (mut near, far) = tokio::io::duplex(64 * 1024);
        spawn_tunnel(server, far);

        near.write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let status = read_response_head(&mut near).await;
        assert!(status.contains(CONNECTED));

        // Proceed with the normal handshake on the same stream.
        let (read_half, write_half) = tokio::io::split(near);
        let options = ConnectOptions::default();
        let mut raw_writer: BoxWriter = Box::new(write_half);
        protocol::write_options(&mut raw_writer, &options).await.unwrap();
        let mut writer = options.codec.writer(raw_writer);
        let mut reader = options
            .codec
            .reader(BufReader::new(Box::new(read_half) as BoxReader));

        writer
            .write(&Header::request("Arith.Sum", 1), &json!({"a": 2, "b": 5}))
            .await
            .unwrap();
        assert!(reader.read_header().await.unwrap().error.is_empty());
        assert_eq!(reader.read_body().await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn non_connect_methods_get_405() {
        let server = server_with_arith();
        let (mut near, far) = tokio::io::duplex(1024);
        spawn_tunnel(server, far);

        near.write_all(format!("GET {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let status = read_head_line(&mut near).await.unwrap();
        assert!(status.contains("405 must CONNECT"));
    }

    #[tokio::test]
    async fn wrong_path_gets_404() {
        let server = server_with_arith();
        let (mut near, far) = tokio::io::duplex(1024);
        spawn_tunnel(server, far);

        near.write_all(b"CONNECT /elsewhere HTTP/1.0\r\n\r\n").await.unwrap();
        let status = read_head_line(&mut near).await.unwrap();
        assert!(status.contains("404"));
    }

    #[tokio::test]
    async fn bare_newline_head_is_accepted() {
        // The reference client writes "\n\n" rather than "\r\n\r\n".
        let server = server_with_arith();
        let (mut near, far) = tokio::io::duplex(1024);
        spawn_tunnel(server, far);

        near.write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\n\n").as_bytes())
            .await
            .unwrap();
        let status = read_head_line(&mut near).await.unwrap();
        assert!(status.contains(CONNECTED));
    }
}
