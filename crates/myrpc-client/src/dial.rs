//! Connection establishment.
//!
//! `dial` opens a plain stream connection, `dial_http` tunnels through an
//! HTTP `CONNECT`, and `xdial` picks between them from a
//! `protocol@addr` address. The transport connect honors the options'
//! connect timeout natively; the post-connect handshake gets the same
//! deadline via a spawned task handing the client back over a oneshot
//! channel. If the parent has already timed out and departed, the
//! failed hand-off returns the client to the task, which closes it, so
//! neither side ever blocks.

use std::time::Duration;

use myrpc_core::protocol::{ConnectOptions, CONNECTED, DEFAULT_RPC_PATH};
use myrpc_core::{Result, RpcError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::oneshot;

use crate::client::Client;

/// Dials a TCP server with default options.
pub async fn dial(addr: &str) -> Result<Client> {
    dial_with(addr, &ConnectOptions::default()).await
}

/// Dials a TCP server.
pub async fn dial_with(addr: &str, options: &ConnectOptions) -> Result<Client> {
    let options = options.clone().normalized();
    let stream = connect_tcp(addr, options.connect_timeout()).await?;
    handshake_timeout(stream, false, options).await
}

/// Dials an HTTP `CONNECT` tunnel with default options.
pub async fn dial_http(addr: &str) -> Result<Client> {
    dial_http_with(addr, &ConnectOptions::default()).await
}

/// Dials an HTTP `CONNECT` tunnel on the default RPC path.
pub async fn dial_http_with(addr: &str, options: &ConnectOptions) -> Result<Client> {
    let options = options.clone().normalized();
    let stream = connect_tcp(addr, options.connect_timeout()).await?;
    handshake_timeout(stream, true, options).await
}

#[cfg(unix)]
/// Dials a Unix domain socket server.
pub async fn dial_unix_with(path: &str, options: &ConnectOptions) -> Result<Client> {
    let options = options.clone().normalized();
    let timeout = options.connect_timeout();
    let stream = if timeout.is_zero() {
        UnixStream::connect(path).await?
    } else {
        match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(RpcError::ConnectTimeout(timeout)),
        }
    };
    handshake_timeout(stream, false, options).await
}

/// Dials a `protocol@addr` address with default options.
pub async fn xdial(rpc_addr: &str) -> Result<Client> {
    xdial_with(rpc_addr, &ConnectOptions::default()).await
}

/// Dials a `protocol@addr` address: `http@host:port` tunnels through
/// `CONNECT`, `tcp@host:port` (and `unix@/path` on Unix) dial the raw
/// stream.
pub async fn xdial_with(rpc_addr: &str, options: &ConnectOptions) -> Result<Client> {
    let parts: Vec<&str> = rpc_addr.split('@').collect();
    if parts.len() != 2 {
        return Err(RpcError::BadAddress(rpc_addr.to_string()));
    }
    let (protocol, addr) = (parts[0], parts[1]);
    match protocol {
        "http" => dial_http_with(addr, options).await,
        "tcp" => dial_with(addr, options).await,
        #[cfg(unix)]
        "unix" => dial_unix_with(addr, options).await,
        _ => Err(RpcError::BadAddress(rpc_addr.to_string())),
    }
}

async fn connect_tcp(addr: &str, timeout: Duration) -> Result<TcpStream> {
    if timeout.is_zero() {
        return Ok(TcpStream::connect(addr).await?);
    }
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

/// Runs the post-connect handshake under the connect deadline. With no
/// deadline the handshake runs inline and no extra task exists.
async fn handshake_timeout<S>(stream: S, http: bool, options: ConnectOptions) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let timeout = options.connect_timeout();
    if timeout.is_zero() {
        return handshake(stream, http, options).await;
    }

    let (hand_off, handed) = oneshot::channel();
    tokio::spawn(async move {
        let result = handshake(stream, http, options).await;
        if let Err(Ok(client)) = hand_off.send(result) {
            // The parent departed on timeout; nobody owns this client.
            let _ = client.close().await;
        }
    });

    match tokio::time::timeout(timeout, handed).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RpcError::CallFailed("connection setup aborted".into())),
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

async fn handshake<S>(mut stream: S, http: bool, options: ConnectOptions) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if http {
        http_connect(&mut stream).await?;
    }
    Client::new(stream, &options).await
}

/// Sends the `CONNECT` preamble and verifies the banner before the
/// options handshake takes over the stream.
async fn http_connect<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
        .await?;
    stream.flush().await?;

    let status = read_response_line(stream).await?;
    if !status.contains(CONNECTED) {
        return Err(RpcError::CallFailed(format!(
            "unexpected HTTP response: {status}"
        )));
    }
    loop {
        if read_response_line(stream).await?.is_empty() {
            break;
        }
    }
    Ok(())
}

/// Reads one response line byte by byte so nothing past the head is
/// consumed.
async fn read_response_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
