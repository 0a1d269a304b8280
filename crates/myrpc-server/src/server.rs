//! Connection engine.
//!
//! Per accepted connection the server reads the options handshake,
//! validates it, and enters a serve loop that reads `(Header, Body)`
//! frames serially and dispatches each request on its own task. Response
//! writes go through a per-connection mutex so header and body frames
//! stay adjacent on the wire. When the read side terminates, outstanding
//! handlers are drained before the codec is closed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use myrpc_core::codec::{BoxReader, BoxWriter, CodecReader, CodecWriter};
use myrpc_core::protocol::{self, Header, MAGIC};
use myrpc_core::{Result, RpcError};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::service::{Method, Service};

/// The RPC server: a concurrent map of registered services plus the
/// accept/serve machinery. Construct one explicitly and share it behind
/// an [`Arc`]; there is no process-wide default instance.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Self {
        Server {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a service. Services may be added at any time; a second
    /// registration under the same name is rejected.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::DuplicateService(name));
        }
        debug!(service = %name, "rpc server: service registered");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Looks up a registered service, mainly useful for inspecting
    /// per-method call counters.
    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().unwrap().get(name).cloned()
    }

    fn find(&self, service_method: &str) -> Result<(Arc<Service>, Arc<Method>)> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| RpcError::IllFormedRequest(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);
        if service_name.is_empty() || method_name.is_empty() {
            return Err(RpcError::IllFormedRequest(service_method.to_string()));
        }
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        let method = service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;
        Ok((service, method))
    }

    /// Accept loop: one serve task per connection, until the listener
    /// itself fails.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "rpc server: connection accepted");
            tokio::spawn(self.clone().serve_conn(stream));
        }
    }

    /// Serves one already-established connection: handshake, then the
    /// frame loop. Generic over the stream so TCP, hijacked HTTP, and
    /// in-memory streams all take the same path.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(Box::new(read_half) as BoxReader);

        let options = match protocol::read_options(&mut reader).await {
            Ok(options) if options.magic != MAGIC => {
                error!("rpc server: {}", RpcError::InvalidMagic(options.magic));
                return;
            }
            Ok(options) => options,
            Err(e) => {
                error!("rpc server: options error: {e}");
                return;
            }
        };

        let reader = options.codec.reader(reader);
        let writer = Arc::new(Mutex::new(
            options.codec.writer(Box::new(write_half) as BoxWriter),
        ));
        self.serve_codec(reader, writer, options.handle_timeout()).await;
    }

    async fn serve_codec(
        self: Arc<Self>,
        mut reader: CodecReader,
        writer: Arc<Mutex<CodecWriter>>,
        handle_timeout: Duration,
    ) {
        let mut handlers = JoinSet::new();
        loop {
            // Frames are read serially; it is the handlers that run
            // concurrently.
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(_) => break,
            };
            let resolved = self.find(&header.service_method);
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    error!("rpc server: read body error: {e}");
                    break;
                }
            };
            match resolved {
                Err(e) => {
                    // Unresolvable target: the body was still consumed
                    // above to keep the stream in sync.
                    let mut header = header;
                    header.error = e.to_string();
                    send_response(&writer, &header, &Value::Null).await;
                }
                Ok((service, method)) => {
                    handlers.spawn(handle_request(
                        service,
                        method,
                        header,
                        body,
                        writer.clone(),
                        handle_timeout,
                    ));
                }
            }
        }
        while handlers.join_next().await.is_some() {}
        let _ = writer.lock().await.close().await;
    }
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

/// Runs one request. With a handling deadline, the invocation is moved to
/// its own task reporting through a oneshot channel; if the deadline arm
/// wins, the timeout response is written here and the abandoned
/// invocation's eventual send fails without blocking anything. Only this
/// task ever writes the response.
async fn handle_request(
    service: Arc<Service>,
    method: Arc<Method>,
    mut header: Header,
    args: Value,
    writer: Arc<Mutex<CodecWriter>>,
    handle_timeout: Duration,
) {
    let result = if handle_timeout.is_zero() {
        service.call(&method, args).await
    } else {
        let (called_tx, called_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = called_tx.send(service.call(&method, args).await);
        });
        match tokio::time::timeout(handle_timeout, called_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Application("rpc server: handler aborted".into())),
            Err(_) => Err(RpcError::HandleTimeout(handle_timeout)),
        }
    };

    match result {
        Ok(reply) => send_response(&writer, &header, &reply).await,
        Err(e) => {
            header.error = e.to_string();
            send_response(&writer, &header, &Value::Null).await;
        }
    }
}

async fn send_response(writer: &Mutex<CodecWriter>, header: &Header, body: &Value) {
    if let Err(e) = writer.lock().await.write(header, body).await {
        error!("rpc server: write response error: {e}");
    }
}
