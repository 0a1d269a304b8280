//! Multiplexed client core.
//!
//! One [`Client`] owns one duplex connection. Requests from any number of
//! tasks are written under a send mutex (held across the header and body
//! frames so they stay adjacent), each registered in a pending table
//! keyed by its sequence number. A single background receive task pairs
//! response headers back to pending calls and delivers a completed
//! [`Call`] through that call's done channel. Replies may arrive in any
//! order; the sequence number is the sole correlator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use myrpc_core::codec::{BoxReader, BoxWriter, CodecReader, CodecWriter};
use myrpc_core::protocol::{self, ConnectOptions, Header};
use myrpc_core::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// One completed invocation, delivered through its done channel exactly
/// once by whichever subsystem terminated it: the receive task on a
/// response, the send path on a write failure, or shutdown draining.
#[derive(Debug)]
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    pub result: Result<Value>,
}

pub type CallSender = mpsc::Sender<Call>;
pub type CallReceiver = mpsc::Receiver<Call>;

struct PendingCall {
    service_method: String,
    done: CallSender,
}

struct ClientState {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    closed: bool,
    shutdown: bool,
}

struct ClientInner {
    /// Send mutex. Held across the `(header, body)` frame pair, and
    /// acquired before the state mutex whenever both are needed.
    writer: Mutex<CodecWriter>,
    state: StdMutex<ClientState>,
}

impl ClientInner {
    fn register(&self, service_method: &str, done: CallSender) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(
            seq,
            PendingCall {
                service_method: service_method.to_string(),
                done,
            },
        );
        Ok(seq)
    }

    fn remove(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().unwrap().pending.remove(&seq)
    }
}

/// A connection-oriented RPC client. Cheap to clone; all clones share the
/// same connection and pending table.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Wraps a connected stream: writes the options record, installs the
    /// negotiated codec, and starts the receive task. Callers normally go
    /// through [`dial`](crate::dial::dial) instead.
    pub async fn new<S>(stream: S, options: &ConnectOptions) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let options = options.clone().normalized();
        let (read_half, write_half) = tokio::io::split(stream);

        let mut raw_writer: BoxWriter = Box::new(write_half);
        protocol::write_options(&mut raw_writer, &options).await?;

        let inner = Arc::new(ClientInner {
            writer: Mutex::new(options.codec.writer(raw_writer)),
            state: StdMutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closed: false,
                shutdown: false,
            }),
        });

        let reader = options
            .codec
            .reader(BufReader::new(Box::new(read_half) as BoxReader));
        tokio::spawn(receive(inner.clone(), reader));

        Ok(Client { inner })
    }

    /// True while the client has neither been closed nor lost its
    /// transport.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.shutdown && !state.closed
    }

    /// Closes the client. A second close reports the shutdown error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return Err(RpcError::Shutdown);
            }
            state.closed = true;
        }
        self.inner.writer.lock().await.close().await
    }

    /// Fire-and-forget invocation. The completed [`Call`] is delivered on
    /// `done`, which may be shared between calls and must have capacity
    /// for at least one message (`tokio::sync::mpsc::channel(0)` aborts
    /// at construction, so an unbuffered channel cannot reach this API).
    ///
    /// Returns the assigned sequence number, or 0 if registration was
    /// refused; refusals and write failures are still delivered through
    /// `done`.
    pub async fn go(&self, service_method: &str, args: Value, done: CallSender) -> u64 {
        let mut writer = self.inner.writer.lock().await;
        let seq = match self.inner.register(service_method, done.clone()) {
            Ok(seq) => seq,
            Err(e) => {
                deliver(
                    &done,
                    Call {
                        seq: 0,
                        service_method: service_method.to_string(),
                        result: Err(e),
                    },
                );
                return 0;
            }
        };

        let header = Header::request(service_method, seq);
        if let Err(e) = writer.write(&header, &args).await {
            // The receive task may already have routed a response (or the
            // shutdown drain may have claimed the call), so only deliver
            // if the entry is still ours.
            if let Some(call) = self.inner.remove(seq) {
                deliver(
                    &call.done,
                    Call {
                        seq,
                        service_method: call.service_method,
                        result: Err(e),
                    },
                );
            }
        }
        seq
    }

    /// Synchronous invocation with typed argument and reply.
    ///
    /// The returned future is cancel-safe: dropping it (from a timeout or
    /// a `select!`) unregisters the call, and a reply arriving afterwards
    /// is discarded by the receive task.
    pub async fn call<A, R>(&self, service_method: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let reply = self
            .call_value(service_method, serde_json::to_value(args)?)
            .await?;
        serde_json::from_value(reply).map_err(|e| RpcError::CallFailed(format!("reading body {e}")))
    }

    /// [`call`](Client::call) in raw `Value`s.
    pub async fn call_value(&self, service_method: &str, args: Value) -> Result<Value> {
        let (done, mut completed) = mpsc::channel(1);
        let seq = self.go(service_method, args, done).await;
        let _guard = PendingGuard {
            inner: self.inner.clone(),
            seq,
        };
        match completed.recv().await {
            Some(call) => call.result,
            None => Err(RpcError::Shutdown),
        }
    }

    /// [`call`](Client::call) with a deadline; zero means no limit.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if timeout.is_zero() {
            return self.call(service_method, args).await;
        }
        match tokio::time::timeout(timeout, self.call(service_method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::CallFailed(format!(
                "deadline exceeded after {timeout:?}"
            ))),
        }
    }
}

/// Unregisters a call abandoned mid-flight. Dropped after normal
/// completion too, where the entry is already gone and removal is a
/// no-op.
struct PendingGuard {
    inner: Arc<ClientInner>,
    seq: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.seq != 0 {
            if let Ok(mut state) = self.inner.state.lock() {
                state.pending.remove(&self.seq);
            }
        }
    }
}

/// Delivers a completed call without ever blocking the receive task. A
/// full user-shared channel finishes delivery on a spawned task; a closed
/// channel means the caller abandoned the call.
fn deliver(done: &CallSender, call: Call) {
    match done.try_send(call) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(call)) => {
            let done = done.clone();
            tokio::spawn(async move {
                let _ = done.send(call).await;
            });
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// The receive pump: exactly one per client, for the client's lifetime.
async fn receive(inner: Arc<ClientInner>, mut reader: CodecReader) {
    let err = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };
        match inner.remove(header.seq) {
            // Nothing pending under that seq: the call was cancelled or
            // its send failed halfway. Consume the body and move on.
            None => {
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(call) if !header.error.is_empty() => {
                let body = reader.read_body().await;
                deliver(
                    &call.done,
                    Call {
                        seq: header.seq,
                        service_method: call.service_method,
                        result: Err(RpcError::Application(header.error)),
                    },
                );
                if let Err(e) = body {
                    break e;
                }
            }
            Some(call) => match reader.read_body().await {
                Ok(body) => deliver(
                    &call.done,
                    Call {
                        seq: header.seq,
                        service_method: call.service_method,
                        result: Ok(body),
                    },
                ),
                Err(e) => {
                    deliver(
                        &call.done,
                        Call {
                            seq: header.seq,
                            service_method: call.service_method,
                            result: Err(RpcError::CallFailed(format!("reading body {e}"))),
                        },
                    );
                    break e;
                }
            },
        }
    };
    terminate_calls(&inner, err).await;
}

/// Drains every pending call with the transport error and puts the
/// client into shutdown. Takes the send mutex before the state mutex,
/// the same order as the send path.
async fn terminate_calls(inner: &Arc<ClientInner>, err: RpcError) {
    let _writer = inner.writer.lock().await;
    let drained: Vec<(u64, PendingCall)> = {
        let mut state = inner.state.lock().unwrap();
        state.shutdown = true;
        state.pending.drain().collect()
    };
    if !drained.is_empty() {
        debug!("rpc client: terminating {} pending calls: {err}", drained.len());
    }
    let cause = err.to_string();
    for (seq, call) in drained {
        deliver(
            &call.done,
            Call {
                seq,
                service_method: call.service_method,
                result: Err(RpcError::CallFailed(cause.clone())),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::DuplexStream;

    /// A hand-rolled peer standing in for a real server: reads the
    /// options line, then echoes request bodies back under the same seq.
    /// Requests whose body is the string "fail" get an error header.
    fn spawn_echo_peer(io: DuplexStream) {
        tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(io);
            let mut reader = BufReader::new(Box::new(read_half) as BoxReader);
            let options = protocol::read_options(&mut reader).await.unwrap();
            let mut reader = options.codec.reader(reader);
            let mut writer = options.codec.writer(Box::new(write_half) as BoxWriter);
            loop {
                let mut header = match reader.read_header().await {
                    Ok(header) => header,
                    Err(_) => break,
                };
                let body = match reader.read_body().await {
                    Ok(body) => body,
                    Err(_) => break,
                };
                let body = if body == json!("fail") {
                    header.error = "remote failure".into();
                    Value::Null
                } else {
                    body
                };
                if writer.write(&header, &body).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn echo_client() -> Client {
        let (near, far) = tokio::io::duplex(64 * 1024);
        spawn_echo_peer(far);
        Client::new(near, &ConnectOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn call_round_trips_a_value() {
        let client = echo_client().await;
        let reply: i64 = client.call("Echo.Say", 42i64).await.unwrap();
        assert_eq!(reply, 42);
    }

    #[tokio::test]
    async fn header_errors_surface_verbatim() {
        let client = echo_client().await;
        let err = client.call::<_, Value>("Echo.Say", "fail").await.unwrap_err();
        assert_eq!(err.to_string(), "remote failure");
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_increase() {
        let client = echo_client().await;
        let (done, mut completed) = mpsc::channel(8);
        for expected in 1..=3u64 {
            let seq = client.go("Echo.Say", json!(expected), done.clone()).await;
            assert_eq!(seq, expected);
        }
        for _ in 0..3 {
            assert!(completed.recv().await.unwrap().result.is_ok());
        }
    }

    #[tokio::test]
    async fn go_supports_a_shared_done_channel() {
        let client = echo_client().await;
        let (done, mut completed) = mpsc::channel(2);
        client.go("Echo.Say", json!("a"), done.clone()).await;
        client.go("Echo.Say", json!("b"), done).await;

        let mut replies = Vec::new();
        for _ in 0..2 {
            replies.push(completed.recv().await.unwrap().result.unwrap());
        }
        replies.sort_by_key(|v| v.as_str().map(String::from));
        assert_eq!(replies, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn concurrent_calls_multiplex_over_one_connection() {
        let client = echo_client().await;
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16i64 {
            let client = client.clone();
            tasks.spawn(async move {
                let reply: i64 = client.call("Echo.Say", i).await.unwrap();
                assert_eq!(reply, i);
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
    }

    #[tokio::test]
    async fn close_twice_reports_shutdown() {
        let client = echo_client().await;
        assert!(client.is_available());
        client.close().await.unwrap();
        assert!(!client.is_available());
        assert!(matches!(client.close().await, Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn calls_after_close_fail_fast() {
        let client = echo_client().await;
        client.close().await.unwrap();
        let err = client.call::<_, Value>("Echo.Say", 1i64).await.unwrap_err();
        assert!(matches!(err, RpcError::Shutdown));
    }

    #[tokio::test]
    async fn peer_loss_drains_pending_and_shuts_down() {
        // A peer that accepts the handshake and then hangs up.
        let (near, far) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let (read_half, _write_half) = tokio::io::split(far);
            let mut reader = BufReader::new(Box::new(read_half) as BoxReader);
            let _ = protocol::read_options(&mut reader).await;
            // Dropping both halves closes the stream.
        });

        let client = Client::new(near, &ConnectOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!client.is_available());
        let err = client.call::<_, Value>("Echo.Say", 1i64).await.unwrap_err();
        assert!(matches!(err, RpcError::Shutdown));
    }

    #[tokio::test]
    async fn timed_out_calls_are_unregistered_and_late_replies_discarded() {
        // A peer that delays its first reply past the deadline, then
        // echoes normally.
        let (near, far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(far);
            let mut reader = BufReader::new(Box::new(read_half) as BoxReader);
            let options = protocol::read_options(&mut reader).await.unwrap();
            let mut reader = options.codec.reader(reader);
            let mut writer = options.codec.writer(Box::new(write_half) as BoxWriter);
            let mut first = true;
            loop {
                let header = match reader.read_header().await {
                    Ok(header) => header,
                    Err(_) => break,
                };
                let body = match reader.read_body().await {
                    Ok(body) => body,
                    Err(_) => break,
                };
                if first {
                    first = false;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                if writer.write(&header, &body).await.is_err() {
                    break;
                }
            }
        });
        let client = Client::new(near, &ConnectOptions::default()).await.unwrap();

        let err = client
            .call_timeout::<_, Value>("Echo.Say", 1i64, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rpc client: call failed"));
        assert!(err.to_string().contains("deadline exceeded"));

        // The late reply for seq 1 is discarded; the connection keeps
        // working for later calls.
        let reply: i64 = client.call("Echo.Say", 2i64).await.unwrap();
        assert_eq!(reply, 2);
    }

    #[tokio::test]
    async fn zero_timeout_means_no_deadline() {
        let client = echo_client().await;
        let reply: i64 = client
            .call_timeout("Echo.Say", 5i64, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(reply, 5);
    }
}
