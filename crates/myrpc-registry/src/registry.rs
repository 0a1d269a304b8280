//! The registry itself: a mutex-guarded map from server address to its
//! last heartbeat, evicted lazily on read, exposed through two HTTP
//! verbs on one route.
//!
//! | Verb | Contract |
//! |------|----------|
//! | GET  | `X-Myrpc-Servers` response header: live addresses, sorted, comma-joined |
//! | POST | `X-Myrpc-Server` request header upserts the address; missing header is a 500 |
//!
//! Any other verb on the route gets a 405 from the router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info};

/// Default mount point for the registry route.
pub const DEFAULT_REGISTRY_PATH: &str = "/myRPC/registry";

/// Default entry TTL. A TTL of zero means entries never expire.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Liveness directory of server addresses. Construct explicitly (or via
/// [`Default`] for the standard TTL); there is no process-wide instance.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Registry {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts a server with `last heartbeat = now`.
    pub fn put_server(&self, addr: &str) {
        self.servers
            .lock()
            .unwrap()
            .insert(addr.to_string(), Instant::now());
    }

    /// Returns the live addresses sorted ascending, evicting entries
    /// whose heartbeat has aged past the TTL.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        if !self.timeout.is_zero() {
            let timeout = self.timeout;
            servers.retain(|_, heartbeat| heartbeat.elapsed() < timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// The registry's routes on the default path.
    pub fn router(self: Arc<Self>) -> Router {
        self.router_at(DEFAULT_REGISTRY_PATH)
    }

    /// The registry's routes on a custom path.
    pub fn router_at(self: Arc<Self>, path: &str) -> Router {
        info!("rpc registry path: {path}");
        Router::new()
            .route(path, get(get_servers).post(post_server))
            .with_state(self)
    }

    /// Serves the registry on the default path until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let app = self.router();
        axum::serve(listener, app).await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(DEFAULT_TIMEOUT)
    }
}

async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    [("X-Myrpc-Servers", registry.alive_servers().join(","))]
}

async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    match headers
        .get("X-Myrpc-Server")
        .and_then(|value| value.to_str().ok())
        .filter(|addr| !addr.is_empty())
    {
        Some(addr) => {
            debug!(%addr, "rpc registry: heartbeat");
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
