//! Full-stack demo: a registry, two servers heartbeating into it, and a
//! registry-backed XClient spreading calls across them.

use std::sync::Arc;
use std::time::Duration;

use myrpc::{
    heartbeat, ConnectOptions, Registry, RegistryDiscovery, SelectMode, Server, ServiceBuilder,
    XClient,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Serialize, Deserialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

async fn start_server(registry_url: String) -> anyhow::Result<()> {
    let service = ServiceBuilder::new("Arith")
        .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
        .method("Sleep", |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .build()?;

    let server = Arc::new(Server::new());
    server.register(service)?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!("rpc server listening on {addr}");

    heartbeat(&registry_url, &format!("tcp@{addr}"), Some(Duration::from_secs(30))).await?;
    tokio::spawn(server.accept(listener));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // Registry first, so the servers have somewhere to announce
    // themselves.
    let registry = Arc::new(Registry::default());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let registry_url = format!("http://{}/myRPC/registry", listener.local_addr()?);
    tokio::spawn(registry.serve(listener));

    start_server(registry_url.clone()).await?;
    start_server(registry_url.clone()).await?;

    let xclient = XClient::new(
        RegistryDiscovery::new(&registry_url, None),
        SelectMode::RoundRobin,
        ConnectOptions::default(),
    );

    for i in 0..5i64 {
        let reply: i64 = xclient.call("Arith.Sum", SumArgs { a: i, b: i * i }).await?;
        println!("Arith.Sum({i}, {}) = {reply}", i * i);
    }

    let broadcast = xclient.broadcast("Arith.Sum", SumArgs { a: 20, b: 22 }).await?;
    println!("broadcast Arith.Sum = {broadcast}");

    xclient.close().await;
    Ok(())
}
