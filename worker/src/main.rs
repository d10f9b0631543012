use std::env;
use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{anyhow, Context, Result};
use common::config::{self, Timing};
use worker::agent::{self, WorkerConfig};

const DEFAULT_WORKER_TCP_PORT: u16 = 9001;

/// Dirección UDP del maestro.
/// - En Docker: MAESTRO_HOST=maestro
/// - Local: default 127.0.0.1
fn maestro_udp_addr() -> Result<SocketAddr> {
    let host = env::var("MAESTRO_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = config::env_port("MAESTRO_UDP_PORT", config::DEFAULT_MAESTRO_UDP_PORT);
    format!("{}:{}", host, port)
        .to_socket_addrs()
        .with_context(|| format!("dirección de maestro inválida: {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("{}:{} no resuelve a ninguna dirección", host, port))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("worker=debug")
        .init();

    let tcp_port = config::env_port("WORKER_TCP_PORT", DEFAULT_WORKER_TCP_PORT);
    let timing = Timing::from_env();

    let cfg = WorkerConfig {
        tcp_addr: SocketAddr::from(([0, 0, 0, 0], tcp_port)),
        maestro_udp: maestro_udp_addr()?,
        heartbeat_interval: timing.heartbeat_interval,
    };

    let handle = agent::spawn(cfg).await?;
    handle.wait().await
}
