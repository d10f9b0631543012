pub mod dispatch;
pub mod failover;
pub mod handlers;
pub mod monitor;
pub mod state;
pub mod udp;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use common::config::{self, Timing};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct MaestroConfig {
    /// Endpoint UDP de registro/heartbeats.
    pub udp_addr: SocketAddr,
    /// Endpoint TCP de jobs de clientes.
    pub tcp_addr: SocketAddr,
    pub timing: Timing,
}

impl MaestroConfig {
    pub fn from_env() -> Self {
        let udp_port = config::env_port("MAESTRO_UDP_PORT", config::DEFAULT_MAESTRO_UDP_PORT);
        let tcp_port = config::env_port("MAESTRO_TCP_PORT", config::DEFAULT_MAESTRO_TCP_PORT);
        Self {
            udp_addr: SocketAddr::from(([0, 0, 0, 0], udp_port)),
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], tcp_port)),
            timing: Timing::from_env(),
        }
    }
}

/// Coordinador en marcha. Las direcciones reflejan los puertos efectivos
/// (útil con puerto 0 en tests); tirar el handle apaga los loops.
pub struct MaestroHandle {
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    pub state: AppState,
    tasks: Vec<JoinHandle<()>>,
}

impl MaestroHandle {
    pub fn shutdown(&self) {
        for t in &self.tasks {
            t.abort();
        }
    }

    /// Bloquea hasta que alguno de los loops termine (en la práctica, nunca).
    pub async fn wait(mut self) -> Result<()> {
        for t in self.tasks.drain(..) {
            t.await?;
        }
        Ok(())
    }
}

impl Drop for MaestroHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Levanta el maestro: listener UDP de registro/heartbeats, watchdog de
/// liveness y listener TCP de jobs. Fallar al bindear es fatal; todo error
/// posterior se queda en el request que lo causó.
pub async fn spawn(cfg: MaestroConfig) -> Result<MaestroHandle> {
    let udp = UdpSocket::bind(cfg.udp_addr)
        .await
        .with_context(|| format!("no se pudo bindear UDP en {}", cfg.udp_addr))?;
    let tcp = TcpListener::bind(cfg.tcp_addr)
        .await
        .with_context(|| format!("no se pudo bindear TCP en {}", cfg.tcp_addr))?;

    let udp_addr = udp.local_addr()?;
    let tcp_addr = tcp.local_addr()?;
    let state = AppState::new(cfg.timing);

    let tasks = vec![
        tokio::spawn(udp::run_udp_listener(state.clone(), udp)),
        tokio::spawn(monitor::run_watchdog(state.clone())),
        tokio::spawn(handlers::run_client_listener(state.clone(), tcp)),
    ];

    info!("maestro escuchando en UDP:{} y TCP:{}", udp_addr, tcp_addr);

    Ok(MaestroHandle {
        udp_addr,
        tcp_addr,
        state,
        tasks,
    })
}
