use common::protocol::{self, Message};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::state::{AppState, HeartbeatAck};

/// Loop del endpoint UDP del maestro: registros y heartbeats de workers.
pub async fn run_udp_listener(state: AppState, socket: UdpSocket) {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!("error recibiendo UDP: {:?}", e);
                continue;
            }
        };

        let Ok(line) = std::str::from_utf8(&buf[..len]) else {
            debug!("datagrama no UTF-8 desde {}, ignorado", addr);
            continue;
        };
        let msg = Message::parse(line);

        match msg.msg_type() {
            Some(protocol::REGISTER_WORKER) => {
                let (worker_id, tcp_port) = match (msg.get("WORKER_ID"), msg.get("TCP_PORT")) {
                    (Ok(id), Ok(port_str)) => match port_str.parse::<u16>() {
                        Ok(port) => (id.to_string(), port),
                        Err(_) => {
                            warn!("registro con TCP_PORT inválido: {}", port_str);
                            continue;
                        }
                    },
                    _ => {
                        warn!("registro incompleto desde {}: {}", addr, line.trim());
                        continue;
                    }
                };

                state.register_worker(worker_id.clone(), addr.ip(), tcp_port);
                info!(
                    "worker '{}' registrado ({}:{})",
                    worker_id,
                    addr.ip(),
                    tcp_port
                );
            }
            Some(protocol::HEARTBEAT) => {
                let Ok(worker_id) = msg.get("WORKER_ID") else {
                    continue;
                };
                match state.heartbeat(worker_id) {
                    HeartbeatAck::Revived => info!("worker '{}' ha revivido", worker_id),
                    HeartbeatAck::Unknown => {
                        debug!("heartbeat de worker desconocido '{}'", worker_id)
                    }
                    HeartbeatAck::Refreshed => {}
                }
            }
            other => debug!("mensaje UDP inesperado: {:?}", other),
        }
    }
}
