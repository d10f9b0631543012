use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::protocol::{self, Message, ProtocolError};
use common::{worker_id_for_port, ChunkId, WorkerId};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Payloads de chunk cacheados localmente, por chunk id. Se retienen
/// indefinidamente: son la base de la re-ejecución tras una promoción.
pub type TaskCache = Arc<DashMap<ChunkId, Vec<f64>>>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dónde escuchar tareas (puerto 0 = efímero, para tests).
    pub tcp_addr: SocketAddr,
    /// Endpoint UDP del maestro para registro/heartbeats.
    pub maestro_udp: SocketAddr,
    pub heartbeat_interval: Duration,
}

/// Worker en marcha; tirar el handle corta heartbeats y listener
/// (el equivalente a un crash, útil en tests de failover).
pub struct WorkerHandle {
    pub id: WorkerId,
    pub tcp_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        for t in &self.tasks {
            t.abort();
        }
    }

    pub async fn wait(mut self) -> Result<()> {
        for t in self.tasks.drain(..) {
            t.await?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Levanta un worker: agente de heartbeats (UDP) + listener de tareas (TCP).
/// La identidad se deriva del puerto TCP efectivo.
pub async fn spawn(cfg: WorkerConfig) -> Result<WorkerHandle> {
    let listener = TcpListener::bind(cfg.tcp_addr)
        .await
        .with_context(|| format!("no se pudo bindear TCP en {}", cfg.tcp_addr))?;
    let tcp_addr = listener.local_addr()?;
    let id = worker_id_for_port(tcp_addr.port());
    let cache: TaskCache = Arc::new(DashMap::new());

    info!("[{}] escuchando tareas en TCP:{}", id, tcp_addr.port());

    let tasks = vec![
        tokio::spawn(run_heartbeats(
            id.clone(),
            tcp_addr.port(),
            cfg.maestro_udp,
            cfg.heartbeat_interval,
        )),
        tokio::spawn(run_task_listener(id.clone(), cache, listener)),
    ];

    Ok(WorkerHandle { id, tcp_addr, tasks })
}

/// Registro inicial + pulso de vida periódico hacia el maestro.
async fn run_heartbeats(
    id: WorkerId,
    tcp_port: u16,
    maestro_udp: SocketAddr,
    interval: Duration,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            error!("[{}] no se pudo abrir el socket UDP: {:?}", id, e);
            return;
        }
    };

    let register = Message::new(protocol::REGISTER_WORKER)
        .field("WORKER_ID", &id)
        .field("TCP_PORT", tcp_port)
        .encode();
    if let Err(e) = socket.send_to(register.as_bytes(), maestro_udp).await {
        warn!("[{}] error enviando el registro: {:?}", id, e);
    } else {
        info!("[{}] registro enviado al maestro {}", id, maestro_udp);
    }

    let heartbeat = Message::new(protocol::HEARTBEAT)
        .field("WORKER_ID", &id)
        .encode();
    loop {
        sleep(interval).await;
        if let Err(e) = socket.send_to(heartbeat.as_bytes(), maestro_udp).await {
            warn!("[{}] error enviando heartbeat: {:?}", id, e);
        }
    }
}

async fn run_task_listener(id: WorkerId, cache: TaskCache, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let id = id.clone();
                let cache = cache.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(id.clone(), cache, stream).await {
                        // desconexiones normales (p.ej. réplica sin respuesta)
                        debug!("[{}] conexión de tarea cerrada: {:?}", id, e);
                    }
                });
            }
            Err(e) => warn!("[{}] error en accept de tareas: {:?}", id, e),
        }
    }
}

async fn handle_connection(id: WorkerId, cache: TaskCache, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let msg = Message::parse(&line);

    // el cálculo es CPU-bound: va a un hilo de bloqueo
    let reply = tokio::task::spawn_blocking(move || process_message(&id, &cache, &msg)).await?;

    if let Some(response) = reply {
        write_half
            .write_all(format!("{}\n", response.encode()).as_bytes())
            .await?;
    }
    Ok(())
}

/// Núcleo del ejecutor de tareas, sin sockets: cachea, calcula y arma la
/// respuesta (si corresponde una).
///
/// - DISTRIBUTE_TASK con rol PRIMARY: cachear, calcular, responder.
/// - DISTRIBUTE_TASK con rol REPLICA: solo cachear, sin respuesta.
/// - PROMOTE_AND_EXECUTE: calcular desde la caché; sin payload cacheado el
///   chunk es irrecuperable y se responde un error.
pub fn process_message(
    id: &str,
    cache: &DashMap<ChunkId, Vec<f64>>,
    msg: &Message,
) -> Option<Message> {
    match try_process(id, cache, msg) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("[{}] mensaje de tarea malformado: {}", id, e);
            None
        }
    }
}

fn try_process(
    id: &str,
    cache: &DashMap<ChunkId, Vec<f64>>,
    msg: &Message,
) -> Result<Option<Message>, ProtocolError> {
    match msg.msg_type() {
        Some(protocol::DISTRIBUTE_TASK) => {
            let job_id = msg.get("JOB_ID")?;
            let chunk_id = msg.get("CHUNK_ID")?;
            let role = msg.get("ROLE")?;
            let operation = msg.get("OPERATION")?;
            let data = protocol::parse_values(msg.get("DATA")?)?;

            info!(
                "[{}] recibido {} ({} valores), rol {}",
                id,
                chunk_id,
                data.len(),
                role
            );
            cache.insert(chunk_id.to_string(), data.clone());

            if role == protocol::ROLE_PRIMARY {
                let result = common::ops::apply_chunk(operation, &data);
                Ok(Some(task_result(job_id, chunk_id, &result)))
            } else {
                Ok(None)
            }
        }
        Some(protocol::PROMOTE_AND_EXECUTE) => {
            let job_id = msg.get("JOB_ID")?;
            let chunk_id = msg.get("CHUNK_ID")?;
            let operation = msg.get("OPERATION")?;

            match cache.get(chunk_id).map(|d| d.value().clone()) {
                Some(data) => {
                    info!(
                        "[{}] [RECOVERY] promovido a primario de {}, ejecutando desde caché",
                        id, chunk_id
                    );
                    let result = common::ops::apply_chunk(operation, &data);
                    Ok(Some(task_result(job_id, chunk_id, &result)))
                }
                None => {
                    // el payload nunca llegó a replicarse antes de la caída
                    error!(
                        "[{}] sin datos cacheados para el chunk promovido {}",
                        id, chunk_id
                    );
                    Ok(Some(
                        Message::new(protocol::TASK_RESULT)
                            .field("JOB_ID", job_id)
                            .field("CHUNK_ID", chunk_id)
                            .field("STATUS", protocol::STATUS_ERROR)
                            .field("REASON", protocol::REASON_NO_CACHED_DATA),
                    ))
                }
            }
        }
        other => {
            debug!("[{}] mensaje TCP inesperado: {:?}", id, other);
            Ok(None)
        }
    }
}

fn task_result(job_id: &str, chunk_id: &str, result: &[f64]) -> Message {
    Message::new(protocol::TASK_RESULT)
        .field("JOB_ID", job_id)
        .field("CHUNK_ID", chunk_id)
        .field("STATUS", protocol::STATUS_SUCCESS)
        .field("DATA", protocol::join_values(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ops;

    fn distribute(role: &str, data: &[f64]) -> Message {
        Message::new(protocol::DISTRIBUTE_TASK)
            .field("JOB_ID", "j1")
            .field("CHUNK_ID", "j1-c0")
            .field("ROLE", role)
            .field("OPERATION", "COMPLEX_OP")
            .field("DATA", protocol::join_values(data))
    }

    #[test]
    fn primario_cachea_calcula_y_responde() {
        let cache = DashMap::new();
        let data = vec![1.0, 2.0, 3.0];

        let reply = process_message("w", &cache, &distribute(protocol::ROLE_PRIMARY, &data))
            .expect("el primario debe responder");

        assert_eq!(reply.msg_type(), Some(protocol::TASK_RESULT));
        assert_eq!(reply.opt("STATUS"), Some(protocol::STATUS_SUCCESS));
        let values = protocol::parse_values(reply.opt("DATA").unwrap()).unwrap();
        assert_eq!(values, ops::apply_chunk("COMPLEX_OP", &data));
        // y el payload quedó cacheado para una eventual promoción
        assert_eq!(*cache.get("j1-c0").unwrap(), data);
    }

    #[test]
    fn replica_solo_cachea_sin_responder() {
        let cache = DashMap::new();
        let data = vec![4.0, 5.0];

        let reply = process_message("w", &cache, &distribute(protocol::ROLE_REPLICA, &data));

        assert!(reply.is_none());
        assert_eq!(*cache.get("j1-c0").unwrap(), data);
    }

    #[test]
    fn promocion_con_cache_responde_como_primario() {
        let cache = DashMap::new();
        let data = vec![7.0, 8.0];
        cache.insert("j1-c0".to_string(), data.clone());

        let promote = Message::new(protocol::PROMOTE_AND_EXECUTE)
            .field("JOB_ID", "j1")
            .field("CHUNK_ID", "j1-c0")
            .field("OPERATION", "COMPLEX_OP");
        let reply = process_message("w", &cache, &promote).unwrap();

        assert_eq!(reply.opt("STATUS"), Some(protocol::STATUS_SUCCESS));
        let values = protocol::parse_values(reply.opt("DATA").unwrap()).unwrap();
        assert_eq!(values, ops::apply_chunk("COMPLEX_OP", &data));
    }

    #[test]
    fn promocion_sin_cache_reporta_error() {
        let cache = DashMap::new();
        let promote = Message::new(protocol::PROMOTE_AND_EXECUTE)
            .field("JOB_ID", "j1")
            .field("CHUNK_ID", "j1-c9")
            .field("OPERATION", "COMPLEX_OP");

        let reply = process_message("w", &cache, &promote).unwrap();

        assert_eq!(reply.opt("STATUS"), Some(protocol::STATUS_ERROR));
        assert_eq!(reply.opt("REASON"), Some(protocol::REASON_NO_CACHED_DATA));
    }

    #[test]
    fn mensaje_sin_campos_requeridos_se_ignora() {
        let cache = DashMap::new();
        let incompleto = Message::new(protocol::DISTRIBUTE_TASK).field("JOB_ID", "j1");
        assert!(process_message("w", &cache, &incompleto).is_none());
        assert!(cache.is_empty());
    }
}
