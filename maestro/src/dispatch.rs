use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use common::protocol::{self, Message};
use common::{ChunkId, JobId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::state::{AppState, WorkerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

impl Role {
    fn wire(self) -> &'static str {
        match self {
            Role::Primary => protocol::ROLE_PRIMARY,
            Role::Replica => protocol::ROLE_REPLICA,
        }
    }
}

/// Envía un chunk a un worker. El envío al primario queda bloqueado esperando
/// el TASK_RESULT (acotado por el task timeout) y registra el resultado; el
/// envío a la réplica solo deja el payload cacheado y no espera nada.
///
/// Un fallo de transporte se loguea y se trata como "ese chunk no se
/// completó": lo resuelve el timeout del job, no un reintento.
pub async fn send_task(
    state: AppState,
    worker: WorkerInfo,
    job_id: JobId,
    chunk_id: ChunkId,
    operation: String,
    data: Arc<Vec<f64>>,
    role: Role,
) {
    let msg = Message::new(protocol::DISTRIBUTE_TASK)
        .field("JOB_ID", &job_id)
        .field("CHUNK_ID", &chunk_id)
        .field("ROLE", role.wire())
        .field("OPERATION", &operation)
        .field("DATA", protocol::join_values(&data));

    match role {
        Role::Replica => {
            if let Err(e) = fire_and_forget(worker.addr(), &msg).await {
                warn!(
                    "no se pudo replicar {} en '{}': {:?}",
                    chunk_id, worker.id, e
                );
            } else {
                debug!("replicado {} en '{}'", chunk_id, worker.id);
            }
        }
        Role::Primary => {
            match exchange(worker.addr(), &msg, state.timing.task_timeout).await {
                Ok(response) => handle_task_result(&state, &job_id, &chunk_id, &response),
                Err(e) => warn!(
                    "no se pudo enviar tarea {} a '{}': {:?}",
                    chunk_id, worker.id, e
                ),
            }
        }
    }
}

/// Ordena a un worker promovido ejecutar un chunk desde su caché local.
/// El resultado alimenta el mismo mapa/barrera del job que una respuesta
/// de primario normal.
pub async fn send_promotion(
    state: AppState,
    worker: WorkerInfo,
    job_id: JobId,
    chunk_id: ChunkId,
    operation: String,
) {
    let msg = Message::new(protocol::PROMOTE_AND_EXECUTE)
        .field("JOB_ID", &job_id)
        .field("CHUNK_ID", &chunk_id)
        .field("OPERATION", &operation);

    match exchange(worker.addr(), &msg, state.timing.task_timeout).await {
        Ok(response) => handle_task_result(&state, &job_id, &chunk_id, &response),
        Err(e) => warn!(
            "no se pudo enviar promoción de {} a '{}': {:?}",
            chunk_id, worker.id, e
        ),
    }
}

fn handle_task_result(state: &AppState, job_id: &str, chunk_id: &str, response: &Message) {
    if response.msg_type() != Some(protocol::TASK_RESULT)
        || response.opt("STATUS") != Some(protocol::STATUS_SUCCESS)
    {
        warn!(
            "respuesta no exitosa para {}: {}",
            chunk_id,
            response.encode()
        );
        return;
    }

    let values = match response.get("DATA").map(protocol::parse_values) {
        Ok(Ok(v)) => v,
        other => {
            warn!("DATA ilegible en TASK_RESULT de {}: {:?}", chunk_id, other);
            return;
        }
    };

    if state.record_result(job_id, chunk_id.to_string(), values) {
        debug!("resultado de {} registrado", chunk_id);
    } else {
        debug!("resultado duplicado o tardío de {}, descartado", chunk_id);
    }
}

/// Escribe una línea y espera una línea de respuesta, con timeout.
async fn exchange(addr: SocketAddr, msg: &Message, deadline: Duration) -> Result<Message> {
    timeout(deadline, async {
        let mut stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("conectando a {}", addr))?;
        stream
            .write_all(format!("{}\n", msg.encode()).as_bytes())
            .await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(anyhow!("el worker cerró la conexión sin responder"));
        }
        Ok(Message::parse(&line))
    })
    .await
    .map_err(|_| anyhow!("timeout esperando a {}", addr))?
}

async fn fire_and_forget(addr: SocketAddr, msg: &Message) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("conectando a {}", addr))?;
    stream
        .write_all(format!("{}\n", msg.encode()).as_bytes())
        .await?;
    stream.flush().await?;
    Ok(())
}
