use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::protocol::{self, Message};
use common::{chunk, JobId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::dispatch::{self, Role};
use crate::state::{AppState, ChunkAssignment, ChunkOutcome, JobEntry};

/// Endpoint TCP de jobs de clientes: una conexión por job.
pub async fn run_client_listener(state: AppState, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let st = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(st, stream).await {
                        warn!("error atendiendo al cliente {}: {:?}", addr, e);
                    }
                });
            }
            Err(e) => warn!("error en accept de clientes: {:?}", e),
        }
    }
}

async fn handle_client(state: AppState, stream: TcpStream) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request = Message::parse(&line);
    let response = if request.msg_type() == Some(protocol::CLIENT_JOB) {
        process_job(state, request).await
    } else {
        warn!("petición desconocida de cliente: {}", line.trim());
        job_failed("BAD_REQUEST")
    };

    write_half
        .write_all(format!("{}\n", response.encode()).as_bytes())
        .await?;
    Ok(())
}

fn job_failed(reason: &str) -> Message {
    Message::new(protocol::JOB_FAILED).field("REASON", reason)
}

/// Ciclo completo de un job: partir, asignar primario+réplica, despachar en
/// paralelo, esperar la barrera de chunks y ensamblar en orden de índice.
async fn process_job(state: AppState, request: Message) -> Message {
    let (job_id, operation, data) = match parse_job_request(&request) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("CLIENT_JOB malformado: {}", e);
            return job_failed("BAD_REQUEST");
        }
    };

    let alive = state.alive_workers();
    if alive.is_empty() {
        warn!("job '{}' rechazado: no hay workers vivos", job_id);
        return job_failed(protocol::REASON_NO_WORKERS);
    }

    let parts = chunk::split(&data, alive.len());
    let expected = parts.len();
    info!(
        "job '{}' ({} valores, op {}) dividido en {} chunks para {} workers",
        job_id,
        data.len(),
        operation,
        expected,
        alive.len()
    );

    let (job, rx) = JobEntry::new(operation.clone(), expected);
    state.jobs.insert(job_id.clone(), job.clone());

    for (i, part) in parts.into_iter().enumerate() {
        let chunk_id = chunk::chunk_id(&job_id, i);
        let primary = alive[i % alive.len()].clone();
        let replica = state.select_replica(&[primary.id.as_str()]);

        // la asignación queda registrada ANTES de despachar: si el primario
        // muere en vuelo, la recuperación ya ve este chunk
        state.chunks.insert(
            chunk_id.clone(),
            ChunkAssignment {
                job_id: job_id.clone(),
                primary: primary.id.clone(),
                replica: replica.as_ref().map(|w| w.id.clone()),
            },
        );

        let payload = Arc::new(part);
        tokio::spawn(dispatch::send_task(
            state.clone(),
            primary,
            job_id.clone(),
            chunk_id.clone(),
            operation.clone(),
            payload.clone(),
            Role::Primary,
        ));
        if let Some(replica) = replica {
            tokio::spawn(dispatch::send_task(
                state.clone(),
                replica,
                job_id.clone(),
                chunk_id,
                operation.clone(),
                payload,
                Role::Replica,
            ));
        }
    }

    let outcome = wait_for_job(rx, expected, state.timing.job_timeout).await;

    let response = match outcome {
        JobOutcome::Complete => match assemble(&job, &job_id) {
            Some(values) => {
                info!("job '{}' completo ({} valores)", job_id, values.len());
                Message::new(protocol::JOB_COMPLETE)
                    .field("STATUS", protocol::STATUS_SUCCESS)
                    .field("DATA", protocol::join_values(&values))
            }
            None => {
                // no debería pasar: la barrera dijo completo pero falta un chunk
                warn!("job '{}' inconsistente al ensamblar", job_id);
                job_failed("INTERNAL")
            }
        },
        JobOutcome::DataLoss => {
            warn!("job '{}' falló por pérdida de datos irrecuperable", job_id);
            job_failed(protocol::REASON_DATA_LOSS)
        }
        JobOutcome::Timeout => {
            warn!("job '{}' agotó el timeout; sin datos parciales", job_id);
            job_failed(protocol::REASON_TIMEOUT)
        }
    };

    cleanup_job(&state, &job_id, expected);
    response
}

fn parse_job_request(msg: &Message) -> Result<(JobId, String, Vec<f64>)> {
    let job_id = msg.get("JOB_ID")?.to_string();
    let operation = msg.get("OPERATION")?.to_string();
    let data = protocol::parse_values(msg.get("DATA")?)?;
    Ok((job_id, operation, data))
}

#[derive(Debug, PartialEq)]
enum JobOutcome {
    Complete,
    DataLoss,
    Timeout,
}

/// Barrera de completitud: espera una resolución por chunk hasta el deadline.
/// Un chunk perdido también libera su cuenta, así el job falla con razón
/// propia (DATA_LOSS) en vez de colgarse hasta el timeout.
async fn wait_for_job(
    mut rx: UnboundedReceiver<ChunkOutcome>,
    expected: usize,
    job_timeout: Duration,
) -> JobOutcome {
    let deadline = Instant::now() + job_timeout;
    let mut resolved = 0;
    let mut any_lost = false;

    while resolved < expected {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(ChunkOutcome::Done(_))) => resolved += 1,
            Ok(Some(ChunkOutcome::Lost(chunk_id))) => {
                warn!("chunk {} declarado irrecuperable", chunk_id);
                any_lost = true;
                resolved += 1;
            }
            // el JobEntry retiene un sender, así que esto solo pasa si el
            // job fue removido por debajo; lo tratamos como timeout
            Ok(None) => return JobOutcome::Timeout,
            Err(_) => {
                return if any_lost {
                    JobOutcome::DataLoss
                } else {
                    JobOutcome::Timeout
                }
            }
        }
    }

    if any_lost {
        JobOutcome::DataLoss
    } else {
        JobOutcome::Complete
    }
}

/// Concatena los resultados por chunk en orden de índice, sin importar en
/// qué orden llegaron.
fn assemble(job: &JobEntry, job_id: &str) -> Option<Vec<f64>> {
    let mut out = Vec::new();
    for i in 0..job.expected_chunks {
        let chunk_id = chunk::chunk_id(job_id, i);
        let entry = job.results.get(&chunk_id)?;
        out.extend(entry.as_ref()?.iter().copied());
    }
    Some(out)
}

/// Un job respondido no se consulta más: se eliminan su entrada y sus
/// asignaciones de chunk para que las tablas no crezcan sin límite.
/// Resultados tardíos o señales de recuperación quedan en no-op.
fn cleanup_job(state: &AppState, job_id: &str, expected: usize) {
    state.jobs.remove(job_id);
    for i in 0..expected {
        state.chunks.remove(&chunk::chunk_id(job_id, i));
    }
}
