// maestro/src/state.rs

use common::config::Timing;
use common::{ChunkId, JobId, WorkerId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Alive,
    Dead,
}

#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub host: IpAddr,
    pub tcp_port: u16,
    pub last_heartbeat: Instant,
    pub status: WorkerStatus,
}

impl WorkerInfo {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }
}

/// Resolución de la espera de un chunk: o llegó su resultado, o se declaró
/// irrecuperable (primario muerto sin réplica viva).
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Done(ChunkId),
    Lost(ChunkId),
}

pub enum HeartbeatAck {
    Refreshed,
    Revived,
    Unknown,
}

/// Estado de un job en curso: resultados por chunk (a lo sumo uno por id)
/// más la barrera de completitud basada en canal. El canal reemplaza al
/// countdown-latch clásico porque la recuperación necesita poder liberar
/// una cuenta que no puede satisfacer (chunk perdido).
pub struct JobEntry {
    pub operation: String,
    pub expected_chunks: usize,
    /// Resolución por chunk, a lo sumo una: `Some(valores)` si completó,
    /// `None` si quedó declarado perdido.
    pub results: DashMap<ChunkId, Option<Vec<f64>>>,
    resolved_tx: mpsc::UnboundedSender<ChunkOutcome>,
}

impl JobEntry {
    pub fn new(
        operation: String,
        expected_chunks: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChunkOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = Arc::new(Self {
            operation,
            expected_chunks,
            results: DashMap::new(),
            resolved_tx: tx,
        });
        (entry, rx)
    }

    /// Registra el resultado de un chunk y resuelve su espera. Un segundo
    /// resultado para el mismo chunk (p.ej. primario lento + promovido) se
    /// descarta. Devuelve si este fue el primero.
    pub fn record_result(&self, chunk_id: ChunkId, data: Vec<f64>) -> bool {
        match self.results.entry(chunk_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Some(data));
                let _ = self.resolved_tx.send(ChunkOutcome::Done(chunk_id));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Libera la espera de un chunk que nunca va a completarse. Un chunk ya
    /// resuelto (con resultado previo, o perdido por una recuperación
    /// anterior) no se toca: la barrera recibe a lo sumo una resolución por
    /// chunk, igual que con `record_result`.
    pub fn mark_lost(&self, chunk_id: ChunkId) -> bool {
        match self.results.entry(chunk_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(None);
                let _ = self.resolved_tx.send(ChunkOutcome::Lost(chunk_id));
                true
            }
            Entry::Occupied(_) => false,
        }
    }
}

/// Asignación vigente de un chunk; la recuperación la muta in situ.
#[derive(Debug, Clone)]
pub struct ChunkAssignment {
    pub job_id: JobId,
    pub primary: WorkerId,
    pub replica: Option<WorkerId>,
}

#[derive(Clone)]
pub struct AppState {
    pub workers: Arc<DashMap<WorkerId, WorkerInfo>>,
    pub jobs: Arc<DashMap<JobId, Arc<JobEntry>>>,
    pub chunks: Arc<DashMap<ChunkId, ChunkAssignment>>,
    pub timing: Arc<Timing>,
}

impl AppState {
    pub fn new(timing: Timing) -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            jobs: Arc::new(DashMap::new()),
            chunks: Arc::new(DashMap::new()),
            timing: Arc::new(timing),
        }
    }

    /// Alta (o re-alta) de un worker: sobreescribe el registro con status
    /// ALIVE y timestamp fresco. El registro nunca se borra.
    pub fn register_worker(&self, id: WorkerId, host: IpAddr, tcp_port: u16) {
        self.workers.insert(
            id.clone(),
            WorkerInfo {
                id,
                host,
                tcp_port,
                last_heartbeat: Instant::now(),
                status: WorkerStatus::Alive,
            },
        );
    }

    /// Refresca el timestamp de vida; un worker DEAD revive en silencio,
    /// sin necesidad de re-registrarse.
    pub fn heartbeat(&self, id: &str) -> HeartbeatAck {
        match self.workers.get_mut(id) {
            Some(mut info) => {
                info.last_heartbeat = Instant::now();
                if info.status == WorkerStatus::Dead {
                    info.status = WorkerStatus::Alive;
                    HeartbeatAck::Revived
                } else {
                    HeartbeatAck::Refreshed
                }
            }
            None => HeartbeatAck::Unknown,
        }
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.workers
            .get(id)
            .map(|w| w.status == WorkerStatus::Alive)
            .unwrap_or(false)
    }

    pub fn alive_workers(&self) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .filter(|e| e.value().status == WorkerStatus::Alive)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Cualquier worker ALIVE fuera de los excluidos; el orden de iteración
    /// del mapa no está definido, así que la elección es arbitraria a
    /// propósito (el protocolo no impone una regla de selección).
    pub fn select_replica(&self, exclude: &[&str]) -> Option<WorkerInfo> {
        self.workers
            .iter()
            .find(|e| {
                e.value().status == WorkerStatus::Alive && !exclude.contains(&e.key().as_str())
            })
            .map(|e| e.value().clone())
    }

    /// Entrega el resultado de un chunk al job correspondiente. Si el job ya
    /// terminó y fue limpiado, el resultado tardío se descarta sin error.
    pub fn record_result(&self, job_id: &str, chunk_id: ChunkId, data: Vec<f64>) -> bool {
        match self.jobs.get(job_id) {
            Some(job) => job.record_result(chunk_id, data),
            None => false,
        }
    }
}
