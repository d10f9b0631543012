pub mod chunk;
pub mod config;
pub mod ops;
pub mod protocol;

pub type JobId = String;
pub type ChunkId = String;
pub type WorkerId = String;

/// Id estable de un worker, derivado de su puerto TCP de tareas.
pub fn worker_id_for_port(tcp_port: u16) -> WorkerId {
    format!("worker-{}", tcp_port)
}
