use std::fmt;
use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use common::protocol::{self, Message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;
use uuid::Uuid;

/// Array distribuido del lado del cliente: un wrapper fino sobre un
/// `Vec<f64>` que sabe mandarle un job al maestro y esperar la respuesta.
/// Los enteros viajan como f64 (ida y vuelta por representación flotante).
#[derive(Debug, Clone)]
pub struct DArray {
    maestro_addr: SocketAddr,
    data: Vec<f64>,
}

impl DArray {
    pub fn new(maestro_addr: SocketAddr, data: Vec<f64>) -> Self {
        Self { maestro_addr, data }
    }

    pub fn from_ints(maestro_addr: SocketAddr, data: Vec<i64>) -> Self {
        Self::new(maestro_addr, data.into_iter().map(|v| v as f64).collect())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn collect(&self) -> Vec<f64> {
        self.data.clone()
    }

    pub fn collect_ints(&self) -> Vec<i64> {
        self.data.iter().map(|v| *v as i64).collect()
    }

    /// Manda el array completo como CLIENT_JOB y bloquea hasta la respuesta.
    /// Devuelve un array nuevo con el resultado, o el REASON del fallo.
    pub async fn map(&self, operation_id: &str) -> Result<DArray> {
        let job_id = format!("job-{}", Uuid::new_v4());
        info!(
            "enviando job '{}' ({} valores, op {}) al maestro {}",
            job_id,
            self.data.len(),
            operation_id,
            self.maestro_addr
        );

        let request = Message::new(protocol::CLIENT_JOB)
            .field("JOB_ID", &job_id)
            .field("OPERATION", operation_id)
            .field("DATA", protocol::join_values(&self.data));

        let mut stream = TcpStream::connect(self.maestro_addr).await?;
        stream
            .write_all(format!("{}\n", request.encode()).as_bytes())
            .await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(anyhow!("el maestro cerró la conexión sin responder"));
        }

        let response = Message::parse(&line);
        match response.msg_type() {
            Some(protocol::JOB_COMPLETE)
                if response.opt("STATUS") == Some(protocol::STATUS_SUCCESS) =>
            {
                let values = protocol::parse_values(response.get("DATA")?)?;
                info!("job '{}' completado ({} valores)", job_id, values.len());
                Ok(DArray::new(self.maestro_addr, values))
            }
            _ => {
                let reason = response.opt("REASON").unwrap_or("DESCONOCIDA");
                Err(anyhow!("el job '{}' falló: {}", job_id, reason))
            }
        }
    }
}

impl fmt::Display for DArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = self
            .data
            .iter()
            .take(5)
            .map(|v| format!("{:.2}", v))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "DArray(len={}, data=[{}...])", self.data.len(), preview)
    }
}
