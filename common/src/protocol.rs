use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/* --------- Tipos de mensaje del protocolo --------- */

pub const REGISTER_WORKER: &str = "REGISTER_WORKER";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const CLIENT_JOB: &str = "CLIENT_JOB";
pub const JOB_COMPLETE: &str = "JOB_COMPLETE";
pub const JOB_FAILED: &str = "JOB_FAILED";
pub const DISTRIBUTE_TASK: &str = "DISTRIBUTE_TASK";
pub const PROMOTE_AND_EXECUTE: &str = "PROMOTE_AND_EXECUTE";
pub const TASK_RESULT: &str = "TASK_RESULT";

pub const ROLE_PRIMARY: &str = "PRIMARY";
pub const ROLE_REPLICA: &str = "REPLICA";

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_ERROR: &str = "ERROR";

pub const REASON_NO_WORKERS: &str = "NO_WORKERS_AVAILABLE";
pub const REASON_TIMEOUT: &str = "TIMEOUT";
pub const REASON_DATA_LOSS: &str = "DATA_LOSS";
pub const REASON_NO_CACHED_DATA: &str = "NO_CACHED_DATA";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("campo requerido ausente: {0}")]
    MissingField(&'static str),
    #[error("valor numérico inválido: {0}")]
    BadNumber(String),
}

/// Mensaje plano del protocolo: una línea, campos `KEY=VALUE` unidos por `;`.
///
/// El parseo es tolerante (pares malformados se ignoran); la *lectura* de un
/// campo requerido que no está presente devuelve `ProtocolError::MissingField`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: HashMap<String, String>,
}

impl Message {
    pub fn new(msg_type: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert("TYPE".to_string(), msg_type.to_string());
        Self { fields }
    }

    /// Estilo builder para armar mensajes campo a campo.
    pub fn field(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn parse(line: &str) -> Self {
        let mut fields = HashMap::new();
        for pair in line.trim().split(';') {
            if let Some((k, v)) = pair.split_once('=') {
                fields.insert(k.to_string(), v.to_string());
            }
        }
        Self { fields }
    }

    /// Serializa como línea: TYPE primero y el resto de claves ordenadas,
    /// para que la salida sea determinista.
    pub fn encode(&self) -> String {
        let mut parts = Vec::with_capacity(self.fields.len());
        if let Some(t) = self.fields.get("TYPE") {
            parts.push(format!("TYPE={}", t));
        }
        let mut keys: Vec<&String> = self
            .fields
            .keys()
            .filter(|k| k.as_str() != "TYPE")
            .collect();
        keys.sort();
        for k in keys {
            parts.push(format!("{}={}", k, self.fields[k]));
        }
        parts.join(";")
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.fields.get("TYPE").map(String::as_str)
    }

    pub fn get(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.fields
            .get(key)
            .map(String::as_str)
            .ok_or(ProtocolError::MissingField(key))
    }

    pub fn opt(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/* --------- Secuencias numéricas (campo DATA) --------- */

/// Parsea una secuencia de decimales separados por coma. Cadena vacía => vec vacío.
pub fn parse_values(data: &str) -> Result<Vec<f64>, ProtocolError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    data.split(',')
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| ProtocolError::BadNumber(s.to_string()))
        })
        .collect()
}

pub fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extrae_todos_los_campos() {
        let msg = Message::parse("TYPE=HEARTBEAT;WORKER_ID=worker-9001");
        assert_eq!(msg.msg_type(), Some("HEARTBEAT"));
        assert_eq!(msg.get("WORKER_ID").unwrap(), "worker-9001");
    }

    #[test]
    fn parse_ignora_pares_malformados() {
        let msg = Message::parse("TYPE=HEARTBEAT;sin_igual;WORKER_ID=w1");
        assert_eq!(msg.get("WORKER_ID").unwrap(), "w1");
        assert!(msg.opt("sin_igual").is_none());
    }

    #[test]
    fn parse_conserva_igual_dentro_del_valor() {
        // split_once: solo el primer '=' separa clave de valor
        let msg = Message::parse("TYPE=X;K=a=b");
        assert_eq!(msg.get("K").unwrap(), "a=b");
    }

    #[test]
    fn campo_ausente_es_error_tipado() {
        let msg = Message::parse("TYPE=CLIENT_JOB");
        assert_eq!(
            msg.get("JOB_ID"),
            Err(ProtocolError::MissingField("JOB_ID"))
        );
    }

    #[test]
    fn encode_pone_type_primero_y_es_determinista() {
        let msg = Message::new(DISTRIBUTE_TASK)
            .field("ROLE", ROLE_PRIMARY)
            .field("JOB_ID", "j1")
            .field("CHUNK_ID", "j1-c0");
        assert_eq!(
            msg.encode(),
            "TYPE=DISTRIBUTE_TASK;CHUNK_ID=j1-c0;JOB_ID=j1;ROLE=PRIMARY"
        );
    }

    #[test]
    fn encode_y_parse_son_inversos() {
        let original = Message::new(TASK_RESULT)
            .field("JOB_ID", "j1")
            .field("CHUNK_ID", "j1-c2")
            .field("STATUS", STATUS_SUCCESS)
            .field("DATA", "1,2.5,-1");
        assert_eq!(Message::parse(&original.encode()), original);
    }

    #[test]
    fn parse_values_acepta_vacio_y_decimales() {
        assert_eq!(parse_values("").unwrap(), Vec::<f64>::new());
        assert_eq!(parse_values("1,2.5,-1").unwrap(), vec![1.0, 2.5, -1.0]);
    }

    #[test]
    fn parse_values_rechaza_basura() {
        assert_eq!(
            parse_values("1,x,3"),
            Err(ProtocolError::BadNumber("x".to_string()))
        );
    }

    #[test]
    fn join_values_redondea_ida_y_vuelta() {
        let vals = vec![0.5, -1.0, 3334.0];
        assert_eq!(parse_values(&join_values(&vals)).unwrap(), vals);
    }
}
