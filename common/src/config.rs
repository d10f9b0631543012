use std::env;
use std::time::Duration;

pub const DEFAULT_MAESTRO_UDP_PORT: u16 = 8000;
pub const DEFAULT_MAESTRO_TCP_PORT: u16 = 8001;

const DEFAULT_HEARTBEAT_SECS: u64 = 3;
const DEFAULT_STALENESS_SECS: u64 = 8;
const DEFAULT_WATCHDOG_SECS: u64 = 5;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;

/// Lee una env var numérica con fallback al default.
fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

pub fn env_port(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Constantes de tiempo del clúster. Los defaults vienen del protocolo
/// (heartbeat 3s, umbral de staleness 8s, watchdog 5s, timeout de job 60s)
/// y se pueden sobreescribir por env vars o inyectar en tests.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Cada cuánto manda heartbeat un worker.
    pub heartbeat_interval: Duration,
    /// Antigüedad máxima del último heartbeat antes de declarar DEAD.
    pub staleness_threshold: Duration,
    /// Período del barrido del watchdog.
    pub watchdog_interval: Duration,
    /// Espera máxima por todos los chunks de un job.
    pub job_timeout: Duration,
    /// Espera máxima por la respuesta de un worker a un envío individual.
    pub task_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            staleness_threshold: Duration::from_secs(DEFAULT_STALENESS_SECS),
            watchdog_interval: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
        }
    }
}

impl Timing {
    pub fn from_env() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(env_u64(
                "HEARTBEAT_SECS",
                DEFAULT_HEARTBEAT_SECS,
            )),
            staleness_threshold: Duration::from_secs(env_u64(
                "STALENESS_SECS",
                DEFAULT_STALENESS_SECS,
            )),
            watchdog_interval: Duration::from_secs(env_u64(
                "WATCHDOG_SECS",
                DEFAULT_WATCHDOG_SECS,
            )),
            job_timeout: Duration::from_secs(env_u64(
                "JOB_TIMEOUT_SECS",
                DEFAULT_JOB_TIMEOUT_SECS,
            )),
            task_timeout: Duration::from_secs(env_u64(
                "TASK_TIMEOUT_SECS",
                DEFAULT_TASK_TIMEOUT_SECS,
            )),
        }
    }
}
