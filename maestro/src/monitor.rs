use std::time::Instant;

use common::WorkerId;
use tokio::time::sleep;
use tracing::warn;

use crate::failover;
use crate::state::{AppState, WorkerStatus};

/// Watchdog de liveness: barrido periódico que demueve a DEAD a los workers
/// con heartbeat vencido y dispara la recuperación para cada uno.
pub async fn run_watchdog(state: AppState) {
    let period = state.timing.watchdog_interval;
    loop {
        sleep(period).await;

        for dead_id in sweep(&state, Instant::now()) {
            let st = state.clone();
            tokio::spawn(async move {
                failover::recover_worker(st, dead_id).await;
            });
        }
    }
}

/// Una pasada del watchdog: marca DEAD a todo worker ALIVE cuyo último
/// heartbeat sea más viejo que el umbral y devuelve los recién caídos.
/// El flip ALIVE→DEAD ocurre bajo el lock de la entrada, así dos pasadas
/// no pueden disparar la recuperación dos veces por el mismo episodio.
pub fn sweep(state: &AppState, now: Instant) -> Vec<WorkerId> {
    let threshold = state.timing.staleness_threshold;
    let mut newly_dead = Vec::new();

    for mut entry in state.workers.iter_mut() {
        let info = entry.value_mut();
        if info.status != WorkerStatus::Alive {
            continue;
        }
        let elapsed = now.saturating_duration_since(info.last_heartbeat);
        if elapsed > threshold {
            info.status = WorkerStatus::Dead;
            warn!(
                "[WATCHDOG] worker '{}' marcado como DEAD (sin heartbeat hace {:?})",
                info.id, elapsed
            );
            newly_dead.push(info.id.clone());
        }
    }

    newly_dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::Timing;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn estado_con_worker(hace: Duration) -> AppState {
        let state = AppState::new(Timing::default());
        state.register_worker("worker-9001".into(), IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        state.workers.get_mut("worker-9001").unwrap().last_heartbeat =
            Instant::now() - hace;
        state
    }

    #[test]
    fn heartbeat_reciente_no_marca_dead() {
        // 8s de ausencia no superan el umbral de 8s (estrictamente mayor)
        let now = Instant::now();
        let state = estado_con_worker(Duration::from_secs(8));
        state.workers.get_mut("worker-9001").unwrap().last_heartbeat =
            now - Duration::from_secs(8);
        assert!(sweep(&state, now).is_empty());
        assert!(state.is_alive("worker-9001"));
    }

    #[test]
    fn heartbeat_vencido_marca_dead_en_una_pasada() {
        let state = estado_con_worker(Duration::from_secs(9));
        let caidos = sweep(&state, Instant::now());
        assert_eq!(caidos, vec!["worker-9001".to_string()]);
        assert!(!state.is_alive("worker-9001"));
    }

    #[test]
    fn la_segunda_pasada_no_vuelve_a_disparar() {
        let state = estado_con_worker(Duration::from_secs(20));
        assert_eq!(sweep(&state, Instant::now()).len(), 1);
        // mismo episodio de staleness: ya está DEAD, no se re-dispara
        assert!(sweep(&state, Instant::now()).is_empty());
    }

    #[test]
    fn un_worker_dead_revive_con_heartbeat_sin_reregistro() {
        let state = estado_con_worker(Duration::from_secs(20));
        sweep(&state, Instant::now());
        assert!(!state.is_alive("worker-9001"));

        state.heartbeat("worker-9001");
        assert!(state.is_alive("worker-9001"));
        // y con timestamp fresco, el watchdog lo deja en paz
        assert!(sweep(&state, Instant::now()).is_empty());
    }
}
