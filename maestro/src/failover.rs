use common::{ChunkId, JobId, WorkerId};
use tracing::{debug, error, info};

use crate::dispatch;
use crate::state::{AppState, WorkerInfo, WorkerStatus};

/// Orden de promoción lista para despachar: el worker réplica ya quedó como
/// primario en la tabla de distribución y hay que pedirle que ejecute el
/// chunk desde su caché.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub worker: WorkerInfo,
    pub job_id: JobId,
    pub chunk_id: ChunkId,
    pub operation: String,
}

/// Recuperación ante la caída de un worker: promueve réplicas de todos los
/// chunks que lo tenían como primario y re-ejecuta desde la caché remota.
pub async fn recover_worker(state: AppState, dead_id: WorkerId) {
    info!("[RECOVERY] iniciando recuperación para worker caído '{}'", dead_id);

    for promo in plan_recovery(&state, &dead_id) {
        let st = state.clone();
        tokio::spawn(async move {
            dispatch::send_promotion(
                st,
                promo.worker,
                promo.job_id,
                promo.chunk_id,
                promo.operation,
            )
            .await;
        });
    }
}

/// Parte síncrona de la recuperación: muta la tabla de distribución y
/// devuelve las promociones a despachar.
///
/// Solo se tocan los chunks donde el caído es *primario vigente*; donde era
/// apenas réplica la asignación queda obsoleta pero inofensiva. Cada
/// reasignación ocurre bajo el lock de la entrada del chunk, así dos
/// recuperaciones concurrentes no pueden promover dos veces el mismo chunk.
pub fn plan_recovery(state: &AppState, dead_id: &str) -> Vec<Promotion> {
    let affected: Vec<ChunkId> = state
        .chunks
        .iter()
        .filter(|e| e.value().primary == dead_id)
        .map(|e| e.key().clone())
        .collect();

    let mut promotions = Vec::new();

    for chunk_id in affected {
        let Some(mut entry) = state.chunks.get_mut(&chunk_id) else {
            continue; // el job terminó y limpió sus chunks en el medio
        };
        if entry.primary != dead_id {
            // otra recuperación ya movió este chunk
            continue;
        }

        let replica_viva = entry
            .replica
            .as_ref()
            .and_then(|rid| state.workers.get(rid).map(|w| w.value().clone()))
            .filter(|w| w.status == WorkerStatus::Alive);

        match replica_viva {
            Some(promoted) => {
                info!(
                    "[RECOVERY] promoviendo a '{}' como primario del chunk {}",
                    promoted.id, chunk_id
                );
                entry.primary = promoted.id.clone();
                entry.replica = state
                    .select_replica(&[promoted.id.as_str()])
                    .map(|w| w.id);

                let Some(job) = state.jobs.get(&entry.job_id) else {
                    debug!("job de {} ya no existe, promoción innecesaria", chunk_id);
                    continue;
                };
                promotions.push(Promotion {
                    job_id: entry.job_id.clone(),
                    operation: job.operation.clone(),
                    worker: promoted,
                    chunk_id,
                });
            }
            None => {
                // sin réplica viva no hay de dónde re-ejecutar: pérdida de
                // datos. Hay que liberar igual la espera del job para que
                // falle con razón propia en vez de colgarse.
                error!(
                    "[CRITICAL] ¡pérdida de datos! sin réplica viva para el chunk {}",
                    chunk_id
                );
                if let Some(job) = state.jobs.get(&entry.job_id) {
                    job.mark_lost(chunk_id.clone());
                }
            }
        }
    }

    promotions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChunkAssignment, ChunkOutcome, JobEntry};
    use common::config::Timing;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// Clúster de 3 workers con un job de 2 chunks:
    /// c0: primario w1, réplica w2 / c1: primario w2, réplica w1.
    fn armar_estado() -> (AppState, tokio::sync::mpsc::UnboundedReceiver<ChunkOutcome>) {
        let state = AppState::new(Timing::default());
        state.register_worker("w1".into(), localhost(), 9001);
        state.register_worker("w2".into(), localhost(), 9002);
        state.register_worker("w3".into(), localhost(), 9003);

        let (job, rx) = JobEntry::new("COMPLEX_OP".into(), 2);
        state.jobs.insert("j1".into(), job);

        state.chunks.insert(
            "j1-c0".into(),
            ChunkAssignment {
                job_id: "j1".into(),
                primary: "w1".into(),
                replica: Some("w2".into()),
            },
        );
        state.chunks.insert(
            "j1-c1".into(),
            ChunkAssignment {
                job_id: "j1".into(),
                primary: "w2".into(),
                replica: Some("w1".into()),
            },
        );
        (state, rx)
    }

    #[test]
    fn promueve_la_replica_viva_y_elige_replica_nueva() {
        let (state, _rx) = armar_estado();
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;

        let promos = plan_recovery(&state, "w1");

        assert_eq!(promos.len(), 1);
        assert_eq!(promos[0].chunk_id, "j1-c0");
        assert_eq!(promos[0].worker.id, "w2");
        assert_eq!(promos[0].operation, "COMPLEX_OP");

        let c0 = state.chunks.get("j1-c0").unwrap();
        assert_eq!(c0.primary, "w2");
        // la réplica nueva excluye al nuevo primario; w1 está muerto, queda w3
        assert_eq!(c0.replica.as_deref(), Some("w3"));
    }

    #[test]
    fn no_toca_chunks_donde_el_caido_era_solo_replica() {
        let (state, _rx) = armar_estado();
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;

        plan_recovery(&state, "w1");

        // c1 tenía a w1 de réplica: asignación obsoleta pero intacta
        let c1 = state.chunks.get("j1-c1").unwrap();
        assert_eq!(c1.primary, "w2");
        assert_eq!(c1.replica.as_deref(), Some("w1"));
    }

    #[test]
    fn sin_replica_viva_marca_el_chunk_como_perdido() {
        let (state, mut rx) = armar_estado();
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;
        state.workers.get_mut("w2").unwrap().status = WorkerStatus::Dead;

        // cae w1: la réplica de c0 (w2) también está muerta
        let promos = plan_recovery(&state, "w1");

        assert!(promos.is_empty());
        assert_eq!(rx.try_recv().unwrap(), ChunkOutcome::Lost("j1-c0".into()));
    }

    #[test]
    fn chunk_sin_replica_asignada_tambien_es_perdida() {
        let state = AppState::new(Timing::default());
        state.register_worker("w1".into(), localhost(), 9001);
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;

        let (job, mut rx) = JobEntry::new("COMPLEX_OP".into(), 1);
        state.jobs.insert("j1".into(), job);
        state.chunks.insert(
            "j1-c0".into(),
            ChunkAssignment {
                job_id: "j1".into(),
                primary: "w1".into(),
                replica: None,
            },
        );

        plan_recovery(&state, "w1");
        assert_eq!(rx.try_recv().unwrap(), ChunkOutcome::Lost("j1-c0".into()));
    }

    #[test]
    fn recovery_repetida_es_idempotente() {
        let (state, _rx) = armar_estado();
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;

        assert_eq!(plan_recovery(&state, "w1").len(), 1);
        // segunda pasada por el mismo episodio: w1 ya no es primario de nada
        assert!(plan_recovery(&state, "w1").is_empty());
    }

    #[test]
    fn job_ya_limpiado_no_genera_promocion_ni_error() {
        let (state, _rx) = armar_estado();
        state.workers.get_mut("w1").unwrap().status = WorkerStatus::Dead;
        state.jobs.remove("j1");

        let promos = plan_recovery(&state, "w1");
        assert!(promos.is_empty());
    }
}
