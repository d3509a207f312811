use common::HealthResponse;
use tracing::{info, warn};

use crate::state::AppState;

/// Loop del monitor de salud: a intervalo fijo, limpia los workers
/// vencidos y sondea a todos los conocidos. Corre en su propia task,
/// totalmente desacoplado del tráfico de requests.
pub async fn run_health_monitor(state: AppState) {
    info!(
        "monitor de salud arrancado (intervalo {:?}, umbral {} fallos, eliminación tras {:?})",
        state.config.probe_interval,
        state.config.health_failure_threshold,
        state.config.removal_threshold
    );
    loop {
        tokio::time::sleep(state.config.probe_interval).await;
        sweep(&state).await;
    }
}

/// Una pasada completa: limpieza + una sonda por worker. Las sondas se
/// spawnean en paralelo para que un worker colgado no retrase al resto;
/// el await final solo acota la pasada al timeout de sonda.
pub async fn sweep(state: &AppState) {
    // 1) Limpieza: UNAVAILABLE sin sonda exitosa hace demasiado tiempo.
    //    Sus jobs quedan FAILED del lado del coordinador, no del worker.
    let evicted = state.registry.remove_expired(state.config.removal_threshold);
    for worker_id in &evicted {
        let failed = state
            .assignments
            .fail_for_worker(worker_id, "worker eliminado del registro por inactividad");
        for local_job_id in failed {
            warn!(
                "job {} marcado FAILED: su worker {} fue eliminado",
                local_job_id, worker_id
            );
        }
    }

    // 2) Sondas en paralelo, una task por worker
    let mut handles = Vec::new();
    for (worker_id, endpoint, generation) in state.registry.probe_targets() {
        let probe_state = state.clone();
        handles.push(tokio::spawn(async move {
            probe_worker(&probe_state, &worker_id, &endpoint, generation).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Sondea un worker y aplica el resultado vía el registro. La generación
/// capturada en el snapshot viaja con la sonda: si un dispatch transicionó
/// el record mientras la sonda estaba en vuelo, el flag reportado ya no
/// aplica (ver registry::apply_probe_success).
async fn probe_worker(state: &AppState, worker_id: &str, endpoint: &str, generation: u64) {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));

    let health: Result<HealthResponse, String> = match state
        .http
        .get(&url)
        .timeout(state.config.probe_timeout)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp
            .json::<HealthResponse>()
            .await
            .map_err(|e| format!("respuesta inválida: {}", e)),
        Ok(resp) => Err(format!("status {}", resp.status())),
        Err(e) => Err(e.to_string()),
    };

    match health {
        Ok(h) if h.ok => {
            if let Some(lost_job) = state
                .registry
                .apply_probe_success(worker_id, generation, h.busy)
            {
                // el worker volvió idle sin pasar por un estado terminal
                // observado: el job se da por perdido acá, qué hacer con
                // él es decisión del tracker externo
                if state
                    .assignments
                    .fail_job(&lost_job, "el worker ya no conoce el job")
                {
                    warn!(
                        "job {} marcado FAILED: el worker {} reporta idle",
                        lost_job, worker_id
                    );
                }
            }
        }
        Ok(_) => record_probe_failure(state, worker_id, "el worker se reporta no sano"),
        Err(reason) => record_probe_failure(state, worker_id, &reason),
    }
}

fn record_probe_failure(state: &AppState, worker_id: &str, reason: &str) {
    if let Some((failures, flipped)) = state
        .registry
        .apply_probe_failure(worker_id, state.config.health_failure_threshold)
    {
        if flipped {
            warn!(
                "worker {} marcado UNAVAILABLE tras {} sondas fallidas ({})",
                worker_id, failures, reason
            );
        } else {
            info!(
                "sonda fallida para el worker {} ({}/{}): {}",
                worker_id, failures, state.config.health_failure_threshold, reason
            );
        }
    }
}
