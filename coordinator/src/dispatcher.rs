use common::{DispatchResponse, JobId, JobSpec, StartJobRequest, StartJobResponse};
use reqwest::StatusCode;
use std::{collections::HashSet, time::Duration};
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::proxy::JobAssignment;
use crate::selector::{self, SelectOutcome};
use crate::state::AppState;

/// Resultado de UN intento de arranque contra UN worker. El "busy" del
/// worker (su propio rechazo de exclusividad) es un resultado esperado,
/// no una excepción: dispara el reintento con otro candidato.
#[derive(Debug)]
enum AttemptOutcome {
    Accepted { remote_job_id: JobId },
    Busy,
    Failed(String),
}

/// Despacha un job: selecciona worker según la política de clases, le
/// POSTea el arranque y reintenta con candidatos distintos hasta agotar
/// el presupuesto.
///
/// Errores terminales:
/// - `NoWorkersAvailable`: ningún worker registrado matchea clase/capacidades
/// - `DispatchExhausted`: había candidatos pero todos rechazaron o fallaron
pub async fn dispatch(state: &AppState, spec: JobSpec) -> Result<DispatchResponse, DispatchError> {
    let local_job_id = uuid::Uuid::new_v4().to_string();
    let mut excluded: HashSet<String> = HashSet::new();
    let mut attempted = 0usize;

    while attempted < state.config.dispatch_retry_budget {
        let worker = match selector::select_with_policy(&state.registry, &spec, &excluded) {
            SelectOutcome::Selected(worker) => worker,
            SelectOutcome::NoneMatching if attempted == 0 => {
                return Err(DispatchError::NoWorkersAvailable {
                    job_type: spec.job_type.clone(),
                });
            }
            // quedaban workers que matchean pero ninguno libre (o ya los
            // intentamos a todos): flota saturada, no flota vacía
            SelectOutcome::NoneAvailable { .. } | SelectOutcome::NoneMatching => {
                return Err(DispatchError::DispatchExhausted {
                    job_type: spec.job_type.clone(),
                    attempted,
                });
            }
        };

        attempted += 1;
        let start_req = StartJobRequest {
            local_job_id: local_job_id.clone(),
            job_type: spec.job_type.clone(),
            payload: spec.payload.clone(),
        };

        match start_job_on_worker(
            &state.http,
            &worker.endpoint,
            &start_req,
            state.config.dispatch_timeout,
        )
        .await
        {
            AttemptOutcome::Accepted { remote_job_id } => {
                // BUSY se marca recién acá, con el job ya aceptado:
                // un intento fallido no deja capacidad fantasma
                state.registry.mark_busy(&worker.worker_id, &local_job_id);
                state.assignments.insert(JobAssignment::new(
                    local_job_id.clone(),
                    remote_job_id.clone(),
                    worker.worker_id.clone(),
                    worker.endpoint.clone(),
                ));
                info!(
                    "job {} ({}) despachado al worker {} (remoto {})",
                    local_job_id, spec.job_type, worker.worker_id, remote_job_id
                );
                return Ok(DispatchResponse {
                    local_job_id,
                    worker_id: worker.worker_id,
                });
            }
            AttemptOutcome::Busy => {
                // carrera esperada: lo seleccionamos AVAILABLE y otro
                // dispatch (u otro caller) lo ocupó antes
                info!(
                    "worker {} rechazó el job {} por ocupado, probando otro candidato",
                    worker.worker_id, local_job_id
                );
                excluded.insert(worker.worker_id);
            }
            AttemptOutcome::Failed(reason) => {
                warn!(
                    "arranque de job {} falló contra el worker {}: {}",
                    local_job_id, worker.worker_id, reason
                );
                excluded.insert(worker.worker_id);
            }
        }
    }

    Err(DispatchError::DispatchExhausted {
        job_type: spec.job_type,
        attempted,
    })
}

async fn start_job_on_worker(
    http: &reqwest::Client,
    endpoint: &str,
    req: &StartJobRequest,
    timeout: Duration,
) -> AttemptOutcome {
    let url = format!("{}/api/v1/jobs", endpoint.trim_end_matches('/'));

    match http.post(&url).timeout(timeout).json(req).send().await {
        Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => AttemptOutcome::Busy,
        Ok(resp) if resp.status().is_success() => match resp.json::<StartJobResponse>().await {
            Ok(body) => AttemptOutcome::Accepted {
                remote_job_id: body.remote_job_id,
            },
            Err(e) => AttemptOutcome::Failed(format!("respuesta inválida: {}", e)),
        },
        Ok(resp) => AttemptOutcome::Failed(format!("status {}", resp.status())),
        Err(e) => AttemptOutcome::Failed(e.to_string()),
    }
}
