use chrono::Utc;
use common::{JobId, JobState, ProgressReport, RemoteJobStatus, WorkerId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::state::AppState;

/// Vínculo de un job local con (worker, job remoto), más el cache de
/// estado con vencimiento corto que sirve los polls del caller.
#[derive(Debug, Clone)]
pub struct JobAssignment {
    pub local_job_id: JobId,
    pub remote_job_id: JobId,
    pub worker_id: WorkerId,
    /// endpoint capturado al despachar; los polls siguen funcionando
    /// aunque el worker re-registre otra dirección en el medio
    pub endpoint: String,
    pub cached_status: Option<RemoteJobStatus>,
    pub cache_fetched_at: Option<Instant>,
}

impl JobAssignment {
    pub fn new(
        local_job_id: JobId,
        remote_job_id: JobId,
        worker_id: WorkerId,
        endpoint: String,
    ) -> Self {
        Self {
            local_job_id,
            remote_job_id,
            worker_id,
            endpoint,
            cached_status: None,
            cache_fetched_at: None,
        }
    }
}

/// Tabla de assignments activos, compartida entre dispatcher, proxy y
/// monitor. Igual que el registro: toda mutación pasa por acá.
#[derive(Clone)]
pub struct AssignmentTable {
    inner: Arc<Mutex<HashMap<JobId, JobAssignment>>>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn insert(&self, assignment: JobAssignment) {
        self.inner
            .lock()
            .unwrap()
            .insert(assignment.local_job_id.clone(), assignment);
    }

    pub fn get(&self, local_job_id: &str) -> Option<JobAssignment> {
        self.inner.lock().unwrap().get(local_job_id).cloned()
    }

    pub fn remove(&self, local_job_id: &str) -> Option<JobAssignment> {
        self.inner.lock().unwrap().remove(local_job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn update_cache(&self, local_job_id: &str, status: RemoteJobStatus) {
        let mut table = self.inner.lock().unwrap();
        if let Some(assignment) = table.get_mut(local_job_id) {
            assignment.cached_status = Some(status);
            assignment.cache_fetched_at = Some(Instant::now());
        }
    }

    /// Convierte en FAILED terminal un assignment cuyo worker perdió el
    /// job. El estado queda cacheado como último valor conocido: el
    /// próximo poll lo sirve y recién ahí se borra el assignment.
    pub fn fail_job(&self, local_job_id: &str, detail: &str) -> bool {
        let mut table = self.inner.lock().unwrap();
        match table.get_mut(local_job_id) {
            Some(assignment) => {
                fail_assignment(assignment, detail);
                true
            }
            None => false,
        }
    }

    /// Idem `fail_job` pero para todos los assignments de un worker
    /// (worker eliminado del registro). Devuelve los jobs afectados.
    pub fn fail_for_worker(&self, worker_id: &str, detail: &str) -> Vec<JobId> {
        let mut table = self.inner.lock().unwrap();
        let mut failed = Vec::new();
        for assignment in table.values_mut() {
            if assignment.worker_id == worker_id {
                fail_assignment(assignment, detail);
                failed.push(assignment.local_job_id.clone());
            }
        }
        failed
    }
}

impl Default for AssignmentTable {
    fn default() -> Self {
        Self::new()
    }
}

fn fail_assignment(assignment: &mut JobAssignment, detail: &str) {
    let progress = assignment
        .cached_status
        .as_ref()
        .and_then(|s| s.progress);
    assignment.cached_status = Some(RemoteJobStatus {
        remote_job_id: assignment.remote_job_id.clone(),
        state: JobState::Failed,
        progress,
        detail: Some(detail.to_string()),
        updated_at: Utc::now(),
    });
    assignment.cache_fetched_at = Some(Instant::now());
}

/* --------- Consulta de estado (proxy de progreso) --------- */

/// Sirve el estado de un job local. Cache con TTL corto: dentro del TTL
/// (y sin `force_refresh`) se responde el valor cacheado sin tocar al
/// worker. En un miss se consulta al worker; si esa consulta falla y hay
/// un valor previo, se devuelve ese valor con `stale = true` en vez de
/// errar. Sin valor previo, la falla se propaga.
pub async fn get_status(
    state: &AppState,
    local_job_id: &str,
    force_refresh: bool,
) -> Result<ProgressReport, ProxyError> {
    let Some(assignment) = state.assignments.get(local_job_id) else {
        return Err(ProxyError::JobNotFound(local_job_id.to_string()));
    };

    // estado terminal ya conocido (job terminado, worker caído): se sirve
    // una única vez y el assignment se da de baja
    if let Some(cached) = assignment.cached_status.clone() {
        if cached.state.is_terminal() {
            return Ok(finish_assignment(state, &assignment, cached));
        }
    }

    if !force_refresh {
        if let (Some(cached), Some(fetched_at)) =
            (&assignment.cached_status, assignment.cache_fetched_at)
        {
            if fetched_at.elapsed() < state.config.status_cache_ttl {
                return Ok(report(&assignment, cached.clone(), false));
            }
        }
    }

    let url = format!(
        "{}/api/v1/jobs/{}",
        assignment.endpoint.trim_end_matches('/'),
        assignment.remote_job_id
    );
    match fetch_remote_status(&state.http, &url, state.config.status_timeout).await {
        Ok(status) if status.state.is_terminal() => {
            info!(
                "job {} llegó a {:?} en el worker {}",
                local_job_id, status.state, assignment.worker_id
            );
            Ok(finish_assignment(state, &assignment, status))
        }
        Ok(status) => {
            state.assignments.update_cache(local_job_id, status.clone());
            Ok(report(&assignment, status, false))
        }
        Err(reason) => match assignment.cached_status.clone() {
            Some(previous) => {
                warn!(
                    "refresh de estado falló para el job {} ({}), sirviendo último valor conocido",
                    local_job_id, reason
                );
                Ok(report(&assignment, previous, true))
            }
            None => Err(ProxyError::WorkerUnreachable {
                local_job_id: local_job_id.to_string(),
                reason,
            }),
        },
    }
}

/// Baja de un assignment que llegó a estado terminal: libera el worker
/// (si sigue BUSY con este mismo job) y saca la entrada de la tabla.
fn finish_assignment(
    state: &AppState,
    assignment: &JobAssignment,
    status: RemoteJobStatus,
) -> ProgressReport {
    state
        .registry
        .release(&assignment.worker_id, &assignment.local_job_id);
    state.assignments.remove(&assignment.local_job_id);
    report(assignment, status, false)
}

fn report(assignment: &JobAssignment, status: RemoteJobStatus, stale: bool) -> ProgressReport {
    ProgressReport {
        local_job_id: assignment.local_job_id.clone(),
        worker_id: assignment.worker_id.clone(),
        status,
        stale,
    }
}

async fn fetch_remote_status(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<RemoteJobStatus, String> {
    match http.get(url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => resp
            .json::<RemoteJobStatus>()
            .await
            .map_err(|e| format!("respuesta inválida: {}", e)),
        Ok(resp) => Err(format!("status {}", resp.status())),
        Err(e) => Err(e.to_string()),
    }
}
