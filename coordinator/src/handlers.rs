use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    DispatchResponse, ErrorBody, FleetSummary, JobSpec, ProgressReport, WorkerDetail,
    WorkerRegisterRequest, WorkerRegisterResponse, WorkerStatus,
};
use serde::Deserialize;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;

use crate::dispatcher;
use crate::error::{DispatchError, ProxyError};
use crate::proxy;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/jobs", post(dispatch_job))
        .route("/api/v1/jobs/:id", get(get_job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Alta (idempotente) de un worker que se auto-registra
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let record = state.registry.register(req);
    Json(WorkerRegisterResponse {
        worker_id: record.worker_id,
        status: record.status,
    })
}

// Listado de flota para observabilidad: conteos por estado + detalle
async fn list_workers(State(state): State<AppState>) -> Json<FleetSummary> {
    let now = SystemTime::now();
    let snapshot = state.registry.snapshot();

    let mut available = 0;
    let mut busy = 0;
    let mut unavailable = 0;
    let mut workers = Vec::with_capacity(snapshot.len());

    for rec in snapshot {
        match rec.status {
            WorkerStatus::Available => available += 1,
            WorkerStatus::Busy => busy += 1,
            WorkerStatus::Unavailable => unavailable += 1,
        }

        let age_secs = now
            .duration_since(rec.last_healthy_at)
            .unwrap_or_default()
            .as_secs();

        workers.push(WorkerDetail {
            worker_id: rec.worker_id,
            worker_class: rec.worker_class,
            endpoint: rec.endpoint,
            status: rec.status,
            capabilities: rec.capabilities,
            current_job_id: rec.current_job_id,
            consecutive_health_failures: rec.consecutive_health_failures,
            last_healthy_secs_ago: age_secs,
        });
    }

    Json(FleetSummary {
        total: workers.len(),
        available,
        busy,
        unavailable,
        workers,
    })
}

// Despacha un job a un worker de la flota
async fn dispatch_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<Json<DispatchResponse>, (StatusCode, Json<ErrorBody>)> {
    match dispatcher::dispatch(&state, spec).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            let attempted = match &e {
                DispatchError::DispatchExhausted { attempted, .. } => Some(*attempted),
                DispatchError::NoWorkersAvailable { .. } => None,
            };
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: e.to_string(),
                    attempted_workers: attempted,
                }),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    refresh: bool,
}

// Estado de un job, servido desde el cache del proxy de progreso
async fn get_job_status(
    State(state): State<AppState>,
    Path(local_job_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ProgressReport>, (StatusCode, Json<ErrorBody>)> {
    match proxy::get_status(&state, &local_job_id, query.refresh).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            let code = match &e {
                ProxyError::JobNotFound(_) => StatusCode::NOT_FOUND,
                ProxyError::WorkerUnreachable { .. } => StatusCode::BAD_GATEWAY,
            };
            Err((
                code,
                Json(ErrorBody {
                    error: e.to_string(),
                    attempted_workers: None,
                }),
            ))
        }
    }
}
