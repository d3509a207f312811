#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    Capabilities, CapabilityRequirements, HealthResponse, JobSpec, JobState, RemoteJobStatus,
    StartJobRequest, StartJobResponse, WorkerClass, WorkerRegisterRequest,
};
use coordinator::config::Config;
use coordinator::state::AppState;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::net::TcpListener;

/// Config con timeouts cortos para que los tests no esperen de más.
pub fn test_config() -> Config {
    Config {
        status_cache_ttl: Duration::from_millis(300),
        probe_timeout: Duration::from_secs(2),
        dispatch_timeout: Duration::from_secs(2),
        status_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

pub fn register_worker(state: &AppState, worker_id: &str, class: WorkerClass, endpoint: &str) {
    state.registry.register(WorkerRegisterRequest {
        worker_id: worker_id.to_string(),
        worker_class: class,
        endpoint: endpoint.to_string(),
        capabilities: Capabilities::default(),
    });
}

pub fn job_spec(class: WorkerClass) -> JobSpec {
    JobSpec {
        job_type: "backtest".to_string(),
        preferred_class: class,
        class_mandatory: false,
        fallback_class: None,
        requirements: CapabilityRequirements::default(),
        payload: serde_json::json!({ "estrategia": "mean-reversion" }),
    }
}

/// Endpoint que no responde: puerto efímero reservado y soltado.
pub fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/* ---------------- worker falso en proceso ---------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// acepta el arranque y sirve estados RUNNING
    Accept,
    /// rechaza todo arranque con 503 (su señal de exclusividad)
    AlwaysBusy,
    /// falla todo arranque con 500
    Failing,
}

#[derive(Clone)]
struct FakeWorkerState {
    mode: FakeMode,
    start_calls: Arc<AtomicUsize>,
    status_calls: Arc<AtomicUsize>,
    health_busy: Arc<Mutex<bool>>,
    jobs: Arc<Mutex<HashMap<String, JobState>>>,
}

/// Worker falso servido con axum en 127.0.0.1:0; cuenta las llamadas
/// que recibe para poder afirmar sobre el comportamiento del cache y
/// de los reintentos.
pub struct FakeWorker {
    pub endpoint: String,
    pub start_calls: Arc<AtomicUsize>,
    pub status_calls: Arc<AtomicUsize>,
    pub health_busy: Arc<Mutex<bool>>,
    jobs: Arc<Mutex<HashMap<String, JobState>>>,
    shutdown: Arc<tokio::sync::Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeWorker {
    pub async fn spawn(mode: FakeMode) -> FakeWorker {
        let state = FakeWorkerState {
            mode,
            start_calls: Arc::new(AtomicUsize::new(0)),
            status_calls: Arc::new(AtomicUsize::new(0)),
            health_busy: Arc::new(Mutex::new(false)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        };

        let app = Router::new()
            .route("/health", get(fake_health))
            .route("/api/v1/jobs", post(fake_start_job))
            .route("/api/v1/jobs/:id", get(fake_job_status))
            // `Connection: close` evita que reqwest reuse una conexión
            // keep-alive contra este worker: sin esto, la conexión del pool
            // sobrevive al shutdown del accept-loop y el worker seguiría
            // respondiendo después de kill().
            .layer(axum::middleware::map_response(close_connection))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = Arc::new(tokio::sync::Notify::new());
        let shutdown_srv = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_srv.notified().await;
                })
                .await
                .unwrap();
        });

        FakeWorker {
            endpoint,
            start_calls: state.start_calls,
            status_calls: state.status_calls,
            health_busy: state.health_busy,
            jobs: state.jobs,
            shutdown,
            handle,
        }
    }

    /// Marca todos los jobs aceptados como COMPLETED.
    pub fn complete_all(&self) {
        for state in self.jobs.lock().unwrap().values_mut() {
            *state = JobState::Completed;
        }
    }

    pub fn set_busy_flag(&self, busy: bool) {
        *self.health_busy.lock().unwrap() = busy;
    }

    /// Tira el server abajo: las conexiones siguientes fallan.
    pub fn kill(&self) {
        // shutdown ordenado primero (cierra el accept-loop y las conexiones
        // keep-alive ociosas), y abort como red de seguridad.
        self.shutdown.notify_one();
        self.handle.abort();
    }
}

/// Añade `Connection: close` a toda respuesta del worker falso.
async fn close_connection(mut res: axum::response::Response) -> axum::response::Response {
    res.headers_mut().insert(
        axum::http::header::CONNECTION,
        axum::http::HeaderValue::from_static("close"),
    );
    res
}

async fn fake_health(State(state): State<FakeWorkerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        busy: *state.health_busy.lock().unwrap(),
        current_job_id: None,
    })
}

async fn fake_start_job(
    State(state): State<FakeWorkerState>,
    Json(_req): Json<StartJobRequest>,
) -> Result<Json<StartJobResponse>, StatusCode> {
    state.start_calls.fetch_add(1, Ordering::SeqCst);
    match state.mode {
        FakeMode::AlwaysBusy => Err(StatusCode::SERVICE_UNAVAILABLE),
        FakeMode::Failing => Err(StatusCode::INTERNAL_SERVER_ERROR),
        FakeMode::Accept => {
            let remote_job_id = uuid::Uuid::new_v4().to_string();
            state
                .jobs
                .lock()
                .unwrap()
                .insert(remote_job_id.clone(), JobState::Running);
            Ok(Json(StartJobResponse { remote_job_id }))
        }
    }
}

async fn fake_job_status(
    State(state): State<FakeWorkerState>,
    Path(remote_job_id): Path<String>,
) -> Result<Json<RemoteJobStatus>, StatusCode> {
    state.status_calls.fetch_add(1, Ordering::SeqCst);
    match state.jobs.lock().unwrap().get(&remote_job_id) {
        Some(job_state) => Ok(Json(RemoteJobStatus {
            remote_job_id,
            state: *job_state,
            progress: Some(if job_state.is_terminal() { 1.0 } else { 0.5 }),
            detail: None,
            updated_at: Utc::now(),
        })),
        None => Err(StatusCode::NOT_FOUND),
    }
}
