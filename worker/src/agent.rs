use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    Capabilities, HealthResponse, JobState, RemoteJobStatus, StartJobRequest, StartJobResponse,
    WorkerClass, WorkerRegisterRequest, WorkerRegisterResponse,
};
use std::{
    collections::HashMap,
    env,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use sysinfo::{System, SystemExt};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{info, warn};

const DEFAULT_SIM_JOB_SECS: u64 = 30;

/// Job simulado: avanza linealmente hasta completarse en `duration`.
/// El trabajo real (training, backtesting) vive en otro servicio; este
/// agente solo implementa el contrato de arranque/estado/exclusividad.
struct ActiveJob {
    remote_job_id: String,
    local_job_id: String,
    job_type: String,
    started_at: Instant,
    duration: Duration,
}

#[derive(Clone)]
struct AgentState {
    /// job en curso; None = libre. La exclusividad (un job por vez) se
    /// decide acá, del lado del worker.
    current: Arc<Mutex<Option<ActiveJob>>>,
    /// jobs ya terminados, para seguir sirviendo el GET de estado
    finished: Arc<Mutex<HashMap<String, RemoteJobStatus>>>,
    sim_job_duration: Duration,
}

impl AgentState {
    /// Si el job en curso ya cumplió su duración simulada, lo pasa a
    /// COMPLETED. Se llama perezosamente desde cada handler; no hace
    /// falta un timer propio.
    fn roll(&self) {
        let mut current = self.current.lock().unwrap();
        let done = current
            .as_ref()
            .map(|job| job.started_at.elapsed() >= job.duration)
            .unwrap_or(false);
        if !done {
            return;
        }

        let job = current.take().unwrap();
        info!(
            "job remoto {} (local {}) completado",
            job.remote_job_id, job.local_job_id
        );
        self.finished.lock().unwrap().insert(
            job.remote_job_id.clone(),
            RemoteJobStatus {
                remote_job_id: job.remote_job_id,
                state: JobState::Completed,
                progress: Some(1.0),
                detail: Some(job.job_type),
                updated_at: Utc::now(),
            },
        );
    }
}

/* ---------------- handlers HTTP ---------------- */

async fn health(State(state): State<AgentState>) -> Json<HealthResponse> {
    state.roll();
    let current = state.current.lock().unwrap();
    Json(HealthResponse {
        ok: true,
        busy: current.is_some(),
        current_job_id: current.as_ref().map(|j| j.remote_job_id.clone()),
    })
}

// Arranque de job. 503 es la señal reservada de "worker ocupado".
async fn start_job(
    State(state): State<AgentState>,
    Json(req): Json<StartJobRequest>,
) -> Result<Json<StartJobResponse>, StatusCode> {
    state.roll();
    let mut current = state.current.lock().unwrap();
    if current.is_some() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let remote_job_id = uuid::Uuid::new_v4().to_string();
    info!(
        "job {} aceptado (local {}, tipo {})",
        remote_job_id, req.local_job_id, req.job_type
    );
    *current = Some(ActiveJob {
        remote_job_id: remote_job_id.clone(),
        local_job_id: req.local_job_id,
        job_type: req.job_type,
        started_at: Instant::now(),
        duration: state.sim_job_duration,
    });

    Ok(Json(StartJobResponse { remote_job_id }))
}

async fn job_status(
    State(state): State<AgentState>,
    Path(remote_job_id): Path<String>,
) -> Result<Json<RemoteJobStatus>, StatusCode> {
    state.roll();

    {
        let current = state.current.lock().unwrap();
        if let Some(job) = current.as_ref() {
            if job.remote_job_id == remote_job_id {
                let progress = (job.started_at.elapsed().as_secs_f32()
                    / job.duration.as_secs_f32())
                .min(0.99);
                return Ok(Json(RemoteJobStatus {
                    remote_job_id,
                    state: JobState::Running,
                    progress: Some(progress),
                    detail: Some(job.job_type.clone()),
                    updated_at: Utc::now(),
                }));
            }
        }
    }

    match state.finished.lock().unwrap().get(&remote_job_id) {
        Some(status) => Ok(Json(status.clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/* ---------------- arranque del agente ---------------- */

/// Loop principal del worker:
/// - levanta el server HTTP (health + arranque/estado de jobs)
/// - se registra contra el coordinador (con reintentos por si el
///   coordinador todavía no está arriba)
pub async fn run() -> Result<()> {
    let coordinator_url =
        env::var("COORDINATOR_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let listen_addr =
        env::var("WORKER_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let worker_id = env::var("WORKER_ID")
        .unwrap_or_else(|_| format!("{}-{}", hostname, &uuid::Uuid::new_v4().to_string()[..8]));
    let worker_class: WorkerClass = env::var("WORKER_CLASS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(WorkerClass::Generic);
    let advertise_addr = env::var("WORKER_ADVERTISE_ADDR")
        .unwrap_or_else(|_| format!("http://{}:8081", hostname));
    let sim_job_secs: u64 = env::var("SIM_JOB_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SIM_JOB_SECS);
    let gpu = env::var("WORKER_GPU")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    // Capacidades detectadas de la máquina (cores y memoria); la GPU se
    // declara por entorno
    let sys = System::new_all();
    let capabilities = Capabilities {
        gpu,
        cores: sys.cpus().len() as u32,
        extra: HashMap::from([(
            // total_memory devuelve KB -> lo pasamos a MB
            "mem_mb".to_string(),
            (sys.total_memory() / 1024).to_string(),
        )]),
    };

    let state = AgentState {
        current: Arc::new(Mutex::new(None)),
        finished: Arc::new(Mutex::new(HashMap::new())),
        sim_job_duration: Duration::from_secs(sim_job_secs),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(start_job))
        .route("/api/v1/jobs/:id", get(job_status))
        .with_state(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    info!(
        "worker {} ({:?}) escuchando en {}",
        worker_id,
        worker_class,
        listener.local_addr()?
    );

    let client = reqwest::Client::new();
    let register_req = WorkerRegisterRequest {
        worker_id: worker_id.clone(),
        worker_class,
        endpoint: advertise_addr,
        capabilities,
    };
    let register_url = format!(
        "{}/api/v1/workers/register",
        coordinator_url.trim_end_matches('/')
    );

    tokio::spawn(async move {
        loop {
            match client.post(&register_url).json(&register_req).send().await {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<WorkerRegisterResponse>().await {
                        Ok(body) => info!(
                            "worker {} registrado contra el coordinador (estado {:?})",
                            body.worker_id, body.status
                        ),
                        Err(e) => warn!("respuesta de registro inválida: {:?}", e),
                    }
                    break;
                }
                Ok(resp) => warn!(
                    "registro rechazado con status {}, reintentando en 2s",
                    resp.status()
                ),
                Err(e) => warn!(
                    "no pude registrarme contra {}: {:?}, reintentando en 2s",
                    register_url, e
                ),
            }
            sleep(Duration::from_secs(2)).await;
        }
    });

    axum::serve(listener, app).await?;
    Ok(())
}
