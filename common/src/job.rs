use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::{CapabilityRequirements, WorkerClass, WorkerId};

pub type JobId = String;

/* --------- Spec de job (caller -> coordinador) --------- */

/// Pedido de dispatch. El `payload` es opaco para el coordinador:
/// se reenvía tal cual al worker elegido.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Tipo de job, solo para logs y mensajes de error (ej: "training")
    pub job_type: String,

    /// Clase de worker preferida para este job
    pub preferred_class: WorkerClass,

    /// Si es true y no hay workers de la clase preferida, el dispatch
    /// falla en vez de caer a `fallback_class`
    #[serde(default)]
    pub class_mandatory: bool,

    /// Clase alternativa cuando la preferida no tiene candidatos
    #[serde(default)]
    pub fallback_class: Option<WorkerClass>,

    #[serde(default)]
    pub requirements: CapabilityRequirements,

    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub local_job_id: JobId,
    pub worker_id: WorkerId,
}

/* --------- Arranque de job (coordinador -> worker) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub local_job_id: JobId,
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub remote_job_id: JobId,
}

/* --------- Estado remoto de un job --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Lo que el worker reporta en GET de estado de job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub remote_job_id: JobId,
    pub state: JobState,
    /// Avance en [0.0, 1.0] si el worker lo conoce
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/* --------- Respuesta del proxy de progreso (coordinador -> caller) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub local_job_id: JobId,
    pub worker_id: WorkerId,
    pub status: RemoteJobStatus,
    /// true cuando el refresh contra el worker falló y esto es el
    /// último valor conocido, no datos frescos
    pub stale: bool,
}

/* --------- Cuerpo de error HTTP --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub attempted_workers: Option<usize>,
}
