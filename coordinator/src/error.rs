use common::JobId;
use thiserror::Error;

/// Fallas de dispatch visibles para el caller. Las dos variantes se
/// distinguen a propósito: "flota vacía" y "flota saturada" necesitan
/// mensajes distintos para el operador.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no hay workers registrados que matcheen clase/capacidades para el job '{job_type}'")]
    NoWorkersAvailable { job_type: String },

    #[error("dispatch agotado para el job '{job_type}': {attempted} workers intentados, todos ocupados o fallando")]
    DispatchExhausted { job_type: String, attempted: usize },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("job {0} desconocido")]
    JobNotFound(JobId),

    #[error("worker inalcanzable consultando el job {local_job_id} y sin estado cacheado: {reason}")]
    WorkerUnreachable { local_job_id: JobId, reason: String },
}
