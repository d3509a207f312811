use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub type WorkerId = String;

/* --------- Clases y capacidades de workers --------- */

/// Clase de worker usada para enrutar jobs.
/// Una clase desconocida se registra igual; simplemente nunca
/// matchea ningún filtro del selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerClass {
    GpuCapable,
    CpuOnly,
    Generic,
}

impl FromStr for WorkerClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GPU_CAPABLE" => Ok(WorkerClass::GpuCapable),
            "CPU_ONLY" => Ok(WorkerClass::CpuOnly),
            "GENERIC" => Ok(WorkerClass::Generic),
            other => Err(format!("clase de worker desconocida: {}", other)),
        }
    }
}

/// Capacidades declaradas por un worker al registrarse.
/// Campos tipados para las dimensiones conocidas; `extra` queda como
/// mapa string→string para atributos que el coordinador no interpreta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Filtros de capacidades que un job puede exigir.
/// `gpu` y las entradas de `extra` matchean por igualdad;
/// `min_cores` exige un mínimo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityRequirements {
    #[serde(default)]
    pub gpu: Option<bool>,
    #[serde(default)]
    pub min_cores: Option<u32>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Capabilities {
    pub fn satisfies(&self, req: &CapabilityRequirements) -> bool {
        if let Some(gpu) = req.gpu {
            if self.gpu != gpu {
                return false;
            }
        }
        if let Some(min_cores) = req.min_cores {
            if self.cores < min_cores {
                return false;
            }
        }
        for (key, value) in &req.extra {
            if self.extra.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

/* --------- Estado de un worker en el registro --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Available,
    Busy,
    Unavailable,
}

/* --------- Registro de workers (worker -> coordinador) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub worker_id: WorkerId,
    pub worker_class: WorkerClass,
    /// URL base del worker, ej: "http://worker-1:8081"
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
}

/* --------- Sonda de salud (coordinador -> worker) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub busy: bool,
    #[serde(default)]
    pub current_job_id: Option<String>,
}

/* --------- Listado de flota (superficie de observabilidad) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDetail {
    pub worker_id: WorkerId,
    pub worker_class: WorkerClass,
    pub endpoint: String,
    pub status: WorkerStatus,
    pub capabilities: Capabilities,
    pub current_job_id: Option<String>,
    pub consecutive_health_failures: u32,
    pub last_healthy_secs_ago: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub unavailable: usize,
    pub workers: Vec<WorkerDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_match_by_field() {
        let caps = Capabilities {
            gpu: true,
            cores: 8,
            extra: HashMap::from([("zona".to_string(), "us-east".to_string())]),
        };

        // sin requisitos, todo worker califica
        assert!(caps.satisfies(&CapabilityRequirements::default()));

        let req = CapabilityRequirements {
            gpu: Some(true),
            min_cores: Some(4),
            extra: HashMap::from([("zona".to_string(), "us-east".to_string())]),
        };
        assert!(caps.satisfies(&req));

        // min_cores exige mínimo, no igualdad
        let req = CapabilityRequirements {
            min_cores: Some(16),
            ..Default::default()
        };
        assert!(!caps.satisfies(&req));

        // una clave extra que el worker no tiene falla el match
        let req = CapabilityRequirements {
            extra: HashMap::from([("rack".to_string(), "r7".to_string())]),
            ..Default::default()
        };
        assert!(!caps.satisfies(&req));

        let req = CapabilityRequirements {
            gpu: Some(false),
            ..Default::default()
        };
        assert!(!caps.satisfies(&req));
    }

    #[test]
    fn worker_class_from_wire_names() {
        assert_eq!("GPU_CAPABLE".parse::<WorkerClass>(), Ok(WorkerClass::GpuCapable));
        assert_eq!("GENERIC".parse::<WorkerClass>(), Ok(WorkerClass::Generic));
        assert!("TPU_POD".parse::<WorkerClass>().is_err());
    }
}
