use common::{Capabilities, WorkerClass, WorkerId, WorkerRegisterRequest, WorkerStatus};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::{info, warn};

/// Una entrada por worker registrado.
///
/// `current_job_id` guarda el id LOCAL del job (el que emite el
/// coordinador); el id remoto vive en el assignment del proxy.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub worker_class: WorkerClass,
    pub endpoint: String,
    pub capabilities: Capabilities,
    pub status: WorkerStatus,
    pub current_job_id: Option<String>,
    pub consecutive_health_failures: u32,
    pub last_healthy_at: SystemTime,
    /// None = nunca seleccionado; ordena primero en el desempate LRU
    pub last_selected_at: Option<SystemTime>,
    /// Se incrementa en cada transición BUSY/release disparada por dispatch.
    /// Una sonda que arrancó antes de la transición trae una generación
    /// vieja y no puede pisar el flag BUSY con su resultado desactualizado.
    pub generation: u64,
}

/// Tabla de workers conocidos. Toda mutación pasa por estos métodos;
/// nadie más sostiene el lock ni copias mutables de los records.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<Mutex<HashMap<WorkerId, WorkerRecord>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Alta (o re-alta) de un worker. Idempotente: si el id ya existe se
    /// pisan endpoint y capacidades, y el estado vuelve a AVAILABLE —
    /// re-registrarse siempre significa "estoy vivo y libre", por encima
    /// de cualquier BUSY/UNAVAILABLE viejo.
    pub fn register(&self, req: WorkerRegisterRequest) -> WorkerRecord {
        let mut workers = self.inner.lock().unwrap();
        let now = SystemTime::now();

        // el sello LRU sobrevive al re-registro; el estado no
        let last_selected_at = workers
            .get(&req.worker_id)
            .and_then(|prev| prev.last_selected_at);
        let generation = workers
            .get(&req.worker_id)
            .map(|prev| prev.generation + 1)
            .unwrap_or(0);

        let known = workers.contains_key(&req.worker_id);
        let record = WorkerRecord {
            worker_id: req.worker_id.clone(),
            worker_class: req.worker_class,
            endpoint: req.endpoint,
            capabilities: req.capabilities,
            status: WorkerStatus::Available,
            current_job_id: None,
            consecutive_health_failures: 0,
            last_healthy_at: now,
            last_selected_at,
            generation,
        };
        workers.insert(req.worker_id.clone(), record.clone());

        if known {
            info!("worker {} re-registrado, vuelve a AVAILABLE", req.worker_id);
        } else {
            info!("worker registrado: {} ({:?})", req.worker_id, req.worker_class);
        }
        record
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.inner.lock().unwrap().get(worker_id).cloned()
    }

    /// Listado con filtros opcionales de clase y estado.
    pub fn list(
        &self,
        class: Option<WorkerClass>,
        status: Option<WorkerStatus>,
    ) -> Vec<WorkerRecord> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|w| class.map_or(true, |c| w.worker_class == c))
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Lo mínimo que necesita el monitor para sondear sin sostener el lock
    /// durante la llamada HTTP: (id, endpoint, generación vista).
    pub fn probe_targets(&self) -> Vec<(WorkerId, String, u64)> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .map(|w| (w.worker_id.clone(), w.endpoint.clone(), w.generation))
            .collect()
    }

    /// Aplica una sonda exitosa. El contador de fallos y `last_healthy_at`
    /// se actualizan siempre; el flag busy/idle reportado solo se aplica si
    /// la generación no cambió desde que la sonda arrancó.
    ///
    /// Devuelve el job local que quedó huérfano cuando un worker que
    /// figuraba BUSY reporta idle (el worker perdió el job).
    pub fn apply_probe_success(
        &self,
        worker_id: &str,
        seen_generation: u64,
        busy: bool,
    ) -> Option<String> {
        let mut workers = self.inner.lock().unwrap();
        let rec = workers.get_mut(worker_id)?;

        rec.consecutive_health_failures = 0;
        rec.last_healthy_at = SystemTime::now();

        if rec.generation != seen_generation {
            // hubo un dispatch/release en el medio; el flag que trae la
            // sonda es anterior a esa transición y no la puede revertir
            return None;
        }

        if rec.status == WorkerStatus::Unavailable {
            info!(
                "worker {} respondió de nuevo, vuelve como {}",
                worker_id,
                if busy { "BUSY" } else { "AVAILABLE" }
            );
        }

        if busy {
            rec.status = WorkerStatus::Busy;
            None
        } else {
            let lost = rec.current_job_id.take();
            if lost.is_some() {
                warn!(
                    "worker {} reporta idle pero figuraba BUSY con el job {:?}",
                    worker_id, lost
                );
            }
            rec.status = WorkerStatus::Available;
            lost
        }
    }

    /// Aplica una sonda fallida: incrementa el contador y, exactamente al
    /// llegar al umbral, pasa el worker a UNAVAILABLE. Por debajo del
    /// umbral el estado queda como estaba (un blip no quita capacidad).
    ///
    /// Devuelve (fallos acumulados, recién marcado UNAVAILABLE).
    pub fn apply_probe_failure(&self, worker_id: &str, threshold: u32) -> Option<(u32, bool)> {
        let mut workers = self.inner.lock().unwrap();
        let rec = workers.get_mut(worker_id)?;

        rec.consecutive_health_failures += 1;
        let flipped = rec.consecutive_health_failures >= threshold
            && rec.status != WorkerStatus::Unavailable;
        if flipped {
            rec.status = WorkerStatus::Unavailable;
            rec.current_job_id = None;
        }
        Some((rec.consecutive_health_failures, flipped))
    }

    /// Marca BUSY tras la aceptación explícita del worker. Nunca se marca
    /// en la selección: si el dispatch falla antes de que el worker acepte,
    /// no se pierde capacidad.
    pub fn mark_busy(&self, worker_id: &str, local_job_id: &str) -> bool {
        let mut workers = self.inner.lock().unwrap();
        match workers.get_mut(worker_id) {
            Some(rec) => {
                rec.status = WorkerStatus::Busy;
                rec.current_job_id = Some(local_job_id.to_string());
                rec.generation += 1;
                true
            }
            None => {
                warn!(
                    "mark_busy: el worker {} ya no está en el registro",
                    worker_id
                );
                false
            }
        }
    }

    /// Libera un worker cuando su job llegó a estado terminal. Solo aplica
    /// si el record sigue BUSY con ese mismo job: si el worker se
    /// re-registró y ya corre otra cosa, no hay nada que liberar.
    pub fn release(&self, worker_id: &str, local_job_id: &str) -> bool {
        let mut workers = self.inner.lock().unwrap();
        match workers.get_mut(worker_id) {
            Some(rec)
                if rec.status == WorkerStatus::Busy
                    && rec.current_job_id.as_deref() == Some(local_job_id) =>
            {
                rec.status = WorkerStatus::Available;
                rec.current_job_id = None;
                rec.generation += 1;
                info!("worker {} liberado, vuelve a AVAILABLE", worker_id);
                true
            }
            _ => false,
        }
    }

    /// Sella el momento de selección (desempate LRU). No toca el estado.
    pub fn touch_selected(&self, worker_id: &str) {
        let mut workers = self.inner.lock().unwrap();
        if let Some(rec) = workers.get_mut(worker_id) {
            rec.last_selected_at = Some(SystemTime::now());
        }
    }

    /// Pasada de limpieza: borra los UNAVAILABLE cuya última sonda exitosa
    /// quedó más atrás que el umbral de eliminación. Borrar es la acción
    /// terminal del ciclo de vida; no existe un estado REMOVED.
    pub fn remove_expired(&self, removal_threshold: Duration) -> Vec<WorkerId> {
        let now = SystemTime::now();
        let mut workers = self.inner.lock().unwrap();
        let mut evicted = Vec::new();

        workers.retain(|worker_id, rec| {
            if rec.status != WorkerStatus::Unavailable {
                return true;
            }
            match now.duration_since(rec.last_healthy_at) {
                Ok(elapsed) if elapsed > removal_threshold => {
                    warn!(
                        "worker {} eliminado del registro (sin sonda exitosa hace {:?})",
                        worker_id, elapsed
                    );
                    evicted.push(worker_id.clone());
                    false
                }
                // last_healthy_at en el futuro? raro, lo dejamos
                _ => true,
            }
        });

        evicted
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
