use common::{CapabilityRequirements, JobSpec, WorkerClass, WorkerId, WorkerStatus};
use std::collections::HashSet;

use crate::registry::{WorkerRecord, WorkerRegistry};

/// Resultado de una selección. Distinguir "nadie matchea" de "matchean
/// pero ninguno está libre" es lo que permite separar NoWorkersAvailable
/// de DispatchExhausted en el dispatcher.
#[derive(Debug)]
pub enum SelectOutcome {
    Selected(WorkerRecord),
    /// hay workers de esa clase/capacidades, pero ninguno AVAILABLE
    NoneAvailable { matching: usize },
    /// ningún worker registrado matchea clase/capacidades
    NoneMatching,
}

/// Elige un candidato dentro de una clase: AVAILABLE, capacidades
/// satisfechas, y desempate por menos-recientemente-seleccionado para
/// aproximar round-robin sin contador persistente.
///
/// Seleccionar sella `last_selected_at` pero NO marca BUSY: eso lo hace
/// el dispatcher recién cuando el worker acepta el job.
pub fn select(
    registry: &WorkerRegistry,
    class: WorkerClass,
    requirements: &CapabilityRequirements,
    excluded: &HashSet<WorkerId>,
) -> SelectOutcome {
    let snapshot = registry.snapshot();

    let matching: Vec<&WorkerRecord> = snapshot
        .iter()
        .filter(|w| w.worker_class == class && w.capabilities.satisfies(requirements))
        .collect();

    if matching.is_empty() {
        return SelectOutcome::NoneMatching;
    }

    let chosen = matching
        .iter()
        .filter(|w| w.status == WorkerStatus::Available && !excluded.contains(&w.worker_id))
        .min_by_key(|w| w.last_selected_at);

    match chosen {
        Some(worker) => {
            registry.touch_selected(&worker.worker_id);
            SelectOutcome::Selected((*worker).clone())
        }
        None => SelectOutcome::NoneAvailable {
            matching: matching.len(),
        },
    }
}

/// Política de clase con prioridad: primero la clase preferida; si no hay
/// candidatos y la preferencia no es obligatoria, se reintenta con la
/// clase alternativa. Obligatoria y vacía = falla.
pub fn select_with_policy(
    registry: &WorkerRegistry,
    spec: &JobSpec,
    excluded: &HashSet<WorkerId>,
) -> SelectOutcome {
    let preferred = select(registry, spec.preferred_class, &spec.requirements, excluded);
    if let SelectOutcome::Selected(_) = preferred {
        return preferred;
    }
    if spec.class_mandatory {
        return preferred;
    }
    let Some(fallback_class) = spec.fallback_class else {
        return preferred;
    };

    let fallback = select(registry, fallback_class, &spec.requirements, excluded);
    if let SelectOutcome::Selected(_) = fallback {
        return fallback;
    }

    // ninguna de las dos clases dio candidato: combinamos para que el
    // dispatcher sepa si existía al menos un worker que matcheara
    match (preferred, fallback) {
        (SelectOutcome::NoneMatching, SelectOutcome::NoneMatching) => SelectOutcome::NoneMatching,
        (
            SelectOutcome::NoneAvailable { matching: a },
            SelectOutcome::NoneAvailable { matching: b },
        ) => SelectOutcome::NoneAvailable { matching: a + b },
        (SelectOutcome::NoneAvailable { matching }, _)
        | (_, SelectOutcome::NoneAvailable { matching }) => {
            SelectOutcome::NoneAvailable { matching }
        }
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Capabilities, WorkerRegisterRequest};
    use std::collections::HashMap;

    fn register(registry: &WorkerRegistry, id: &str, class: WorkerClass, caps: Capabilities) {
        registry.register(WorkerRegisterRequest {
            worker_id: id.to_string(),
            worker_class: class,
            endpoint: format!("http://{}:8081", id),
            capabilities: caps,
        });
    }

    fn gpu_caps() -> Capabilities {
        Capabilities {
            gpu: true,
            cores: 8,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn select_on_empty_registry_matches_nothing() {
        let registry = WorkerRegistry::new();
        let outcome = select(
            &registry,
            WorkerClass::Generic,
            &CapabilityRequirements::default(),
            &HashSet::new(),
        );
        assert!(matches!(outcome, SelectOutcome::NoneMatching));
    }

    #[test]
    fn select_never_returns_busy_or_capability_mismatch() {
        let registry = WorkerRegistry::new();
        register(&registry, "ocupado", WorkerClass::GpuCapable, gpu_caps());
        register(&registry, "sin-gpu", WorkerClass::GpuCapable, Capabilities::default());
        register(&registry, "libre", WorkerClass::GpuCapable, gpu_caps());
        registry.mark_busy("ocupado", "job-1");

        let reqs = CapabilityRequirements {
            gpu: Some(true),
            ..Default::default()
        };

        for _ in 0..5 {
            match select(&registry, WorkerClass::GpuCapable, &reqs, &HashSet::new()) {
                SelectOutcome::Selected(w) => assert_eq!(w.worker_id, "libre"),
                other => panic!("esperaba Selected, salió {:?}", other),
            }
        }
    }

    #[test]
    fn repeated_selection_alternates_between_peers() {
        let registry = WorkerRegistry::new();
        register(&registry, "w1", WorkerClass::Generic, Capabilities::default());
        register(&registry, "w2", WorkerClass::Generic, Capabilities::default());

        let reqs = CapabilityRequirements::default();
        let mut picks = Vec::new();
        for _ in 0..4 {
            match select(&registry, WorkerClass::Generic, &reqs, &HashSet::new()) {
                SelectOutcome::Selected(w) => picks.push(w.worker_id),
                other => panic!("esperaba Selected, salió {:?}", other),
            }
        }

        // round-robin aproximado: nunca el mismo dos veces seguidas
        assert_ne!(picks[0], picks[1]);
        assert_eq!(picks[0], picks[2]);
        assert_eq!(picks[1], picks[3]);
    }

    #[test]
    fn busy_fleet_reports_none_available_not_none_matching() {
        let registry = WorkerRegistry::new();
        register(&registry, "w1", WorkerClass::Generic, Capabilities::default());
        registry.mark_busy("w1", "job-1");

        let outcome = select(
            &registry,
            WorkerClass::Generic,
            &CapabilityRequirements::default(),
            &HashSet::new(),
        );
        assert!(matches!(outcome, SelectOutcome::NoneAvailable { matching: 1 }));
    }

    #[test]
    fn excluded_workers_are_skipped() {
        let registry = WorkerRegistry::new();
        register(&registry, "w1", WorkerClass::Generic, Capabilities::default());

        let excluded = HashSet::from(["w1".to_string()]);
        let outcome = select(
            &registry,
            WorkerClass::Generic,
            &CapabilityRequirements::default(),
            &excluded,
        );
        assert!(matches!(outcome, SelectOutcome::NoneAvailable { .. }));
    }

    fn spec(mandatory: bool, fallback: Option<WorkerClass>) -> JobSpec {
        JobSpec {
            job_type: "training".to_string(),
            preferred_class: WorkerClass::GpuCapable,
            class_mandatory: mandatory,
            fallback_class: fallback,
            requirements: CapabilityRequirements::default(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn policy_falls_back_when_preferred_class_is_empty() {
        let registry = WorkerRegistry::new();
        register(&registry, "cpu-1", WorkerClass::CpuOnly, Capabilities::default());

        let outcome = select_with_policy(
            &registry,
            &spec(false, Some(WorkerClass::CpuOnly)),
            &HashSet::new(),
        );
        match outcome {
            SelectOutcome::Selected(w) => assert_eq!(w.worker_id, "cpu-1"),
            other => panic!("esperaba fallback a CPU_ONLY, salió {:?}", other),
        }
    }

    #[test]
    fn mandatory_class_never_falls_back() {
        let registry = WorkerRegistry::new();
        register(&registry, "cpu-1", WorkerClass::CpuOnly, Capabilities::default());

        let outcome = select_with_policy(
            &registry,
            &spec(true, Some(WorkerClass::CpuOnly)),
            &HashSet::new(),
        );
        assert!(matches!(outcome, SelectOutcome::NoneMatching));
    }

    #[test]
    fn policy_combines_outcomes_of_both_classes() {
        let registry = WorkerRegistry::new();
        register(&registry, "cpu-1", WorkerClass::CpuOnly, Capabilities::default());
        registry.mark_busy("cpu-1", "job-1");

        // preferida vacía + alternativa ocupada => NoneAvailable, no NoneMatching
        let outcome = select_with_policy(
            &registry,
            &spec(false, Some(WorkerClass::CpuOnly)),
            &HashSet::new(),
        );
        assert!(matches!(outcome, SelectOutcome::NoneAvailable { matching: 1 }));
    }
}
