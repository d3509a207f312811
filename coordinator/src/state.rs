use crate::config::Config;
use crate::proxy::AssignmentTable;
use crate::registry::WorkerRegistry;

/// Estado compartido del coordinador. Se construye una vez en el arranque
/// y se clona (handles baratos) hacia los handlers HTTP y el monitor;
/// no hay estado global ambiente.
#[derive(Clone)]
pub struct AppState {
    pub registry: WorkerRegistry,
    pub assignments: AssignmentTable,
    pub http: reqwest::Client,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            assignments: AssignmentTable::new(),
            http: reqwest::Client::new(),
            config,
        }
    }
}
