use std::env;
use std::time::Duration;

/* --------- Defaults compilados --------- */

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_REMOVAL_THRESHOLD_SECS: u64 = 300;
pub const DEFAULT_STATUS_CACHE_TTL_MS: u64 = 1000;
pub const DEFAULT_DISPATCH_RETRY_BUDGET: usize = 3;
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STATUS_TIMEOUT_SECS: u64 = 5;

/// Configuración del coordinador.
/// Todo tiene default razonable y se puede pisar por variable de entorno
/// (COORDINATOR_ADDR, PROBE_INTERVAL_SECS, etc.), igual que en el worker.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,

    /// Cadencia del loop de sondas de salud
    pub probe_interval: Duration,
    /// Timeout de cada GET /health contra un worker
    pub probe_timeout: Duration,
    /// Fallos consecutivos antes de marcar UNAVAILABLE
    pub health_failure_threshold: u32,
    /// Tiempo sin sonda exitosa tras el cual un UNAVAILABLE se borra
    pub removal_threshold: Duration,

    /// TTL del cache de estado de jobs en el proxy
    pub status_cache_ttl: Duration,
    /// Workers distintos a intentar por dispatch
    pub dispatch_retry_budget: usize,
    pub dispatch_timeout: Duration,
    pub status_timeout: Duration,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("COORDINATOR_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            probe_interval: Duration::from_secs(env_u64(
                "PROBE_INTERVAL_SECS",
                DEFAULT_PROBE_INTERVAL_SECS,
            )),
            probe_timeout: Duration::from_secs(env_u64(
                "PROBE_TIMEOUT_SECS",
                DEFAULT_PROBE_TIMEOUT_SECS,
            )),
            health_failure_threshold: env_u64(
                "HEALTH_FAILURE_THRESHOLD",
                DEFAULT_HEALTH_FAILURE_THRESHOLD as u64,
            ) as u32,
            removal_threshold: Duration::from_secs(env_u64(
                "REMOVAL_THRESHOLD_SECS",
                DEFAULT_REMOVAL_THRESHOLD_SECS,
            )),
            status_cache_ttl: Duration::from_millis(env_u64(
                "STATUS_CACHE_TTL_MS",
                DEFAULT_STATUS_CACHE_TTL_MS,
            )),
            dispatch_retry_budget: env_u64(
                "DISPATCH_RETRY_BUDGET",
                DEFAULT_DISPATCH_RETRY_BUDGET as u64,
            ) as usize,
            dispatch_timeout: Duration::from_secs(env_u64(
                "DISPATCH_TIMEOUT_SECS",
                DEFAULT_DISPATCH_TIMEOUT_SECS,
            )),
            status_timeout: Duration::from_secs(env_u64(
                "STATUS_TIMEOUT_SECS",
                DEFAULT_STATUS_TIMEOUT_SECS,
            )),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            health_failure_threshold: DEFAULT_HEALTH_FAILURE_THRESHOLD,
            removal_threshold: Duration::from_secs(DEFAULT_REMOVAL_THRESHOLD_SECS),
            status_cache_ttl: Duration::from_millis(DEFAULT_STATUS_CACHE_TTL_MS),
            dispatch_retry_budget: DEFAULT_DISPATCH_RETRY_BUDGET,
            dispatch_timeout: Duration::from_secs(DEFAULT_DISPATCH_TIMEOUT_SECS),
            status_timeout: Duration::from_secs(DEFAULT_STATUS_TIMEOUT_SECS),
        }
    }
}
