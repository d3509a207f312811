use coordinator::config::Config;
use coordinator::handlers;
use coordinator::monitor;
use coordinator::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("coordinator=debug,axum=info")
        .init();

    let config = Config::from_env();
    info!("configuración efectiva: {:?}", config);

    let state = AppState::new(config.clone());

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de salud en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::run_health_monitor(monitor_state).await;
    });

    let listener = TcpListener::bind(&config.listen_addr).await.unwrap();
    info!("coordinador escuchando en {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
