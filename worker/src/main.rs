use anyhow::Result;

mod agent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("worker=debug,axum=info,reqwest=info")
        .init();

    agent::run().await
}
