use std::sync::Arc;

use flowd_engine::EngineConfig;
use flowd_worker::{handlers, FileResolver, WorkerRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowd=debug,flowd_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    let workflow_dir =
        std::env::var("WORKFLOW_DIR").unwrap_or_else(|_| "./workflows".to_string());
    let resolver = Arc::new(FileResolver::new(workflow_dir));

    let runtime =
        match WorkerRuntime::build(config, resolver, handlers::builtin_registry()).await {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(error = %err, "engine failed to start");
                std::process::exit(1);
            }
        };
    tracing::info!(worker = %runtime.worker.name, "flowd worker ready");

    tokio::signal::ctrl_c().await.ok();
    runtime.shutdown().await;
}
