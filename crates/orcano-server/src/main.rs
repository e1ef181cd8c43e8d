use anyhow::Context;
use clap::Parser;
use orcano_core::storage::FileStore;
use orcano_server::server::{
    backend::EmulatorLauncher,
    config::{CliArgs, FrontendConfig},
    frontend::serve,
    pool::{WorkerContext, WorkerPool},
    ports::PortAllocator,
    queue::AdmissionQueue,
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = FrontendConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let store = FileStore::open(&config.storage_dir)
        .await
        .with_context(|| format!("failed to open storage at {}", config.storage_dir.display()))?;

    let (queue, source) = AdmissionQueue::new(config.queue_capacity);
    let shutdown = CancellationToken::new();

    let ctx = WorkerContext {
        launcher: EmulatorLauncher::new(config.launch.clone()),
        ports: Arc::new(PortAllocator::new(config.pool.ports.clone())),
        store: Arc::new(store),
        queue: source,
        session: config.pool.session,
    };
    let (pool, supervisor) = WorkerPool::spawn(&config.pool, ctx, shutdown.clone());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let frontend = tokio::spawn(serve(listener, queue, config.client, shutdown.clone()));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating...");

    pool.shutdown();
    if let Err(e) = frontend.await {
        tracing::error!("Accept loop failed: {e}");
    }
    if let Err(e) = supervisor.await {
        tracing::error!("Worker pool supervisor failed: {e}");
    }

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &FrontendConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting frontend on {} with full config: {:#?}",
            config.listen_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting frontend on {} with {} workers",
            config.listen_addr,
            config.pool.num_workers
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
