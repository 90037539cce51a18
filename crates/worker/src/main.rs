use std::sync::Arc;

use anyhow::Context;
use provisioner_clients::{build_collaborators, ClientsConfig};
use provisioner_db::DEFAULT_MAX_CONNECTIONS;
use provisioner_pipeline::config::{env_or, env_required, PipelineConfig};
use provisioner_pipeline::orchestrator::Orchestrator;
use provisioner_pipeline::runners::standard_registry;
use provisioner_pipeline::store::PgJobStore;
use provisioner_worker::{ProvisioningWorker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let database_url = env_required("DATABASE_URL")?;
    let max_connections = env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
    let pool = provisioner_db::create_pool(&database_url, max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    provisioner_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let pipeline_config = PipelineConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;
    let clients_config = ClientsConfig::from_env()?;

    let collaborators =
        build_collaborators(pool.clone(), &clients_config, pipeline_config.call_timeout)
            .context("Failed to build external clients")?;
    let registry = standard_registry(&collaborators, &pipeline_config)?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(PgJobStore::new(pool)),
        registry,
        pipeline_config,
    ));
    let worker = ProvisioningWorker::new(orchestrator);

    if worker_config.run_once {
        let summary = worker.run(worker_config.run_options()).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        let options = worker_config.run_options();
        let poll_interval = worker_config.poll_interval;
        async move { worker.run_loop(options, poll_interval, cancel).await }
    });

    shutdown_signal().await;
    cancel.cancel();
    handle.await.context("Worker loop panicked")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "provisioner_worker=info,provisioner_pipeline=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
