use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use provisioner_api::config::ServerConfig;
use provisioner_api::router::build_app_router;
use provisioner_api::state::AppState;
use provisioner_clients::{build_collaborators, ClientsConfig};
use provisioner_db::DEFAULT_MAX_CONNECTIONS;
use provisioner_pipeline::config::{env_or, env_required, PipelineConfig};
use provisioner_pipeline::orchestrator::Orchestrator;
use provisioner_pipeline::runners::standard_registry;
use provisioner_pipeline::store::PgJobStore;
use provisioner_worker::WorkerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

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

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    let state = AppState::new(orchestrator, worker_config.run_options(), config.clone());
    let app = build_app_router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "provisioner_api=debug,provisioner_pipeline=info,tower_http=debug".into()
    });

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
