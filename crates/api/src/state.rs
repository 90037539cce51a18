use std::sync::Arc;

use provisioner_pipeline::orchestrator::Orchestrator;
use provisioner_worker::{ProvisioningWorker, RunOptions};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub worker: ProvisioningWorker,
    /// Limits applied to `POST /worker/run` when the body leaves them out.
    pub run_defaults: RunOptions,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        run_defaults: RunOptions,
        config: ServerConfig,
    ) -> Self {
        Self {
            worker: ProvisioningWorker::new(orchestrator.clone()),
            orchestrator,
            run_defaults,
            config: Arc::new(config),
        }
    }
}
