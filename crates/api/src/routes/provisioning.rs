//! Route definitions for the `/provisioning` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::provisioning;
use crate::state::AppState;

/// Routes mounted at `/provisioning`.
///
/// ```text
/// POST   /jobs                 -> create_job
/// GET    /jobs/{id}            -> get_job
/// GET    /tenants/{code}/job   -> get_tenant_job
/// POST   /worker/run           -> run_worker
/// GET    /worker/status        -> worker_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(provisioning::create_job))
        .route("/jobs/{id}", get(provisioning::get_job))
        .route("/tenants/{code}/job", get(provisioning::get_tenant_job))
        .route("/worker/run", post(provisioning::run_worker))
        .route("/worker/status", get(provisioning::worker_status))
}
