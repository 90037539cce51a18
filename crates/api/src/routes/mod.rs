pub mod health;
pub mod provisioning;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /provisioning    jobs, tenant lookups, worker invocation
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/provisioning", provisioning::router())
}
