use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use provisioner_api::config::ServerConfig;
use provisioner_api::router::build_app_router;
use provisioner_api::state::AppState;
use provisioner_pipeline::test_support::Harness;
use provisioner_worker::RunOptions;
use serde_json::Value;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(execute_on_create: bool) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        execute_on_create,
    }
}

/// Build the full application router over an in-memory job store and fake
/// collaborators.
///
/// Uses the same [`build_app_router`] as `main.rs`, so the middleware stack
/// under test is the production one.
pub fn build_test_app(execute_on_create: bool) -> (Harness, Router) {
    let harness = Harness::new();
    let config = test_config(execute_on_create);
    let state = AppState::new(harness.orchestrator.clone(), RunOptions::default(), config.clone());
    (harness, build_app_router(state, &config))
}

pub async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect(response: axum::response::Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
