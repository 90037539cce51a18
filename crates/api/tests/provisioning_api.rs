//! HTTP surface over the in-memory store and fake collaborators.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{build_test_app, expect, get, post_json};
use provisioner_db::models::status::ProvisioningJobStatus;
use provisioner_pipeline::test_support::{calls, TENANT_CODE, TENANT_ID, USER_ID};
use serde_json::{json, Value};

fn create_body() -> Value {
    json!({"tenant_id": TENANT_ID, "tenant_code": TENANT_CODE, "user_id": USER_ID})
}

// ---------------------------------------------------------------------------
// Health and middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_store_status() {
    let (_h, app) = build_test_app(false);
    let body = expect(get(&app, "/health").await, StatusCode::OK).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_healthy"], true);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let (_h, app) = build_test_app(false);
    let response = get(&app, "/health").await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (_h, app) = build_test_app(false);
    let response = get(&app, "/api/v1/provisioning/nothing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_job_returns_the_pending_job() {
    let (h, app) = build_test_app(false);

    let body = expect(
        post_json(&app, "/api/v1/provisioning/jobs", create_body()).await,
        StatusCode::CREATED,
    )
    .await;

    let data = &body["data"];
    assert_eq!(data["tenant_code"], TENANT_CODE);
    assert_eq!(data["status"], "pending");
    assert_eq!(data["attempts"], 0);

    let id = data["id"].as_i64().unwrap();
    assert_eq!(
        h.store.get(id).unwrap().status(),
        Some(ProvisioningJobStatus::Pending)
    );
    assert_eq!(h.world.calls(calls::COPY_TEMPLATE), 0);
}

#[tokio::test]
async fn create_job_starts_the_first_attempt() {
    let (h, app) = build_test_app(true);

    let body = expect(
        post_json(&app, "/api/v1/provisioning/jobs", create_body()).await,
        StatusCode::CREATED,
    )
    .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let mut succeeded = false;
    for _ in 0..200 {
        if h.store.get(id).unwrap().status() == Some(ProvisioningJobStatus::Succeeded) {
            succeeded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(succeeded, "background attempt never finished");
}

#[tokio::test]
async fn invalid_tenant_code_is_400() {
    let (h, app) = build_test_app(false);

    let body = expect(
        post_json(
            &app,
            "/api/v1/provisioning/jobs",
            json!({"tenant_id": TENANT_ID, "tenant_code": "Bad Code!"}),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(h.store.get(1).is_none());
}

#[tokio::test]
async fn zero_tenant_id_is_400() {
    let (_h, app) = build_test_app(false);
    let response = post_json(
        &app,
        "/api/v1/provisioning/jobs",
        json!({"tenant_id": 0, "tenant_code": TENANT_CODE}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn seeding_a_step_owned_key_is_400() {
    let (h, app) = build_test_app(false);

    let body = expect(
        post_json(
            &app,
            "/api/v1/provisioning/jobs",
            json!({
                "tenant_id": TENANT_ID,
                "tenant_code": TENANT_CODE,
                "seed_progress": {"admin_password": "hunter2", "referrer": "partner"},
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].as_str().unwrap().contains("admin_password"));
    assert!(h.store.get(1).is_none());
}

#[tokio::test]
async fn caller_keys_are_seeded() {
    let (h, app) = build_test_app(false);

    let created = expect(
        post_json(
            &app,
            "/api/v1/provisioning/jobs",
            json!({
                "tenant_id": TENANT_ID,
                "tenant_code": TENANT_CODE,
                "seed_progress": {"referrer": "partner"},
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(h.store.get(id).unwrap().progress_data["referrer"], "partner");
}

#[tokio::test]
async fn missing_job_is_404() {
    let (_h, app) = build_test_app(false);
    let body = expect(
        get(&app, "/api/v1/provisioning/jobs/999").await,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn job_view_redacts_credentials() {
    let (_h, app) = build_test_app(false);

    let created = expect(
        post_json(&app, "/api/v1/provisioning/jobs", create_body()).await,
        StatusCode::CREATED,
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();

    let run = expect(
        post_json(&app, "/api/v1/provisioning/worker/run", json!({})).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(run["data"]["succeeded"], 1);

    let body = expect(
        get(&app, &format!("/api/v1/provisioning/jobs/{id}")).await,
        StatusCode::OK,
    )
    .await;
    let progress = &body["data"]["progress_data"];
    assert_eq!(body["data"]["status"], "succeeded");
    assert_eq!(progress["admin_password"], "[REDACTED]");
    assert_eq!(progress["api_key"], "[REDACTED]");
    assert_eq!(progress["session_token"], "[REDACTED]");
    assert!(progress["database_name"].as_str().unwrap().ends_with(TENANT_CODE));
}

#[tokio::test]
async fn tenant_lookup_returns_the_latest_job() {
    let (_h, app) = build_test_app(false);

    post_json(&app, "/api/v1/provisioning/jobs", create_body()).await;
    let second = expect(
        post_json(&app, "/api/v1/provisioning/jobs", create_body()).await,
        StatusCode::CREATED,
    )
    .await;

    let body = expect(
        get(&app, &format!("/api/v1/provisioning/tenants/{TENANT_CODE}/job")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["id"], second["data"]["id"]);

    let response = get(&app, "/api/v1/provisioning/tenants/nobody/job").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_run_honours_batch_size() {
    let (_h, app) = build_test_app(false);
    for _ in 0..3 {
        post_json(&app, "/api/v1/provisioning/jobs", create_body()).await;
    }

    let body = expect(
        post_json(
            &app,
            "/api/v1/provisioning/worker/run",
            json!({"batch_size": 2}),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["processed"], 2);
    assert_eq!(body["data"]["jobs"].as_array().unwrap().len(), 2);

    let status = expect(
        get(&app, "/api/v1/provisioning/worker/status").await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(status["data"]["healthy"], true);
    assert_eq!(status["data"]["pending_count"], 1);
}

#[tokio::test]
async fn worker_run_rejects_oversized_batches() {
    let (_h, app) = build_test_app(false);
    let response = post_json(
        &app,
        "/api/v1/provisioning/worker/run",
        json!({"batch_size": 1000}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn worker_status_on_an_empty_queue() {
    let (_h, app) = build_test_app(false);
    let body = expect(
        get(&app, "/api/v1/provisioning/worker/status").await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["pending_count"], 0);
    assert!(body["data"].get("oldest_pending_job").is_none());
}
