//! Individual step runner behaviour.

use std::sync::Arc;
use std::time::Duration;

use provisioner_core::progress::{self, keys, ProgressData};
use provisioner_pipeline::collaborators::CollaboratorError;
use provisioner_pipeline::context::StepContext;
use provisioner_pipeline::runners::{
    AuthenticateRunner, ConfigureAdminRunner, ConfigureApiKeyRunner, CopyDatabaseRunner,
    InitRunner, NotifyRunner, SessionOpener, UpsertUserRunner,
};
use provisioner_pipeline::step::StepRunner;
use provisioner_pipeline::test_support::{
    calls, FakeWorld, ADMIN_UID, API_KEY, REMOTE_USER_ID, SESSION_TOKEN, TENANT_CODE, TENANT_ID, USER_ID,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn ctx(progress_data: ProgressData) -> StepContext {
    StepContext {
        job_id: 1,
        tenant_id: TENANT_ID,
        tenant_code: TENANT_CODE.to_string(),
        user_id: Some(USER_ID),
        attempt: 1,
        progress_data,
    }
}

fn sessions(world: &Arc<FakeWorld>) -> SessionOpener {
    SessionOpener {
        instance: world.clone(),
        login: "admin".into(),
        template_password: "admin".into(),
        timeout: TIMEOUT,
    }
}

#[tokio::test]
async fn init_rejects_a_code_mismatch() {
    let world = FakeWorld::new();
    let runner = InitRunner {
        records: world.clone(),
        timeout: TIMEOUT,
    };
    let mut c = ctx(ProgressData::new());
    c.tenant_code = "globex".into();

    let result = runner.run(&c).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("globex"));
}

#[tokio::test]
async fn init_rejects_an_invalid_code_without_calling_out() {
    let world = FakeWorld::new();
    let runner = InitRunner {
        records: world.clone(),
        timeout: TIMEOUT,
    };
    let mut c = ctx(ProgressData::new());
    c.tenant_code = "Not Valid".into();

    assert!(!runner.run(&c).await.success);
    assert_eq!(world.calls(calls::TENANT_PROFILE), 0);
}

#[tokio::test]
async fn copy_database_uses_prefix_and_sanitized_code() {
    let world = FakeWorld::new();
    let runner = CopyDatabaseRunner {
        database: world.clone(),
        template: "template".into(),
        prefix: "t_".into(),
        timeout: TIMEOUT,
    };
    let mut c = ctx(ProgressData::new());
    c.tenant_code = "acme-west".into();

    let result = runner.run(&c).await;
    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(progress::get_str(&data, keys::DATABASE_NAME), Some("t_acme_west"));
}

#[tokio::test]
async fn authenticate_needs_a_database_name() {
    let world = FakeWorld::new();
    let runner = AuthenticateRunner {
        sessions: sessions(&world),
    };

    let result = runner.run(&ctx(ProgressData::new())).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains(keys::DATABASE_NAME));
    assert_eq!(world.calls(calls::AUTHENTICATE), 0);
}

#[tokio::test]
async fn authenticate_records_the_session() {
    let world = FakeWorld::new();
    let runner = AuthenticateRunner {
        sessions: sessions(&world),
    };

    let result = runner
        .run(&ctx(progress::patch([(keys::DATABASE_NAME, "tenant_acme")])))
        .await;
    let data = result.data.unwrap();
    assert_eq!(progress::get_str(&data, keys::SESSION_TOKEN), Some(SESSION_TOKEN));
    assert_eq!(progress::get_i64(&data, keys::ADMIN_UID), Some(ADMIN_UID));
}

#[tokio::test]
async fn unauthorized_is_a_failure() {
    let world = FakeWorld::new();
    world.fail(
        calls::AUTHENTICATE,
        CollaboratorError::Unauthorized("bad credentials".into()),
    );
    let runner = AuthenticateRunner {
        sessions: sessions(&world),
    };

    let result = runner
        .run(&ctx(progress::patch([(keys::DATABASE_NAME, "tenant_acme")])))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("Unauthorized"));
}

#[tokio::test]
async fn configure_admin_sets_a_fresh_password() {
    let world = FakeWorld::new();
    let runner = ConfigureAdminRunner {
        sessions: sessions(&world),
    };
    let c = ctx(progress::patch([
        (keys::DATABASE_NAME, serde_json::json!("tenant_acme")),
        (keys::SESSION_TOKEN, serde_json::json!(SESSION_TOKEN)),
        (keys::ADMIN_UID, serde_json::json!(ADMIN_UID)),
    ]));

    let data = runner.run(&c).await.data.unwrap();
    let password = progress::get_str(&data, keys::ADMIN_PASSWORD).unwrap();
    assert_eq!(password.len(), 24);
    assert_ne!(password, "admin");
    assert_eq!(world.admin_passwords(), vec![password.to_string()]);
    assert_eq!(progress::get_str(&data, keys::ADMIN_LOGIN), Some("admin"));
}

#[tokio::test]
async fn configure_admin_skips_when_password_already_rotated() {
    let world = FakeWorld::new();
    let runner = ConfigureAdminRunner {
        sessions: sessions(&world),
    };
    let c = ctx(progress::patch([(keys::ADMIN_PASSWORD, "already-set")]));

    let result = runner.run(&c).await;
    assert!(result.success);
    assert!(result.data.is_none());
    assert_eq!(world.calls(calls::SET_ADMIN_PASSWORD), 0);
}

#[tokio::test]
async fn expired_session_is_replaced_before_minting_an_api_key() {
    let world = FakeWorld::new();
    world.fail(
        calls::CREATE_API_KEY,
        CollaboratorError::Unauthorized("session expired".into()),
    );
    let runner = ConfigureApiKeyRunner {
        sessions: sessions(&world),
        key_name: "provisioning".into(),
    };
    let c = ctx(progress::patch([
        (keys::DATABASE_NAME, serde_json::json!("tenant_acme")),
        (keys::SESSION_TOKEN, serde_json::json!("stale-token")),
        (keys::ADMIN_UID, serde_json::json!(ADMIN_UID)),
        (keys::ADMIN_PASSWORD, serde_json::json!("rotated")),
    ]));

    let result = runner.run(&c).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(world.calls(calls::AUTHENTICATE), 1);
    assert_eq!(world.calls(calls::CREATE_API_KEY), 2);
    let data = result.data.unwrap();
    assert_eq!(progress::get_str(&data, keys::API_KEY), Some(API_KEY));
    assert_eq!(progress::get_str(&data, keys::SESSION_TOKEN), Some(SESSION_TOKEN));
    assert_eq!(progress::get_i64(&data, keys::ADMIN_UID), Some(ADMIN_UID));
}

#[tokio::test]
async fn session_is_replaced_only_once() {
    let world = FakeWorld::new();
    world.fail_times(
        calls::SET_ADMIN_PASSWORD,
        CollaboratorError::Unauthorized("session expired".into()),
        2,
    );
    let runner = ConfigureAdminRunner {
        sessions: sessions(&world),
    };
    let c = ctx(progress::patch([
        (keys::DATABASE_NAME, serde_json::json!("tenant_acme")),
        (keys::SESSION_TOKEN, serde_json::json!("stale-token")),
        (keys::ADMIN_UID, serde_json::json!(ADMIN_UID)),
    ]));

    let result = runner.run(&c).await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("Unauthorized"));
    assert_eq!(world.calls(calls::AUTHENTICATE), 1);
    assert_eq!(world.calls(calls::SET_ADMIN_PASSWORD), 2);
}

#[tokio::test]
async fn upsert_user_needs_remote_tenant() {
    let world = FakeWorld::new();
    let runner = UpsertUserRunner {
        back_office: world.clone(),
        records: world.clone(),
        timeout: TIMEOUT,
    };

    let result = runner.run(&ctx(ProgressData::new())).await;
    assert!(!result.success);
    assert_eq!(world.calls(calls::UPSERT_USER), 0);

    let result = runner
        .run(&ctx(progress::patch([(keys::REMOTE_TENANT_ID, 42)])))
        .await;
    let data = result.data.unwrap();
    assert_eq!(
        progress::get_i64(&data, keys::REMOTE_USER_ID),
        Some(REMOTE_USER_ID)
    );
}

#[tokio::test]
async fn notify_sends_the_rotated_credentials() {
    let world = FakeWorld::new();
    let runner = NotifyRunner {
        mailer: Some(world.clone()),
        records: world.clone(),
        timeout: TIMEOUT,
    };
    let c = ctx(progress::patch([
        (keys::TENANT_NAME, "Acme Ltd"),
        (keys::DATABASE_NAME, "tenant_acme"),
        (keys::ADMIN_LOGIN, "admin"),
        (keys::ADMIN_PASSWORD, "s3cret-generated"),
    ]));

    assert!(runner.run(&c).await.success);
    let sent = world.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_email, "owner@acme.test");
    assert_eq!(sent[0].password, "s3cret-generated");
    assert_eq!(sent[0].tenant_name, "Acme Ltd");
}

#[tokio::test]
async fn notify_fails_without_credentials() {
    let world = FakeWorld::new();
    let runner = NotifyRunner {
        mailer: Some(world.clone()),
        records: world.clone(),
        timeout: TIMEOUT,
    };
    let c = ctx(progress::patch([(keys::DATABASE_NAME, "tenant_acme")]));

    assert!(!runner.run(&c).await.success);
    assert!(world.sent().is_empty());
}
