//! Scriptable fake collaborators and a ready-made engine for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::backoff::BackoffTable;
use provisioner_core::types::DbId;

use crate::collaborators::{
    BackOffice, CollaboratorError, Collaborators, CredentialMailer, CredentialNotice,
    DatabaseProvisioner, MetadataRegistry, RemoteTenant, RemoteUser, Session, TenantInstance,
    TenantMetadata, TenantProfile, TenantRecords, UserProfile,
};
use crate::config::PipelineConfig;
use crate::orchestrator::Orchestrator;
use crate::runners::standard_registry;
use crate::store::InMemoryJobStore;

/// Collaborator method names, used to script and count calls.
pub mod calls {
    pub const COPY_TEMPLATE: &str = "copy_template";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const SET_ADMIN_PASSWORD: &str = "set_admin_password";
    pub const CREATE_API_KEY: &str = "create_api_key";
    pub const UPSERT_TENANT: &str = "upsert_tenant";
    pub const FIND_TENANT: &str = "find_tenant";
    pub const REGISTER_BILLING: &str = "register_metered_billing";
    pub const UPSERT_USER: &str = "upsert_user";
    pub const PUBLISH_METADATA: &str = "upsert_tenant_metadata";
    pub const SEND_CREDENTIALS: &str = "send_credentials";
    pub const TENANT_PROFILE: &str = "tenant_profile";
    pub const USER_PROFILE: &str = "user_profile";
    pub const ACTIVATE: &str = "activate";
}

pub const TENANT_ID: DbId = 1;
pub const TENANT_CODE: &str = "acme";
pub const TENANT_NAME: &str = "Acme Ltd";
pub const USER_ID: DbId = 7;
pub const REMOTE_TENANT_ID: i64 = 42;
pub const EXISTING_REMOTE_TENANT_ID: i64 = 99;
pub const REMOTE_USER_ID: i64 = 314;
pub const SESSION_TOKEN: &str = "session-token";
pub const ADMIN_UID: i64 = 2;
pub const API_KEY: &str = "api-key-value";

#[derive(Default)]
struct Script {
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<CollaboratorError>>,
    panics: Vec<&'static str>,
    delays: HashMap<&'static str, Duration>,
}

/// One fake standing in for every external system.
///
/// Each call is counted by method name. Failures, panics and delays can be
/// queued per method; with nothing queued every call succeeds. One tenant
/// ([`TENANT_ID`]) and one user ([`USER_ID`]) exist in the local records.
#[derive(Default)]
pub struct FakeWorld {
    script: Mutex<Script>,
    activated: Mutex<Vec<(DbId, String)>>,
    sent: Mutex<Vec<CredentialNotice>>,
    admin_passwords: Mutex<Vec<String>>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fail the next call to `method` with `error`.
    pub fn fail(&self, method: &'static str, error: CollaboratorError) {
        self.fail_times(method, error, 1);
    }

    /// Fail the next `times` calls to `method` with `error`.
    pub fn fail_times(&self, method: &'static str, error: CollaboratorError, times: usize) {
        let mut script = self.script();
        let queue = script.failures.entry(method).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Panic on every call to `method`.
    pub fn panic_on(&self, method: &'static str) {
        self.script().panics.push(method);
    }

    /// Sleep `delay` before answering calls to `method`.
    pub fn delay(&self, method: &'static str, delay: Duration) {
        self.script().delays.insert(method, delay);
    }

    /// Number of calls made to `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.script().calls.get(method).copied().unwrap_or(0)
    }

    /// Emails handed to the mailer.
    pub fn sent(&self) -> Vec<CredentialNotice> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// `(tenant_id, database_name)` pairs passed to `activate`.
    pub fn activated(&self) -> Vec<(DbId, String)> {
        self.activated.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Passwords set through `set_admin_password`, in order.
    pub fn admin_passwords(&self) -> Vec<String> {
        self.admin_passwords
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn hit(&self, method: &'static str) -> Result<(), CollaboratorError> {
        let (delay, panics, failure) = {
            let mut script = self.script();
            *script.calls.entry(method).or_default() += 1;
            let delay = script.delays.get(method).copied();
            let panics = script.panics.contains(&method);
            let failure = script.failures.get_mut(method).and_then(VecDeque::pop_front);
            (delay, panics, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panics {
            panic!("fake {method} exploded");
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Bundle this fake into every collaborator slot.
    pub fn collaborators(self: &Arc<Self>, with_mailer: bool) -> Collaborators {
        Collaborators {
            database: self.clone(),
            tenant_instance: self.clone(),
            back_office: self.clone(),
            metadata: self.clone(),
            mailer: with_mailer.then(|| self.clone() as Arc<dyn CredentialMailer>),
            records: self.clone(),
        }
    }
}

#[async_trait]
impl DatabaseProvisioner for FakeWorld {
    async fn copy_template(&self, _template: &str, _target: &str) -> Result<(), CollaboratorError> {
        self.hit(calls::COPY_TEMPLATE).await
    }
}

#[async_trait]
impl TenantInstance for FakeWorld {
    async fn authenticate(
        &self,
        database: &str,
        _login: &str,
        _password: &str,
    ) -> Result<Session, CollaboratorError> {
        self.hit(calls::AUTHENTICATE).await?;
        Ok(Session {
            database: database.to_string(),
            uid: ADMIN_UID,
            token: SESSION_TOKEN.to_string(),
        })
    }

    async fn set_admin_password(
        &self,
        _session: &Session,
        _login: &str,
        new_password: &str,
    ) -> Result<(), CollaboratorError> {
        self.hit(calls::SET_ADMIN_PASSWORD).await?;
        self.admin_passwords
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(new_password.to_string());
        Ok(())
    }

    async fn create_api_key(
        &self,
        _session: &Session,
        _name: &str,
    ) -> Result<String, CollaboratorError> {
        self.hit(calls::CREATE_API_KEY).await?;
        Ok(API_KEY.to_string())
    }
}

#[async_trait]
impl BackOffice for FakeWorld {
    async fn upsert_tenant(&self, _tenant: &RemoteTenant) -> Result<i64, CollaboratorError> {
        self.hit(calls::UPSERT_TENANT).await?;
        Ok(REMOTE_TENANT_ID)
    }

    async fn find_tenant(&self, code: &str) -> Result<Option<i64>, CollaboratorError> {
        self.hit(calls::FIND_TENANT).await?;
        Ok((code == TENANT_CODE).then_some(EXISTING_REMOTE_TENANT_ID))
    }

    async fn register_metered_billing(
        &self,
        _remote_tenant_id: i64,
    ) -> Result<(), CollaboratorError> {
        self.hit(calls::REGISTER_BILLING).await
    }

    async fn upsert_user(
        &self,
        _remote_tenant_id: i64,
        _user: &RemoteUser,
    ) -> Result<i64, CollaboratorError> {
        self.hit(calls::UPSERT_USER).await?;
        Ok(REMOTE_USER_ID)
    }
}

#[async_trait]
impl MetadataRegistry for FakeWorld {
    async fn upsert_tenant_metadata(
        &self,
        _code: &str,
        _metadata: &TenantMetadata,
    ) -> Result<(), CollaboratorError> {
        self.hit(calls::PUBLISH_METADATA).await
    }
}

#[async_trait]
impl CredentialMailer for FakeWorld {
    async fn send_credentials(&self, notice: &CredentialNotice) -> Result<(), CollaboratorError> {
        self.hit(calls::SEND_CREDENTIALS).await?;
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notice.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantRecords for FakeWorld {
    async fn tenant_profile(
        &self,
        tenant_id: DbId,
    ) -> Result<Option<TenantProfile>, CollaboratorError> {
        self.hit(calls::TENANT_PROFILE).await?;
        Ok((tenant_id == TENANT_ID).then(|| TenantProfile {
            id: TENANT_ID,
            code: TENANT_CODE.to_string(),
            name: TENANT_NAME.to_string(),
            database_name: None,
        }))
    }

    async fn user_profile(&self, user_id: DbId) -> Result<Option<UserProfile>, CollaboratorError> {
        self.hit(calls::USER_PROFILE).await?;
        Ok((user_id == USER_ID).then(|| UserProfile {
            id: USER_ID,
            email: "owner@acme.test".to_string(),
            full_name: "Ada Owner".to_string(),
        }))
    }

    async fn activate(&self, tenant_id: DbId, database_name: &str) -> Result<(), CollaboratorError> {
        self.hit(calls::ACTIVATE).await?;
        self.activated
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((tenant_id, database_name.to_string()));
        Ok(())
    }
}

/// Engine configuration with short, predictable values.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_attempts: 3,
        lock_ttl: Duration::from_secs(60),
        backoff: BackoffTable::new(vec![Duration::from_secs(60), Duration::from_secs(300)])
            .unwrap_or_default(),
        call_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    }
}

/// In-memory store, fake world and an orchestrator wired to both.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub world: Arc<FakeWorld>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config(), true)
    }

    pub fn with_config(config: PipelineConfig, with_mailer: bool) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let world = FakeWorld::new();
        let registry = standard_registry(&world.collaborators(with_mailer), &config)
            .unwrap_or_else(|e| panic!("standard registry must build: {e}"));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), registry, config));
        Self {
            store,
            world,
            orchestrator,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
