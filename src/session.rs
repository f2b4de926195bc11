//! The published authentication session.
//!
//! `AuthSession` owns the bootstrap pipeline:
//! environment detection -> credential acquisition -> session store ->
//! advisor resolution. Consumers hold an `Arc<AuthSession>` and only read
//! `identity()`, `advisor()` and `auth_headers()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::advisor::{AdvisorRecord, AdvisorResolver};
use crate::auth::consent::GoogleConsentWidget;
use crate::auth::federated::IdentityWidget;
use crate::auth::jwt::{decode_claims, redact};
use crate::auth::{CredentialAcquirer, CredentialSource, SignInOutcome};
use crate::backend::BackendClient;
use crate::config::AuthConfig;
use crate::environment::EnvironmentDetector;
use crate::error::AuthError;
use crate::session_store::{SessionStore, StoredSession};

/// Who the session belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub authenticated: bool,
    pub email: Option<String>,
    pub name: Option<String>,
    pub is_service_identity: bool,
    pub is_fallback: bool,
}

/// Snapshot of the published state.
///
/// `identity.authenticated` is true exactly when a credential is present;
/// the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    credential: Option<String>,
    identity: Identity,
    advisor: Option<AdvisorRecord>,
    loading: bool,
}

impl Session {
    pub fn empty(loading: bool) -> Self {
        Self {
            credential: None,
            identity: Identity::default(),
            advisor: None,
            loading,
        }
    }

    fn authenticated(
        credential: String,
        email: Option<String>,
        name: Option<String>,
        source: CredentialSource,
        advisor: Option<AdvisorRecord>,
        loading: bool,
    ) -> Self {
        Self {
            credential: Some(credential),
            identity: Identity {
                authenticated: true,
                email,
                name,
                is_service_identity: source == CredentialSource::Ambient,
                is_fallback: source.is_fallback(),
            },
            advisor,
            loading,
        }
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn advisor(&self) -> Option<&AdvisorRecord> {
        self.advisor.as_ref()
    }

    pub fn loading(&self) -> bool {
        self.loading
    }
}

pub struct AuthSession {
    acquirer: CredentialAcquirer,
    resolver: Arc<AdvisorResolver>,
    backend: Arc<BackendClient>,
    store: SessionStore,
    state: RwLock<Session>,
    /// Bumped on sign-out; in-flight sign-ins from an older epoch are dropped.
    epoch: AtomicU64,
    bootstrapped: AtomicBool,
}

impl AuthSession {
    pub fn new(config: &AuthConfig, widget: Arc<dyn IdentityWidget>, store: SessionStore) -> Self {
        let backend = Arc::new(BackendClient::new(
            &config.api_base_url,
            config.request_timeout(),
        ));
        let resolver = Arc::new(AdvisorResolver::new(
            Arc::clone(&backend),
            &config.default_advisor_id,
            config.fallback.advisor.clone(),
        ));
        let acquirer = CredentialAcquirer::new(config, widget, Arc::clone(&resolver));
        Self {
            acquirer,
            resolver,
            backend,
            store,
            state: RwLock::new(Session::empty(true)),
            epoch: AtomicU64::new(0),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Production wiring: Google consent widget and file-backed storage.
    pub fn from_config(config: &AuthConfig) -> Self {
        let widget = Arc::new(GoogleConsentWidget::new(config.client_secret.clone()));
        Self::new(config, widget, SessionStore::file(&config.storage_path))
    }

    /// Override how the serving environment is detected.
    pub fn with_environment(mut self, environment: EnvironmentDetector) -> Self {
        self.acquirer = self.acquirer.with_environment(environment);
        self
    }

    pub fn snapshot(&self) -> Session {
        self.state.read().clone()
    }

    pub fn identity(&self) -> Identity {
        self.state.read().identity.clone()
    }

    pub fn loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn credential(&self) -> Option<String> {
        self.state.read().credential.clone()
    }

    pub fn advisor(&self) -> Option<AdvisorRecord> {
        self.state.read().advisor.clone()
    }

    /// Advisor id for scoped queries, the default advisor when none is resident.
    pub fn current_advisor_id(&self) -> String {
        self.advisor()
            .map(|a| a.advisor_id)
            .unwrap_or_else(|| self.resolver.default_advisor_id().to_string())
    }

    /// Headers every backend call must carry.
    pub fn auth_headers(&self) -> HeaderMap {
        let session = self.state.read();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = session.credential.as_deref() {
            insert_header(&mut headers, AUTHORIZATION, &format!("Bearer {}", token));
        }
        if let Some(advisor) = session.advisor.as_ref() {
            insert_header(
                &mut headers,
                HeaderName::from_static("x-advisor-id"),
                &advisor.advisor_id,
            );
            if !advisor.email.is_empty() {
                insert_header(
                    &mut headers,
                    HeaderName::from_static("x-advisor-email"),
                    &advisor.email,
                );
            }
        }
        if let Some(email) = session.identity.email.as_deref() {
            insert_header(&mut headers, HeaderName::from_static("x-user-email"), email);
        }
        headers
    }

    /// Run the startup pipeline once. Later calls return the current identity.
    pub async fn bootstrap(&self) -> Identity {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return self.identity();
        }

        let epoch = self.epoch.load(Ordering::SeqCst);

        // Storage is read before any network activity.
        let stored = self.store.restore();

        let mut session = Session::empty(true);
        if self.acquirer.is_trusted_environment() {
            log::info!("Trusted environment detected; requesting service identity");
            if let Some(outcome) = self.acquirer.acquire_ambient().await {
                log::info!("Service identity active ({})", redact(&outcome.credential));
                session = Session::authenticated(
                    outcome.credential,
                    stored.email.clone(),
                    stored.name.clone(),
                    CredentialSource::Ambient,
                    stored.advisor.clone(),
                    true,
                );
            }
        }

        if session.credential.is_none() {
            if let Some(credential) = stored.credential.clone() {
                log::info!("Restored stored credential ({})", redact(&credential));
                if decode_claims(&credential).is_ok_and(|c| c.is_expired_at(Utc::now())) {
                    // Still used; a backend 401 clears it.
                    log::warn!("Restored identity token has expired");
                }
                self.acquirer.mark_restored();
                session = Session::authenticated(
                    credential,
                    stored.email.clone(),
                    stored.name.clone(),
                    CredentialSource::Restored,
                    stored.advisor.clone(),
                    true,
                );
            } else {
                log::info!("No stored credential; waiting for sign-in");
            }
        }

        let mut resolved = None;
        if session.advisor.is_none() {
            if let Some(email) = session.identity.email.clone() {
                resolved = Some(self.resolver.resolve_by_email(&email).await);
            }
        }

        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            log::warn!("Signed out during startup; discarding restored session");
            state.loading = false;
            return state.identity.clone();
        }
        if let Some(advisor) = resolved {
            self.cache_advisor(&advisor);
            session.advisor = Some(advisor);
        }
        session.loading = false;
        *state = session;
        state.identity.clone()
    }

    /// User-triggered sign-in. Always ends signed in, possibly as the fallback identity.
    pub async fn sign_in(&self) -> SignInOutcome {
        let epoch = self.epoch.load(Ordering::SeqCst);

        let ambient = if self.acquirer.is_trusted_environment() {
            self.acquirer.acquire_ambient().await
        } else {
            None
        };
        let mut outcome = match ambient {
            Some(outcome) => outcome,
            None => self.acquirer.acquire_federated().await,
        };

        if outcome.advisor.is_none() {
            let advisor = match outcome.email.as_deref() {
                Some(email) => self.resolver.resolve_by_email(email).await,
                None => self.resolver.resolve_default().await,
            };
            outcome.advisor = Some(advisor);
        }

        self.publish(&outcome, epoch);
        outcome
    }

    /// Sign in with a pasted bearer token. Empty input is rejected.
    pub async fn sign_in_with_token(&self, token: &str) -> Result<Identity, AuthError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut outcome = self.acquirer.acquire_manual(token)?;
        if let Some(email) = outcome.email.as_deref() {
            outcome.advisor = Some(self.resolver.resolve_by_email(email).await);
        }
        self.publish(&outcome, epoch);
        Ok(self.identity())
    }

    /// Clear storage and reset to the empty session.
    pub fn sign_out(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write();
        if let Err(e) = self.store.clear() {
            log::error!("Failed to clear session storage: {}", e);
        }
        *state = Session::empty(state.loading);
        log::info!("Signed out");
    }

    /// Resolve and cache the advisor for `email`.
    pub async fn fetch_advisor_by_email(&self, email: &str) -> AdvisorRecord {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let advisor = self.resolver.resolve_by_email(email).await;

        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.cache_advisor(&advisor);
            state.advisor = Some(advisor.clone());
        }
        advisor
    }

    /// Probe `/auth-check` with the current credential. Never mutates the session.
    pub async fn check_backend(&self) -> Result<serde_json::Value, AuthError> {
        let token = self.credential().ok_or(AuthError::EmptyToken)?;
        self.backend.auth_check(&token).await
    }

    /// Drop a credential the backend rejected, keeping the advisor.
    pub(crate) fn invalidate_credential(&self) {
        let mut state = self.state.write();
        if let Err(e) = self.store.clear_credential() {
            log::error!("Failed to clear rejected credential: {}", e);
        }
        let advisor = state.advisor.take();
        *state = Session {
            advisor,
            ..Session::empty(state.loading)
        };
        log::warn!("Backend rejected the session credential; signed out");
    }

    pub(crate) fn backend(&self) -> &BackendClient {
        &self.backend
    }

    fn publish(&self, outcome: &SignInOutcome, epoch: u64) {
        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            log::warn!("Discarding sign-in that completed after sign-out");
            return;
        }

        let persisted = StoredSession {
            credential: Some(outcome.credential.clone()),
            email: outcome.email.clone(),
            name: outcome.name.clone(),
            advisor: outcome.advisor.clone(),
        };
        // Service identity tokens are short-lived and re-fetched on every start.
        if outcome.source != CredentialSource::Ambient {
            if let Err(e) = self.store.persist(&persisted) {
                log::error!("Failed to persist session: {}", e);
            }
        }

        *state = Session::authenticated(
            outcome.credential.clone(),
            outcome.email.clone(),
            outcome.name.clone(),
            outcome.source,
            outcome.advisor.clone(),
            state.loading,
        );
        log::info!(
            "Session published via {:?} for {}",
            outcome.source,
            outcome.email.as_deref().unwrap_or("<service identity>")
        );
    }

    fn cache_advisor(&self, advisor: &AdvisorRecord) {
        if let Err(e) = self.store.persist_advisor(advisor) {
            log::warn!("Failed to cache advisor record: {}", e);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => log::warn!("Skipping {} header with invalid characters", name),
    }
}
