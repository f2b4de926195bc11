//! Credential acquisition.
//!
//! Strategies, in priority order:
//! - ambient: service identity token from the metadata server (trusted hosts only)
//! - federated: interactive sign-in through an `IdentityWidget`
//! - manual: an operator-pasted bearer token
//! - fallback: locally generated identity, which cannot fail
//!
//! Modules:
//! - ambient: metadata server client
//! - consent: Google browser consent flow (production widget)
//! - fallback: fallback and emergency identities
//! - federated: callback bridge and widget loader
//! - jwt: identity token claim decoding

pub mod ambient;
pub mod consent;
pub mod fallback;
pub mod federated;
pub mod jwt;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::advisor::{AdvisorRecord, AdvisorResolver};
use crate::config::AuthConfig;
use crate::environment::EnvironmentDetector;
use crate::error::AuthError;

use self::ambient::AmbientIdentity;
use self::fallback::FallbackIdentity;
use self::federated::{FederatedSignIn, IdentityWidget};

/// Where the session credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Ambient,
    Federated,
    Manual,
    Restored,
    Fallback,
    Emergency,
}

impl CredentialSource {
    pub fn is_fallback(self) -> bool {
        matches!(self, CredentialSource::Fallback | CredentialSource::Emergency)
    }
}

/// Acquisition progress. Exactly one `Resolved` is reached per attempt;
/// an ambient miss drops back to `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Init,
    TryingAmbient,
    TryingFederated,
    AwaitingManualInput,
    Fallback,
    Resolved(CredentialSource),
}

/// Result descriptor of a sign-in. Acquisition always ends in one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInOutcome {
    #[serde(skip)]
    pub credential: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub source: CredentialSource,
    /// Set when the strategy already knows the advisor (fallback tiers).
    pub advisor: Option<AdvisorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisor_source: Option<String>,
}

impl SignInOutcome {
    fn bare(credential: String, source: CredentialSource) -> Self {
        Self {
            credential,
            email: None,
            name: None,
            source,
            advisor: None,
            fallback_reason: None,
            advisor_source: None,
        }
    }
}

pub struct CredentialAcquirer {
    environment: EnvironmentDetector,
    ambient: AmbientIdentity,
    federated: FederatedSignIn,
    fallback: FallbackIdentity,
    audience: String,
    state: Mutex<AcquisitionState>,
}

impl CredentialAcquirer {
    pub fn new(
        config: &AuthConfig,
        widget: Arc<dyn IdentityWidget>,
        resolver: Arc<AdvisorResolver>,
    ) -> Self {
        Self {
            environment: EnvironmentDetector::from_config(config),
            ambient: AmbientIdentity::new(&config.metadata_identity_url, config.ambient_timeout()),
            federated: FederatedSignIn::new(widget, &config.client_id, config.federated_timeout()),
            fallback: FallbackIdentity::new(config.fallback.clone(), resolver),
            audience: config.api_base_url.clone(),
            state: Mutex::new(AcquisitionState::Init),
        }
    }

    /// Replace the environment detector (hosts without `$HOSTNAME`, tests).
    pub fn with_environment(mut self, environment: EnvironmentDetector) -> Self {
        self.environment = environment;
        self
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    fn transition(&self, next: AcquisitionState) {
        let mut state = self.state.lock();
        log::debug!("Credential acquisition: {:?} -> {:?}", *state, next);
        *state = next;
    }

    pub fn is_trusted_environment(&self) -> bool {
        self.environment.is_trusted()
    }

    /// Service identity token scoped to the backend, if the platform has one.
    pub async fn acquire_ambient(&self) -> Option<SignInOutcome> {
        self.transition(AcquisitionState::TryingAmbient);
        let Some(token) = self.ambient.acquire(&self.audience).await else {
            self.transition(AcquisitionState::Init);
            return None;
        };
        self.transition(AcquisitionState::Resolved(CredentialSource::Ambient));
        Some(SignInOutcome::bare(token, CredentialSource::Ambient))
    }

    /// Record that the session came from storage rather than a live strategy.
    pub(crate) fn mark_restored(&self) {
        self.transition(AcquisitionState::Resolved(CredentialSource::Restored));
    }

    /// Interactive sign-in. Every failure resolves through the fallback tier.
    pub async fn acquire_federated(&self) -> SignInOutcome {
        self.transition(AcquisitionState::TryingFederated);
        match self.federated.attempt().await {
            Ok(federated) => {
                log::info!(
                    "Federated sign-in succeeded for {}",
                    federated.email.as_deref().unwrap_or("<no email claim>")
                );
                self.transition(AcquisitionState::Resolved(CredentialSource::Federated));
                SignInOutcome {
                    email: federated.email,
                    name: federated.name,
                    ..SignInOutcome::bare(federated.credential, CredentialSource::Federated)
                }
            }
            Err(e) => {
                let reason = federated_failure_reason(&e);
                self.fallback_identity(&reason).await
            }
        }
    }

    /// Accept an operator-supplied bearer token verbatim.
    pub fn acquire_manual(&self, pasted: &str) -> Result<SignInOutcome, AuthError> {
        self.transition(AcquisitionState::AwaitingManualInput);
        let token = pasted.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        self.transition(AcquisitionState::Resolved(CredentialSource::Manual));
        Ok(SignInOutcome {
            email: jwt::extract_email(token),
            name: jwt::decode_claims(token).ok().and_then(|c| c.name),
            ..SignInOutcome::bare(token.to_string(), CredentialSource::Manual)
        })
    }

    /// Synthesize the fallback identity. Never fails.
    pub async fn fallback_identity(&self, reason: &str) -> SignInOutcome {
        self.transition(AcquisitionState::Fallback);
        let outcome = self.fallback.identity(reason).await;
        self.transition(AcquisitionState::Resolved(outcome.source));
        outcome
    }
}

fn federated_failure_reason(err: &AuthError) -> String {
    match err {
        AuthError::Timeout(_) => "OAuth timeout".to_string(),
        AuthError::WidgetLoad(e) => format!("Identity widget load failed: {}", e),
        AuthError::Widget(e) => format!("Identity widget error: {}", e),
        AuthError::InvalidToken(e) => format!("Sign-in callback processing failed: {}", e),
        other => format!("Federated sign-in failed: {}", other),
    }
}
