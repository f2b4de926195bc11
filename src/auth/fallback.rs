//! Fallback identity: the universal backstop of the acquisition chain.
//!
//! Always produces an outcome. The default advisor lookup is best-effort and
//! runs in its own task so a failure there cannot take the fallback down.

use std::sync::Arc;

use super::{CredentialSource, SignInOutcome};
use crate::advisor::{AdvisorRecord, AdvisorResolver};
use crate::config::FallbackProfile;

pub const ADVISOR_SOURCE_BACKEND: &str = "backend default advisor";
pub const ADVISOR_SOURCE_HARDCODED: &str = "hardcoded default advisor";
pub const ADVISOR_SOURCE_EMERGENCY: &str = "emergency";

pub struct FallbackIdentity {
    profile: FallbackProfile,
    resolver: Arc<AdvisorResolver>,
}

impl FallbackIdentity {
    pub fn new(profile: FallbackProfile, resolver: Arc<AdvisorResolver>) -> Self {
        Self { profile, resolver }
    }

    pub async fn identity(&self, reason: &str) -> SignInOutcome {
        log::warn!("Fallback authentication activated: {}", reason);

        if !self.profile.is_usable() {
            log::error!("Fallback profile is unusable; entering emergency mode");
            return emergency_outcome(reason);
        }

        let resolver = Arc::clone(&self.resolver);
        let lookup = tokio::spawn(async move { resolver.fetch_default().await }).await;

        let (advisor, advisor_source) = match lookup {
            Ok(Ok(advisor)) => (advisor, ADVISOR_SOURCE_BACKEND),
            Ok(Err(e)) => {
                log::warn!("Default advisor unavailable during fallback: {}", e);
                (self.resolver.hardcoded(), ADVISOR_SOURCE_HARDCODED)
            }
            Err(e) => {
                log::error!("Default advisor lookup aborted: {}", e);
                return emergency_outcome(reason);
            }
        };

        log::info!(
            "Fallback identity {} with advisor {} ({})",
            self.profile.email,
            advisor.advisor_id,
            advisor_source
        );

        SignInOutcome {
            credential: local_token("fallback_token"),
            email: Some(self.profile.email.clone()),
            name: Some(self.profile.name.clone()),
            source: CredentialSource::Fallback,
            advisor: Some(advisor),
            fallback_reason: Some(reason.to_string()),
            advisor_source: Some(advisor_source.to_string()),
        }
    }
}

/// Locally generated token; unique, not cryptographically meaningful.
fn local_token(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

fn emergency_outcome(reason: &str) -> SignInOutcome {
    let advisor = AdvisorRecord::emergency();
    SignInOutcome {
        credential: local_token("emergency_token"),
        email: Some(advisor.email.clone()),
        name: Some("Emergency User".to_string()),
        source: CredentialSource::Emergency,
        advisor: Some(advisor),
        fallback_reason: Some(format!("All authentication methods failed: {}", reason)),
        advisor_source: Some(ADVISOR_SOURCE_EMERGENCY.to_string()),
    }
}
