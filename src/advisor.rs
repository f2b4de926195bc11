//! Advisor resolution: maps an authenticated email to the business-domain
//! advisor record.
//!
//! Resolution never fails. Every branch ends in a concrete record:
//! 1. backend match by email (non-default id)
//! 2. backend match that is the default advisor (marked `is_default`)
//! 3. backend default advisor by id
//! 4. the configured hardcoded record (`is_fallback` + `is_hardcoded`)

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::BackendClient;
use crate::error::AuthError;

/// Business identity of the signed-in wealth manager.
///
/// Field names follow the backend payload; the flags are client-side
/// markers and keep their camelCase names in the persisted JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorRecord {
    pub advisor_id: String,
    /// The backend sends this as "name"
    #[serde(default, alias = "name")]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub years_experience: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "isDefault")]
    pub is_default: bool,
    #[serde(default, rename = "isFallback")]
    pub is_fallback: bool,
    #[serde(default, rename = "isHardcoded")]
    pub is_hardcoded: bool,
    #[serde(default, rename = "isEmergency", skip_serializing_if = "std::ops::Not::not")]
    pub is_emergency: bool,
}

impl AdvisorRecord {
    /// Last-resort record used when even the fallback tier breaks.
    pub fn emergency() -> Self {
        Self {
            advisor_id: "EMERGENCY".to_string(),
            full_name: "Emergency Advisor".to_string(),
            email: "emergency@privatebank.com".to_string(),
            specialization: None,
            years_experience: None,
            location: None,
            is_default: true,
            is_fallback: true,
            is_hardcoded: true,
            is_emergency: true,
        }
    }
}

pub struct AdvisorResolver {
    backend: Arc<BackendClient>,
    default_advisor_id: String,
    hardcoded: AdvisorRecord,
}

impl AdvisorResolver {
    pub fn new(backend: Arc<BackendClient>, default_advisor_id: &str, hardcoded: AdvisorRecord) -> Self {
        Self {
            backend,
            default_advisor_id: default_advisor_id.to_string(),
            hardcoded,
        }
    }

    pub fn default_advisor_id(&self) -> &str {
        &self.default_advisor_id
    }

    /// Resolve the advisor for `email`, falling back to the default advisor
    /// and finally to the hardcoded record.
    pub async fn resolve_by_email(&self, email: &str) -> AdvisorRecord {
        log::info!("Resolving advisor for {}", email);
        match self.backend.advisor_by_email(email).await {
            Ok(Some(mut advisor)) if advisor.advisor_id != self.default_advisor_id => {
                log::info!(
                    "Found advisor {} ({}) for {}",
                    advisor.advisor_id,
                    advisor.full_name,
                    email
                );
                advisor.is_default = false;
                return advisor;
            }
            Ok(Some(mut advisor)) => {
                // A matched default still beats no match.
                log::warn!(
                    "Only the default advisor ({}) matched {}",
                    self.default_advisor_id,
                    email
                );
                advisor.is_default = true;
                return advisor;
            }
            Ok(None) => log::warn!("No advisor found for {}", email),
            Err(e) if e.is_transient() => {
                log::warn!("Advisor lookup for {} unavailable: {}", email, e)
            }
            Err(e) => log::error!("Advisor lookup for {} rejected: {}", email, e),
        }

        self.resolve_default().await
    }

    /// Resolve the canonical default advisor, falling back to the hardcoded
    /// record if the backend is unavailable.
    pub async fn resolve_default(&self) -> AdvisorRecord {
        match self.fetch_default().await {
            Ok(advisor) => advisor,
            Err(e) => {
                log::warn!(
                    "Default advisor {} unavailable ({}); using hardcoded record",
                    self.default_advisor_id,
                    e
                );
                self.hardcoded()
            }
        }
    }

    /// Fetch the default advisor from the backend without any fallback.
    pub async fn fetch_default(&self) -> Result<AdvisorRecord, AuthError> {
        let mut advisor = self
            .backend
            .advisor_by_id(&self.default_advisor_id)
            .await?
            .ok_or_else(|| AuthError::Status {
                status: 404,
                message: format!("advisor {} not found", self.default_advisor_id),
            })?;
        advisor.is_default = true;
        advisor.is_fallback = false;
        advisor.is_hardcoded = false;
        log::info!(
            "Using default advisor {} ({})",
            advisor.advisor_id,
            advisor.full_name
        );
        Ok(advisor)
    }

    /// The compiled-in record with all fallback markers set.
    pub fn hardcoded(&self) -> AdvisorRecord {
        AdvisorRecord {
            is_default: true,
            is_fallback: true,
            is_hardcoded: true,
            ..self.hardcoded.clone()
        }
    }
}
