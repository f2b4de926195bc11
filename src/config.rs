//! Runtime configuration for the session core.
//!
//! Resolution order:
//! 1. `$ADVISORDESK_CONFIG` or ~/.advisordesk/config.json (if present)
//! 2. Built-in defaults
//! 3. Environment overrides (`ADVISORDESK_API_URL`, `ADVISORDESK_HOST`,
//!    `ADVISORDESK_CLIENT_ID`, `ADVISORDESK_STORAGE`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorRecord;
use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str =
    "https://apialchemistproject-backend-608187465720.us-central1.run.app";
pub const DEFAULT_METADATA_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";
pub const DEFAULT_CLIENT_ID: &str =
    "608187465720-e05scpovhq83mkose0ucmarghctejqdg.apps.googleusercontent.com";

/// Identity used when every interactive strategy fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackProfile {
    pub email: String,
    pub name: String,
    pub advisor: AdvisorRecord,
}

impl Default for FallbackProfile {
    fn default() -> Self {
        Self {
            email: "john.smith@privatebank.com".to_string(),
            name: "John Smith".to_string(),
            advisor: AdvisorRecord {
                advisor_id: "ADV001".to_string(),
                full_name: "John Smith".to_string(),
                email: "john.smith@privatebank.com".to_string(),
                specialization: Some("Wealth Management".to_string()),
                years_experience: Some(15),
                location: Some("New York".to_string()),
                is_default: true,
                is_fallback: true,
                is_hardcoded: true,
                is_emergency: false,
            },
        }
    }
}

impl FallbackProfile {
    /// A profile without an email cannot stand in for a user.
    pub fn is_usable(&self) -> bool {
        !self.email.trim().is_empty() && !self.advisor.advisor_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Backend base URL, also the audience for ambient identity tokens.
    pub api_base_url: String,
    /// Hostname the dashboard is served from.
    pub serving_host: Option<String>,
    pub trusted_host_suffixes: Vec<String>,
    pub metadata_identity_url: String,
    pub ambient_timeout_ms: u64,
    pub federated_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub client_id: String,
    /// Only needed for OAuth clients registered as confidential.
    pub client_secret: Option<String>,
    pub default_advisor_id: String,
    pub fallback: FallbackProfile,
    pub storage_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            serving_host: None,
            trusted_host_suffixes: vec!["run.app".to_string()],
            metadata_identity_url: DEFAULT_METADATA_IDENTITY_URL.to_string(),
            ambient_timeout_ms: 3_000,
            federated_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            default_advisor_id: "ADV001".to_string(),
            fallback: FallbackProfile::default(),
            storage_path: default_storage_path(),
        }
    }
}

impl AuthConfig {
    pub fn ambient_timeout(&self) -> Duration {
        Duration::from_millis(self.ambient_timeout_ms)
    }

    pub fn federated_timeout(&self) -> Duration {
        Duration::from_millis(self.federated_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply environment overrides on top of file/default values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("ADVISORDESK_API_URL") {
            self.api_base_url = url;
        }
        if let Some(host) = non_empty("ADVISORDESK_HOST") {
            self.serving_host = Some(host);
        }
        if let Some(client_id) = non_empty("ADVISORDESK_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Some(secret) = non_empty("ADVISORDESK_CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Some(path) = non_empty("ADVISORDESK_STORAGE") {
            self.storage_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("apiBaseUrl", &self.api_base_url),
            ("metadataIdentityUrl", &self.metadata_identity_url),
        ] {
            if url::Url::parse(value).is_err() {
                return Err(ConfigError::InvalidUrl {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".advisordesk")
}

pub fn default_storage_path() -> PathBuf {
    data_dir().join("session.json")
}

/// Path of the config file, honouring `ADVISORDESK_CONFIG`.
pub fn config_path() -> PathBuf {
    std::env::var("ADVISORDESK_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("config.json"))
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AuthConfig, ConfigError> {
    if !path.exists() {
        return Ok(AuthConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AuthConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from the default location, then apply env overrides.
pub fn load_config() -> Result<AuthConfig, ConfigError> {
    let mut config = load_config_from(&config_path())?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}
