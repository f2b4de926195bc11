//! Trusted-environment detection.
//!
//! The dashboard is "trusted" when it is served from a managed hosting
//! domain where the platform hands out ambient service identity.

/// Inputs the detector reads. Captured once so repeated detection is stable.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentDetector {
    host: Option<String>,
    trusted_suffixes: Vec<String>,
}

impl EnvironmentDetector {
    pub fn new(host: Option<&str>, trusted_suffixes: &[String]) -> Self {
        Self {
            host: host.map(normalize_host),
            trusted_suffixes: trusted_suffixes
                .iter()
                .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Build from config, falling back to `$HOSTNAME` when no serving host is set.
    pub fn from_config(config: &crate::config::AuthConfig) -> Self {
        let host = config
            .serving_host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok());
        Self::new(host.as_deref(), &config.trusted_host_suffixes)
    }

    /// True when the serving host is under a trusted hosting suffix.
    pub fn is_trusted(&self) -> bool {
        let Some(host) = self.host.as_deref() else {
            return false;
        };
        self.trusted_suffixes
            .iter()
            .any(|suffix| host == suffix || host.ends_with(&format!(".{}", suffix)))
    }
}

/// Strip scheme, port and path so full URLs and bare hosts compare alike.
fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let host = url::Url::parse(trimmed)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            let authority = trimmed.split('/').next().unwrap_or_default();
            authority.split(':').next().unwrap_or_default().to_string()
        });
    host.trim_end_matches('.').to_ascii_lowercase()
}
