//! HTTP client for the advisor backend.
//!
//! Only the endpoints the session core depends on live here; the dashboard
//! endpoints consumed by widgets are in `api`.

use std::time::Duration;

use serde::Deserialize;

use crate::advisor::AdvisorRecord;
use crate::error::AuthError;

/// Body shape of `/advisor-by-email` and `/advisor-by-id`.
///
/// The backend answers 200 with `{"error": "..."}` for bad input, so a
/// missing advisor is not an HTTP failure.
#[derive(Debug, Deserialize)]
struct AdvisorEnvelope {
    #[serde(default)]
    advisor: Option<AdvisorRecord>,
    #[serde(default)]
    error: Option<String>,
}

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Look up the advisor whose email matches `email`.
    pub async fn advisor_by_email(&self, email: &str) -> Result<Option<AdvisorRecord>, AuthError> {
        self.post_advisor("advisor-by-email", serde_json::json!({ "email": email }))
            .await
    }

    /// Look up an advisor by its domain id.
    pub async fn advisor_by_id(&self, advisor_id: &str) -> Result<Option<AdvisorRecord>, AuthError> {
        self.post_advisor(
            "advisor-by-id",
            serde_json::json!({ "advisor_id": advisor_id }),
        )
        .await
    }

    /// Probe backend reachability with a bearer credential.
    pub async fn auth_check(&self, token: &str) -> Result<serde_json::Value, AuthError> {
        let resp = self
            .client
            .get(self.endpoint("auth-check"))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn post_advisor(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Option<AdvisorRecord>, AuthError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let envelope: AdvisorEnvelope = resp.json().await?;
        if let Some(message) = envelope.error.as_deref() {
            log::debug!("{} returned error payload: {}", path, message);
        }
        Ok(envelope.advisor)
    }
}

/// Convert a non-success response into `AuthError::Status`, appending the
/// backend's `detail` field when the body carries one.
pub(crate) async fn status_error(resp: reqwest::Response) -> AuthError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let mut message = format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    if let Some(detail) = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
    {
        message.push_str(" - ");
        message.push_str(&detail);
    }
    AuthError::Status {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> BackendClient {
        BackendClient::new(&server.base_url(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_advisor_by_email_accepts_backend_name_field() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/advisor-by-email")
                .json_body(serde_json::json!({ "email": "ana@privatebank.com" }));
            then.status(200).json_body(serde_json::json!({
                "advisor": {
                    "advisor_id": "ADV007",
                    "name": "Ana Ortiz",
                    "email": "ana@privatebank.com",
                    "specialization": "Estate Planning",
                    "years_experience": 9,
                    "location": "Boston",
                    "found": true
                }
            }));
        });

        let advisor = client(&server)
            .advisor_by_email("ana@privatebank.com")
            .await
            .expect("lookup")
            .expect("advisor");
        assert_eq!(advisor.advisor_id, "ADV007");
        assert_eq!(advisor.full_name, "Ana Ortiz");
        assert_eq!(advisor.years_experience, Some(9));
        assert!(!advisor.is_default);
    }

    #[tokio::test]
    async fn test_error_payload_is_no_advisor() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/advisor-by-id");
            then.status(200)
                .json_body(serde_json::json!({ "error": "Advisor ID is required" }));
        });

        let advisor = client(&server).advisor_by_id("").await.expect("lookup");
        assert!(advisor.is_none());
    }

    #[tokio::test]
    async fn test_status_error_carries_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth-check");
            then.status(401)
                .json_body(serde_json::json!({ "detail": "Invalid token" }));
        });

        let err = client(&server).auth_check("tok").await.unwrap_err();
        match err {
            AuthError::Status { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Invalid token"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let backend = BackendClient::new("https://api.example.com/", Duration::from_secs(1));
        assert_eq!(
            backend.endpoint("/advisor-by-id"),
            "https://api.example.com/advisor-by-id"
        );
    }
}
