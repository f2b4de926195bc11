//! Ambient service identity from the platform metadata server.

use std::time::Duration;

use crate::error::AuthError;

/// Fetches audience-scoped identity tokens from the metadata server.
pub struct AmbientIdentity {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl AmbientIdentity {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            timeout,
        }
    }

    /// Token for `audience`, or `None` when the platform identity is unavailable.
    pub async fn acquire(&self, audience: &str) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.request(audience)).await {
            Ok(Ok(token)) => {
                log::info!("Service identity token acquired for {}", audience);
                Some(token)
            }
            Ok(Err(e)) => {
                log::warn!("Service identity unavailable: {}", e);
                None
            }
            Err(_) => {
                log::warn!("Service identity request timed out after {:?}", self.timeout);
                None
            }
        }
    }

    async fn request(&self, audience: &str) -> Result<String, AuthError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("audience", audience)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(crate::backend::status_error(resp).await);
        }

        let token = resp.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

    fn ambient(server: &MockServer, timeout: Duration) -> AmbientIdentity {
        AmbientIdentity::new(&server.url(IDENTITY_PATH), timeout)
    }

    #[tokio::test]
    async fn test_returns_token_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(IDENTITY_PATH)
                .query_param("audience", "https://backend.example.com")
                .header("Metadata-Flavor", "Google");
            then.status(200).body("tok-123\n");
        });

        let token = ambient(&server, Duration::from_secs(2))
            .acquire("https://backend.example.com")
            .await;
        mock.assert();
        assert_eq!(token.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(IDENTITY_PATH);
            then.status(404).body("not on GCE");
        });

        let token = ambient(&server, Duration::from_secs(2)).acquire("aud").await;
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(IDENTITY_PATH);
            then.status(200)
                .body("late-token")
                .delay(Duration::from_millis(1_500));
        });

        let started = std::time::Instant::now();
        let token = ambient(&server, Duration::from_millis(200)).acquire("aud").await;
        assert!(token.is_none());
        assert!(started.elapsed() < Duration::from_millis(1_200));
    }

    #[tokio::test]
    async fn test_empty_body_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(IDENTITY_PATH);
            then.status(200).body("  ");
        });

        assert!(ambient(&server, Duration::from_secs(2))
            .acquire("aud")
            .await
            .is_none());
    }
}
