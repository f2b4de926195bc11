//! Dashboard REST client.
//!
//! Every call carries the session's `auth_headers()`. Advisor-scoped reads
//! add `advisor_id` for the resident advisor. A 401/403 drops the stored
//! credential so the next start asks for sign-in again.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::AuthError;
use crate::session::AuthSession;

pub struct DashboardClient {
    session: Arc<AuthSession>,
}

impl DashboardClient {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    pub async fn todo(&self) -> Result<Value, AuthError> {
        self.get_scoped("todo", &[]).await
    }

    /// Next best actions for the current advisor.
    pub async fn nba(&self) -> Result<Value, AuthError> {
        self.get_scoped("nba", &[]).await
    }

    pub async fn clients(&self) -> Result<Value, AuthError> {
        self.get_scoped("clients", &[]).await
    }

    /// Portfolio aggregation, optionally narrowed to one client.
    pub async fn aggregation(&self, client_id: Option<&str>) -> Result<Value, AuthError> {
        match client_id {
            Some(id) => self.get_scoped("aggregation", &[("client_id", id)]).await,
            None => self.get_scoped("aggregation", &[]).await,
        }
    }

    pub async fn dashboard_metrics(&self) -> Result<Value, AuthError> {
        self.get("dashboard-metrics", &[]).await
    }

    /// Chat request; `advisor_id` is merged into the body.
    pub async fn chat(&self, request: Value) -> Result<Value, AuthError> {
        let mut body = match request {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("message".to_string(), other);
                map
            }
        };
        body.insert(
            "advisor_id".to_string(),
            Value::String(self.session.current_advisor_id()),
        );
        self.post("chat", &Value::Object(body)).await
    }

    pub async fn draft_message<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, AuthError> {
        self.post("draft-message", body).await
    }

    pub async fn calendar_invite<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, AuthError> {
        self.post("calendar-invite", body).await
    }

    pub async fn summarize<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, AuthError> {
        self.post("summarize", body).await
    }

    pub async fn ingest_data<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, AuthError> {
        self.post("ingest-data", body).await
    }

    async fn get_scoped<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, AuthError> {
        let advisor_id = self.session.current_advisor_id();
        let mut query = vec![("advisor_id", advisor_id.as_str())];
        query.extend_from_slice(extra);
        self.get(path, &query).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AuthError> {
        let backend = self.session.backend();
        let resp = backend
            .http()
            .get(backend.endpoint(path))
            .headers(self.session.auth_headers())
            .query(query)
            .send()
            .await?;
        self.handle_response(path, resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let backend = self.session.backend();
        let resp = backend
            .http()
            .post(backend.endpoint(path))
            .headers(self.session.auth_headers())
            .json(body)
            .send()
            .await?;
        self.handle_response(path, resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, AuthError> {
        if resp.status().is_success() {
            return Ok(resp.json().await?);
        }

        let err = crate::backend::status_error(resp).await;
        log::warn!("/{} failed: {}", path, err);
        if !err.is_unauthorized() {
            return Err(err);
        }
        self.session.invalidate_credential();
        match err {
            AuthError::Status { status, message } => Err(AuthError::Status {
                status,
                message: format!("{} - Please check your authentication token", message),
            }),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::federated::testing::{Script, ScriptedWidget};
    use crate::config::AuthConfig;
    use crate::environment::EnvironmentDetector;
    use crate::session_store::SessionStore;
    use httpmock::prelude::*;

    async fn signed_in(server: &MockServer) -> Arc<AuthSession> {
        let config = AuthConfig {
            api_base_url: server.base_url(),
            metadata_identity_url: server.url("/identity"),
            ..AuthConfig::default()
        };
        let auth = AuthSession::new(
            &config,
            Arc::new(ScriptedWidget::new(Script::Silent)),
            SessionStore::in_memory(),
        )
        .with_environment(EnvironmentDetector::new(Some("localhost"), &[]));
        auth.bootstrap().await;
        auth.sign_in_with_token("tok-abc").await.expect("token");
        Arc::new(auth)
    }

    #[tokio::test]
    async fn test_scoped_get_uses_default_advisor_and_bearer() {
        let server = MockServer::start();
        let todo = server.mock(|when, then| {
            when.method(GET)
                .path("/todo")
                .query_param("advisor_id", "ADV001")
                .header("Authorization", "Bearer tok-abc");
            then.status(200)
                .json_body(serde_json::json!({ "todo": ["call client"] }));
        });

        let client = DashboardClient::new(signed_in(&server).await);
        let body = client.todo().await.expect("todo");
        todo.assert();
        assert_eq!(body["todo"][0], "call client");
    }

    #[tokio::test]
    async fn test_aggregation_passes_client_id() {
        let server = MockServer::start();
        let agg = server.mock(|when, then| {
            when.method(GET)
                .path("/aggregation")
                .query_param("advisor_id", "ADV001")
                .query_param("client_id", "C42");
            then.status(200).json_body(serde_json::json!({ "aggregation": {} }));
        });

        let client = DashboardClient::new(signed_in(&server).await);
        client.aggregation(Some("C42")).await.expect("aggregation");
        agg.assert();
    }

    #[tokio::test]
    async fn test_chat_merges_advisor_id() {
        let server = MockServer::start();
        let chat = server.mock(|when, then| {
            when.method(POST).path("/chat").json_body(serde_json::json!({
                "message": "hello",
                "advisor_id": "ADV001"
            }));
            then.status(200).json_body(serde_json::json!({ "reply": "hi" }));
        });

        let client = DashboardClient::new(signed_in(&server).await);
        let body = client
            .chat(serde_json::json!({ "message": "hello" }))
            .await
            .expect("chat");
        chat.assert();
        assert_eq!(body["reply"], "hi");
    }

    #[tokio::test]
    async fn test_error_detail_is_appended() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/summarize");
            then.status(422)
                .json_body(serde_json::json!({ "detail": "text is required" }));
        });

        let client = DashboardClient::new(signed_in(&server).await);
        let err = client
            .summarize(&serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            AuthError::Status { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "HTTP 422: Unprocessable Entity - text is required");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_drops_credential() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/dashboard-metrics");
            then.status(401)
                .json_body(serde_json::json!({ "detail": "Invalid token" }));
        });

        let session = signed_in(&server).await;
        let client = DashboardClient::new(Arc::clone(&session));
        let err = client.dashboard_metrics().await.unwrap_err();

        assert!(err.is_unauthorized());
        assert!(err
            .to_string()
            .ends_with("Invalid token - Please check your authentication token"));
        assert!(!session.identity().authenticated);
        assert!(session.credential().is_none());
    }
}
