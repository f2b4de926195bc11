//! Google sign-in via the browser consent flow.
//!
//! Opens the user's browser at the authorization endpoint, captures the
//! redirect on a localhost listener, exchanges the auth code (PKCE) for
//! tokens and hands the ID token to the sign-in callback.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::federated::{IdentityWidget, SignInCallback};
use crate::error::AuthError;

pub const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const SCOPES: &str = "openid email profile";

/// Endpoints from the OpenID discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

pub struct GoogleConsentWidget {
    client: reqwest::Client,
    discovery_url: String,
    client_secret: Option<String>,
    endpoints: Mutex<Option<ProviderEndpoints>>,
    /// Upper bound on how long the loopback listener stays open.
    max_wait: Duration,
}

impl GoogleConsentWidget {
    pub fn new(client_secret: Option<String>) -> Self {
        Self::with_discovery_url(DISCOVERY_URL, client_secret)
    }

    pub fn with_discovery_url(discovery_url: &str, client_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            discovery_url: discovery_url.to_string(),
            client_secret,
            endpoints: Mutex::new(None),
            max_wait: Duration::from_secs(300),
        }
    }

    pub fn endpoints(&self) -> Option<ProviderEndpoints> {
        self.endpoints.lock().clone()
    }
}

#[async_trait]
impl IdentityWidget for GoogleConsentWidget {
    async fn load(&self) -> Result<(), AuthError> {
        let resp = self
            .client
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::WidgetLoad(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthError::WidgetLoad(format!(
                "discovery document returned {}",
                resp.status()
            )));
        }
        let endpoints: ProviderEndpoints = resp
            .json()
            .await
            .map_err(|e| AuthError::WidgetLoad(e.to_string()))?;
        log::debug!(
            "Identity provider endpoints loaded: {}",
            endpoints.authorization_endpoint
        );
        *self.endpoints.lock() = Some(endpoints);
        Ok(())
    }

    fn prompt(&self, client_id: &str, callback: SignInCallback) -> Result<(), AuthError> {
        let endpoints = self
            .endpoints()
            .ok_or_else(|| AuthError::Widget("identity widget not loaded".into()))?;

        // Bind to a random port
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        std_listener.set_nonblocking(true)?;
        let port = std_listener.local_addr()?.port();
        let listener = TcpListener::from_std(std_listener)?;
        let redirect_uri = format!("http://localhost:{}", port);

        let pkce = Pkce::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let auth_url = authorization_url(&endpoints, client_id, &redirect_uri, &pkce, &state)?;

        log::info!("Opening browser for Google sign-in...");
        if let Err(e) = open::that(auth_url.as_str()) {
            log::warn!("Failed to open browser: {}. URL: {}", e, auth_url);
        }

        let flow = ConsentFlow {
            client: self.client.clone(),
            token_endpoint: endpoints.token_endpoint,
            client_id: client_id.to_string(),
            client_secret: self.client_secret.clone(),
            redirect_uri,
            verifier: pkce.verifier,
            state,
        };
        let max_wait = self.max_wait;
        tokio::spawn(async move {
            let waiter = callback.clone();
            tokio::select! {
                result = tokio::time::timeout(max_wait, flow.run(listener)) => {
                    let result = result.unwrap_or(Err(AuthError::Timeout(max_wait)));
                    callback.deliver(result);
                }
                _ = waiter.settled() => {
                    log::debug!("Sign-in settled elsewhere; closing loopback listener");
                }
            }
        });
        Ok(())
    }
}

struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn authorization_url(
    endpoints: &ProviderEndpoints,
    client_id: &str,
    redirect_uri: &str,
    pkce: &Pkce,
    state: &str,
) -> Result<url::Url, AuthError> {
    url::Url::parse_with_params(
        &endpoints.authorization_endpoint,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| AuthError::Widget(format!("bad authorization endpoint: {}", e)))
}

struct ConsentFlow {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    verifier: String,
    state: String,
}

impl ConsentFlow {
    async fn run(self, listener: TcpListener) -> Result<String, AuthError> {
        let (mut stream, _) = listener.accept().await?;
        let code = self.read_auth_code(&mut stream).await?;
        self.exchange(&code).await
    }

    /// Read the redirect request and extract the auth code.
    async fn read_auth_code(&self, stream: &mut TcpStream) -> Result<String, AuthError> {
        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);

        match parse_redirect(&request, &self.state) {
            Ok(code) => {
                send_response(stream, "Signed in. You can close this tab.").await;
                Ok(code)
            }
            Err(e) => {
                send_response(stream, "Sign-in was not completed. You can close this tab.").await;
                Err(e)
            }
        }
    }

    async fn exchange(&self, code: &str) -> Result<String, AuthError> {
        let mut form = vec![
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", self.verifier.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.client.post(&self.token_endpoint).form(&form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status,
                message: format!("Token exchange failed: {}", body),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        body["id_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AuthError::Widget("No id_token in token response".into()))
    }
}

/// Parse `GET /?code=...&state=... HTTP/1.1` into the auth code.
fn parse_redirect(request: &str, expected_state: &str) -> Result<String, AuthError> {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or(AuthError::FlowCancelled)?;
    let url = url::Url::parse(&format!("http://localhost{}", path))
        .map_err(|_| AuthError::FlowCancelled)?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::Widget(value.into_owned())),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::Widget("OAuth state mismatch".into()));
    }
    code.filter(|c| !c.is_empty()).ok_or(AuthError::FlowCancelled)
}

async fn send_response(stream: &mut TcpStream, message: &str) {
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{}</h2></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_parse_redirect_extracts_decoded_code() {
        let request = "GET /?state=abc&code=4%2F0Ad-xyz&scope=email HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(parse_redirect(request, "abc").unwrap(), "4/0Ad-xyz");
    }

    #[test]
    fn test_parse_redirect_rejects_denial_and_state_mismatch() {
        let denied = "GET /?error=access_denied&state=abc HTTP/1.1\r\n";
        assert!(matches!(
            parse_redirect(denied, "abc"),
            Err(AuthError::Widget(ref e)) if e == "access_denied"
        ));

        let forged = "GET /?code=x&state=other HTTP/1.1\r\n";
        assert!(matches!(parse_redirect(forged, "abc"), Err(AuthError::Widget(_))));

        assert!(matches!(parse_redirect("", "abc"), Err(AuthError::FlowCancelled)));
    }

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 64);
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn test_authorization_url_carries_pkce_and_state() {
        let endpoints = ProviderEndpoints {
            authorization_endpoint: "https://accounts.example.com/o/oauth2/v2/auth".into(),
            token_endpoint: "https://oauth2.example.com/token".into(),
        };
        let pkce = Pkce::generate();
        let url = authorization_url(&endpoints, "cid", "http://localhost:5000", &pkce, "st").unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["state"], "st");
    }

    #[tokio::test]
    async fn test_load_reads_discovery_document() {
        let server = MockServer::start();
        let discovery = server.mock(|when, then| {
            when.method(GET).path("/.well-known/openid-configuration");
            then.status(200).json_body(serde_json::json!({
                "issuer": "https://accounts.example.com",
                "authorization_endpoint": "https://accounts.example.com/auth",
                "token_endpoint": "https://oauth2.example.com/token"
            }));
        });

        let widget = GoogleConsentWidget::with_discovery_url(
            &server.url("/.well-known/openid-configuration"),
            None,
        );
        widget.load().await.expect("load");
        discovery.assert();
        assert_eq!(
            widget.endpoints().unwrap().token_endpoint,
            "https://oauth2.example.com/token"
        );
    }

    #[tokio::test]
    async fn test_load_failure_is_widget_load_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/.well-known/openid-configuration");
            then.status(503);
        });

        let widget = GoogleConsentWidget::with_discovery_url(
            &server.url("/.well-known/openid-configuration"),
            None,
        );
        assert!(matches!(widget.load().await, Err(AuthError::WidgetLoad(_))));
    }

    #[tokio::test]
    async fn test_prompt_before_load_is_an_error() {
        let widget = GoogleConsentWidget::new(None);
        let (callback, _rx) = SignInCallback::channel();
        assert!(matches!(
            widget.prompt("cid", callback),
            Err(AuthError::Widget(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_returns_id_token() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("code=the-code")
                .body_includes("code_verifier=verifier")
                .body_includes("grant_type=authorization_code");
            then.status(200).json_body(serde_json::json!({
                "access_token": "ya29.a",
                "id_token": "h.p.s",
                "expires_in": 3599
            }));
        });

        let flow = ConsentFlow {
            client: reqwest::Client::new(),
            token_endpoint: server.url("/token"),
            client_id: "cid".into(),
            client_secret: None,
            redirect_uri: "http://localhost:1".into(),
            verifier: "verifier".into(),
            state: "st".into(),
        };
        assert_eq!(flow.exchange("the-code").await.unwrap(), "h.p.s");
        token.assert();
    }
}
