//! Identity token (JWT) payload decoding.
//!
//! Signatures are not verified here; the backend validates every bearer
//! token it receives. We only read the claims needed to label the session.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AuthError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl IdTokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Tokens without an `exp` claim never count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

/// Decode the payload segment of a three-part JWT.
pub fn decode_claims(token: &str) -> Result<IdTokenClaims, AuthError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    // Accept both alphabets, with or without padding.
    let payload = parts[1]
        .trim_end_matches('=')
        .replace('+', "-")
        .replace('/', "_");
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| AuthError::InvalidToken(format!("payload is not base64: {}", e)))?;

    Ok(serde_json::from_slice(&bytes)?)
}

/// Email claim of `token`, or `None` if it cannot be read.
pub fn extract_email(token: &str) -> Option<String> {
    decode_claims(token)
        .ok()
        .and_then(|claims| claims.email)
        .filter(|email| !email.trim().is_empty())
}

/// Short, log-safe prefix of a bearer token.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: serde_json::Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.{}",
        engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        engine.encode(claims.to_string().as_bytes()),
        engine.encode(b"signature")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_claims_reads_email_and_name() {
        let token = encode_test_token(serde_json::json!({
            "email": "ana@privatebank.com",
            "name": "Ana Ortiz",
            "sub": "1234",
            "exp": 1_900_000_000
        }));

        let claims = decode_claims(&token).expect("claims");
        assert_eq!(claims.email.as_deref(), Some("ana@privatebank.com"));
        assert_eq!(claims.name.as_deref(), Some("Ana Ortiz"));
        assert_eq!(extract_email(&token).as_deref(), Some("ana@privatebank.com"));
    }

    #[test]
    fn test_padded_standard_alphabet_payload() {
        let payload = base64::engine::general_purpose::STANDARD
            .encode(br#"{"email":"j@x.io","name":"J?>"}"#);
        let token = format!("h.{}.s", payload);

        let claims = decode_claims(&token).expect("claims");
        assert_eq!(claims.email.as_deref(), Some("j@x.io"));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(
            decode_claims("only.two"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_claims("a.!!!.c"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(extract_email("").is_none());
        assert!(extract_email("demo_token_123").is_none());
    }

    #[test]
    fn test_redact_keeps_prefix_only() {
        assert_eq!(redact("ya29.abcdefghijkl"), "ya29.abc…");
    }

    #[test]
    fn test_expiry_uses_exp_claim() {
        let now = Utc::now();
        let expired = IdTokenClaims {
            exp: Some(now.timestamp() - 60),
            ..IdTokenClaims::default()
        };
        assert!(expired.is_expired_at(now));

        let fresh = IdTokenClaims {
            exp: Some(now.timestamp() + 3_600),
            ..IdTokenClaims::default()
        };
        assert!(!fresh.is_expired_at(now));
        assert!(!IdTokenClaims::default().is_expired_at(now));
    }
}
