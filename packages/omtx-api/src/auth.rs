//! Bearer-token verification for the Completion Handler. The worker
//! authenticates with an OIDC identity token minted by
//! [`omtx_dispatch::OidcSigner`] against the same shared signing secret
//! (the real task queue would mint this from its own service identity;
//! since the queue is out of scope, dispatcher and verifier here share
//! a dev-friendly HMAC secret instead of a JWKS round-trip).

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use omtx_types::error::{ApiError, ErrorKind};

#[derive(Debug, Deserialize)]
struct Claims {
    #[allow(dead_code)]
    iss: String,
    #[allow(dead_code)]
    sub: String,
    #[allow(dead_code)]
    aud: String,
}

pub struct WebhookAuthenticator {
    signing_secret: Vec<u8>,
    expected_audience: String,
    dev_auth: bool,
}

impl WebhookAuthenticator {
    pub fn new(signing_secret: Vec<u8>, expected_audience: impl Into<String>, dev_auth: bool) -> Self {
        Self {
            signing_secret,
            expected_audience: expected_audience.into(),
            dev_auth,
        }
    }

    /// Verifies the `Authorization: Bearer <token>` header. In dev mode
    /// (`OMTX_DEV_AUTH=1`) any non-empty bearer token is accepted without
    /// cryptographic verification, so a worker can be exercised locally
    /// without provisioning the shared signing secret.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::new(ErrorKind::AuthError, "missing bearer token"))?;

        if self.dev_auth {
            if token.is_empty() {
                return Err(ApiError::new(ErrorKind::AuthError, "empty bearer token"));
            }
            return Ok(());
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.expected_audience]);
        decode::<Claims>(token, &DecodingKey::from_secret(&self.signing_secret), &validation)
            .map(|_| ())
            .map_err(|e| ApiError::new(ErrorKind::AuthError, format!("invalid completion token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn dev_auth_accepts_any_non_empty_token() {
        let auth = WebhookAuthenticator::new(b"secret".to_vec(), "aud", true);
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert!(auth.verify(&headers).is_ok());
    }

    #[test]
    fn missing_header_is_rejected() {
        let auth = WebhookAuthenticator::new(b"secret".to_vec(), "aud", true);
        let headers = HeaderMap::new();
        assert!(auth.verify(&headers).is_err());
    }

    #[test]
    fn production_mode_verifies_signature() {
        let secret = b"shared-secret".to_vec();
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &serde_json::json!({"iss": "worker@omtx.iam", "sub": "worker@omtx.iam", "aud": "omtx-api", "exp": 9_999_999_999i64}),
            &jsonwebtoken::EncodingKey::from_secret(&secret),
        )
        .unwrap();

        let auth = WebhookAuthenticator::new(secret, "omtx-api", false);
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert!(auth.verify(&headers).is_ok());
    }
}
