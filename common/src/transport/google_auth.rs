// Google OAuth access tokens
// Service accounts sign an RS256 JWT bearer grant; user tokens are refreshed.

use crate::config::{AuthorizedUserToken, ServiceAccountKey};
use crate::errors::TransportError;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime and the margin kept before a cached token expires
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
enum Grant {
    ServiceAccount {
        key: ServiceAccountKey,
        scope: String,
    },
    RefreshToken(AuthorizedUserToken),
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// TokenProvider hands out bearer tokens, refreshing them shortly before expiry
pub struct TokenProvider {
    client: Client,
    grant: Grant,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn service_account(client: Client, key: ServiceAccountKey, scope: impl Into<String>) -> Self {
        Self {
            client,
            grant: Grant::ServiceAccount {
                key,
                scope: scope.into(),
            },
            cached: Mutex::new(None),
        }
    }

    pub fn authorized_user(client: Client, token: AuthorizedUserToken) -> Self {
        Self {
            client,
            grant: Grant::RefreshToken(token),
            cached: Mutex::new(None),
        }
    }

    /// A valid access token, fetching a new one when the cached one is stale
    pub async fn access_token(&self) -> Result<String, TransportError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let response = self.fetch().await?;
        let token = CachedToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<TokenResponse, TransportError> {
        let (token_uri, form) = match &self.grant {
            Grant::ServiceAccount { key, scope } => {
                let assertion = sign_assertion(key, scope)?;
                (
                    key.token_uri.as_str(),
                    vec![
                        ("grant_type", JWT_BEARER_GRANT.to_string()),
                        ("assertion", assertion),
                    ],
                )
            }
            Grant::RefreshToken(token) => (
                token.token_uri.as_str(),
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("client_id", token.client_id.clone()),
                    ("client_secret", token.client_secret.clone()),
                    ("refresh_token", token.refresh_token.clone()),
                ],
            ),
        };

        let response = self
            .client
            .post(token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| TransportError::Auth(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "Token endpoint {} answered {}: {}",
                token_uri, status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Auth(format!("Invalid token response: {}", e)))?;
        debug!(expires_in = token.expires_in, "Access token obtained");
        Ok(token)
    }
}

/// Sign the RS256 assertion of the JWT bearer grant
pub fn sign_assertion(key: &ServiceAccountKey, scope: &str) -> Result<String, TransportError> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| TransportError::Auth(format!("Invalid service account key: {}", e)))?;

    let iat = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| TransportError::Auth(format!("Failed to sign assertion: {}", e)))
}
