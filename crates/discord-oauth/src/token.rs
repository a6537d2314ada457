//! Authorization code exchange
//!
//! Completes the grant by POSTing the code to the token endpoint with the
//! client credentials. Refresh is deliberately absent: a token that expires
//! sends the user back through authorization.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Raw response from the token endpoint.
///
/// `scope` is the space-separated list Discord actually granted, which may be
/// narrower than what was requested.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Token record persisted by a [`crate::TokenStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    pub expires_in: u64,
    /// Expiration as a unix timestamp in seconds
    pub expires_at: u64,
}

impl OAuthToken {
    /// Build the stored record, anchoring `expires_in` at `now` (unix seconds).
    pub fn from_response(response: TokenResponse, now: u64) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token,
            scope: response.scope.split_whitespace().map(str::to_owned).collect(),
            expires_in: response.expires_in,
            expires_at: now.saturating_add(response.expires_in),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the token can still authorize requests at `now`.
    pub fn is_valid(&self, now: u64) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Exchange an authorization code for a token record.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<OAuthToken> {
    let response = client
        .post(config.token_url())
        .form(&[
            ("client_id", config.client_id()),
            ("client_secret", config.client_secret().expose().as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;

    debug!(scope = %token.scope, expires_in = token.expires_in, "authorization code exchanged");
    Ok(OAuthToken::from_response(token, unix_now()))
}
