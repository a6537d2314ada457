//! HTTP error responses
//!
//! Library errors map to status codes with a JSON body of the form
//! `{"error": {"type": "...", "message": "..."}}`.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    OAuth(#[from] discord_oauth::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Discord redirected back with an error (typically `access_denied`).
    #[error("authorization failed: {0}")]
    Provider(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use discord_oauth::Error as E;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Provider(_) => StatusCode::FORBIDDEN,
            ApiError::OAuth(e) => match e {
                E::InvalidState(_) | E::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                E::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                E::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                E::TokenExchange(_) | E::UpstreamFetch(_) | E::Http(_) => StatusCode::BAD_GATEWAY,
                E::Configuration(_) | E::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn error_type(&self) -> &'static str {
        use discord_oauth::Error as E;
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Provider(_) => "provider_error",
            ApiError::OAuth(e) => match e {
                E::Configuration(_) => "configuration_error",
                E::InvalidState(_) => "invalid_state",
                E::InvalidRequest(_) => "invalid_request",
                E::TokenExchange(_) => "token_exchange_error",
                E::Unauthorized(_) => "unauthorized",
                E::RateLimited { .. } => "rate_limited",
                E::UpstreamFetch(_) | E::Http(_) => "upstream_error",
                E::Storage(_) => "storage_error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });
        let mut response = (status, Json(body)).into_response();

        if let ApiError::OAuth(discord_oauth::Error::RateLimited { retry_after, .. }) = &self {
            let secs = retry_after.ceil().max(0.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
