//! Discord REST collaborator
//!
//! Thin wrapper over `reqwest` that authenticates either as the user (their
//! OAuth bearer token) or as the application's bot, and classifies failures.
//! No retries: a 429 surfaces as [`Error::RateLimited`] with Discord's
//! `retry_after` so the caller decides.

use common::Secret;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::token::OAuthToken;

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: Option<Secret<String>>,
}

impl RestClient {
    pub fn new(http: reqwest::Client, config: &OAuthConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url().to_string(),
            bot_token: config.bot_token().cloned(),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.api_base_url, route)
    }

    /// GET `route` as the user owning `token`.
    pub async fn get_json<T: DeserializeOwned>(&self, route: &str, token: &OAuthToken) -> Result<T> {
        let request = self
            .http
            .get(self.url(route))
            .header(reqwest::header::AUTHORIZATION, token.authorization());
        let value = self.send("user", route, request).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::UpstreamFetch(format!("unexpected payload from {route}: {e}")))
    }

    /// Call `route` authenticated as the application's bot.
    ///
    /// Returns the decoded JSON body, or `Value::Null` for empty responses
    /// (Discord answers 204 to several bot endpoints).
    pub async fn bot_request(
        &self,
        method: Method,
        route: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| Error::Configuration("bot token is not configured".into()))?;

        let mut request = self
            .http
            .request(method, self.url(route))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", token.expose()));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send("bot", route, request).await
    }

    async fn send(&self, kind: &'static str, route: &str, request: RequestBuilder) -> Result<Value> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::counter!("discord_http_requests_total", "kind" => kind, "status" => "error")
                    .increment(1);
                warn!(route = %route, error = %e, "Discord request failed");
                return Err(Error::Http(format!("{route}: {e}")));
            }
        };

        let status = response.status();
        metrics::counter!(
            "discord_http_requests_total",
            "kind" => kind,
            "status" => status.as_u16().to_string()
        )
        .increment(1);

        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading {route} response: {e}")))?;

        if !status.is_success() {
            warn!(route = %route, status = %status, "Discord returned an error");
            return Err(classify(status, &body));
        }

        debug!(route = %route, status = %status, "Discord request completed");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::UpstreamFetch(format!("invalid JSON from {route}: {e}")))
    }
}

/// Map a non-success status and body to an error.
pub(crate) fn classify(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => {
            Error::Unauthorized("Discord rejected the access token".into())
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            Error::RateLimited {
                retry_after: parsed
                    .get("retry_after")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                global: parsed
                    .get("global")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }
        }
        _ => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| body.chars().take(200).collect());
            Error::UpstreamFetch(format!("{status}: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[test]
    fn unauthorized_maps_to_unauthorized() {
        let err = classify(StatusCode::UNAUTHORIZED, r#"{"message":"401: Unauthorized","code":0}"#);
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = classify(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"message":"You are being rate limited.","retry_after":1.5,"global":true}"#,
        );
        match err {
            Error::RateLimited { retry_after, global } => {
                assert_eq!(retry_after, 1.5);
                assert!(global);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_without_body_defaults() {
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::RateLimited { retry_after, global: false } if retry_after == 0.0
        ));
    }

    #[test]
    fn other_failures_use_discord_message() {
        let err = classify(
            StatusCode::FORBIDDEN,
            r#"{"message":"Missing Access","code":50001}"#,
        );
        assert_eq!(err.to_string(), "upstream fetch failed: 403 Forbidden: Missing Access");
    }

    /// Discord double answering a fixed status and body on every route.
    async fn start_server(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>, Arc<tokio::sync::Mutex<Option<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let auth = Arc::new(tokio::sync::Mutex::new(None));

        let (h, a) = (hits.clone(), auth.clone());
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move |headers: axum::http::HeaderMap| {
                let (h, a) = (h.clone(), a.clone());
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    *a.lock().await = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    (axum::http::StatusCode::from_u16(status).unwrap(), body)
                }
            });
            axum::serve(listener, app).await.unwrap();
        });
        (url, hits, auth)
    }

    fn client(base: &str, bot: Option<&str>) -> RestClient {
        let mut config = OAuthConfig::new("1234", Secret::from("secret"), "http://localhost/callback")
            .unwrap()
            .with_api_base_url(base)
            .unwrap();
        if let Some(bot) = bot {
            config = config.with_bot_token(Secret::from(bot));
        }
        RestClient::new(reqwest::Client::new(), &config)
    }

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "user-at".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            scope: vec!["identify".into()],
            expires_in: 3600,
            expires_at: u64::MAX,
        }
    }

    #[tokio::test]
    async fn get_json_sends_bearer_token() {
        let (url, hits, auth) = start_server(200, r#"{"ok":true}"#).await;
        let value: Value = client(&url, None).get_json("/users/@me", &token()).await.unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(auth.lock().await.as_deref(), Some("Bearer user-at"));
    }

    #[tokio::test]
    async fn bot_request_uses_bot_token_and_tolerates_empty_body() {
        let (url, _, auth) = start_server(204, "").await;
        let value = client(&url, Some("bot-secret"))
            .bot_request(Method::PUT, "/guilds/1/members/2", Some(&serde_json::json!({"access_token": "x"})))
            .await
            .unwrap();

        assert_eq!(value, Value::Null);
        assert_eq!(auth.lock().await.as_deref(), Some("Bot bot-secret"));
    }

    #[tokio::test]
    async fn bot_request_without_bot_token_is_configuration_error() {
        let (url, hits, _) = start_server(200, "{}").await;
        let err = client(&url, None)
            .bot_request(Method::GET, "/guilds/1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_401_is_unauthorized() {
        let (url, _, _) = start_server(401, r#"{"message":"401: Unauthorized"}"#).await;
        let err = client(&url, None)
            .get_json::<Value>("/users/@me", &token())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn requests_are_counted_by_kind_and_status() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (url, _, _) = start_server(200, "{}").await;
        client(&url, None)
            .get_json::<Value>("/users/@me", &token())
            .await
            .unwrap();

        let output = handle.render();
        assert!(output.contains("discord_http_requests_total"), "output: {output}");
        assert!(output.contains("kind=\"user\""), "output: {output}");
        assert!(output.contains("status=\"200\""), "output: {output}");
    }
}
