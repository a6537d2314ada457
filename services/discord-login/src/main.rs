//! Discord login service
//!
//! Single-binary axum service that:
//! 1. Redirects users to Discord's consent screen (`/login`)
//! 2. Completes the authorization-code grant (`/callback`)
//! 3. Keeps the session in an encrypted cookie
//! 4. Serves the user's profile, guilds and connections from a shared cache

mod config;
mod error;
mod metrics;
mod routes;
mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum_extra::extract::cookie::Key;
use discord_oauth::{DiscordOAuth, FileTokenStore, TokenStore};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, TokenStoreKind};
use crate::routes::AppState;
use crate::session::CookieSettings;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/login", get(routes::login))
        .route("/callback", get(routes::callback))
        .route("/me", get(routes::me))
        .route("/me/guilds", get(routes::guilds))
        .route("/me/connections", get(routes::connections))
        .route("/guilds/{guild_id}/join", post(routes::join_guild))
        .route("/logout", post(routes::logout))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics_handler))
        .layer(middleware::from_fn(request_span))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Tag every request's events with an id.
async fn request_span(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting discord-login");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let oauth_config = config
        .oauth_config()
        .context("invalid Discord configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        client_id = %oauth_config.client_id(),
        redirect_uri = %oauth_config.redirect_uri(),
        api_base_url = %oauth_config.api_base_url(),
        cache_max_size = oauth_config.cache_max_size(),
        cache_policy = ?oauth_config.cache_policy(),
        token_store = ?config.session.token_store,
        bot = oauth_config.bot_token().is_some(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let mut oauth = DiscordOAuth::with_http_client(oauth_config, http);
    if config.session.token_store == TokenStoreKind::File {
        let path = config
            .session
            .token_file
            .clone()
            .context("session.token_file is required for the file token store")?;
        let store = FileTokenStore::open(path)
            .await
            .context("failed to load token file")?;
        oauth = oauth.with_token_store(Arc::new(store) as Arc<dyn TokenStore>);
    }

    let cookie_secret = config
        .session
        .cookie_secret
        .as_ref()
        .context("cookie secret is not set")?;

    let state = AppState {
        oauth,
        cookies: CookieSettings {
            key: Key::derive_from(cookie_secret.expose().as_bytes()),
            name: config.session.cookie_name.clone(),
            secure: config.session.secure,
            ttl: time::Duration::days(config.session.ttl_days),
        },
        started_at: Instant::now(),
        prometheus,
    };

    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use common::Secret;
    use discord_oauth::OAuthConfig;
    use metrics_exporter_prometheus::PrometheusHandle;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// Start a Discord double: token endpoint plus `/users/@me`, counting
    /// profile fetches.
    async fn start_discord() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let user_hits = Arc::new(AtomicUsize::new(0));

        let hits = user_hits.clone();
        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/api/oauth2/token",
                    axum::routing::post(|| async {
                        Json(json!({
                            "access_token": "user-at",
                            "token_type": "Bearer",
                            "expires_in": 604800,
                            "refresh_token": "user-rt",
                            "scope": "identify guilds",
                        }))
                    }),
                )
                .route(
                    "/api/users/@me",
                    get(move || {
                        let hits = hits.clone();
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            Json(json!({
                                "id": "80351110224678912",
                                "username": "nelly",
                                "discriminator": "0",
                            }))
                        }
                    }),
                )
                .route(
                    "/api/users/@me/guilds",
                    get(|| async {
                        Json(json!([
                            {"id": "197038439483310086", "name": "Discord Testers", "permissions": "8"}
                        ]))
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        (url, user_hits)
    }

    fn test_app_state(api_base: &str) -> AppState {
        let config = OAuthConfig::new(
            "1234567890",
            Secret::from("client-secret"),
            "http://localhost:8080/callback",
        )
        .unwrap()
        .with_api_base_url(api_base)
        .unwrap();

        AppState {
            oauth: DiscordOAuth::new(config),
            cookies: CookieSettings {
                key: Key::generate(),
                name: "discord_session".into(),
                secure: false,
                ttl: time::Duration::days(7),
            },
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        }
    }

    /// `name=value` part of the response's session cookie.
    fn session_cookie(response: &Response) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("discord_session="))
            .and_then(|v| v.split(';').next())
            .unwrap_or_default()
            .to_string()
    }

    fn get_request(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let app = build_router(test_app_state("http://127.0.0.1:1/api"), 1000);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["authorized"], false);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let app = build_router(test_app_state("http://127.0.0.1:1/api"), 1000);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn login_redirects_to_discord_with_state_cookie() {
        let app = build_router(test_app_state("https://discord.com/api"), 1000);
        let response = app
            .oneshot(get_request("/login?scope=identify&next=/dashboard", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let target = location(&response);
        assert!(target.starts_with("https://discord.com/api/oauth2/authorize?"), "{target}");
        assert!(target.contains("client_id=1234567890"), "{target}");
        assert!(target.contains("scope=identify"), "{target}");
        assert!(target.contains("state="), "{target}");
        assert!(!session_cookie(&response).is_empty());
    }

    #[tokio::test]
    async fn login_rejects_prompt_none_with_bot_scope() {
        let app = build_router(test_app_state("https://discord.com/api"), 1000);
        let response = app
            .oneshot(get_request("/login?scope=bot&prompt=none", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(session_cookie(&response).is_empty());
    }

    #[tokio::test]
    async fn provider_error_returns_403() {
        let app = build_router(test_app_state("http://127.0.0.1:1/api"), 1000);
        let response = app
            .oneshot(get_request("/callback?error=access_denied", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "provider_error");
    }

    #[tokio::test]
    async fn me_without_session_is_401() {
        let app = build_router(test_app_state("http://127.0.0.1:1/api"), 1000);
        let response = app.oneshot(get_request("/me", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn callback_with_foreign_state_is_400() {
        let app = build_router(test_app_state("http://127.0.0.1:1/api"), 1000);
        let response = app
            .oneshot(get_request("/callback?code=abc&state=not-ours", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_state");
    }

    #[tokio::test]
    async fn full_login_fetch_logout_cycle() {
        let (api, user_hits) = start_discord().await;
        let app = build_router(test_app_state(&api), 1000);

        // Login: state lands in the cookie and the redirect
        let response = app
            .clone()
            .oneshot(get_request("/login?next=/dashboard", ""))
            .await
            .unwrap();
        let cookie = session_cookie(&response);
        let authorize = reqwest::Url::parse(&location(&response)).unwrap();
        let state = authorize
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        // Callback: code exchanged, redirected to the embedded `next`
        let response = app
            .clone()
            .oneshot(get_request(
                &format!("/callback?code=auth-code&state={state}"),
                &cookie,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        let cookie = session_cookie(&response);

        // Profile served once from Discord, then from cache
        let response = app.clone().oneshot(get_request("/me", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = match session_cookie(&response) {
            updated if !updated.is_empty() => updated,
            _ => cookie,
        };
        let json = body_json(response).await;
        assert_eq!(json["username"], "nelly");

        let response = app.clone().oneshot(get_request("/me", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(user_hits.load(Ordering::SeqCst), 1);

        let response = app
            .clone()
            .oneshot(get_request("/me/guilds", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["name"], "Discord Testers");

        // Logout clears the session
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = session_cookie(&response);

        let response = app.oneshot(get_request("/me", &cleared)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn callback_ignores_unsafe_next() {
        let (api, _) = start_discord().await;
        let app = build_router(test_app_state(&api), 1000);

        for next in ["/%5Cevil.example", "/x%0Ay", "https://evil.example/"] {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/login?next={next}"), ""))
                .await
                .unwrap();
            let cookie = session_cookie(&response);
            let authorize = reqwest::Url::parse(&location(&response)).unwrap();
            let state = authorize
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();

            let response = app
                .clone()
                .oneshot(get_request(
                    &format!("/callback?code=auth-code&state={state}"),
                    &cookie,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "next={next}");
            assert_eq!(location(&response), "/me", "next={next}");
        }
    }
}
