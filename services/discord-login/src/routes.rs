//! Login, callback and resource routes

use std::collections::HashMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;
use discord_oauth::{
    AuthorizationRequest, Callback, CallbackParams, DiscordOAuth, Guild, Permissions, Prompt,
    Snowflake, User, UserConnection,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Url;
use serde_json::{Value, json};
use tracing::info;

use crate::error::ApiError;
use crate::metrics;
use crate::session::{CookieSession, CookieSettings};

/// Where a completed login lands when the caller embedded no usable `next`.
const DEFAULT_LANDING: &str = "/me";

/// Stand-in origin for resolving `next`; only its identity matters.
const LANDING_ORIGIN: &str = "http://localhost";

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub oauth: DiscordOAuth,
    pub cookies: CookieSettings,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookies.key.clone()
    }
}

/// Translate `/login` query parameters into an authorization request.
///
/// Recognized keys configure the redirect; every other key is carried through
/// the state parameter and returned by the callback.
fn authorization_request(mut query: HashMap<String, String>) -> Result<AuthorizationRequest, ApiError> {
    let mut request = AuthorizationRequest::new();

    if let Some(scope) = query.remove("scope") {
        request = request.scope(
            scope
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        );
    }
    if let Some(prompt) = query.remove("prompt") {
        let prompt = prompt.parse::<Prompt>().map_err(bad_request)?;
        request = request.prompt(prompt);
    }
    if let Some(permissions) = query.remove("permissions") {
        let permissions = permissions.parse::<Permissions>().map_err(bad_request)?;
        request = request.permissions(permissions);
    }
    if let Some(guild_id) = query.remove("guild_id") {
        let guild_id = guild_id
            .parse::<Snowflake>()
            .map_err(|e| ApiError::BadRequest(format!("guild_id: {e}")))?;
        request = request.guild_id(guild_id);
    }
    if let Some(disable) = query.remove("disable_guild_select") {
        let disable = disable
            .parse::<bool>()
            .map_err(|e| ApiError::BadRequest(format!("disable_guild_select: {e}")))?;
        request = request.disable_guild_select(disable);
    }
    for (key, value) in query {
        request = request.param(key, value);
    }
    Ok(request)
}

/// Configuration errors raised by caller-supplied login options are the
/// caller's fault, not the server's.
fn bad_request(err: discord_oauth::Error) -> ApiError {
    match err {
        discord_oauth::Error::Configuration(message) => ApiError::BadRequest(message),
        other => other.into(),
    }
}

/// Post-login redirect target: the embedded `next` if it stays on this site,
/// otherwise [`DEFAULT_LANDING`].
fn landing(params: &serde_json::Map<String, Value>) -> String {
    params
        .get("next")
        .and_then(Value::as_str)
        .and_then(local_path)
        .unwrap_or_else(|| DEFAULT_LANDING.to_owned())
}

/// Resolve `next` the way a browser would and keep it only if the origin is
/// unchanged. Backslashes and control characters are refused outright since
/// browsers fold them into `//host` forms.
fn local_path(next: &str) -> Option<String> {
    if !next.starts_with('/') || next.contains('\\') || next.chars().any(char::is_control) {
        return None;
    }
    let base = Url::parse(LANDING_ORIGIN).ok()?;
    let resolved = base.join(next).ok()?;
    if resolved.origin() != base.origin() {
        return None;
    }
    let mut target = resolved.path().to_owned();
    if let Some(query) = resolved.query() {
        target.push('?');
        target.push_str(query);
    }
    Some(target)
}

pub async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<HashMap<String, String>>,
) -> Result<(PrivateCookieJar, Redirect), ApiError> {
    let request = authorization_request(query)?;
    let mut session = CookieSession::load(jar, &state.cookies);
    let url = state
        .oauth
        .create_session(&mut session, request)
        .map_err(bad_request)?;
    metrics::record_authorization();
    Ok((session.into_jar(&state.cookies), Redirect::to(&url)))
}

pub async fn callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(PrivateCookieJar, Redirect), ApiError> {
    let mut session = CookieSession::load(jar, &state.cookies);
    let outcome = match state.oauth.callback(&mut session, &params).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_callback("error");
            return Err(e.into());
        }
    };

    match outcome {
        Callback::Complete { params } => {
            metrics::record_callback("complete");
            let target = landing(&params);
            info!(target = %target, "login completed");
            let redirect = Redirect::to(&target);
            Ok((session.into_jar(&state.cookies), redirect))
        }
        Callback::Failed { error } => {
            metrics::record_callback("failed");
            Err(ApiError::Provider(error))
        }
    }
}

pub async fn me(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<User>), ApiError> {
    let mut session = CookieSession::load(jar, &state.cookies);
    let user = state.oauth.fetch_user(&mut session).await?;
    Ok((session.into_jar(&state.cookies), Json(user)))
}

pub async fn guilds(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<Vec<Guild>>), ApiError> {
    let mut session = CookieSession::load(jar, &state.cookies);
    let guilds = state.oauth.fetch_guilds(&mut session).await?;
    Ok((session.into_jar(&state.cookies), Json(guilds)))
}

pub async fn connections(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<Vec<UserConnection>>), ApiError> {
    let mut session = CookieSession::load(jar, &state.cookies);
    let connections = state.oauth.fetch_connections(&mut session).await?;
    Ok((session.into_jar(&state.cookies), Json(connections)))
}

pub async fn join_guild(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(guild_id): Path<String>,
) -> Result<(PrivateCookieJar, Json<Value>), ApiError> {
    let guild_id = guild_id
        .parse::<Snowflake>()
        .map_err(|e| ApiError::BadRequest(format!("guild_id: {e}")))?;
    let mut session = CookieSession::load(jar, &state.cookies);
    let member = state.oauth.add_to_guild(&mut session, guild_id).await?;
    Ok((session.into_jar(&state.cookies), Json(member)))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Json<Value>), ApiError> {
    let mut session = CookieSession::load(jar, &state.cookies);
    state.oauth.revoke(&mut session).await?;
    Ok((
        session.into_jar(&state.cookies),
        Json(json!({ "status": "logged_out" })),
    ))
}

/// Health endpoint: status, uptime and whether this request's session is
/// authorized.
pub async fn health(State(state): State<AppState>, jar: PrivateCookieJar) -> impl IntoResponse {
    let session = CookieSession::load(jar, &state.cookies);
    let authorized = state.oauth.authorized(&session).await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "cached_users": state.oauth.cache().entry_count(),
            "authorized": authorized,
        })),
    )
}

/// Prometheus metrics in text exposition format.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
        .into_response()
}
