//! Session-bound Discord OAuth2 client
//!
//! [`DiscordOAuth`] ties the pieces together: it builds the authorization
//! redirect, completes the callback, and serves user resources through the
//! shared cache. Every operation takes the caller's session explicitly; the
//! client itself holds only process-wide state (config, HTTP pool, cache,
//! token store) and is cheap to clone into request handlers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::{CachedUser, UserCache};
use crate::config::OAuthConfig;
use crate::constants::{SESSION_ENCODED_STATE, SESSION_KEYS, SESSION_USER_ID};
use crate::error::{Error, Result};
use crate::flow::{Callback, CallbackParams, Step};
use crate::http::RestClient;
use crate::models::{Guild, Snowflake, User, UserConnection};
use crate::permissions::Permissions;
use crate::session::Session;
use crate::state::{self, StateParams};
use crate::store::{SessionTokenStore, TokenStore};
use crate::token::{self, OAuthToken};

/// Whether Discord shows the consent screen again for an already-authorized
/// application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Prompt {
    #[default]
    Consent,
    None,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::Consent => "consent",
            Prompt::None => "none",
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Prompt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "consent" => Ok(Prompt::Consent),
            "none" => Ok(Prompt::None),
            other => Err(Error::Configuration(format!(
                "prompt must be \"consent\" or \"none\", got {other:?}"
            ))),
        }
    }
}

/// Inputs to the authorization redirect.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// Empty means the configured default scopes.
    pub scope: Vec<String>,
    pub prompt: Prompt,
    /// Bot permissions, meaningful with the `bot` scope.
    pub permissions: Option<Permissions>,
    /// Preselect a guild in the bot-authorization dialog.
    pub guild_id: Option<Snowflake>,
    pub disable_guild_select: Option<bool>,
    /// Caller data carried through the state parameter and handed back by
    /// [`DiscordOAuth::callback`].
    pub params: StateParams,
}

impl AuthorizationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn guild_id(mut self, guild_id: Snowflake) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    pub fn disable_guild_select(mut self, disable: bool) -> Self {
        self.disable_guild_select = Some(disable);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone)]
pub struct DiscordOAuth {
    config: Arc<OAuthConfig>,
    rest: RestClient,
    cache: UserCache,
    store: Arc<dyn TokenStore>,
}

impl DiscordOAuth {
    /// Client with an in-session token store and a cache sized from `config`.
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    pub fn with_http_client(config: OAuthConfig, http: reqwest::Client) -> Self {
        let cache = UserCache::new(
            config.cache_max_size(),
            config.cache_policy(),
            config.cache_ttl(),
        );
        Self {
            rest: RestClient::new(http, &config),
            config: Arc::new(config),
            cache,
            store: Arc::new(SessionTokenStore),
        }
    }

    /// Replace the token store, e.g. with a server-side [`crate::FileTokenStore`].
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn cache(&self) -> &UserCache {
        &self.cache
    }

    /// Start a flow: store the state in the session and return the URL to
    /// redirect the user to.
    ///
    /// Fails with [`Error::Configuration`] before touching the session when a
    /// passthrough scope (`bot`, `webhook.incoming`) is combined with
    /// `prompt=none`.
    pub fn create_session(
        &self,
        session: &mut dyn Session,
        request: AuthorizationRequest,
    ) -> Result<String> {
        let scope = if request.scope.is_empty() {
            self.config.default_scopes().to_vec()
        } else {
            request.scope
        };

        if request.prompt != Prompt::Consent
            && let Some(passthrough) = scope.iter().find(|s| self.config.is_passthrough_scope(s))
        {
            return Err(Error::Configuration(format!(
                "scope {passthrough:?} requires prompt=consent"
            )));
        }

        let raw_state = state::generate_state(session);
        let encoded_state = state::encode(&raw_state, &request.params)?;

        let mut query: Vec<(&str, String)> = vec![
            ("response_type", "code".into()),
            ("client_id", self.config.client_id().into()),
            ("redirect_uri", self.config.redirect_uri().into()),
            ("scope", scope.join(" ")),
            ("state", encoded_state.clone()),
            ("prompt", request.prompt.to_string()),
        ];
        if let Some(permissions) = request.permissions {
            query.push(("permissions", permissions.to_string()));
        }
        if let Some(guild_id) = request.guild_id {
            query.push(("guild_id", guild_id.to_string()));
        }
        if let Some(disable) = request.disable_guild_select {
            query.push(("disable_guild_select", disable.to_string()));
        }

        let url = Url::parse_with_params(&self.config.authorize_url(), &query)
            .map_err(|e| Error::Configuration(format!("invalid authorization URL: {e}")))?;

        session.set(SESSION_ENCODED_STATE, Value::String(encoded_state));
        info!(scope = %scope.join(" "), prompt = %request.prompt, "authorization flow started");
        Ok(url.into())
    }

    /// Complete a flow from Discord's redirect.
    ///
    /// The state is verified before the code is exchanged, so a forged or
    /// replayed callback never reaches the token endpoint. On success the
    /// encoded state is consumed and the token persisted.
    pub async fn callback(
        &self,
        session: &mut dyn Session,
        params: &CallbackParams,
    ) -> Result<Callback> {
        match Step::decide(params)? {
            Step::Fail { error } => {
                warn!(error = %error, description = ?params.error_description, "authorization failed at Discord");
                Ok(Callback::Failed {
                    error: error.to_owned(),
                })
            }
            Step::Exchange { code, state } => {
                let embedded = state::verify(session, state)?;
                let token = token::exchange_code(self.rest.http(), &self.config, code).await?;
                self.store.save(session, &token).await?;

                session.remove(SESSION_ENCODED_STATE);
                // A new grant may belong to a different Discord account.
                session.remove(SESSION_USER_ID);

                info!(scope = %token.scope.join(" "), "authorization completed");
                Ok(Callback::Complete { params: embedded })
            }
        }
    }

    /// The session's stored token, if any. Never touches the network.
    pub async fn token(&self, session: &dyn Session) -> Result<Option<OAuthToken>> {
        self.store.load(session).await
    }

    /// Whether the session holds a usable (present, non-empty, unexpired) token.
    pub async fn authorized(&self, session: &dyn Session) -> bool {
        match self.store.load(session).await {
            Ok(Some(token)) => token.is_valid(token::unix_now()),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "unreadable token treated as unauthorized");
                false
            }
        }
    }

    /// Identity recorded by the first successful user fetch.
    pub fn user_id(&self, session: &dyn Session) -> Option<Snowflake> {
        session.get_str(SESSION_USER_ID)?.parse().ok()
    }

    async fn require_token(&self, session: &dyn Session) -> Result<OAuthToken> {
        let token = self
            .store
            .load(session)
            .await?
            .ok_or_else(|| Error::Unauthorized("no token in session".into()))?;
        if !token.is_valid(token::unix_now()) {
            return Err(Error::Unauthorized("token expired".into()));
        }
        Ok(token)
    }

    async fn cached(&self, session: &dyn Session) -> Option<CachedUser> {
        let id = self.user_id(session)?;
        self.cache.get(id).await
    }

    pub async fn fetch_user(&self, session: &mut dyn Session) -> Result<User> {
        let token = self.require_token(session).await?;
        if let Some(entry) = self.cached(session).await {
            record_cache("user", true);
            return Ok(entry.user);
        }
        record_cache("user", false);

        let user: User = self.rest.get_json("/users/@me", &token).await?;
        session.set(SESSION_USER_ID, Value::String(user.id.to_string()));
        self.cache.insert(user.clone()).await;
        debug!(user_id = %user.id, "fetched user");
        Ok(user)
    }

    pub async fn fetch_guilds(&self, session: &mut dyn Session) -> Result<Vec<Guild>> {
        let token = self.require_token(session).await?;
        if let Some(guilds) = self.cached(session).await.and_then(|e| e.guilds) {
            record_cache("guilds", true);
            return Ok(guilds);
        }
        record_cache("guilds", false);

        let guilds: Vec<Guild> = self.fetch(session, "/users/@me/guilds", &token).await?;
        if let Some(id) = self.user_id(session) {
            self.cache.attach_guilds(id, guilds.clone()).await;
        }
        Ok(guilds)
    }

    pub async fn fetch_connections(&self, session: &mut dyn Session) -> Result<Vec<UserConnection>> {
        let token = self.require_token(session).await?;
        if let Some(connections) = self.cached(session).await.and_then(|e| e.connections) {
            record_cache("connections", true);
            return Ok(connections);
        }
        record_cache("connections", false);

        let connections: Vec<UserConnection> =
            self.fetch(session, "/users/@me/connections", &token).await?;
        if let Some(id) = self.user_id(session) {
            self.cache.attach_connections(id, connections.clone()).await;
        }
        Ok(connections)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        session: &dyn Session,
        route: &str,
        token: &OAuthToken,
    ) -> Result<T> {
        let value = self.rest.get_json(route, token).await?;
        debug!(route = %route, user_id = ?self.user_id(session), "fetched resource");
        Ok(value)
    }

    /// Add the authorized user to `guild_id` using the application's bot.
    ///
    /// Needs the `guilds.join` scope on the user's token and a configured bot
    /// token that is a member of the guild.
    pub async fn add_to_guild(
        &self,
        session: &mut dyn Session,
        guild_id: Snowflake,
    ) -> Result<Value> {
        if self.config.bot_token().is_none() {
            return Err(Error::Configuration("bot token is not configured".into()));
        }
        let token = self.require_token(session).await?;
        let user = self.fetch_user(session).await?;

        let route = format!("/guilds/{guild_id}/members/{}", user.id);
        let body = json!({ "access_token": token.access_token });
        let result = self.rest.bot_request(Method::PUT, &route, Some(&body)).await?;
        info!(guild_id = %guild_id, user_id = %user.id, "added user to guild");
        Ok(result)
    }

    /// Bot-authenticated call to any REST route.
    pub async fn bot_request(
        &self,
        method: Method,
        route: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        self.rest.bot_request(method, route, body).await
    }

    /// End the session's authorization: drop the cached resources, clear the
    /// stored token, and remove every key this crate put in the session.
    pub async fn revoke(&self, session: &mut dyn Session) -> Result<()> {
        if let Some(id) = self.user_id(session) {
            self.cache.invalidate(id).await;
        }
        let cleared = self.store.clear(session).await;
        for key in SESSION_KEYS {
            session.remove(key);
        }
        cleared?;
        info!("authorization revoked");
        Ok(())
    }
}

fn record_cache(resource: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("discord_user_cache_total", "resource" => resource, "result" => result)
        .increment(1);
}
