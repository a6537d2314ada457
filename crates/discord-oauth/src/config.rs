//! OAuth client configuration
//!
//! Required settings (client id, client secret, redirect URI) are constructor
//! parameters and are validated up front: a misconfigured client fails with
//! [`Error::Configuration`] before any redirect or network call happens.

use std::time::Duration;

use common::Secret;
use reqwest::Url;

use crate::cache::CachePolicy;
use crate::constants::{
    AUTHORIZE_PATH, DEFAULT_CACHE_MAX_SIZE, DEFAULT_SCOPES, DISCORD_API_BASE_URL,
    PASSTHROUGH_SCOPES, TOKEN_PATH,
};
use crate::error::{Error, Result};

/// Discord application settings plus cache sizing.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
    bot_token: Option<Secret<String>>,
    api_base_url: String,
    default_scopes: Vec<String>,
    passthrough_scopes: Vec<String>,
    cache_max_size: u64,
    cache_policy: CachePolicy,
    cache_ttl: Option<Duration>,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::Configuration("client id is required".into()));
        }
        if client_secret.is_empty() {
            return Err(Error::Configuration("client secret is required".into()));
        }
        let redirect_uri = redirect_uri.into();
        validate_http_url("redirect URI", &redirect_uri)?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            bot_token: None,
            api_base_url: DISCORD_API_BASE_URL.to_string(),
            default_scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            passthrough_scopes: PASSTHROUGH_SCOPES.iter().map(|s| s.to_string()).collect(),
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            cache_policy: CachePolicy::default(),
            cache_ttl: None,
        })
    }

    /// Build a config from `DISCORD_*` environment variables.
    ///
    /// Required: `DISCORD_CLIENT_ID`, `DISCORD_CLIENT_SECRET`,
    /// `DISCORD_REDIRECT_URI`. Optional: `DISCORD_BOT_TOKEN`,
    /// `DISCORD_USERS_CACHE_MAX_LIMIT`, `DISCORD_API_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::Configuration(format!("{name} is not set")))
        };

        let mut config = Self::new(
            required("DISCORD_CLIENT_ID")?,
            Secret::new(required("DISCORD_CLIENT_SECRET")?),
            required("DISCORD_REDIRECT_URI")?,
        )?;

        if let Ok(token) = std::env::var("DISCORD_BOT_TOKEN") {
            config = config.with_bot_token(Secret::new(token));
        }
        if let Ok(limit) = std::env::var("DISCORD_USERS_CACHE_MAX_LIMIT") {
            let limit = limit.trim().parse::<u64>().map_err(|_| {
                Error::Configuration(format!(
                    "DISCORD_USERS_CACHE_MAX_LIMIT must be a positive integer, got {limit:?}"
                ))
            })?;
            config = config.with_cache_max_size(limit)?;
        }
        if let Ok(base) = std::env::var("DISCORD_API_BASE_URL") {
            config = config.with_api_base_url(base)?;
        }
        Ok(config)
    }

    /// Bot token for bot-scope endpoints (adding users to guilds).
    #[must_use]
    pub fn with_bot_token(mut self, token: Secret<String>) -> Self {
        self.bot_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Override the API base (tests point this at a local server).
    pub fn with_api_base_url(mut self, base: impl Into<String>) -> Result<Self> {
        let base = base.into();
        validate_http_url("API base URL", &base)?;
        self.api_base_url = base.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Result<Self> {
        if scopes.is_empty() {
            return Err(Error::Configuration(
                "default scopes must not be empty".into(),
            ));
        }
        self.default_scopes = scopes;
        Ok(self)
    }

    #[must_use]
    pub fn with_passthrough_scopes(mut self, scopes: Vec<String>) -> Self {
        self.passthrough_scopes = scopes;
        self
    }

    pub fn with_cache_max_size(mut self, max_size: u64) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::Configuration(
                "cache max size must be greater than 0".into(),
            ));
        }
        self.cache_max_size = max_size;
        Ok(self)
    }

    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &Secret<String> {
        &self.client_secret
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn bot_token(&self) -> Option<&Secret<String>> {
        self.bot_token.as_ref()
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn authorize_url(&self) -> String {
        self.endpoint(AUTHORIZE_PATH)
    }

    pub fn token_url(&self) -> String {
        self.endpoint(TOKEN_PATH)
    }

    /// Absolute URL for an API route such as `/users/@me`.
    pub fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.api_base_url, route)
    }

    pub fn default_scopes(&self) -> &[String] {
        &self.default_scopes
    }

    pub fn passthrough_scopes(&self) -> &[String] {
        &self.passthrough_scopes
    }

    pub fn is_passthrough_scope(&self, scope: &str) -> bool {
        self.passthrough_scopes.iter().any(|s| s == scope)
    }

    pub fn cache_max_size(&self) -> u64 {
        self.cache_max_size
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

fn validate_http_url(what: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Configuration(format!("{what} is not a valid URL ({value}): {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Configuration(format!(
            "{what} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate `DISCORD_*` environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: [&str; 6] = [
        "DISCORD_CLIENT_ID",
        "DISCORD_CLIENT_SECRET",
        "DISCORD_REDIRECT_URI",
        "DISCORD_BOT_TOKEN",
        "DISCORD_USERS_CACHE_MAX_LIMIT",
        "DISCORD_API_BASE_URL",
    ];

    /// SAFETY: Callers must hold ENV_MUTEX.
    unsafe fn set_env(vars: &[(&str, &str)]) {
        for var in ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }
        for (key, val) in vars {
            unsafe { std::env::set_var(key, val) };
        }
    }

    /// Run `from_env` against exactly `vars`, restoring a clean environment after.
    fn from_env_with(vars: &[(&str, &str)]) -> Result<OAuthConfig> {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { set_env(vars) };
        let result = OAuthConfig::from_env();
        unsafe { set_env(&[]) };
        result
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DISCORD_CLIENT_ID", "290926444748734465"),
        ("DISCORD_CLIENT_SECRET", "shh"),
        ("DISCORD_REDIRECT_URI", "https://app.example.com/callback"),
    ];

    fn config() -> OAuthConfig {
        OAuthConfig::new(
            "290926444748734465",
            Secret::from("shh"),
            "https://app.example.com/callback",
        )
        .unwrap()
    }

    #[test]
    fn defaults_match_discord() {
        let config = config();
        assert_eq!(
            config.authorize_url(),
            "https://discord.com/api/oauth2/authorize"
        );
        assert_eq!(config.token_url(), "https://discord.com/api/oauth2/token");
        assert_eq!(config.default_scopes(), &["identify", "email", "guilds", "guilds.join"]);
        assert!(config.is_passthrough_scope("bot"));
        assert!(config.is_passthrough_scope("webhook.incoming"));
        assert!(!config.is_passthrough_scope("identify"));
        assert_eq!(config.cache_max_size(), 100);
        assert!(config.bot_token().is_none());
    }

    #[test]
    fn missing_client_id_is_configuration_error() {
        let err = OAuthConfig::new(" ", Secret::from("s"), "https://a/cb").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn missing_client_secret_is_configuration_error() {
        let err = OAuthConfig::new("1", Secret::from(""), "https://a/cb").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn redirect_uri_must_be_http() {
        let err = OAuthConfig::new("1", Secret::from("s"), "ftp://a/cb").unwrap_err();
        assert!(err.to_string().contains("must start with http"), "got: {err}");

        assert!(OAuthConfig::new("1", Secret::from("s"), "not a url").is_err());
    }

    #[test]
    fn api_base_override_strips_trailing_slash() {
        let config = config().with_api_base_url("http://127.0.0.1:9999/").unwrap();
        assert_eq!(config.token_url(), "http://127.0.0.1:9999/oauth2/token");
        assert_eq!(config.endpoint("/users/@me"), "http://127.0.0.1:9999/users/@me");
    }

    #[test]
    fn zero_cache_size_rejected() {
        assert!(config().with_cache_max_size(0).is_err());
    }

    #[test]
    fn empty_bot_token_is_ignored() {
        let config = config().with_bot_token(Secret::from(""));
        assert!(config.bot_token().is_none());
    }

    #[test]
    fn empty_default_scopes_rejected() {
        assert!(config().with_default_scopes(vec![]).is_err());
    }

    #[test]
    fn from_env_reads_required_and_optional_vars() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("DISCORD_BOT_TOKEN", "bot-token"),
            ("DISCORD_USERS_CACHE_MAX_LIMIT", " 250 "),
            ("DISCORD_API_BASE_URL", "http://127.0.0.1:9999/api/"),
        ]);
        let config = from_env_with(&vars).unwrap();

        assert_eq!(config.client_id(), "290926444748734465");
        assert_eq!(config.client_secret().expose(), "shh");
        assert_eq!(config.redirect_uri(), "https://app.example.com/callback");
        assert_eq!(config.bot_token().map(|t| t.expose().as_str()), Some("bot-token"));
        assert_eq!(config.cache_max_size(), 250);
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9999/api");
    }

    #[test]
    fn from_env_defaults_optional_vars() {
        let config = from_env_with(&REQUIRED).unwrap();
        assert!(config.bot_token().is_none());
        assert_eq!(config.cache_max_size(), DEFAULT_CACHE_MAX_SIZE);
        assert_eq!(config.api_base_url(), DISCORD_API_BASE_URL);
    }

    #[test]
    fn from_env_missing_required_var_names_it() {
        let err = from_env_with(&REQUIRED[..2]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("DISCORD_REDIRECT_URI"), "got: {err}");
    }

    #[test]
    fn from_env_rejects_bad_cache_limit() {
        for bad in ["lots", "-5", "0"] {
            let mut vars = REQUIRED.to_vec();
            vars.push(("DISCORD_USERS_CACHE_MAX_LIMIT", bad));
            let err = from_env_with(&vars).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{bad}: {err}");
        }
    }
}
