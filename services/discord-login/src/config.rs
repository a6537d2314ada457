//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (client secret, bot token, cookie key) are loaded from env vars or
//! `*_file` paths, never stored in the TOML directly to avoid leaking them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use discord_oauth::{CachePolicy, OAuthConfig};
use serde::Deserialize;

/// Minimum cookie secret length; the private-cookie key is derived from it.
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Timeout for calls to Discord
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Discord application settings
#[derive(Debug, Deserialize)]
pub struct DiscordConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to DISCORD_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub bot_token: Option<Secret<String>>,
    /// Path to a file containing the bot token (alternative to DISCORD_BOT_TOKEN)
    #[serde(default)]
    pub bot_token_file: Option<PathBuf>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub passthrough_scopes: Option<Vec<String>>,
}

/// User cache sizing
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,
    #[serde(default)]
    pub policy: CachePolicy,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            policy: CachePolicy::default(),
            ttl_secs: None,
        }
    }
}

/// Where tokens are kept between requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// Inside the encrypted session cookie
    #[default]
    Session,
    /// In a server-side JSON file; the cookie carries only a handle
    File,
}

/// Session cookie settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    #[serde(skip)]
    pub cookie_secret: Option<Secret<String>>,
    /// Path to a file containing the cookie secret (alternative to COOKIE_SECRET)
    #[serde(default)]
    pub cookie_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub token_store: TokenStoreKind,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secure: default_secure(),
            ttl_days: default_ttl_days(),
            cookie_secret: None,
            cookie_secret_file: None,
            token_store: TokenStoreKind::default(),
            token_file: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_cache_max_size() -> u64 {
    discord_oauth::DEFAULT_CACHE_MAX_SIZE
}

fn default_cookie_name() -> String {
    "discord_session".into()
}

fn default_secure() -> bool {
    true
}

fn default_ttl_days() -> i64 {
    7
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Each secret resolves from its env var first, then its `*_file` path.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.discord.redirect_uri.starts_with("http://")
            && !config.discord.redirect_uri.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "redirect_uri must start with http:// or https://, got: {}",
                config.discord.redirect_uri
            )));
        }

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.cache.max_size == 0 {
            return Err(common::Error::Config(
                "cache max_size must be greater than 0".into(),
            ));
        }

        if config.session.ttl_days <= 0 {
            return Err(common::Error::Config(
                "session ttl_days must be greater than 0".into(),
            ));
        }

        if config.session.token_store == TokenStoreKind::File && config.session.token_file.is_none()
        {
            return Err(common::Error::Missing("session.token_file"));
        }

        config.discord.client_secret = resolve_secret(
            "DISCORD_CLIENT_SECRET",
            config.discord.client_secret_file.as_deref(),
        )?;
        config.discord.bot_token =
            resolve_secret("DISCORD_BOT_TOKEN", config.discord.bot_token_file.as_deref())?;
        config.session.cookie_secret = resolve_secret(
            "COOKIE_SECRET",
            config.session.cookie_secret_file.as_deref(),
        )?;

        if config.discord.client_secret.is_none() {
            return Err(common::Error::Missing(
                "client secret (DISCORD_CLIENT_SECRET or client_secret_file)",
            ));
        }
        match &config.session.cookie_secret {
            None => {
                return Err(common::Error::Missing(
                    "cookie secret (COOKIE_SECRET or cookie_secret_file)",
                ));
            }
            Some(secret) if secret.expose().len() < MIN_COOKIE_SECRET_LEN => {
                return Err(common::Error::Config(format!(
                    "cookie secret must be at least {MIN_COOKIE_SECRET_LEN} bytes"
                )));
            }
            Some(_) => {}
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("discord-login.toml")
    }

    /// Library client configuration.
    pub fn oauth_config(&self) -> discord_oauth::Result<OAuthConfig> {
        let secret = self
            .discord
            .client_secret
            .clone()
            .ok_or_else(|| discord_oauth::Error::Configuration("client secret is not set".into()))?;

        let mut oauth = OAuthConfig::new(
            self.discord.client_id.clone(),
            secret,
            self.discord.redirect_uri.clone(),
        )?
        .with_cache_max_size(self.cache.max_size)?
        .with_cache_policy(self.cache.policy)
        .with_cache_ttl(self.cache.ttl_secs.map(Duration::from_secs));

        if let Some(token) = &self.discord.bot_token {
            oauth = oauth.with_bot_token(token.clone());
        }
        if let Some(base) = &self.discord.api_base_url {
            oauth = oauth.with_api_base_url(base.clone())?;
        }
        if let Some(scopes) = &self.discord.scopes {
            oauth = oauth.with_default_scopes(scopes.clone())?;
        }
        if let Some(scopes) = &self.discord.passthrough_scopes {
            oauth = oauth.with_passthrough_scopes(scopes.clone());
        }
        Ok(oauth)
    }
}

/// Env var takes precedence over the file.
fn resolve_secret(env: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env) {
        let value = value.trim().to_owned();
        return Ok((!value.is_empty()).then(|| Secret::new(value)));
    }
    let Some(file) = file else {
        return Ok(None);
    };
    Secret::from_file(file).map_err(|e| {
        common::Error::Config(format!("failed to read {}: {e}", file.display()))
    })
}
