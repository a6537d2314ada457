//! Discord OAuth2 constants
//!
//! Endpoint locations and scope sets. None of these are secrets; the client
//! secret and bot token come from configuration.

/// Base URL of the Discord REST API. Every endpoint below hangs off it.
pub const DISCORD_API_BASE_URL: &str = "https://discord.com/api";

/// Path of the authorization endpoint, relative to the API base.
pub const AUTHORIZE_PATH: &str = "/oauth2/authorize";

/// Path of the token endpoint, relative to the API base.
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Base URL for avatars and guild icons.
pub const DISCORD_CDN_BASE_URL: &str = "https://cdn.discordapp.com";

/// Scopes requested when the caller supplies none.
pub const DEFAULT_SCOPES: &[&str] = &["identify", "email", "guilds", "guilds.join"];

/// Scopes that grant bot-level or webhook access. Discord requires an explicit
/// consent screen for these, so they are never combined with `prompt=none`.
pub const PASSTHROUGH_SCOPES: &[&str] = &["bot", "webhook.incoming"];

/// Default upper bound on cached users.
pub const DEFAULT_CACHE_MAX_SIZE: u64 = 100;

/// Session key holding the raw (signing) state.
pub const SESSION_RAW_STATE: &str = "DISCORD_RAW_OAUTH2_STATE";

/// Session key holding the encoded state sent to Discord.
pub const SESSION_ENCODED_STATE: &str = "DISCORD_OAUTH2_STATE";

/// Session key holding the token record (in-session token store).
pub const SESSION_TOKEN: &str = "DISCORD_OAUTH2_TOKEN";

/// Session key holding the authenticated user's id once fetched.
pub const SESSION_USER_ID: &str = "DISCORD_USER_ID";

/// Session key holding the server-side token store handle.
pub const SESSION_ID: &str = "DISCORD_SESSION_ID";

/// Every key this crate writes into a session; cleared on revoke.
pub const SESSION_KEYS: &[&str] = &[
    SESSION_RAW_STATE,
    SESSION_ENCODED_STATE,
    SESSION_TOKEN,
    SESSION_USER_ID,
    SESSION_ID,
];
