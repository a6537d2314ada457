//! Discord OAuth2 session library
//!
//! Binds a per-user session to Discord's authorization-code grant: builds the
//! authorization redirect, completes the callback, stores the token, and
//! serves the user's profile, guilds and connections through a bounded
//! process-wide cache. Framework agnostic: the caller supplies the session
//! through the [`Session`] trait.
//!
//! Flow:
//! 1. Login handler calls [`DiscordOAuth::create_session`] and redirects
//! 2. Discord redirects back; [`DiscordOAuth::callback`] verifies the state,
//!    exchanges the code, and returns the params embedded at login
//! 3. Resource handlers call [`DiscordOAuth::fetch_user`] and friends, which
//!    consult the [`UserCache`] before calling Discord
//! 4. Logout calls [`DiscordOAuth::revoke`]

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod http;
pub mod models;
pub mod permissions;
pub mod session;
pub mod state;
pub mod store;
pub mod token;

pub use cache::{CachePolicy, CachedUser, UserCache};
pub use client::{AuthorizationRequest, DiscordOAuth, Prompt};
pub use config::OAuthConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use flow::{Callback, CallbackParams};
pub use models::{Guild, Snowflake, User, UserConnection};
pub use permissions::Permissions;
pub use session::{MemorySession, Session};
pub use state::StateParams;
pub use store::{FileTokenStore, SessionTokenStore, TokenStore};
pub use token::OAuthToken;

pub use reqwest::Method;
