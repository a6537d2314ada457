//! Discord resource models returned by the REST API

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::DISCORD_CDN_BASE_URL;
use crate::permissions::Permissions;

/// Discord snowflake id. Serialized as a string, as Discord does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Ok(Self(v)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The authorized user (`GET /users/@me`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar hash, absent for default avatars
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub mfa_enabled: Option<bool>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub flags: Option<u64>,
    #[serde(default)]
    pub premium_type: Option<u8>,
    /// Present only with the `email` scope
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
}

impl User {
    /// Display name: global name if set, otherwise `username` (with the legacy
    /// `#discriminator` suffix when the account still has one).
    pub fn name(&self) -> String {
        if let Some(global) = &self.global_name {
            return global.clone();
        }
        match self.discriminator.as_deref() {
            Some(d) if d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }

    pub fn is_avatar_animated(&self) -> bool {
        self.avatar.as_deref().is_some_and(|h| h.starts_with("a_"))
    }

    /// Custom avatar URL, `None` when the user has the default avatar.
    pub fn avatar_url(&self) -> Option<String> {
        let hash = self.avatar.as_deref()?;
        let ext = if self.is_avatar_animated() { "gif" } else { "png" };
        Some(format!(
            "{DISCORD_CDN_BASE_URL}/avatars/{}/{hash}.{ext}",
            self.id
        ))
    }

    pub fn default_avatar_url(&self) -> String {
        let index = match self.discriminator.as_deref().and_then(|d| d.parse::<u64>().ok()) {
            Some(d) if d != 0 => d % 5,
            _ => (self.id.get() >> 22) % 6,
        };
        format!("{DISCORD_CDN_BASE_URL}/embed/avatars/{index}.png")
    }
}

/// A guild the user belongs to (`GET /users/@me/guilds`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Guild {
    pub fn icon_url(&self) -> Option<String> {
        let hash = self.icon.as_deref()?;
        let ext = if hash.starts_with("a_") { "gif" } else { "png" };
        Some(format!(
            "{DISCORD_CDN_BASE_URL}/icons/{}/{hash}.{ext}",
            self.id
        ))
    }
}

/// An account linked to the user (`GET /users/@me/connections`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConnection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(default)]
    pub revoked: Option<bool>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub friend_sync: bool,
    #[serde(default)]
    pub show_activity: bool,
    /// 0 = only the user, 1 = everyone
    #[serde(default)]
    pub visibility: u8,
    #[serde(default)]
    pub integrations: Vec<serde_json::Value>,
}

impl UserConnection {
    pub fn is_visible(&self) -> bool {
        self.visibility == 1
    }
}
