//! Bot permission bitmask requested alongside the `bot` scope

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Validated, non-negative Discord permission bitmask.
///
/// Discord transmits permissions as a decimal string; this type accepts
/// integers or decimal strings and rejects negatives at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u64);

impl Permissions {
    pub const CREATE_INSTANT_INVITE: Self = Self(1 << 0);
    pub const KICK_MEMBERS: Self = Self(1 << 1);
    pub const BAN_MEMBERS: Self = Self(1 << 2);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const MANAGE_GUILD: Self = Self(1 << 5);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const MANAGE_MESSAGES: Self = Self(1 << 13);
    pub const READ_MESSAGE_HISTORY: Self = Self(1 << 16);
    pub const MANAGE_ROLES: Self = Self(1 << 28);

    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Administrator implies every other permission.
    pub const fn is_administrator(self) -> bool {
        self.contains(Self::ADMINISTRATOR)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<u64> for Permissions {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl TryFrom<i64> for Permissions {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Error> {
        u64::try_from(value).map(Self).map_err(|_| {
            Error::Configuration(format!(
                "permissions must be a non-negative bitmask, got {value}"
            ))
        })
    }
}

impl FromStr for Permissions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        if let Ok(bits) = trimmed.parse::<u64>() {
            return Ok(Self(bits));
        }
        match trimmed.parse::<i64>() {
            Ok(negative) => Self::try_from(negative),
            Err(_) => Err(Error::Configuration(format!(
                "permissions must be an integer bitmask, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Big(u64),
            Str(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Int(v) => Self::try_from(v),
            Raw::Big(v) => Ok(Self(v)),
            Raw::Str(s) => s.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_integer_is_rejected() {
        let err = Permissions::try_from(-8i64).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("8".parse::<Permissions>().unwrap(), Permissions::ADMINISTRATOR);
        assert!("-1".parse::<Permissions>().is_err());
        assert!("all".parse::<Permissions>().is_err());
    }

    #[test]
    fn union_and_contains() {
        let perms = Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL;
        assert_eq!(perms.bits(), 3072);
        assert!(perms.contains(Permissions::SEND_MESSAGES));
        assert!(!perms.is_administrator());
    }

    #[test]
    fn deserializes_from_discord_string_form() {
        // Guild objects carry permissions as a decimal string
        let perms: Permissions = serde_json::from_str(r#""2147483647""#).unwrap();
        assert_eq!(perms.bits(), 2_147_483_647);

        let from_int: Permissions = serde_json::from_str("32").unwrap();
        assert_eq!(from_int, Permissions::MANAGE_GUILD);

        assert!(serde_json::from_str::<Permissions>("-4").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Permissions::ADMINISTRATOR).unwrap();
        assert_eq!(json, r#""8""#);
    }
}
