//! Encrypted cookie session
//!
//! The whole session map is serialized to JSON and stored in one private
//! (encrypted and authenticated) cookie. Handlers load it from the request's
//! [`PrivateCookieJar`], run library operations against it, and hand the jar
//! back in the response so changes are written out.

use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use discord_oauth::{MemorySession, Session};
use serde_json::Value;
use tracing::warn;

/// Session cookie attributes
#[derive(Clone)]
pub struct CookieSettings {
    pub key: Key,
    pub name: String,
    pub secure: bool,
    pub ttl: time::Duration,
}

pub struct CookieSession {
    jar: PrivateCookieJar,
    values: MemorySession,
    dirty: bool,
}

impl CookieSession {
    /// Read the session from the jar. A cookie that fails to parse starts an
    /// empty session; decryption failures already surface as a missing cookie.
    pub fn load(jar: PrivateCookieJar, settings: &CookieSettings) -> Self {
        let values = match jar.get(&settings.name) {
            Some(cookie) => serde_json::from_str(cookie.value()).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable session cookie");
                MemorySession::new()
            }),
            None => MemorySession::new(),
        };
        Self {
            jar,
            values,
            dirty: false,
        }
    }

    /// Write pending changes into the jar. An emptied session removes the cookie.
    pub fn into_jar(self, settings: &CookieSettings) -> PrivateCookieJar {
        if !self.dirty {
            return self.jar;
        }
        if self.values.is_empty() {
            return self
                .jar
                .remove(Cookie::build(settings.name.clone()).path("/"));
        }
        match serde_json::to_string(&self.values) {
            Ok(json) => self.jar.add(
                Cookie::build((settings.name.clone(), json))
                    .http_only(true)
                    .secure(settings.secure)
                    .same_site(SameSite::Lax)
                    .path("/")
                    .max_age(settings.ttl)
                    .build(),
            ),
            Err(e) => {
                warn!(error = %e, "failed to serialize session, leaving cookie unchanged");
                self.jar
            }
        }
    }
}

impl Session for CookieSession {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.dirty = true;
        self.values.set(key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        let previous = self.values.remove(key);
        self.dirty |= previous.is_some();
        previous
    }
}
