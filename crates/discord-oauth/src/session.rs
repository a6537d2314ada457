//! Session storage abstraction
//!
//! The lifecycle never reads ambient request state: every operation takes the
//! caller's session explicitly. A session is a string-keyed map of JSON values
//! whose lifetime is the user's browser session. How it is persisted (an
//! encrypted cookie, a server-side table) is the caller's business.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-user session storage.
pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<&Value>;

    fn set(&mut self, key: &str, value: Value);

    /// Remove a key, returning its previous value. Absent keys are not an error.
    fn remove(&mut self, key: &str) -> Option<Value>;

    /// Convenience accessor for string-valued keys.
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// In-memory session backed by a JSON object.
///
/// Serializes to a flat JSON object, which is how the cookie-backed session in
/// the login service persists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySession {
    values: Map<String, Value>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_owned(), value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}
