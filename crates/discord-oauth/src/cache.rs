//! User resource cache
//!
//! Bounded, process-wide map from Discord user id to the user's resources.
//! Guild and connection lists hang off the user entry, so they live exactly
//! as long as it does and a revoke drops all three at once.

use std::future::ready;
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use serde::Deserialize;
use tracing::debug;

use crate::models::{Guild, Snowflake, User, UserConnection};

/// Eviction policy once the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// TinyLFU admission: frequently requested users survive bursts of
    /// one-off logins.
    #[default]
    Lfu,
    Lru,
}

/// Everything cached for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedUser {
    pub user: User,
    pub guilds: Option<Vec<Guild>>,
    pub connections: Option<Vec<UserConnection>>,
}

impl CachedUser {
    pub fn new(user: User) -> Self {
        Self {
            user,
            guilds: None,
            connections: None,
        }
    }
}

#[derive(Clone)]
pub struct UserCache {
    inner: Cache<Snowflake, CachedUser>,
}

impl UserCache {
    pub fn new(max_size: u64, policy: CachePolicy, ttl: Option<Duration>) -> Self {
        let eviction = match policy {
            CachePolicy::Lfu => EvictionPolicy::tiny_lfu(),
            CachePolicy::Lru => EvictionPolicy::lru(),
        };
        let mut builder = Cache::builder()
            .max_capacity(max_size)
            .eviction_policy(eviction);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
        }
    }

    pub async fn get(&self, id: Snowflake) -> Option<CachedUser> {
        self.inner.get(&id).await
    }

    /// Insert or refresh the user. A refresh starts a fresh entry: lists
    /// attached under an earlier grant are dropped with it.
    pub async fn insert(&self, user: User) {
        let id = user.id;
        self.inner.insert(id, CachedUser::new(user)).await;
        debug!(user_id = %id, "cached user");
    }

    /// Attach a guild list to an existing entry. Returns false when the user
    /// is not cached.
    pub async fn attach_guilds(&self, id: Snowflake, guilds: Vec<Guild>) -> bool {
        self.update(id, |entry| entry.guilds = Some(guilds)).await
    }

    /// Attach a connection list to an existing entry. Returns false when the
    /// user is not cached.
    pub async fn attach_connections(&self, id: Snowflake, connections: Vec<UserConnection>) -> bool {
        self.update(id, |entry| entry.connections = Some(connections))
            .await
    }

    async fn update(&self, id: Snowflake, apply: impl FnOnce(&mut CachedUser)) -> bool {
        let result = self
            .inner
            .entry(id)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) => {
                        let mut value = entry.into_value();
                        apply(&mut value);
                        Op::Put(value)
                    }
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;
        matches!(result, CompResult::ReplacedWith(_))
    }

    /// Drop the user's entry. Absent entries are ignored.
    pub async fn invalidate(&self, id: Snowflake) {
        self.inner.invalidate(&id).await;
        debug!(user_id = %id, "invalidated cached user");
    }

    /// Approximate entry count; pending maintenance may lag behind writes.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush pending maintenance (evictions, counts).
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}
