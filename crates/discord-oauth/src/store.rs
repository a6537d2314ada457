//! Token persistence
//!
//! [`TokenStore`] is the seam for deciding where a user's token lives. The
//! default [`SessionTokenStore`] keeps it in the session itself, which for the
//! login service means an encrypted client-side cookie. [`FileTokenStore`]
//! keeps tokens server side in a JSON file keyed by an opaque per-session id,
//! so the cookie only carries that id.
//!
//! Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
//! `Arc<dyn TokenStore>`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{SESSION_ID, SESSION_TOKEN};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::token::{OAuthToken, unix_now};

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability to persist the OAuth token for a session.
///
/// Contract: after `save(session, t)`, `load(session)` returns a record equal
/// to `t` until `clear(session)` or another `save`. `load` never touches the
/// network.
pub trait TokenStore: Send + Sync {
    fn save<'a>(&'a self, session: &'a mut dyn Session, token: &'a OAuthToken)
    -> StoreFuture<'a, ()>;

    fn load<'a>(&'a self, session: &'a dyn Session) -> StoreFuture<'a, Option<OAuthToken>>;

    /// Forget the session's token. Missing tokens are not an error.
    fn clear<'a>(&'a self, session: &'a mut dyn Session) -> StoreFuture<'a, ()>;
}

/// Stores the token record inside the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionTokenStore;

impl TokenStore for SessionTokenStore {
    fn save<'a>(
        &'a self,
        session: &'a mut dyn Session,
        token: &'a OAuthToken,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let value = serde_json::to_value(token)
                .map_err(|e| Error::Storage(format!("serializing token: {e}")))?;
            session.set(SESSION_TOKEN, value);
            Ok(())
        })
    }

    fn load<'a>(&'a self, session: &'a dyn Session) -> StoreFuture<'a, Option<OAuthToken>> {
        Box::pin(async move {
            match session.get(SESSION_TOKEN) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => serde_json::from_value(value.clone())
                    .map(Some)
                    .map_err(|e| Error::Storage(format!("parsing session token: {e}"))),
            }
        })
    }

    fn clear<'a>(&'a self, session: &'a mut dyn Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            session.remove(SESSION_TOKEN);
            Ok(())
        })
    }
}

/// Server-side token store backed by a JSON file.
///
/// All writes use atomic temp-file + rename so a crash never leaves a
/// truncated file, and the file is created 0600 since it holds tokens. A
/// tokio Mutex serializes writers; reads clone out of the in-memory map.
///
/// Sessions that disappear without a revoke leave their record behind, so
/// expired records are dropped whenever the file is opened or written. The
/// in-memory map only changes once the file write has succeeded.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<HashMap<String, OAuthToken>>,
}

impl FileTokenStore {
    /// Load tokens from `path`, creating an empty store file if missing.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading token file: {e}")))?;
            let mut tokens: HashMap<String, OAuthToken> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing token file: {e}")))?;
            if prune_expired(&mut tokens, unix_now()) > 0 {
                write_atomic(&path, &tokens).await?;
            }
            info!(path = %path.display(), sessions = tokens.len(), "loaded server-side tokens");
            tokens
        } else {
            info!(path = %path.display(), "token file not found, starting with empty store");
            let tokens = HashMap::new();
            write_atomic(&path, &tokens).await?;
            tokens
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of sessions with a stored token.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The session's store handle, minting one on first save.
    fn session_id(session: &mut dyn Session) -> String {
        if let Some(id) = session.get_str(SESSION_ID) {
            return id.to_owned();
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        session.set(SESSION_ID, Value::String(id.clone()));
        id
    }
}

impl TokenStore for FileTokenStore {
    fn save<'a>(
        &'a self,
        session: &'a mut dyn Session,
        token: &'a OAuthToken,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let id = Self::session_id(session);
            let mut state = self.state.lock().await;

            let mut next = state.clone();
            prune_expired(&mut next, unix_now());
            next.insert(id.clone(), token.clone());
            write_atomic(&self.path, &next).await?;

            *state = next;
            debug!(session_id = %id, "saved server-side token");
            Ok(())
        })
    }

    fn load<'a>(&'a self, session: &'a dyn Session) -> StoreFuture<'a, Option<OAuthToken>> {
        Box::pin(async move {
            let Some(id) = session.get_str(SESSION_ID) else {
                return Ok(None);
            };
            Ok(self.state.lock().await.get(id).cloned())
        })
    }

    fn clear<'a>(&'a self, session: &'a mut dyn Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let Some(Value::String(id)) = session.remove(SESSION_ID) else {
                return Ok(());
            };
            let mut state = self.state.lock().await;
            if !state.contains_key(&id) {
                return Ok(());
            }

            let mut next = state.clone();
            next.remove(&id);
            write_atomic(&self.path, &next).await?;

            *state = next;
            debug!(session_id = %id, "removed server-side token");
            Ok(())
        })
    }
}

/// Drop records whose expiry has passed. Returns how many were dropped.
fn prune_expired(tokens: &mut HashMap<String, OAuthToken>, now: u64) -> usize {
    let before = tokens.len();
    tokens.retain(|_, token| !token.is_expired(now));
    let pruned = before - tokens.len();
    if pruned > 0 {
        debug!(pruned, "dropped expired server-side tokens");
    }
    pruned
}

/// Replace the token file in one rename. The temp file is created 0600
/// before any token bytes reach it and is removed again if the write fails.
async fn write_atomic(path: &Path, tokens: &HashMap<String, OAuthToken>) -> Result<()> {
    let json = serde_json::to_vec_pretty(tokens)
        .map_err(|e| Error::Storage(format!("serializing tokens: {e}")))?;
    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("token file path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".tokens.{}.tmp", uuid::Uuid::new_v4().simple()));

    let written = write_private(&tmp_path, &json).await;
    let result = match written {
        Ok(()) => tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::Storage(format!("replacing token file: {e}"))),
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result?;

    debug!(path = %path.display(), sessions = tokens.len(), "persisted tokens");
    Ok(())
}

async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| Error::Storage(format!("creating temp token file: {e}")))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::Storage(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Storage(format!("syncing temp token file: {e}")))
}
