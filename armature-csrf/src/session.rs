//! Session adapter seam and an in-memory session store.
//!
//! The CSRF policies never own session persistence. They talk to whatever
//! store the application runs through [`SessionAdapter`], a narrow
//! per-session view with `has`/`read`/`write` plus an atomic
//! `set_if_absent` used to settle concurrent first access.
//!
//! [`MemorySessionStore`] uses DashMap for thread-safe concurrent access and
//! is suitable for single-instance deployments or testing.

use crate::error::{CsrfError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-session view of an external key-value session store.
pub trait SessionAdapter: Send + Sync {
    /// Stable identifier of the bound session.
    fn session_id(&self) -> &str;

    /// Read a value.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any existing one.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Store `value` unless `key` already holds one, returning whichever
    /// value is stored afterwards. An empty stored string counts as no value
    /// and is replaced.
    ///
    /// Implementations must make the check and the write a single atomic
    /// step for this session (a per-session lock, a compare-and-set, or an
    /// equivalent primitive of the backing store).
    fn set_if_absent(&self, key: &str, value: &str) -> Result<String>;

    /// Remove a value, returning the previous one.
    fn remove(&self, key: &str) -> Result<Option<String>>;

    /// Check whether a key holds a value.
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }
}

impl<T: SessionAdapter + ?Sized> SessionAdapter for Arc<T> {
    fn session_id(&self) -> &str {
        (**self).session_id()
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        (**self).write(key, value)
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String> {
        (**self).set_if_absent(key, value)
    }

    fn remove(&self, key: &str) -> Result<Option<String>> {
        (**self).remove(key)
    }

    fn has(&self, key: &str) -> Result<bool> {
        (**self).has(key)
    }
}

/// Generate a new unique session ID.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
struct SessionRecord {
    data: HashMap<String, String>,
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            data: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// In-memory session store
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        debug!("Creating new in-memory session store");
        Self::default()
    }

    /// Start a session under a freshly generated ID.
    pub fn create(&self) -> MemorySession {
        self.create_with_id(generate_session_id())
    }

    /// Start a session under `id`, or attach to it if it already exists.
    pub fn create_with_id(&self, id: impl Into<String>) -> MemorySession {
        let id = id.into();
        self.sessions
            .entry(id.clone())
            .or_insert_with(SessionRecord::new);
        trace!(session_id = %id, "Session created");
        self.handle(id)
    }

    /// Look up an existing session; `None` when no record exists.
    pub fn session(&self, id: &str) -> Option<MemorySession> {
        self.sessions
            .contains_key(id)
            .then(|| self.handle(id.to_string()))
    }

    /// Destroy a session and everything bound to it (logout, expiry).
    pub fn destroy(&self, id: &str) -> bool {
        debug!(session_id = %id, "Destroying session");
        self.sessions.remove(id).is_some()
    }

    /// When the session was created, if it exists.
    pub fn created_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.sessions.get(id).map(|record| record.created_at)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn handle(&self, id: String) -> MemorySession {
        MemorySession {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Handle onto one session of a [`MemorySessionStore`].
///
/// Operations on a destroyed session fail with [`CsrfError::MissingSession`].
#[derive(Clone)]
pub struct MemorySession {
    id: String,
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl MemorySession {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession").field("id", &self.id).finish()
    }
}

impl SessionAdapter for MemorySession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let record = self
            .sessions
            .get(&self.id)
            .ok_or(CsrfError::MissingSession)?;
        Ok(record.data.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut record = self
            .sessions
            .get_mut(&self.id)
            .ok_or(CsrfError::MissingSession)?;
        record.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String> {
        // The shard write lock is held for the whole check-and-insert.
        let mut record = self
            .sessions
            .get_mut(&self.id)
            .ok_or(CsrfError::MissingSession)?;
        let stored = record
            .data
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
        if stored.is_empty() {
            *stored = value.to_string();
        }
        Ok(stored.clone())
    }

    fn remove(&self, key: &str) -> Result<Option<String>> {
        let mut record = self
            .sessions
            .get_mut(&self.id)
            .ok_or(CsrfError::MissingSession)?;
        Ok(record.data.remove(key))
    }
}
