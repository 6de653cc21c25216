//! Session credential storage.
//!
//! The bearer token is the one piece of mutable state every outbound call
//! reads. It is written by login and deleted by logout, so the store hands
//! out whole snapshots and replaces them atomically.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::SecretString;

/// An authenticated user session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bearer token issued by `users/login`.
    pub token: SecretString,
    pub username: String,
    pub roles: Vec<String>,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            username: username.into(),
            roles,
        }
    }
}

/// Storage for the current session.
///
/// Implemented in memory here and with the OS keyring in `tablecast-config`.
/// Readers must never observe a half-written session.
pub trait SessionStore: Send + Sync {
    /// The current session, if logged in.
    fn current(&self) -> Option<Arc<Session>>;

    /// Replace the current session.
    fn store(&self, session: Session);

    /// Delete the current session. Idempotent.
    fn clear(&self);

    /// The bearer credential of the current session.
    fn credential(&self) -> Option<SecretString> {
        self.current().map(|s| s.token.clone())
    }

    fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }
}

/// Lock-free in-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: ArcSwapOption<Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out logged in.
    pub fn with_session(session: Session) -> Self {
        Self {
            session: ArcSwapOption::from_pointee(session),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn current(&self) -> Option<Arc<Session>> {
        self.session.load_full()
    }

    fn store(&self, session: Session) {
        self.session.store(Some(Arc::new(session)));
    }

    fn clear(&self) {
        self.session.store(None);
    }
}
