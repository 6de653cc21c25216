// ── Keyring-backed session store ──
//
// Persists the login session in the OS keyring so `tablecast watch` can
// reuse the token issued by `tablecast login`. Reads come from an in-memory
// snapshot; the keyring is only touched on open, store and clear.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tablecast_api::{Session, SessionStore};

use crate::{ConfigError, KEYRING_SERVICE};

/// [`SessionStore`] persisted under the `tablecast` keyring service.
pub struct KeyringSessionStore {
    profile: String,
    entry: keyring::Entry,
    cache: ArcSwapOption<Session>,
}

/// On-keyring representation.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    token: String,
    username: String,
    #[serde(default)]
    roles: Vec<String>,
}

impl KeyringSessionStore {
    /// Open the store for `profile_name`, loading any saved session.
    pub fn open(profile_name: &str) -> Result<Self, ConfigError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/session"))?;
        let saved = match entry.get_password() {
            Ok(raw) => decode(&raw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => return Err(e.into()),
        };
        debug!(profile = profile_name, found = saved.is_some(), "session store opened");

        Ok(Self {
            profile: profile_name.to_owned(),
            entry,
            cache: ArcSwapOption::from(saved.map(Arc::new)),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

impl SessionStore for KeyringSessionStore {
    fn current(&self) -> Option<Arc<Session>> {
        self.cache.load_full()
    }

    fn store(&self, session: Session) {
        match encode(&session) {
            Ok(raw) => {
                if let Err(e) = self.entry.set_password(&raw) {
                    warn!(profile = %self.profile, error = %e, "failed to persist session");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode session"),
        }
        self.cache.store(Some(Arc::new(session)));
    }

    fn clear(&self) {
        self.cache.store(None);
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => warn!(profile = %self.profile, error = %e, "failed to delete saved session"),
        }
    }
}

impl fmt::Debug for KeyringSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringSessionStore")
            .field("profile", &self.profile)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

fn encode(session: &Session) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StoredSession {
        token: session.token.expose_secret().to_owned(),
        username: session.username.clone(),
        roles: session.roles.clone(),
    })
}

fn decode(raw: &str) -> Option<Session> {
    match serde_json::from_str::<StoredSession>(raw) {
        Ok(s) if !s.token.is_empty() => Some(Session::new(s.token, s.username, s.roles)),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable saved session");
            None
        }
    }
}
