// tablecast-core: Realtime notification hub and session guard between tablecast-api and the host UI.

pub mod channel;
pub mod config;
pub mod error;
pub mod guard;
pub mod hub;
pub mod listeners;
pub mod model;
pub mod notify;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{EventChannel, EventSink, ReadyState};
pub use config::{BackendConfig, GuardConfig, HubConfig, TlsVerification};
pub use error::CoreError;
pub use guard::{HubControl, LogoutNotice, LogoutPrompt, LogoutReason, Navigator, SessionGuard};
pub use hub::{AppStateWatch, NotificationHub};
pub use listeners::{ListenerSet, Subscription};

pub use model::{AppState, DomainEvent, EventKind, Notification, Topic};
