// ── Domain model ──
//
// Types shared by the channels, the hub and their consumers. Entities
// stay as raw JSON: the realtime core only reads `id` and `status`, and
// listeners get the payload exactly as the backend sent it.

pub mod event;
pub mod lifecycle;
pub mod notification;

pub use event::{DomainEvent, EventKind};
pub use lifecycle::AppState;
pub use notification::Notification;

pub use tablecast_api::Topic;
