// ── User-facing notifications ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use tablecast_api::Topic;

use super::event::DomainEvent;

/// A banner-style message derived from a [`DomainEvent`] for a topic the
/// user is not currently looking at.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub topic: Topic,
    pub title: String,
    pub message: String,
    /// The event this notification was synthesized from.
    pub event: Arc<DomainEvent>,
    pub created_at: DateTime<Utc>,
}
