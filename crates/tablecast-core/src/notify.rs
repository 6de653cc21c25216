// ── Notification synthesis ──
//
// Turns a domain event into the title/message pair shown to staff who are
// looking at a different screen. Total over its input: unknown kinds get a
// generic update message and missing fields render as placeholders.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::model::{DomainEvent, EventKind, Notification, Topic};

const MISSING_ID: &str = "?";
const MISSING_STATUS: &str = "unknown";

/// Build the user-facing notification for `event`.
pub fn synthesize(event: &Arc<DomainEvent>) -> Notification {
    let (title, message) = describe(event);
    Notification {
        id: Uuid::new_v4(),
        topic: event.topic,
        title: title.to_owned(),
        message,
        event: Arc::clone(event),
        created_at: Utc::now(),
    }
}

/// Title and message for an event.
pub fn describe(event: &DomainEvent) -> (&'static str, String) {
    let id = event.entity_id().unwrap_or_else(|| MISSING_ID.to_owned());
    let status = || event.status().unwrap_or_else(|| MISSING_STATUS.to_owned());

    match (event.topic, &event.kind) {
        (Topic::Orders, EventKind::Created) => {
            ("New Order Created", format!("Order #{id} has been created"))
        }
        (Topic::Orders, EventKind::StatusUpdated) => (
            "Order Status Updated",
            format!("Order #{id} is now {}", status()),
        ),
        (Topic::Orders, EventKind::Deleted) => {
            ("Order Deleted", format!("Order #{id} has been deleted"))
        }
        (Topic::Orders, _) => ("Order Update", format!("Order #{id} has been updated")),

        // Reservations treat a plain update like a status change.
        (Topic::Reservations, EventKind::Created) => {
            ("New Reservation", format!("Reservation #{id} created"))
        }
        (Topic::Reservations, EventKind::Updated | EventKind::StatusUpdated) => (
            "Reservation Updated",
            format!("Reservation #{id} is now {}", status()),
        ),
        (Topic::Reservations, EventKind::Deleted) => {
            ("Reservation Deleted", format!("Reservation #{id} was deleted"))
        }
        (Topic::Reservations, EventKind::Other(_)) => {
            ("Reservation Update", format!("Reservation #{id} updated"))
        }
    }
}
