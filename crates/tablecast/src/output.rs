//! Terminal rendering for `watch`: colored text lines or JSON lines.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::json;

use tablecast_core::{DomainEvent, LogoutNotice, Notification, ReadyState, Topic};

use crate::cli::ColorMode;

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Line-oriented printer shared by the watch listeners.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    color: bool,
    json: bool,
}

impl Printer {
    pub fn new(color: bool, json: bool) -> Self {
        Self {
            color: color && !json,
            json,
        }
    }

    pub fn notification(self, n: &Notification) {
        let line = if self.json {
            json!({
                "type": "notification",
                "id": n.id,
                "topic": n.topic,
                "title": n.title,
                "message": n.message,
                "kind": n.event.kind.as_str(),
                "created_at": n.created_at,
            })
            .to_string()
        } else {
            let time = n.created_at.format("%H:%M:%S");
            if self.color {
                format!("{} {} {}", time.dimmed(), n.title.bold().cyan(), n.message)
            } else {
                format!("{time} {} {}", n.title, n.message)
            }
        };
        emit(&line);
    }

    pub fn event(self, event: &DomainEvent) {
        let line = if self.json {
            json!({
                "type": "event",
                "topic": event.topic,
                "kind": event.kind.as_str(),
                "payload": event.payload,
                "received_at": event.received_at,
            })
            .to_string()
        } else {
            let time = event.received_at.format("%H:%M:%S");
            let head = format!("{} {}", event.topic, event.kind.as_str());
            if self.color {
                format!("{} {} {}", time.dimmed(), head.yellow(), event.payload)
            } else {
                format!("{time} {head} {}", event.payload)
            }
        };
        emit(&line);
    }

    pub fn unread(self, topic: Topic, count: u32) {
        if self.json {
            emit(&json!({ "type": "unread", "topic": topic, "count": count }).to_string());
        } else if self.color {
            emit(&format!("{} {count}", format!("[{topic} unread]").dimmed()));
        } else {
            emit(&format!("[{topic} unread] {count}"));
        }
    }

    pub fn snapshot(self, topic: Topic, count: usize) {
        if self.json {
            emit(&json!({ "type": "snapshot", "topic": topic, "count": count }).to_string());
        } else if self.color {
            emit(&format!("{} {count}", format!("[{topic} on record]").dimmed()));
        } else {
            emit(&format!("[{topic} on record] {count}"));
        }
    }

    pub fn state(self, topic: Topic, state: ReadyState) {
        if self.json {
            emit(&json!({ "type": "state", "topic": topic, "state": state_label(state) }).to_string());
            return;
        }
        let label = state_label(state);
        if !self.color {
            emit(&format!("[{topic}] {label}"));
            return;
        }
        let label = match state {
            ReadyState::Open => label.green().to_string(),
            ReadyState::Connecting => label.yellow().to_string(),
            ReadyState::ClosedError => label.red().to_string(),
            ReadyState::ClosedIntentional => label.dimmed().to_string(),
        };
        emit(&format!("[{topic}] {label}"));
    }

    pub fn logout(self, notice: &LogoutNotice) {
        let mut err = io::stderr().lock();
        if self.color {
            let _ = writeln!(err, "{} {}", notice.title.bold().red(), notice.message);
        } else {
            let _ = writeln!(err, "{} {}", notice.title, notice.message);
        }
    }
}

fn state_label(state: ReadyState) -> &'static str {
    match state {
        ReadyState::Connecting => "connecting",
        ReadyState::Open => "open",
        ReadyState::ClosedError => "closed (error)",
        ReadyState::ClosedIntentional => "closed",
    }
}

/// Write one line to stdout, ignoring a closed pipe.
fn emit(line: &str) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{line}");
}
