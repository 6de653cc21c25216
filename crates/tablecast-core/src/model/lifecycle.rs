// ── Host application lifecycle ──

use serde::{Deserialize, Serialize};

/// Foreground state of the host application, as reported by its runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AppState {
    /// In the foreground and receiving input.
    #[default]
    Active,
    /// Visible but not receiving input (transitions, system overlays).
    Inactive,
    /// Not visible.
    Background,
}

impl AppState {
    pub fn is_foreground(self) -> bool {
        self == Self::Active
    }
}
