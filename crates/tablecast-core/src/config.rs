// ── Runtime connection configuration ──
//
// These types describe *how* to reach the backend and how the realtime
// core paces itself. They never touch disk: the CLI builds a
// `BackendConfig` (usually through `tablecast-config`) and hands it in.

use std::time::Duration;

use tablecast_api::transport::{TlsMode, TransportConfig};
use url::Url;

/// Delay between a stream error and its single scheduled reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Ceiling after which a forced logout releases its in-progress flag even
/// if the user never acknowledged the prompt.
pub const DEFAULT_LOGOUT_RELEASE: Duration = Duration::from_secs(3);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (development backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for talking to one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// API root, e.g. `http://10.0.2.2:8080/api/v1`.
    pub base_url: Url,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// REST request timeout.
    pub timeout: Duration,
    /// Delay before reconnecting a failed event stream.
    pub reconnect_delay: Duration,
    /// Safety-net release of the forced-logout flag.
    pub logout_release: Duration,
}

impl BackendConfig {
    /// Config for `base_url` with default timings.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            logout_release: DEFAULT_LOGOUT_RELEASE,
        }
    }

    /// Transport settings for the REST client.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    /// Timings for the notification hub.
    pub fn hub(&self) -> HubConfig {
        HubConfig {
            reconnect_delay: self.reconnect_delay,
        }
    }

    /// Timings for the session guard.
    pub fn guard(&self) -> GuardConfig {
        GuardConfig {
            release_after: self.logout_release,
        }
    }
}

/// Notification hub tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub reconnect_delay: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Session guard tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardConfig {
    pub release_after: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            release_after: DEFAULT_LOGOUT_RELEASE,
        }
    }
}
