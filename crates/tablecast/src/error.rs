//! CLI error types with miette diagnostics.
//!
//! Maps core, config and wire errors into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tablecast_config::ConfigError;
use tablecast_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to backend at {url}")]
    #[diagnostic(
        code(tablecast::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(tablecast::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tablecast::auth_failed),
        help("Sign in again with: tablecast login --profile {profile}")
    )]
    AuthFailed { profile: String, message: String },

    #[error("Not logged in to profile '{profile}'")]
    #[diagnostic(
        code(tablecast::not_logged_in),
        help("Sign in first with: tablecast login --profile {profile}")
    )]
    NotLoggedIn { profile: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(tablecast::no_credentials),
        help(
            "Store a password with: tablecast config set-password --profile {profile}\n\
             Or set TABLECAST_USERNAME and TABLECAST_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    #[error("Session ended by the backend: {message}")]
    #[diagnostic(
        code(tablecast::session_ended),
        help("Sign in again with: tablecast login")
    )]
    SessionEnded { message: String },

    // ── Backend ──────────────────────────────────────────────────────
    #[error("Not found: {message}")]
    #[diagnostic(code(tablecast::not_found))]
    NotFound { message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(tablecast::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tablecast::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tablecast::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: tablecast config init --profile {name} --base-url <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(tablecast::no_config),
        help(
            "Create a profile with: tablecast config init --base-url <URL>\n\
             Or pass --base-url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(tablecast::config))]
    Config(ConfigError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. }
            | Self::NotLoggedIn { .. }
            | Self::NoCredentials { .. }
            | Self::SessionEnded { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name, available } => CliError::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                profile: "current".into(),
                message,
            },
            CoreError::NotLoggedIn => CliError::NotLoggedIn {
                profile: "current".into(),
            },
            CoreError::NotFound { message } => CliError::NotFound { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Api { message, .. } | CoreError::Internal(message) => {
                CliError::ApiError { message }
            }
        }
    }
}

impl From<tablecast_api::Error> for CliError {
    fn from(err: tablecast_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
