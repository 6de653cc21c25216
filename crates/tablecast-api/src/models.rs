// Wire types for the user bootstrap endpoints and error bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST users/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Response of `POST users/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Body of `POST users/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

/// Error body shapes the backend produces. Spring's default error
/// attributes use `message` and `error`; some handlers return bare text.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Best-effort server text from a raw response body.
    pub(crate) fn text_from(body: &str) -> Option<String> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<Self>(trimmed) {
            Ok(parsed) => parsed
                .message
                .filter(|m| !m.is_empty())
                .or(parsed.error)
                .filter(|m| !m.is_empty()),
            Err(_) => Some(trimmed.to_owned()),
        }
    }
}
