// REST API HTTP client
//
// Wraps `reqwest::Client` with base-URL joining and the two session
// interceptors: bearer attachment on the way out, 401 detection on the
// way in. Endpoint business logic belongs to the callers.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::{ErrorBody, LoginRequest, LoginResponse, RegisterRequest};
use crate::session::{Session, SessionStore};
use crate::transport::TransportConfig;

/// Endpoints that bootstrap a session and must never carry a bearer token.
pub const BOOTSTRAP_PATHS: [&str; 2] = ["users/register", "users/login"];

/// Returns `true` if `path` is one of the unauthenticated bootstrap endpoints.
pub fn is_bootstrap_path(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    BOOTSTRAP_PATHS.iter().any(|p| path.ends_with(p))
}

// ── Auth failure hook ────────────────────────────────────────────────

/// A `401 Unauthorized` observed by the client.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Path of the request that failed, relative to the base URL.
    pub path: String,
    /// Server-provided error text, if the body had any.
    pub message: Option<String>,
}

/// Receives every authentication failure the client observes.
///
/// Called synchronously from the response path, once per failed response,
/// before the request's `Err` is returned. Implementations must not block.
pub trait AuthFailureHook: Send + Sync {
    fn on_auth_failure(&self, failure: &AuthFailure);
}

// ── ApiClient ────────────────────────────────────────────────────────

/// HTTP client for the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<dyn SessionStore>,
    auth_hook: Option<Arc<dyn AuthFailureHook>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("logged_in", &self.session.is_logged_in())
            .field("auth_hook", &self.auth_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the API root, e.g. `http://10.0.2.2:8080/api/v1`.
    pub fn new(
        base_url: Url,
        session: Arc<dyn SessionStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, session))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, session: Arc<dyn SessionStore>) -> Self {
        Self {
            http,
            base_url,
            session,
            auth_hook: None,
        }
    }

    /// Install the hook that coordinates forced logout.
    pub fn with_auth_failure_hook(mut self, hook: Arc<dyn AuthFailureHook>) -> Self {
        self.auth_hook = Some(hook);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Join a relative API path onto the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    // ── Interceptors ─────────────────────────────────────────────────

    /// Outbound interceptor: attach the bearer credential unless the path
    /// bootstraps a session.
    fn authorize(&self, builder: reqwest::RequestBuilder, path: &str) -> reqwest::RequestBuilder {
        if is_bootstrap_path(path) {
            return builder;
        }
        match self.session.credential() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Inbound interceptor: turn the response into a body or an error,
    /// reporting authentication failures to the hook.
    async fn intercept(&self, path: &str, resp: reqwest::Response) -> Result<String, Error> {
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            // An unreadable body only means there is no server text.
            let body = resp.text().await.ok();
            return Err(self.unauthorized(path, body.as_deref()));
        }

        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: ErrorBody::text_from(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_owned()),
            });
        }

        Ok(body)
    }

    /// Report a 401 to the hook and build the error the caller gets.
    fn unauthorized(&self, path: &str, body: Option<&str>) -> Error {
        let message = body.and_then(ErrorBody::text_from);
        warn!(path, message = message.as_deref().unwrap_or(""), "request rejected: unauthorized");

        if let Some(hook) = &self.auth_hook {
            hook.on_auth_failure(&AuthFailure {
                path: path.to_owned(),
                message: message.clone(),
            });
        }

        Error::Authentication {
            message: message.unwrap_or_else(|| "unauthorized".into()),
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn send_raw<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.authorize(self.http.request(method, url), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(Error::Transport)?;
        self.intercept(path, resp).await
    }

    async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, Error> {
        let text = self.send_raw(method, path, body).await?;
        // Empty 2xx bodies deserialize as JSON null.
        let source = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(source).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.clone(),
        })
    }

    /// `GET {base}/{path}` decoded as JSON.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    /// `POST {base}/{path}` with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// `PUT {base}/{path}` with a JSON body.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        self.send(Method::PUT, path, Some(body)).await
    }

    /// `DELETE {base}/{path}`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.send::<T, ()>(Method::DELETE, path, None).await
    }

    // ── Session bootstrap ────────────────────────────────────────────

    /// Log in and store the issued session.
    ///
    /// A rejected login is an `Error::Authentication` like any other 401,
    /// so the auth hook sees it too; the guard ignores failures on
    /// bootstrap paths.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<Session, Error> {
        let request = LoginRequest {
            username,
            password: password.expose_secret(),
        };
        let resp: LoginResponse = self.post("users/login", &request).await?;

        if resp.token.is_empty() {
            return Err(Error::Authentication {
                message: "login response carried no token".into(),
            });
        }

        let session = Session::new(resp.token, resp.username, resp.roles);
        self.session.store(session.clone());
        debug!(username, "session stored");

        Ok(session)
    }

    /// Register a new staff account. Returns the server's confirmation text.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, Error> {
        self.send_raw(Method::POST, "users/register", Some(request)).await
    }

    /// Forget the stored session locally. The backend keeps no server-side
    /// session state for bearer tokens.
    pub fn logout(&self) {
        self.session.clear();
    }
}
