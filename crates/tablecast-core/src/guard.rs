// ── Session guard ──
//
// Coordinates the forced logout that follows a rejected credential. Any
// number of concurrent 401 responses collapse into one sequence: clear the
// session, stop the hub, tell the host, prompt the user, then navigate to
// login once the prompt is acknowledged or the release timeout passes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tablecast_api::{AuthFailure, AuthFailureHook, SessionStore, is_bootstrap_path};
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::hub::NotificationHub;

// ── Collaborators ────────────────────────────────────────────────────

/// The part of the notification hub a forced logout tears down.
pub trait HubControl: Send + Sync {
    fn stop_all(&self);
}

impl HubControl for NotificationHub {
    fn stop_all(&self) {
        NotificationHub::stop_all(self);
    }
}

/// Moves the host UI to its unauthenticated entry point.
pub trait Navigator: Send + Sync {
    fn navigate_to_login(&self);
}

/// Shows the one-shot logout message.
pub trait LogoutPrompt: Send + Sync {
    /// Present `notice`. The future resolves when the user acknowledges it.
    fn present(&self, notice: &LogoutNotice) -> BoxFuture<'static, ()>;
}

type LogoutCallback = Arc<dyn Fn(&LogoutNotice) + Send + Sync>;

// ── LogoutReason ─────────────────────────────────────────────────────

/// Why the backend ended the session, as far as its error text tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LogoutReason {
    InvalidToken,
    Expired,
    SessionEnded,
}

impl LogoutReason {
    /// Classify the server's error text. Matching is case-insensitive.
    pub fn from_server_text(text: Option<&str>) -> Self {
        let Some(text) = text else {
            return Self::SessionEnded;
        };
        let text = text.to_lowercase();
        if text.contains("invalid token") {
            Self::InvalidToken
        } else if text.contains("expired") {
            Self::Expired
        } else {
            Self::SessionEnded
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::InvalidToken => "Session Invalid",
            Self::Expired | Self::SessionEnded => "Session Expired",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidToken => "Your login is no longer valid. Please log in again.",
            Self::Expired => "Your login has expired. Please log in again.",
            Self::SessionEnded => "Your session has expired. Please log in again.",
        }
    }
}

/// What the user is told when the session is forcibly ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutNotice {
    pub reason: LogoutReason,
    pub title: &'static str,
    pub message: &'static str,
    /// The backend's own error text, for logs.
    pub server_message: Option<String>,
}

impl LogoutNotice {
    pub fn from_server_text(text: Option<&str>) -> Self {
        let reason = LogoutReason::from_server_text(text);
        Self {
            reason,
            title: reason.title(),
            message: reason.message(),
            server_message: text.map(ToOwned::to_owned),
        }
    }
}

// ── SessionGuard ─────────────────────────────────────────────────────

/// Runs at most one forced logout at a time.
///
/// Register it on the API client with
/// [`ApiClient::with_auth_failure_hook`](tablecast_api::ApiClient::with_auth_failure_hook).
/// State is `idle -> logging-out -> idle`; only `idle` accepts a trigger.
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<GuardInner>,
}

struct GuardInner {
    config: GuardConfig,
    session: Arc<dyn SessionStore>,
    hub: Arc<dyn HubControl>,
    navigator: Arc<dyn Navigator>,
    prompt: Arc<dyn LogoutPrompt>,
    on_logout: Mutex<Option<LogoutCallback>>,
    logging_out: AtomicBool,
}

impl SessionGuard {
    pub fn new(
        config: GuardConfig,
        session: Arc<dyn SessionStore>,
        hub: Arc<dyn HubControl>,
        navigator: Arc<dyn Navigator>,
        prompt: Arc<dyn LogoutPrompt>,
    ) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                config,
                session,
                hub,
                navigator,
                prompt,
                on_logout: Mutex::new(None),
                logging_out: AtomicBool::new(false),
            }),
        }
    }

    /// Register the application's logout handler, replacing any previous one.
    pub fn on_logout<F>(&self, callback: F)
    where
        F: Fn(&LogoutNotice) + Send + Sync + 'static,
    {
        *self.inner.callback() = Some(Arc::new(callback));
    }

    pub fn is_logging_out(&self) -> bool {
        self.inner.logging_out.load(Ordering::Acquire)
    }

    /// Start the forced logout sequence for a rejected credential.
    ///
    /// Returns `false` without side effects if a sequence is already
    /// running. Must be called inside a tokio runtime: the prompt and its
    /// release timeout run on a spawned task.
    pub fn force_logout(&self, server_text: Option<&str>) -> bool {
        let inner = &self.inner;
        if inner
            .logging_out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Logout already in progress, ignoring authentication failure");
            return false;
        }

        let notice = LogoutNotice::from_server_text(server_text);
        warn!(reason = %notice.reason, "Session rejected by backend, logging out");

        inner.session.clear();
        inner.hub.stop_all();

        let callback = inner.callback().clone();
        if let Some(callback) = callback {
            callback(&notice);
        }

        let acknowledged = inner.prompt.present(&notice);
        let release_after = inner.config.release_after;
        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::select! {
                () = acknowledged => debug!("Logout prompt acknowledged"),
                () = tokio::time::sleep(release_after) => {
                    debug!("Logout prompt not acknowledged in time, releasing");
                }
            }
            task_inner.logging_out.store(false, Ordering::Release);
            task_inner.navigator.navigate_to_login();
        });

        true
    }

    /// User-initiated logout: clear the session and stop the hub. No
    /// prompt, no navigation.
    pub fn sign_out(&self) {
        self.inner.session.clear();
        self.inner.hub.stop_all();
        info!("Signed out");
    }
}

impl AuthFailureHook for SessionGuard {
    fn on_auth_failure(&self, failure: &AuthFailure) {
        // A rejected login is a wrong password, not a dead session.
        if is_bootstrap_path(&failure.path) {
            debug!(path = %failure.path, "Authentication failure on bootstrap path, not logging out");
            return;
        }
        self.force_logout(failure.message.as_deref());
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("logging_out", &self.is_logging_out())
            .field("release_after", &self.inner.config.release_after)
            .finish_non_exhaustive()
    }
}

impl GuardInner {
    fn callback(&self) -> MutexGuard<'_, Option<LogoutCallback>> {
        self.on_logout.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tablecast_api::MemorySessionStore;
    use tokio::sync::oneshot;

    use super::*;
    use crate::testing::{advance, logged_in, settle};

    #[derive(Default)]
    struct CountingHub(AtomicUsize);

    impl HubControl for CountingHub {
        fn stop_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingNavigator(AtomicUsize);

    impl Navigator for CountingNavigator {
        fn navigate_to_login(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Prompt the test acknowledges by hand.
    #[derive(Default)]
    struct ManualPrompt {
        shown: Mutex<Vec<LogoutNotice>>,
        acks: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl ManualPrompt {
        fn acknowledge(&self) {
            for ack in self.acks.lock().unwrap().drain(..) {
                let _ = ack.send(());
            }
        }
    }

    impl LogoutPrompt for ManualPrompt {
        fn present(&self, notice: &LogoutNotice) -> BoxFuture<'static, ()> {
            self.shown.lock().unwrap().push(notice.clone());
            let (tx, rx) = oneshot::channel();
            self.acks.lock().unwrap().push(tx);
            Box::pin(async move {
                // A dropped sender is not an acknowledgement.
                if rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
        }
    }

    struct Fixture {
        guard: SessionGuard,
        session: Arc<MemorySessionStore>,
        hub: Arc<CountingHub>,
        navigator: Arc<CountingNavigator>,
        prompt: Arc<ManualPrompt>,
    }

    fn fixture() -> Fixture {
        let session = logged_in();
        let hub = Arc::new(CountingHub::default());
        let navigator = Arc::new(CountingNavigator::default());
        let prompt = Arc::new(ManualPrompt::default());
        let guard = SessionGuard::new(
            GuardConfig::default(),
            session.clone(),
            hub.clone(),
            navigator.clone(),
            prompt.clone(),
        );
        Fixture {
            guard,
            session,
            hub,
            navigator,
            prompt,
        }
    }

    fn failure(path: &str, message: &str) -> AuthFailure {
        AuthFailure {
            path: path.to_owned(),
            message: Some(message.to_owned()),
        }
    }

    #[test]
    fn reason_from_server_text() {
        assert_eq!(
            LogoutReason::from_server_text(Some("JWT: Invalid Token signature")),
            LogoutReason::InvalidToken
        );
        assert_eq!(
            LogoutReason::from_server_text(Some("Token EXPIRED at 12:00")),
            LogoutReason::Expired
        );
        assert_eq!(
            LogoutReason::from_server_text(Some("Unauthorized")),
            LogoutReason::SessionEnded
        );
        assert_eq!(LogoutReason::from_server_text(None), LogoutReason::SessionEnded);
    }

    #[test]
    fn notice_keeps_server_text() {
        let notice = LogoutNotice::from_server_text(Some("jwt expired"));
        assert_eq!(notice.reason, LogoutReason::Expired);
        assert_eq!(notice.title, "Session Expired");
        assert_eq!(notice.server_message.as_deref(), Some("jwt expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_in_one_tick_log_out_once() {
        let fx = fixture();
        let callbacks = Arc::new(AtomicUsize::new(0));
        let c = callbacks.clone();
        fx.guard.on_logout(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            fx.guard.on_auth_failure(&failure("orders", "Invalid token"));
        }

        assert_eq!(fx.hub.0.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
        assert_eq!(fx.prompt.shown.lock().unwrap().len(), 1);
        assert_eq!(
            fx.prompt.shown.lock().unwrap()[0].reason,
            LogoutReason::InvalidToken
        );
        assert!(!fx.session.is_logged_in());
        assert!(fx.guard.is_logging_out());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_across_threads_log_out_once() {
        let fx = fixture();
        let barrier = Arc::new(tokio::sync::Barrier::new(5));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let guard = fx.guard.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    guard.force_logout(Some("expired"))
                })
            })
            .collect();

        let mut started = 0;
        for task in tasks {
            if task.await.unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(fx.hub.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flag_released_after_timeout_without_acknowledgement() {
        let fx = fixture();
        fx.guard.force_logout(Some("expired"));
        settle().await;

        advance(Duration::from_millis(2_900)).await;
        assert!(fx.guard.is_logging_out());
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 0);

        advance(Duration::from_millis(100)).await;
        assert!(!fx.guard.is_logging_out());
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 1);

        // A late acknowledgement does not navigate twice.
        fx.prompt.acknowledge();
        settle().await;
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgement_releases_early() {
        let fx = fixture();
        fx.guard.force_logout(None);
        settle().await;

        fx.prompt.acknowledge();
        settle().await;
        assert!(!fx.guard.is_logging_out());
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(5)).await;
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_invalidation_after_release_logs_out_again() {
        let fx = fixture();
        fx.guard.force_logout(None);
        fx.prompt.acknowledge();
        settle().await;

        assert!(fx.guard.force_logout(Some("Invalid token")));
        assert_eq!(fx.hub.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_does_not_log_out() {
        let fx = fixture();
        fx.guard
            .on_auth_failure(&failure("users/login", "Bad credentials"));

        assert!(!fx.guard.is_logging_out());
        assert_eq!(fx.hub.0.load(Ordering::SeqCst), 0);
        assert!(fx.session.is_logged_in());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_skips_prompt_and_navigation() {
        let fx = fixture();
        fx.guard.sign_out();
        settle().await;

        assert!(!fx.session.is_logged_in());
        assert_eq!(fx.hub.0.load(Ordering::SeqCst), 1);
        assert!(fx.prompt.shown.lock().unwrap().is_empty());
        assert_eq!(fx.navigator.0.load(Ordering::SeqCst), 0);
        assert!(!fx.guard.is_logging_out());
    }
}
