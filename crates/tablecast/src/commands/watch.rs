//! `tablecast watch`: follow both event streams until interrupted.
//!
//! Wires the same pieces a POS front end would: a notification hub over
//! SSE, a session guard on the REST client, and terminal stand-ins for the
//! logout prompt and the login screen. A forced logout ends the command.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use tablecast_api::{ApiClient, SessionStore, SseTransport};
use tablecast_config as config;
use tablecast_core::{
    LogoutNotice, LogoutPrompt, Navigator, NotificationHub, ReadyState, SessionGuard,
    Subscription, Topic,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::commands::Backend;
use crate::error::CliError;
use crate::output::{self, Printer};

// ── Terminal collaborators ───────────────────────────────────────────

/// Prints the logout notice and acknowledges it at once.
struct TerminalPrompt {
    printer: Printer,
    shown: Mutex<Option<LogoutNotice>>,
}

impl TerminalPrompt {
    fn new(printer: Printer) -> Self {
        Self {
            printer,
            shown: Mutex::new(None),
        }
    }

    fn session_ended(&self) -> CliError {
        let shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        CliError::SessionEnded {
            message: shown
                .as_ref()
                .map_or("session ended", |notice| notice.message)
                .to_owned(),
        }
    }
}

impl LogoutPrompt for TerminalPrompt {
    fn present(&self, notice: &LogoutNotice) -> BoxFuture<'static, ()> {
        self.printer.logout(notice);
        *self.shown.lock().unwrap_or_else(PoisonError::into_inner) = Some(notice.clone());
        Box::pin(std::future::ready(()))
    }
}

/// "Navigating to login" ends the watch loop.
struct EndWatch(Arc<Notify>);

impl Navigator for EndWatch {
    fn navigate_to_login(&self) {
        self.0.notify_one();
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let backend = Backend::resolve(global)?;
    let printer = Printer::new(output::should_color(&global.color), args.json);

    let transport = Arc::new(SseTransport::new(backend.config.base_url.clone()));
    let hub = NotificationHub::new(backend.config.hub(), transport, backend.session.clone());

    let login_screen = Arc::new(Notify::new());
    let prompt = Arc::new(TerminalPrompt::new(printer));
    let guard = SessionGuard::new(
        backend.config.guard(),
        backend.session.clone(),
        Arc::new(hub.clone()),
        Arc::new(EndWatch(login_screen.clone())),
        prompt.clone(),
    );
    let client = backend
        .client()?
        .with_auth_failure_hook(Arc::new(guard.clone()));

    if !backend.session.is_logged_in() {
        sign_in_from_profile(&backend, &client).await?;
    }

    hub.set_current_screen(args.screen);
    let _subscriptions = subscribe(&hub, printer, &args);
    hub.initialize();

    // Snapshot requests run beside the loop so a slow backend never holds
    // up ctrl-c or the logout navigation. Dropping the set aborts them.
    let mut probes = JoinSet::new();
    for topic in Topic::ALL {
        probes.spawn(probe(client.clone(), topic, printer));
    }

    let mut orders = hub.channel(Topic::Orders).subscribe_state();
    let mut reservations = hub.channel(Topic::Reservations).subscribe_state();

    let outcome = loop {
        tokio::select! {
            biased;
            () = login_screen.notified() => break Err(prompt.session_ended()),
            res = tokio::signal::ctrl_c() => break res.map_err(CliError::from),
            Ok(()) = orders.changed() => {
                let state = *orders.borrow_and_update();
                on_state(&mut probes, &client, Topic::Orders, state, printer);
            }
            Ok(()) = reservations.changed() => {
                let state = *reservations.borrow_and_update();
                on_state(&mut probes, &client, Topic::Reservations, state, printer);
            }
            Some(_) = probes.join_next(), if !probes.is_empty() => {}
        }
    };

    probes.abort_all();
    hub.shutdown();
    tracing::info!(profile = %backend.profile_name, "watch ended");
    outcome
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Log in with the profile's stored credentials when no session is saved.
async fn sign_in_from_profile(backend: &Backend, client: &ApiClient) -> Result<(), CliError> {
    let profile = backend.profile.clone().unwrap_or_default();
    let not_logged_in = || CliError::NotLoggedIn {
        profile: backend.profile_name.clone(),
    };

    let username = config::resolve_username(&profile, &backend.profile_name)
        .map_err(|_| not_logged_in())?;
    let password = config::resolve_password(&profile, &backend.profile_name)
        .map_err(|_| not_logged_in())?;

    client.login(&username, &password).await?;
    tracing::info!(%username, "signed in with stored credentials");
    Ok(())
}

fn subscribe(hub: &NotificationHub, printer: Printer, args: &WatchArgs) -> Vec<Subscription> {
    let mut subs = vec![hub.add_notification_listener(move |n| printer.notification(n))];
    for topic in Topic::ALL {
        subs.push(hub.add_count_listener(topic, move |count| printer.unread(topic, *count)));
        if args.events || args.screen == Some(topic) {
            subs.push(hub.add_event_listener(topic, move |event| printer.event(event)));
        }
    }
    subs
}

fn on_state(
    probes: &mut JoinSet<()>,
    client: &ApiClient,
    topic: Topic,
    state: ReadyState,
    printer: Printer,
) {
    printer.state(topic, state);
    // Streams don't report why they failed; a REST call tells a dead
    // session apart from a network blip and lets the guard react.
    if state == ReadyState::ClosedError {
        probes.spawn(probe(client.clone(), topic, printer));
    }
}

/// REST collection behind each topic.
fn collection_path(topic: Topic) -> &'static str {
    match topic {
        Topic::Orders => "order",
        Topic::Reservations => "reservations",
    }
}

async fn probe(client: ApiClient, topic: Topic, printer: Printer) {
    match client.get::<Value>(collection_path(topic)).await {
        Ok(Value::Array(items)) => {
            tracing::debug!(%topic, count = items.len(), "snapshot fetched");
            printer.snapshot(topic, items.len());
        }
        Ok(_) => tracing::debug!(%topic, "snapshot was not a list"),
        Err(e) if e.is_auth_failure() => {
            tracing::debug!(%topic, "snapshot rejected, session guard notified");
        }
        Err(e) => tracing::warn!(%topic, error = %e, "snapshot request failed"),
    }
}
