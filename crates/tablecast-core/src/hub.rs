// ── Notification hub ──
//
// Owns the orders and reservations channels, tracks unread counters and
// screen focus, and fans events out to listeners. One hub per session
// scope; the host constructs it and passes it where needed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tablecast_api::{SessionStore, StreamTransport};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::channel::{EventChannel, ReadyState};
use crate::config::HubConfig;
use crate::listeners::{ListenerSet, Subscription};
use crate::model::{AppState, DomainEvent, Notification, Topic};
use crate::notify;

// ── NotificationHub ──────────────────────────────────────────────────

/// Aggregation point for realtime events.
///
/// Cheaply cloneable via `Arc<HubInner>`. Construction does not connect;
/// call [`initialize`](Self::initialize) once a session exists.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// Indexed by [`Topic::index`].
    channels: [EventChannel; 2],
    state: Mutex<HubState>,
    event_listeners: [ListenerSet<Arc<DomainEvent>>; 2],
    count_listeners: [ListenerSet<u32>; 2],
    notification_listeners: ListenerSet<Notification>,
    watchers: Mutex<CancellationToken>,
}

#[derive(Debug, Default)]
struct HubState {
    unread: [u32; 2],
    current_screen: Option<Topic>,
    app_state: AppState,
    /// Bumped by every `stop_all`. Deliveries started under an older epoch
    /// are abandoned.
    epoch: u64,
    /// Counter values waiting to reach the count listeners, per topic.
    counts: [CountQueue; 2],
}

/// Counter values are queued under the state lock and delivered by one
/// thread at a time, so listeners see them in the order the counter took them.
#[derive(Debug, Default)]
struct CountQueue {
    pending: VecDeque<u32>,
    draining: bool,
}

impl CountQueue {
    /// Queue `value`. Returns `true` if the caller must drain.
    fn push(&mut self, value: u32) -> bool {
        self.pending.push_back(value);
        !std::mem::replace(&mut self.draining, true)
    }
}

impl NotificationHub {
    pub fn new(
        config: HubConfig,
        transport: Arc<dyn StreamTransport>,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        let inner = Arc::new_cyclic(|hub: &Weak<HubInner>| {
            let channels = Topic::ALL.map(|topic| {
                let hub = hub.clone();
                EventChannel::new(
                    topic,
                    Arc::clone(&transport),
                    Arc::clone(&session),
                    config.reconnect_delay,
                    Arc::new(move |generation, event: DomainEvent| {
                        if let Some(hub) = hub.upgrade() {
                            hub.on_event(event, Some(generation));
                        }
                    }),
                )
            });

            HubInner {
                channels,
                state: Mutex::new(HubState::default()),
                event_listeners: std::array::from_fn(|_| ListenerSet::new()),
                count_listeners: std::array::from_fn(|_| ListenerSet::new()),
                notification_listeners: ListenerSet::new(),
                watchers: Mutex::new(CancellationToken::new()),
            }
        });

        Self { inner }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open both channels.
    ///
    /// Channels that are already connecting or open are left alone, so
    /// calling this twice never creates a second connection. Without a
    /// session credential nothing opens.
    pub fn initialize(&self) {
        for channel in &self.inner.channels {
            match channel.state() {
                ReadyState::Connecting | ReadyState::Open => {
                    debug!(topic = %channel.topic(), "Event stream already active");
                }
                ReadyState::ClosedError | ReadyState::ClosedIntentional => {
                    channel.open();
                }
            }
        }
    }

    /// Hard reset: close both channels, zero the counters, clear focus and
    /// drop every listener. Afterwards the hub behaves as if just
    /// constructed and [`initialize`](Self::initialize) starts fresh.
    ///
    /// The app state is an input from the host runtime and is kept.
    pub fn stop_all(&self) {
        let inner = &self.inner;
        {
            // Closing under the state lock keeps a frame already read off a
            // stream from counting after the reset.
            let mut state = inner.state();
            for channel in &inner.channels {
                channel.close();
            }
            state.unread = [0; 2];
            state.current_screen = None;
            state.epoch = state.epoch.wrapping_add(1);
            for queue in &mut state.counts {
                queue.pending.clear();
            }
        }
        for set in &inner.event_listeners {
            set.clear();
        }
        for set in &inner.count_listeners {
            set.clear();
        }
        inner.notification_listeners.clear();
        info!("Notification hub stopped");
    }

    /// Stop everything and end all lifecycle watchers started with
    /// [`watch_app_state`](Self::watch_app_state).
    pub fn shutdown(&self) {
        let watchers = std::mem::take(&mut *self.inner.watchers());
        watchers.cancel();
        self.stop_all();
    }

    /// React to the host app moving between foreground and background.
    ///
    /// Returning to the foreground reopens every channel that is not open.
    /// Going to the background keeps the streams open; events that arrive
    /// meanwhile are dropped by [`on_event`](Self::on_event) and are not
    /// fetched again later.
    pub fn handle_app_state_change(&self, next: AppState) {
        self.inner.handle_app_state_change(next);
    }

    /// Forward every value of `states` to
    /// [`handle_app_state_change`](Self::handle_app_state_change), starting
    /// with the current one. Forwarding stops when the returned guard is
    /// dropped, the sender goes away, or the hub shuts down.
    pub fn watch_app_state(&self, mut states: watch::Receiver<AppState>) -> AppStateWatch {
        let cancel = self.inner.watchers().child_token();
        let current = *states.borrow_and_update();
        self.inner.handle_app_state_change(current);

        let hub = Arc::downgrade(&self.inner);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = *states.borrow_and_update();
                        let Some(hub) = hub.upgrade() else { break };
                        hub.handle_app_state_change(next);
                    }
                }
            }
            debug!("App state watcher exiting");
        });

        AppStateWatch {
            _guard: cancel.drop_guard(),
        }
    }

    /// Set the screen the user is looking at (`None` for anything that is
    /// not an orders or reservations screen). Focusing a topic with unread
    /// events zeroes its counter and notifies its count listeners.
    pub fn set_current_screen(&self, screen: Option<Topic>) {
        let drain = {
            let mut state = self.inner.state();
            state.current_screen = screen;
            screen.filter(|topic| {
                let slot = topic.index();
                if state.unread[slot] == 0 {
                    return false;
                }
                state.unread[slot] = 0;
                debug!(%topic, "Unread counter reset by focus");
                state.counts[slot].push(0)
            })
        };
        if let Some(topic) = drain {
            self.inner.drain_counts(topic);
        }
    }

    /// Entry point for parsed events. The channels call this; hosts with
    /// their own event source may too.
    pub fn on_event(&self, event: DomainEvent) {
        self.inner.on_event(event, None);
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Raw events for `topic`, delivered unmodified.
    pub fn add_event_listener<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&Arc<DomainEvent>) + Send + Sync + 'static,
    {
        self.inner.event_listeners[topic.index()].add(listener)
    }

    /// Unread counter for `topic`, called with the new value on every change.
    pub fn add_count_listener<F>(&self, topic: Topic, listener: F) -> Subscription
    where
        F: Fn(&u32) + Send + Sync + 'static,
    {
        self.inner.count_listeners[topic.index()].add(listener)
    }

    /// User-facing notifications for events on unfocused topics.
    pub fn add_notification_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.notification_listeners.add(listener)
    }

    /// Total registrations across every registry.
    pub fn listener_count(&self) -> usize {
        let inner = &self.inner;
        inner.event_listeners.iter().map(ListenerSet::len).sum::<usize>()
            + inner.count_listeners.iter().map(ListenerSet::len).sum::<usize>()
            + inner.notification_listeners.len()
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn unread_count(&self, topic: Topic) -> u32 {
        self.inner.state().unread[topic.index()]
    }

    pub fn current_screen(&self) -> Option<Topic> {
        self.inner.state().current_screen
    }

    pub fn app_state(&self) -> AppState {
        self.inner.state().app_state
    }

    pub fn channel(&self, topic: Topic) -> &EventChannel {
        &self.inner.channels[topic.index()]
    }

    pub fn channel_state(&self, topic: Topic) -> ReadyState {
        self.channel(topic).state()
    }

    pub fn is_connected(&self, topic: Topic) -> bool {
        self.channel(topic).is_connected()
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("NotificationHub")
            .field("app_state", &state.app_state)
            .field("current_screen", &state.current_screen)
            .field("unread", &state.unread)
            .field("channels", &self.inner.channels)
            .finish_non_exhaustive()
    }
}

// ── Inner ────────────────────────────────────────────────────────────

impl HubInner {
    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchers(&self) -> MutexGuard<'_, CancellationToken> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_app_state_change(&self, next: AppState) {
        let previous = std::mem::replace(&mut self.state().app_state, next);
        if previous == next {
            return;
        }
        debug!(from = %previous, to = %next, "App state changed");

        if !previous.is_foreground() && next.is_foreground() {
            for channel in &self.channels {
                if !channel.is_connected() {
                    info!(topic = %channel.topic(), "Back in foreground, reopening event stream");
                    channel.open();
                }
            }
        } else if !next.is_foreground() {
            info!("App in background, keeping event streams open");
        }
    }

    /// `generation` identifies the channel connection that read the event;
    /// events from a connection that has since been closed are dropped.
    fn on_event(&self, event: DomainEvent, generation: Option<u64>) {
        let topic = event.topic;
        let slot = topic.index();

        let (epoch, unfocused, drain) = {
            let mut state = self.state();
            if generation.is_some_and(|g| !self.channels[slot].is_current(g)) {
                debug!(%topic, "Dropping event from a closed event stream");
                return;
            }
            if !state.app_state.is_foreground() {
                debug!(%topic, kind = %event.kind, "App in background, dropping event");
                return;
            }
            if state.current_screen == Some(topic) {
                (state.epoch, false, false)
            } else {
                let count = state.unread[slot].saturating_add(1);
                state.unread[slot] = count;
                let drain = state.counts[slot].push(count);
                (state.epoch, true, drain)
            }
        };

        if drain {
            self.drain_counts(topic);
        }

        let event = Arc::new(event);
        if self.state().epoch != epoch {
            return;
        }
        self.event_listeners[slot].emit(&event);

        if unfocused && self.state().epoch == epoch {
            self.notification_listeners.emit(&notify::synthesize(&event));
        }
    }

    /// Deliver queued counter values for `topic` until the queue is empty.
    /// Values queued meanwhile, by this thread or another, are delivered
    /// here too.
    fn drain_counts(&self, topic: Topic) {
        let slot = topic.index();
        let mut reset = DrainReset {
            hub: self,
            slot,
            armed: true,
        };
        loop {
            let next = {
                let mut state = self.state();
                let queue = &mut state.counts[slot];
                let next = queue.pending.pop_front();
                if next.is_none() {
                    queue.draining = false;
                }
                next
            };
            let Some(count) = next else { break };
            self.count_listeners[slot].emit(&count);
        }
        reset.armed = false;
    }
}

/// Releases the drain flag if a count listener panics mid-delivery.
struct DrainReset<'a> {
    hub: &'a HubInner,
    slot: usize,
    armed: bool,
}

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.hub.state();
            state.counts[self.slot].draining = false;
        }
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.watchers().cancel();
    }
}

// ── AppStateWatch ────────────────────────────────────────────────────

/// Keeps an app state watcher alive. Dropping it stops the watcher.
#[must_use = "the watcher stops when this guard is dropped"]
pub struct AppStateWatch {
    _guard: DropGuard,
}

impl fmt::Debug for AppStateWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppStateWatch").finish_non_exhaustive()
    }
}
