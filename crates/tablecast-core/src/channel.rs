// ── Event channel ──
//
// One long-lived event stream per topic. A channel owns at most one
// connection task at a time; every connection gets a fresh generation
// number and cancellation token, and a scheduled reconnect only fires if
// its generation is still the active one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;
use serde::Serialize;
use tablecast_api::sse::CONNECTION_EVENT;
use tablecast_api::{Error as ApiError, FrameStream, SessionStore, StreamFrame, StreamTransport};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::model::{DomainEvent, EventKind, Topic};

/// Connection state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReadyState {
    /// A connection attempt is in flight.
    Connecting,
    /// The server accepted the stream.
    Open,
    /// The stream failed; a reconnect is pending.
    ClosedError,
    /// Closed by the caller, or never opened. No reconnect.
    ClosedIntentional,
}

/// Receives every domain event the channel parses, in arrival order,
/// together with the generation of the connection that read it.
pub type EventSink = Arc<dyn Fn(u64, DomainEvent) + Send + Sync>;

/// The event stream for one topic. Cheap to clone.
///
/// [`open`](Self::open) and reconnects spawn onto the current tokio runtime.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    topic: Topic,
    transport: Arc<dyn StreamTransport>,
    session: Arc<dyn SessionStore>,
    reconnect_delay: Duration,
    sink: EventSink,
    state: watch::Sender<ReadyState>,
    active: Mutex<Option<ActiveConnection>>,
    generation: AtomicU64,
    opens: AtomicU64,
}

struct ActiveConnection {
    generation: u64,
    cancel: CancellationToken,
}

impl EventChannel {
    pub fn new(
        topic: Topic,
        transport: Arc<dyn StreamTransport>,
        session: Arc<dyn SessionStore>,
        reconnect_delay: Duration,
        sink: EventSink,
    ) -> Self {
        let (state, _) = watch::channel(ReadyState::ClosedIntentional);
        Self {
            inner: Arc::new(ChannelInner {
                topic,
                transport,
                session,
                reconnect_delay,
                sink,
                state,
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                opens: AtomicU64::new(0),
            }),
        }
    }

    pub fn topic(&self) -> Topic {
        self.inner.topic
    }

    /// Open the stream with the current session credential.
    ///
    /// Without a credential this does nothing and returns `false`: the
    /// channel outlives login and logout. An existing connection is closed
    /// before the new one starts.
    pub fn open(&self) -> bool {
        let Some(credential) = self.inner.session.credential() else {
            tracing::debug!(topic = %self.inner.topic, "No credential, not opening event stream");
            return false;
        };
        self.inner.start(&credential, None)
    }

    /// Close the stream. No reconnect follows.
    pub fn close(&self) {
        if let Some(active) = self.inner.slot().take() {
            active.cancel.cancel();
            tracing::info!(topic = %self.inner.topic, "Event stream closed");
        }
        self.inner.state.send_replace(ReadyState::ClosedIntentional);
    }

    /// `true` only while the stream is [`ReadyState::Open`].
    pub fn is_connected(&self) -> bool {
        self.state() == ReadyState::Open
    }

    pub fn state(&self) -> ReadyState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.state.subscribe()
    }

    /// `true` while the connection with this generation is the active one.
    /// Closing or replacing a connection makes its generation stale.
    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.is_current(generation)
    }

    /// Connection attempts started so far, reconnects included.
    pub fn open_count(&self) -> u64 {
        self.inner.opens.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("topic", &self.inner.topic)
            .field("state", &self.state())
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl ChannelInner {
    fn slot(&self) -> MutexGuard<'_, Option<ActiveConnection>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a connection task. With `expected`, only if that generation is
    /// still active (scheduled reconnects).
    fn start(self: &Arc<Self>, credential: &SecretString, expected: Option<u64>) -> bool {
        let mut slot = self.slot();

        if let Some(expected) = expected {
            if slot.as_ref().map(|a| a.generation) != Some(expected) {
                return false;
            }
        }

        if let Some(previous) = slot.take() {
            tracing::debug!(topic = %self.topic, "Closing existing event stream");
            previous.cancel.cancel();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        *slot = Some(ActiveConnection {
            generation,
            cancel: cancel.clone(),
        });
        self.opens.fetch_add(1, Ordering::Relaxed);
        self.state.send_replace(ReadyState::Connecting);

        let frames = self.transport.connect(self.topic, credential);
        drop(slot);

        tokio::spawn(run_connection(
            Arc::downgrade(self),
            generation,
            cancel,
            frames,
            self.reconnect_delay,
        ));
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|a| a.generation == generation && !a.cancel.is_cancelled())
    }

    fn set_state_if_current(&self, generation: u64, state: ReadyState) -> bool {
        let slot = self.slot();
        if slot.as_ref().is_some_and(|a| a.generation == generation) {
            self.state.send_replace(state);
            true
        } else {
            false
        }
    }

    fn handle_frame(&self, generation: u64, frame: StreamFrame) {
        let topic = self.topic;
        match frame {
            StreamFrame::Opened => {
                if self.set_state_if_current(generation, ReadyState::Open) {
                    tracing::info!(%topic, "Event stream open");
                }
            }
            StreamFrame::Event { .. } if !self.is_current(generation) => {
                tracing::debug!(%topic, "Dropping frame from a closed event stream");
            }
            StreamFrame::Event { event, id, data } if event == topic.event_name() => {
                match serde_json::from_str::<serde_json::Value>(&data) {
                    Ok(payload) => {
                        let kind = EventKind::from_identifier(id.as_deref());
                        (self.sink)(generation, DomainEvent::new(topic, kind, payload));
                    }
                    Err(e) => {
                        tracing::warn!(%topic, error = %e, "Dropping malformed event frame");
                    }
                }
            }
            StreamFrame::Event { event, data, .. } if event == CONNECTION_EVENT => {
                tracing::debug!(%topic, %data, "Event stream confirmed by server");
            }
            StreamFrame::Event { event, .. } => {
                tracing::debug!(%topic, %event, "Ignoring unrelated event");
            }
            StreamFrame::Comment => tracing::trace!(%topic, "Keep-alive"),
        }
    }

    fn reconnect(self: &Arc<Self>, generation: u64) {
        let Some(credential) = self.session.credential() else {
            tracing::debug!(topic = %self.topic, "No credential, dropping scheduled reconnect");
            return;
        };
        if self.start(&credential, Some(generation)) {
            tracing::info!(topic = %self.topic, "Reconnecting event stream");
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if let Some(active) = self.slot().take() {
            active.cancel.cancel();
        }
    }
}

// ── Connection task ──────────────────────────────────────────────────

/// Read one connection until it fails or is cancelled, then schedule the
/// single reconnect.
async fn run_connection(
    channel: Weak<ChannelInner>,
    generation: u64,
    cancel: CancellationToken,
    mut frames: FrameStream,
    reconnect_delay: Duration,
) {
    let failure = loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = frames.next() => item,
        };
        let Some(inner) = channel.upgrade() else {
            return;
        };
        match item {
            Some(Ok(frame)) => inner.handle_frame(generation, frame),
            Some(Err(e)) => break e,
            None => break ApiError::StreamClosed,
        }
    };

    // The stream handle goes away before the delay starts.
    drop(frames);

    {
        let Some(inner) = channel.upgrade() else {
            return;
        };
        if !inner.set_state_if_current(generation, ReadyState::ClosedError) {
            return;
        }
        tracing::warn!(
            topic = %inner.topic,
            error = %failure,
            delay_ms = u64::try_from(reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "Event stream failed, reconnecting after delay"
        );
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(reconnect_delay) => {}
    }

    if let Some(inner) = channel.upgrade() {
        inner.reconnect(generation);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{ScriptedTransport, advance, event_frame, logged_in, logged_out, settle};

    const DELAY: Duration = Duration::from_secs(5);

    fn channel(
        transport: &Arc<ScriptedTransport>,
        session: Arc<dyn SessionStore>,
    ) -> (EventChannel, Arc<StdMutex<Vec<DomainEvent>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let ch = EventChannel::new(
            Topic::Orders,
            transport.clone(),
            session,
            DELAY,
            Arc::new(move |_, ev: DomainEvent| sink_seen.lock().unwrap().push(ev)),
        );
        (ch, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn open_without_credential_is_a_no_op() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_out());

        assert!(!ch.open());
        settle().await;
        assert_eq!(transport.connects(Topic::Orders), 0);
        assert_eq!(ch.state(), ReadyState::ClosedIntentional);
    }

    #[tokio::test(start_paused = true)]
    async fn opened_frame_moves_to_open() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());

        assert!(ch.open());
        assert_eq!(ch.state(), ReadyState::Connecting);
        assert!(!ch.is_connected());

        transport.latest(Topic::Orders).send(Ok(StreamFrame::Opened)).unwrap();
        settle().await;
        assert!(ch.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn second_open_closes_the_first_connection() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());

        ch.open();
        ch.open();
        settle().await;

        assert_eq!(transport.connects(Topic::Orders), 2);
        assert_eq!(transport.live(Topic::Orders), 1);
        assert_eq!(ch.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_parsed_with_kind_from_identifier() {
        let transport = ScriptedTransport::new();
        let (ch, seen) = channel(&transport, logged_in());
        ch.open();
        let tx = transport.latest(Topic::Orders);

        tx.send(Ok(StreamFrame::Opened)).unwrap();
        tx.send(Ok(event_frame(Topic::Orders, Some("created"), r#"{"id":1}"#)))
            .unwrap();
        tx.send(Ok(event_frame(Topic::Orders, None, r#"{"id":2}"#)))
            .unwrap();
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, EventKind::Created);
        assert_eq!(seen[1].kind, EventKind::Updated);
        assert_eq!(seen[1].entity_id().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_dropped_and_channel_stays_open() {
        let transport = ScriptedTransport::new();
        let (ch, seen) = channel(&transport, logged_in());
        ch.open();
        let tx = transport.latest(Topic::Orders);

        tx.send(Ok(StreamFrame::Opened)).unwrap();
        tx.send(Ok(event_frame(Topic::Orders, Some("created"), "{not json")))
            .unwrap();
        settle().await;
        assert!(ch.is_connected());

        tx.send(Ok(event_frame(Topic::Orders, Some("created"), r#"{"id":9}"#)))
            .unwrap();
        settle().await;

        assert!(ch.is_connected());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(transport.connects(Topic::Orders), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_from_a_closed_connection_are_dropped() {
        let transport = ScriptedTransport::new();
        let (ch, seen) = channel(&transport, logged_in());
        ch.open();
        transport.latest(Topic::Orders).send(Ok(StreamFrame::Opened)).unwrap();
        settle().await;
        assert!(ch.is_current(1));

        ch.close();
        assert!(!ch.is_current(1));
        // A frame the task had already read when the close landed.
        ch.inner
            .handle_frame(1, event_frame(Topic::Orders, Some("created"), r#"{"id":1}"#));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(ch.state(), ReadyState::ClosedIntentional);
    }

    #[tokio::test(start_paused = true)]
    async fn other_event_names_are_ignored() {
        let transport = ScriptedTransport::new();
        let (ch, seen) = channel(&transport, logged_in());
        ch.open();
        let tx = transport.latest(Topic::Orders);

        tx.send(Ok(StreamFrame::Opened)).unwrap();
        tx.send(Ok(StreamFrame::Event {
            event: CONNECTION_EVENT.into(),
            id: None,
            data: "connected".into(),
        }))
        .unwrap();
        tx.send(Ok(event_frame(Topic::Reservations, None, r#"{"id":1}"#)))
            .unwrap();
        tx.send(Ok(StreamFrame::Comment)).unwrap();
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(ch.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn error_schedules_exactly_one_reconnect_after_delay() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());
        ch.open();
        let tx = transport.latest(Topic::Orders);
        tx.send(Ok(StreamFrame::Opened)).unwrap();
        tx.send(Err(ApiError::Stream("connection reset".into())))
            .unwrap();
        settle().await;

        assert_eq!(ch.state(), ReadyState::ClosedError);
        assert!(tx.is_closed());
        assert_eq!(transport.connects(Topic::Orders), 1);

        advance(DELAY - Duration::from_millis(1)).await;
        assert_eq!(transport.connects(Topic::Orders), 1);

        advance(Duration::from_millis(1)).await;
        assert_eq!(transport.connects(Topic::Orders), 2);
        assert_eq!(ch.state(), ReadyState::Connecting);

        advance(DELAY * 3).await;
        assert_eq!(transport.connects(Topic::Orders), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_stream_counts_as_an_error() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());
        ch.open();
        transport.latest(Topic::Orders).send(Ok(StreamFrame::Opened)).unwrap();
        settle().await;

        transport.hang_up(Topic::Orders);
        settle().await;

        assert_eq!(ch.state(), ReadyState::ClosedError);
        advance(DELAY).await;
        assert_eq!(ch.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_a_pending_reconnect() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());
        ch.open();
        transport
            .latest(Topic::Orders)
            .send(Err(ApiError::StreamConnect("refused".into())))
            .unwrap();
        settle().await;
        assert_eq!(ch.state(), ReadyState::ClosedError);

        ch.close();
        advance(DELAY * 2).await;

        assert_eq!(transport.connects(Topic::Orders), 1);
        assert_eq!(ch.state(), ReadyState::ClosedIntentional);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reconnect_does_not_replace_a_newer_connection() {
        let transport = ScriptedTransport::new();
        let (ch, _) = channel(&transport, logged_in());
        ch.open();
        transport
            .latest(Topic::Orders)
            .send(Err(ApiError::StreamConnect("refused".into())))
            .unwrap();
        settle().await;

        // Reopened by the caller while the reconnect timer is pending.
        ch.open();
        transport.latest(Topic::Orders).send(Ok(StreamFrame::Opened)).unwrap();
        settle().await;

        advance(DELAY * 2).await;
        assert_eq!(transport.connects(Topic::Orders), 2);
        assert!(ch.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_skipped_after_logout() {
        let transport = ScriptedTransport::new();
        let session = logged_in();
        let (ch, _) = channel(&transport, session.clone());
        ch.open();
        transport
            .latest(Topic::Orders)
            .send(Err(ApiError::Stream("reset".into())))
            .unwrap();
        settle().await;

        session.clear();
        advance(DELAY).await;

        assert_eq!(transport.connects(Topic::Orders), 1);
        assert_eq!(ch.state(), ReadyState::ClosedError);
    }
}
