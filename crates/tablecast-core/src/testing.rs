// Test doubles shared by the channel, hub and guard tests.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use tablecast_api::{
    Error as ApiError, FrameStream, MemorySessionStore, Session, SessionStore, StreamFrame,
    StreamTransport, Topic,
};
use tokio::sync::mpsc;

type FrameSender = mpsc::UnboundedSender<Result<StreamFrame, ApiError>>;

/// Transport whose streams are fed by the test.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    connections: Mutex<Vec<(Topic, Option<FrameSender>)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connection attempts made for `topic`.
    pub(crate) fn connects(&self, topic: Topic) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .count()
    }

    /// Sender for the most recent connection to `topic`.
    pub(crate) fn latest(&self, topic: Topic) -> FrameSender {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| *t == topic)
            .and_then(|(_, tx)| tx.clone())
            .unwrap()
    }

    /// End the most recent stream for `topic` as if the server hung up.
    /// Senders cloned out through [`latest`](Self::latest) must be dropped too.
    pub(crate) fn hang_up(&self, topic: Topic) {
        if let Some((_, tx)) = self
            .connections
            .lock()
            .unwrap()
            .iter_mut()
            .rev()
            .find(|(t, _)| *t == topic)
        {
            tx.take();
        }
    }

    /// Connections to `topic` whose stream is still held by a channel task.
    pub(crate) fn live(&self, topic: Topic) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, tx)| *t == topic && tx.as_ref().is_some_and(|tx| !tx.is_closed()))
            .count()
    }
}

impl StreamTransport for ScriptedTransport {
    fn connect(&self, topic: Topic, _credential: &SecretString) -> FrameStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().push((topic, Some(tx)));
        Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}

pub(crate) fn event_frame(topic: Topic, kind: Option<&str>, data: &str) -> StreamFrame {
    StreamFrame::Event {
        event: topic.event_name().to_owned(),
        id: kind.map(ToOwned::to_owned),
        data: data.to_owned(),
    }
}

pub(crate) fn logged_in() -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::with_session(Session::new(
        "test-token",
        "host",
        vec!["WAITER".to_owned()],
    )))
}

pub(crate) fn logged_out() -> Arc<dyn SessionStore> {
    Arc::new(MemorySessionStore::new())
}

/// Let spawned tasks run until they block. Time is paused in these tests,
/// so this does not advance any timer that has not already elapsed.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}
