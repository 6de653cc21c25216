//! Server-Sent-Events stream transport.
//!
//! The backend exposes one long-lived event stream per topic at
//! `{base_url}/sse/{topic}`. Each domain change arrives as a named event
//! (`order-event`, `reservation-event`) whose `id:` field carries the
//! change kind and whose `data:` field carries the entity as JSON.
//!
//! This module only moves frames. Reconnect policy, frame parsing and
//! fan-out live in `tablecast-core`, so [`SseTransport`] turns off the
//! library's built-in reconnect.

use std::pin::Pin;

use eventsource_client::{self as es, Client as _};
use futures_core::Stream;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::transport::USER_AGENT;

// ── Topic ────────────────────────────────────────────────────────────

/// One of the two event categories the backend streams.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Topic {
    Orders,
    Reservations,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Orders, Topic::Reservations];

    /// Path segment under `{base_url}/sse/`.
    pub fn path(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Reservations => "reservations",
        }
    }

    /// SSE event name carrying domain changes for this topic.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Orders => "order-event",
            Self::Reservations => "reservation-event",
        }
    }

    /// Singular noun used in user-facing text.
    pub fn noun(self) -> &'static str {
        match self {
            Self::Orders => "Order",
            Self::Reservations => "Reservation",
        }
    }

    /// Stable index for per-topic arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Orders => 0,
            Self::Reservations => 1,
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────

/// Name of the confirmation event the server sends right after connect.
pub const CONNECTION_EVENT: &str = "connection";

/// One item read off an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// The server accepted the stream. Always the first frame.
    Opened,
    /// A dispatched SSE event.
    Event {
        /// The `event:` field.
        event: String,
        /// The `id:` field, if the server sent one.
        id: Option<String>,
        /// The `data:` field.
        data: String,
    },
    /// Keep-alive comment line.
    Comment,
}

/// Boxed stream of frames for one connection.
///
/// Dropping the stream closes the underlying connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, Error>> + Send>>;

/// Opens event streams. Abstracted so the channel state machine can be
/// driven by scripted streams in tests.
pub trait StreamTransport: Send + Sync {
    /// Open a stream for `topic` with the given bearer credential.
    ///
    /// Connection failures surface as the first `Err` item; the returned
    /// stream ends after the first error.
    fn connect(&self, topic: Topic, credential: &SecretString) -> FrameStream;
}

// ── SseTransport ─────────────────────────────────────────────────────

/// [`StreamTransport`] backed by `eventsource-client`.
// TODO: honor TlsMode on streams too (custom CA, insecure) via
// `ClientBuilder::build_with_conn`; today only REST requests use it.
#[derive(Debug, Clone)]
pub struct SseTransport {
    base_url: Url,
}

impl SseTransport {
    /// `base_url` is the API root, e.g. `http://10.0.2.2:8080/api/v1`.
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Full stream URL for a topic.
    pub fn stream_url(&self, topic: Topic) -> String {
        format!(
            "{}/sse/{}",
            self.base_url.as_str().trim_end_matches('/'),
            topic.path()
        )
    }

    fn build_client(
        &self,
        topic: Topic,
        credential: &SecretString,
    ) -> Result<impl es::Client + use<>, Error> {
        let url = self.stream_url(topic);
        let auth = format!("Bearer {}", credential.expose_secret());

        let client = es::ClientBuilder::for_url(&url)
            .map_err(|e| Error::StreamConnect(format!("{e:?}")))?
            .header("Authorization", &auth)
            .map_err(|e| Error::StreamConnect(format!("{e:?}")))?
            .header("User-Agent", USER_AGENT)
            .map_err(|e| Error::StreamConnect(format!("{e:?}")))?
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();

        Ok(client)
    }
}

impl StreamTransport for SseTransport {
    fn connect(&self, topic: Topic, credential: &SecretString) -> FrameStream {
        tracing::info!(url = %self.stream_url(topic), %topic, "Connecting to event stream");

        let client = self.build_client(topic, credential);

        Box::pin(async_stream::stream! {
            let client = match client {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut inner = client.stream();
            let mut opened = false;

            while let Some(item) = inner.next().await {
                match item {
                    Ok(sse) => {
                        if !opened {
                            opened = true;
                            yield Ok(StreamFrame::Opened);
                        }
                        if let Some(frame) = frame_from_sse(sse) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        let message = format!("{e:?}");
                        yield Err(if opened {
                            Error::Stream(message)
                        } else {
                            Error::StreamConnect(message)
                        });
                        return;
                    }
                }
            }

            yield Err(Error::StreamClosed);
        })
    }
}

/// Map a library item to a frame. Items with no frame equivalent
/// (connection details) only serve to mark the stream open.
fn frame_from_sse(sse: es::SSE) -> Option<StreamFrame> {
    match sse {
        es::SSE::Event(ev) => Some(StreamFrame::Event {
            event: ev.event_type,
            id: ev.id.filter(|id| !id.is_empty()),
            data: ev.data,
        }),
        es::SSE::Comment(_) => Some(StreamFrame::Comment),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn topic_wire_names() {
        assert_eq!(Topic::Orders.path(), "orders");
        assert_eq!(Topic::Orders.event_name(), "order-event");
        assert_eq!(Topic::Reservations.path(), "reservations");
        assert_eq!(Topic::Reservations.event_name(), "reservation-event");
        assert_eq!(Topic::Reservations.to_string(), "reservations");
        assert_eq!(Topic::from_str("orders").ok(), Some(Topic::Orders));
    }

    #[test]
    fn topic_indices_are_distinct() {
        assert_ne!(Topic::Orders.index(), Topic::Reservations.index());
        for topic in Topic::ALL {
            assert!(topic.index() < Topic::ALL.len());
        }
    }

    #[test]
    fn stream_url_joins_base() {
        let base = Url::parse("http://localhost:8080/api/v1/").unwrap();
        let transport = SseTransport::new(base);
        assert_eq!(
            transport.stream_url(Topic::Orders),
            "http://localhost:8080/api/v1/sse/orders"
        );
        assert_eq!(
            transport.stream_url(Topic::Reservations),
            "http://localhost:8080/api/v1/sse/reservations"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_yields_one_error_then_ends() {
        let base = Url::parse("http://127.0.0.1:9/api/v1").unwrap();
        let transport = SseTransport::new(base);
        let mut stream = transport.connect(Topic::Orders, &SecretString::from("t".to_string()));

        let first = stream.next().await;
        assert!(matches!(first, Some(Err(_))), "got {first:?}");
        assert!(stream.next().await.is_none());
    }
}
