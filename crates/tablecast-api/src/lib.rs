// tablecast-api: Async Rust client for the restaurant backend (REST + event streams)

pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod sse;
pub mod transport;

pub use client::{ApiClient, AuthFailure, AuthFailureHook, BOOTSTRAP_PATHS, is_bootstrap_path};
pub use error::Error;
pub use models::{LoginResponse, RegisterRequest};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use sse::{FrameStream, SseTransport, StreamFrame, StreamTransport, Topic};
pub use transport::{TlsMode, TransportConfig};
