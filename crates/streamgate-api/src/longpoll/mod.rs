// Long-poll streaming protocol (Bayeux over HTTP)
//
// `LongPollClient` performs the four protocol exchanges (handshake,
// advice, subscribe, connect). The per-session state it needs -- request
// ids and cookies -- is owned by the caller and passed in by reference so
// a session can be dropped and rebuilt on every handshake.

mod client;
mod message;
mod session;

use std::fmt;

pub use client::LongPollClient;
pub use message::{Advice, ConnectBatch, Reply, decode_event};
pub use session::{CookieCache, FIRST_CONNECT_ID, RequestCounter};

/// Default protocol version segment in endpoint paths.
pub const DEFAULT_API_VERSION: &str = "41.0";

/// Content type sent with every protocol request.
pub const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";

/// One request/response exchange of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolStep {
    Handshake,
    Advice,
    Subscribe,
    Connect,
}

impl ProtocolStep {
    /// Endpoint path segment; advice is negotiated on the connect endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Advice | Self::Connect => "connect",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Advice => "advice",
            Self::Subscribe => "subscribe",
            Self::Connect => "connect",
        })
    }
}
