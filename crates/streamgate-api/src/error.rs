use thiserror::Error;

use crate::longpoll::ProtocolStep;

/// Top-level error type for the `streamgate-api` crate.
///
/// Covers login, transport, the long-poll protocol, and outbound sinks.
/// `streamgate-core` folds these into its pipeline error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected or the login response was unusable.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Proxy could not be configured.
    #[error("Invalid proxy {host}:{port}: {message}")]
    Proxy {
        host: String,
        port: u16,
        message: String,
    },

    // ── Streaming protocol ──────────────────────────────────────────
    /// The server answered a protocol step with something other than success.
    #[error("Protocol violation during {step}: {message}")]
    Protocol { step: ProtocolStep, message: String },

    // ── Delivery ────────────────────────────────────────────────────
    /// The sink answered with a non-2xx status.
    #[error("Sink rejected delivery (HTTP {status}): {body}")]
    Sink { status: u16, body: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Credential wire frame could not be decoded.
    #[error("Malformed credentials frame: {0}")]
    Codec(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Sink { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
