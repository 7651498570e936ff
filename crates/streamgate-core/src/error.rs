// ── Core error types ──
//
// Pipeline-level failures. Units report these through logs or bus replies;
// the `From<streamgate_api::Error>` impl folds HTTP-layer errors into the
// transport / protocol / auth kinds the pipeline distinguishes.

use thiserror::Error;

use crate::bus::BusError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Remote side ──────────────────────────────────────────────────
    /// Network or HTTP-level failure talking to a remote server.
    #[error("Transport failure: {message}")]
    Transport { message: String, transient: bool },

    /// The streaming server answered with something we can't use.
    #[error("Protocol violation during {step}: {message}")]
    ProtocolViolation { step: String, message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication denied by provider '{provider}': {message}")]
    AuthDenied { provider: String, message: String },

    /// A previous login failed and no reset has been requested since.
    #[error("Login disabled for provider '{provider}' after an earlier failure")]
    LoginDisabled { provider: String },

    // ── Delivery ─────────────────────────────────────────────────────
    #[error("Delivery to {target} abandoned after {attempts} attempts")]
    DeliveryExhausted { target: String, attempts: u32 },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Unit '{unit}' lifecycle error: {message}")]
    Lifecycle { unit: String, message: String },

    #[error("Unknown unit kind: {kind}")]
    UnknownUnitKind { kind: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Bus(BusError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<streamgate_api::Error> for CoreError {
    fn from(err: streamgate_api::Error) -> Self {
        let transient = err.is_transient();
        match err {
            streamgate_api::Error::Authentication { message } => CoreError::AuthDenied {
                provider: String::new(),
                message,
            },
            streamgate_api::Error::Protocol { step, message } => CoreError::ProtocolViolation {
                step: step.to_string(),
                message,
            },
            streamgate_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            err @ (streamgate_api::Error::Tls(_) | streamgate_api::Error::Proxy { .. }) => {
                CoreError::Config {
                    message: err.to_string(),
                }
            }
            other => CoreError::Transport {
                message: other.to_string(),
                transient,
            },
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::Storage {
            message: err.to_string(),
        }
    }
}
