// streamgate-api: HTTP-facing clients for the streamgate pipeline
//
// Everything that speaks to a remote server lives here: the long-poll
// streaming protocol, the login providers that mint credentials, and the
// sink client used for outbound delivery. Nothing in this crate knows
// about the in-process bus or unit lifecycle.

pub mod auth;
pub mod error;
pub mod login;
pub mod longpoll;
pub mod sink;
pub mod transport;

pub use auth::Credentials;
pub use error::Error;
pub use login::{BasicLogin, PasswordLogin, StaticLogin};
pub use longpoll::{
    Advice, ConnectBatch, CookieCache, LongPollClient, ProtocolStep, Reply, RequestCounter,
};
pub use sink::SinkClient;
pub use transport::{ProxyConfig, TlsMode, TransportConfig};
