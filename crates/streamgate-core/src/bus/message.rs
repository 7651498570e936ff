use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use streamgate_api::Credentials;
use tokio::sync::oneshot;
use tracing::debug;

use super::BusError;

/// Multi-valued string headers attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Headers::append`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), vec![value.into()]);
    }

    /// Add a value to `name`, keeping existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Message body. Events and credentials are reference counted so a
/// publish to many handlers never copies them.
#[derive(Debug, Clone)]
pub enum Payload {
    Control(String),
    Event(Arc<Value>),
    Credentials(Arc<Credentials>),
    Empty,
}

impl Payload {
    pub fn control(command: impl Into<String>) -> Self {
        Self::Control(command.into())
    }

    pub fn event(value: Value) -> Self {
        Self::Event(Arc::new(value))
    }

    pub fn as_control(&self) -> Option<&str> {
        match self {
            Self::Control(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Value> {
        match self {
            Self::Event(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_credentials(&self) -> Option<&Arc<Credentials>> {
        match self {
            Self::Credentials(c) => Some(c),
            _ => None,
        }
    }
}

pub(crate) type ReplySender = oneshot::Sender<Result<Message, BusError>>;

/// A message as seen by a handler.
#[derive(Debug)]
pub struct Message {
    address: String,
    headers: Headers,
    payload: Payload,
    reply_to: Option<ReplySender>,
}

impl Message {
    pub fn new(address: impl Into<String>, payload: Payload, headers: Headers) -> Self {
        Self {
            address: address.into(),
            headers,
            payload,
            reply_to: None,
        }
    }

    pub(crate) fn with_reply(mut self, reply_to: ReplySender) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Answer a request. A no-op for fire-and-forget messages.
    pub fn reply(&mut self, payload: Payload) {
        let reply = Message::new(self.address.clone(), payload, Headers::new());
        self.respond(Ok(reply));
    }

    /// Answer a request with a failure code and message.
    pub fn fail(&mut self, code: u16, message: impl Into<String>) {
        let error = BusError::ReplyFailed {
            address: self.address.clone(),
            code,
            message: message.into(),
        };
        self.respond(Err(error));
    }

    fn respond(&mut self, result: Result<Message, BusError>) {
        if let Some(tx) = self.reply_to.take() {
            if tx.send(result).is_err() {
                debug!(address = %self.address, "requester went away before the reply");
            }
        }
    }
}
