// Pipeline units: the four roles a deployed stage can play.

pub mod auth;
pub mod consumer;
pub mod dedup;
pub mod listener;

pub use auth::{AuthBroker, LoginProvider, request_credentials};
pub use consumer::{DeliveryConsumer, DeliveryStats, JsonBody, LogConsumer, PayloadTransform};
pub use dedup::{DedupGate, DedupOutcome, MemoryStore, MembershipStore, RedisStore};
pub use listener::{Phase, StreamingListener};
