// Membership stores for the dedup gate
//
// `check_and_record` is the only operation and it must be atomic: of any
// number of concurrent calls with the same fingerprint, exactly one sees
// `true`.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::CoreError;

/// Window size of the in-memory store.
pub const DEFAULT_WINDOW: usize = 100;
/// Fingerprint expiry in Redis.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[async_trait]
pub trait MembershipStore: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    /// Record `fingerprint`; `true` if it was not already present.
    async fn check_and_record(&self, fingerprint: &str) -> Result<bool, CoreError>;
}

// ── In-memory sliding window ────────────────────────────────────────

#[derive(Default)]
struct Window {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Remembers the last `capacity` fingerprints, evicting the oldest.
pub struct MemoryStore {
    capacity: usize,
    window: Mutex<Window>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.window.lock().map_or(0, |w| w.order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn check_and_record(&self, fingerprint: &str) -> Result<bool, CoreError> {
        let mut window = self
            .window
            .lock()
            .map_err(|_| CoreError::Internal("dedup window lock poisoned".into()))?;

        if window.members.contains(fingerprint) {
            return Ok(false);
        }
        window.members.insert(fingerprint.to_owned());
        window.order.push_back(fingerprint.to_owned());
        while window.order.len() > self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.members.remove(&evicted);
            }
        }
        Ok(true)
    }
}

// ── Redis ───────────────────────────────────────────────────────────

/// Shared store backed by `SET key 1 EX ttl NX`.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    ttl: Duration,
    prefix: String,
}

impl RedisStore {
    /// Validate the URL; the connection is opened on first use.
    pub fn open(url: &str, ttl: Duration, prefix: impl Into<String>) -> Result<Self, CoreError> {
        let client = redis::Client::open(url).map_err(|e| CoreError::Config {
            message: format!("invalid redis url '{url}': {e}"),
        })?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            ttl,
            prefix: prefix.into(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CoreError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl MembershipStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn check_and_record(&self, fingerprint: &str) -> Result<bool, CoreError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{fingerprint}", self.prefix);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn second_sighting_is_a_duplicate() {
        let store = MemoryStore::default();
        assert!(store.check_and_record("a").await.unwrap());
        assert!(!store.check_and_record("a").await.unwrap());
        assert!(store.check_and_record("b").await.unwrap());
    }

    #[tokio::test]
    async fn oldest_fingerprint_is_evicted_past_capacity() {
        let store = MemoryStore::new(2);
        for fp in ["a", "b", "c"] {
            assert!(store.check_and_record(fp).await.unwrap());
        }
        assert_eq!(store.len(), 2);
        // "a" fell out of the window and counts as new again.
        assert!(store.check_and_record("a").await.unwrap());
        assert!(!store.check_and_record("c").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_admit_exactly_one() {
        let store = Arc::new(MemoryStore::default());
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.check_and_record("same").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[test]
    fn bad_redis_url_is_a_config_error() {
        let err = RedisStore::open("not a url", DEFAULT_TTL, "dedup:").err().unwrap();
        assert!(matches!(err, CoreError::Config { .. }));
    }
}
