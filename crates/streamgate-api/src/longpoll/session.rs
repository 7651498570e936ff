use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::trace;

/// Handshake, advice and subscribe use ids 1-3; the first connect
/// reuses 3.
pub const FIRST_CONNECT_ID: u32 = 3;

/// Monotonic id source for connect requests.
///
/// When the counter reaches `u32::MAX` it restarts at 0, so the maximum
/// itself is never handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCounter {
    next: u32,
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::starting_at(FIRST_CONNECT_ID)
    }
}

impl RequestCounter {
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Hand out the current id and advance.
    pub fn next_id(&mut self) -> u32 {
        if self.next == u32::MAX {
            self.next = 0;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// The id the next call to [`RequestCounter::next_id`] returns.
    pub fn peek(&self) -> u32 {
        if self.next == u32::MAX { 0 } else { self.next }
    }
}

/// Session cookies keyed by name; a later `Set-Cookie` replaces an
/// earlier one with the same name.
#[derive(Debug, Clone, Default)]
pub struct CookieCache {
    cookies: BTreeMap<String, String>,
}

impl CookieCache {
    /// Record one `Set-Cookie` value. Attributes after the first `;` are
    /// dropped; values without a name are ignored.
    pub fn store(&mut self, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or_default().trim();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        trace!(cookie = name, "storing cookie");
        self.cookies.insert(name.to_owned(), value.trim().to_owned());
    }

    /// Record every `Set-Cookie` header of a response.
    pub fn capture(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                self.store(raw);
            }
        }
    }

    /// Value for a `Cookie` request header, or `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
