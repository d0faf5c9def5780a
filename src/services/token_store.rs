//! Push token store
//!
//! Holds the single current device token. Backed by a `watch` channel:
//! reads are snapshot borrows that never wait on a writer, the last write is
//! visible immediately, and delivery tasks subscribe to notice invalidation
//! while they sleep between retries.

use crate::domain::types::PushToken;
use tokio::sync::watch;
use tracing::info;

pub struct TokenStore {
    tx: watch::Sender<Option<PushToken>>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    /// Empty store
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn with_token(value: &str) -> Self {
        let store = Self::new();
        store.set(PushToken::new(value));
        store
    }

    /// Overwrite the current token
    pub fn set(&self, token: PushToken) {
        info!(token = %redact(&token.value), "push_token_registered");
        self.tx.send_replace(Some(token));
    }

    pub fn current(&self) -> Option<PushToken> {
        self.tx.borrow().clone()
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Clear unconditionally. Returns whether a token was present.
    pub fn clear(&self) -> bool {
        let previous = self.tx.send_replace(None);
        if previous.is_some() {
            info!("push_token_cleared");
        }
        previous.is_some()
    }

    /// Clear only if the store still holds `value`.
    ///
    /// A token registered after the failing delivery started is left alone.
    pub fn invalidate_if(&self, value: &str) -> bool {
        self.tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|token| token.value == value) {
                *current = None;
                true
            } else {
                false
            }
        })
    }

    /// Receiver that wakes on every set/clear
    pub fn subscribe(&self) -> watch::Receiver<Option<PushToken>> {
        self.tx.subscribe()
    }
}

/// Shorten a token for logs
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(6).collect();
    if prefix.len() < value.len() {
        format!("{prefix}…")
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let store = TokenStore::new();
        assert!(store.current().is_none());
        assert!(!store.is_present());
    }

    #[test]
    fn test_set_overwrites() {
        let store = TokenStore::new();
        store.set(PushToken::new("tok-1"));
        store.set(PushToken::new("tok-2"));
        assert_eq!(store.current().unwrap().value, "tok-2");
    }

    #[test]
    fn test_invalidate_if_matches() {
        let store = TokenStore::with_token("tok-1");
        assert!(store.invalidate_if("tok-1"));
        assert!(store.current().is_none());
    }

    #[test]
    fn test_invalidate_if_keeps_newer_token() {
        let store = TokenStore::with_token("tok-1");
        store.set(PushToken::new("tok-2"));
        assert!(!store.invalidate_if("tok-1"));
        assert_eq!(store.current().unwrap().value, "tok-2");
    }

    #[test]
    fn test_clear() {
        let store = TokenStore::with_token("tok-1");
        assert!(store.clear());
        assert!(!store.clear());
    }

    #[tokio::test]
    async fn test_subscriber_sees_invalidation() {
        let store = TokenStore::with_token("tok-1");
        let mut rx = store.subscribe();
        store.invalidate_if("tok-1");
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("ExponentPushToken[abc]"), "Expone…");
        assert_eq!(redact("abc"), "abc");
    }
}
