//! Resource update interest held by one session.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Set of resource URIs a session is subscribed to.
///
/// On the server it decides which sessions receive an update; on the client
/// it filters updates and remembers what to replay on reconnect.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    uris: Mutex<HashSet<String>>,
}

impl SubscriptionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `uri`; `true` if it was not already present
    pub fn subscribe(&self, uri: impl Into<String>) -> bool {
        self.uris.lock().insert(uri.into())
    }

    /// Remove `uri`; `true` if it was present
    pub fn unsubscribe(&self, uri: &str) -> bool {
        self.uris.lock().remove(uri)
    }

    /// Whether `uri` is subscribed
    pub fn contains(&self, uri: &str) -> bool {
        self.uris.lock().contains(uri)
    }

    /// Sorted copy of the subscribed URIs
    pub fn snapshot(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.uris.lock().iter().cloned().collect();
        uris.sort();
        uris
    }

    /// Drop everything
    pub fn clear(&self) {
        self.uris.lock().clear();
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.uris.lock().len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let subs = SubscriptionSet::new();
        assert!(subs.subscribe("file:///a"));
        assert!(!subs.subscribe("file:///a"));
        assert_eq!(subs.len(), 1);
        assert!(subs.unsubscribe("file:///a"));
        assert!(!subs.unsubscribe("file:///a"));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let subs = SubscriptionSet::new();
        subs.subscribe("b");
        subs.subscribe("a");
        assert_eq!(subs.snapshot(), vec!["a".to_string(), "b".to_string()]);
        subs.clear();
        assert!(!subs.contains("a"));
    }
}
