//! Bounded admission set: the in-flight request table guarding the whole
//! pipeline against overload.
//!
//! Generic over the caller-visible success/error types so it can be reused
//! wherever a request needs to be deduplicated and capacity-limited by a
//! string key — here, always an asset id. Concurrent callers for the same
//! key are joined to the first in-flight request rather than dispatched
//! twice.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

struct AdmissionEntry<V, E> {
    waiters: Vec<oneshot::Sender<Result<V, E>>>,
}

/// The result of attempting to admit a request for a given key.
pub enum AdmitOutcome<V, E> {
    /// No other request for this key is in flight; the caller owns
    /// dispatching and must eventually call [`AdmissionSet::complete`].
    Admitted,
    /// Another caller already owns this key; await the receiver for the
    /// shared result instead of dispatching again.
    Joined(oneshot::Receiver<Result<V, E>>),
    /// The set is at capacity.
    Full,
}

/// A bounded, keyed admission set.
pub struct AdmissionSet<V, E> {
    inner: Mutex<HashMap<String, AdmissionEntry<V, E>>>,
    max_size: usize,
}

impl<V: Clone, E: Clone> AdmissionSet<V, E> {
    pub fn new(max_size: usize) -> Self {
        Self { inner: Mutex::new(HashMap::new()), max_size }
    }

    /// Attempts to admit `key`. Returns [`AdmitOutcome::Full`] without
    /// mutating state when the set is already at capacity and `key` isn't
    /// already present (a joining caller is always accepted, even at
    /// capacity, since it adds no new in-flight dispatch).
    pub async fn admit(&self, key: &str) -> AdmitOutcome<V, E> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return AdmitOutcome::Joined(rx);
        }
        if inner.len() >= self.max_size {
            return AdmitOutcome::Full;
        }
        inner.insert(key.to_string(), AdmissionEntry { waiters: Vec::new() });
        AdmitOutcome::Admitted
    }

    /// Completes `key`'s in-flight entry, fanning the result out to every
    /// joined waiter and removing the entry. A no-op if `key` isn't
    /// present (e.g. called twice by mistake).
    pub async fn complete(&self, key: &str, result: Result<V, E>) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.remove(key) {
            for waiter in entry.waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_is_admitted() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(10);
        assert!(matches!(set.admit("a").await, AdmitOutcome::Admitted));
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn second_caller_for_same_key_joins_instead_of_admitting() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(10);
        let _ = set.admit("a").await;

        match set.admit("a").await {
            AdmitOutcome::Joined(rx) => {
                set.complete("a", Ok(42)).await;
                assert_eq!(rx.await.unwrap(), Ok(42));
            }
            _ => panic!("expected Joined"),
        }
    }

    #[tokio::test]
    async fn full_set_rejects_new_keys() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(1);
        let _ = set.admit("a").await;
        assert!(matches!(set.admit("b").await, AdmitOutcome::Full));
    }

    #[tokio::test]
    async fn full_set_still_accepts_joiners_of_an_existing_key() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(1);
        let _ = set.admit("a").await;
        assert!(matches!(set.admit("a").await, AdmitOutcome::Joined(_)));
    }

    #[tokio::test]
    async fn complete_removes_the_entry() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(10);
        let _ = set.admit("a").await;
        set.complete("a", Ok(1)).await;
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn complete_on_missing_key_is_a_harmless_noop() {
        let set: AdmissionSet<u32, String> = AdmissionSet::new(10);
        set.complete("missing", Ok(1)).await;
        assert!(set.is_empty().await);
    }
}
