//! The TTL-bounded waiter cache and the waiters it holds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::TRACE_TARGET;
use crate::envelope::RequestId;
use crate::frame::FrameReader;

/// Default channel depth for a persistent (subscription-style) waiter.
const PERSISTENT_CHANNEL_DEPTH: usize = 32;

/// A registered consumer of inbound messages for one correlation id.
///
/// Cloning a `Waiter` clones the underlying channel sender (`mpsc::Sender`
/// is itself a cheap, shareable handle) so the TTL cache can return owned
/// copies from `try_get` without giving up its own reference.
#[derive(Debug, Clone)]
pub struct Waiter {
    id: RequestId,
    persistent: bool,
    sender: mpsc::Sender<Arc<FrameReader>>,
}

impl Waiter {
    /// Create a one-shot waiter: removed from the cache after its first
    /// successful dispatch.
    pub fn one_shot(id: RequestId) -> (Self, mpsc::Receiver<Arc<FrameReader>>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                id,
                persistent: false,
                sender: tx,
            },
            rx,
        )
    }

    /// Create a persistent waiter for subscription-style methods: it stays
    /// registered across multiple dispatches.
    pub fn persistent(id: RequestId) -> (Self, mpsc::Receiver<Arc<FrameReader>>) {
        let (tx, rx) = mpsc::channel(PERSISTENT_CHANNEL_DEPTH);
        (
            Self {
                id,
                persistent: true,
                sender: tx,
            },
            rx,
        )
    }

    /// The correlation id this waiter was registered under.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Whether this waiter survives past its first dispatch.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Hand a dispatched `FrameReader` to the waiter. Returns `false` if the
    /// waiter's receiver has been dropped — the caller released interest
    /// (e.g. canceled a pending `send`) and the waiter should be
    /// unregistered.
    pub(crate) async fn dispatch(&self, reader: Arc<FrameReader>) -> bool {
        self.sender.send(reader).await.is_ok()
    }
}

#[derive(Debug)]
struct CacheEntry {
    waiter: Waiter,
    last_access: Instant,
}

/// A concurrent map from correlation id to [`Waiter`] with sliding-window
/// expiration: every successful `try_get` resets the entry's access clock.
#[derive(Debug)]
pub struct WaiterCache {
    entries: DashMap<RequestId, CacheEntry>,
    sliding_expiration: Duration,
}

impl WaiterCache {
    /// Create an empty cache with the given sliding expiration window.
    pub fn new(sliding_expiration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sliding_expiration,
        }
    }

    /// Atomically insert `waiter` if its id is absent. Returns `false` on
    /// collision, leaving the existing entry untouched.
    pub fn try_add(&self, waiter: Waiter) -> bool {
        match self.entries.entry(waiter.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    waiter,
                    last_access: Instant::now(),
                });
                true
            }
        }
    }

    /// Look up a waiter by id, resetting its last-access timestamp.
    pub fn try_get(&self, id: &RequestId) -> Option<Waiter> {
        let mut entry = self.entries.get_mut(id)?;
        entry.last_access = Instant::now();
        Some(entry.waiter.clone())
    }

    /// Remove and return a waiter by id, if present. Dropping the returned
    /// value's sender (via `Waiter`'s `Clone`-backed `mpsc::Sender`) is not
    /// itself the release — the release happens when the *last* clone
    /// (including the cache's own internal copy) is dropped, here.
    pub fn try_remove(&self, id: &RequestId) -> Option<Waiter> {
        self.entries.remove(id).map(|(_, entry)| entry.waiter)
    }

    /// Current number of registered waiters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no waiters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry whose last access exceeds the sliding expiration
    /// window. Returns the number of entries evicted. Eviction drops each
    /// entry's `Waiter`, closing its channel and waking any pending receiver
    /// with `None` — the release happens exactly once, here, since each
    /// entry can only be retained-out of the map by one sweep or one
    /// explicit removal, never both.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let sliding_expiration = self.sliding_expiration;
        let mut evicted = 0usize;
        self.entries.retain(|_, entry| {
            let keep = now.duration_since(entry.last_access) <= sliding_expiration;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            trace!(target: TRACE_TARGET, evicted, "waiter cache sweep evicted stale entries");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_add_rejects_duplicate_ids() {
        let cache = WaiterCache::new(Duration::from_secs(30));
        let (waiter_a, _rx_a) = Waiter::one_shot(RequestId::from("x"));
        let (waiter_b, _rx_b) = Waiter::one_shot(RequestId::from("x"));

        assert!(cache.try_add(waiter_a));
        assert!(!cache.try_add(waiter_b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn try_get_returns_a_clone_and_touches_access_time() {
        let cache = WaiterCache::new(Duration::from_secs(30));
        let (waiter, _rx) = Waiter::one_shot(RequestId::from("x"));
        cache.try_add(waiter);

        let fetched = cache.try_get(&RequestId::from("x"));
        assert!(fetched.is_some());
        assert!(cache.try_get(&RequestId::from("missing")).is_none());
    }

    #[test]
    fn try_remove_drops_the_entry() {
        let cache = WaiterCache::new(Duration::from_secs(30));
        let (waiter, _rx) = Waiter::one_shot(RequestId::from("x"));
        cache.try_add(waiter);

        assert!(cache.try_remove(&RequestId::from("x")).is_some());
        assert!(cache.is_empty());
        assert!(cache.try_remove(&RequestId::from("x")).is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_past_sliding_expiration_and_releases_the_waiter() {
        let cache = WaiterCache::new(Duration::from_millis(10));
        let (waiter, mut rx) = Waiter::one_shot(RequestId::from("x"));
        cache.try_add(waiter);

        tokio::time::sleep(Duration::from_millis(25)).await;
        let evicted = cache.sweep();

        assert_eq!(evicted, 1);
        assert!(cache.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sweep_does_not_evict_recently_touched_entries() {
        let cache = WaiterCache::new(Duration::from_millis(50));
        let (waiter, _rx) = Waiter::one_shot(RequestId::from("x"));
        cache.try_add(waiter);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.try_get(&RequestId::from("x")).is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let evicted = cache.sweep();
        assert_eq!(evicted, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_reports_false_when_receiver_dropped() {
        let (waiter, rx) = Waiter::one_shot(RequestId::from("x"));
        drop(rx);

        let pool = Arc::new(crate::pool::BufferPool::new(1, 64));
        let reader = Arc::new(FrameReader::new(pool));
        reader.append(b"{}", true).await.unwrap();

        assert!(!waiter.dispatch(reader).await);
    }
}
