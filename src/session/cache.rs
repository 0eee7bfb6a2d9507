//! Outbound cache-and-forward buffer.
//!
//! While the wire is down, outgoing messages are parked here keyed by
//! their [`Fingerprint`]. A newer message replaces an older one with the
//! same fingerprint and moves to the tail. On reconnect the cache is
//! drained head to tail under its lock.
//!
//! # Example
//!
//! ```text
//! save(f1, m1)  save(f2, m2)  save(f1, m3)  save(f3, m4)
//! order: f2, f1, f3  ──► drain yields m2, m3, m4
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::protocol::{Fingerprint, Message};

// ============================================================================
// CacheState
// ============================================================================

/// Fingerprint order plus latest message per fingerprint.
#[derive(Debug, Default)]
struct CacheState {
    order: VecDeque<Fingerprint>,
    entries: FxHashMap<Fingerprint, Message>,
}

impl CacheState {
    fn insert(&mut self, msg: Message, max_entries: usize) {
        let fingerprint = msg.fingerprint();

        if self.entries.insert(fingerprint.clone(), msg).is_some() {
            self.order.retain(|f| f != &fingerprint);
        }
        self.order.push_back(fingerprint);

        while self.order.len() > max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            warn!(fingerprint = %oldest, max_entries, "Outbound cache full, evicted oldest entry");
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

// ============================================================================
// OutboundCache
// ============================================================================

/// Ordered, deduplicating store of messages awaiting delivery.
#[derive(Debug)]
pub struct OutboundCache {
    state: Mutex<CacheState>,
    enabled: AtomicBool,
    max_entries: usize,
}

impl OutboundCache {
    /// Creates an empty, disabled cache holding at most `max_entries`.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            enabled: AtomicBool::new(false),
            max_entries: max_entries.max(1),
        }
    }

    /// Returns the capacity.
    #[inline]
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns `true` if senders should write to the cache.
    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flips the cache gate.
    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

// ============================================================================
// OutboundCache - Save
// ============================================================================

impl OutboundCache {
    /// Stores `msg`, replacing and tail-moving any entry with the same
    /// fingerprint. Evicts the oldest entry beyond capacity.
    pub async fn save(&self, msg: Message) {
        trace!(id = %msg.id(), fingerprint = %msg.fingerprint(), "Caching outbound message");
        self.state.lock().await.insert(msg, self.max_entries);
    }

    /// Parks `msg` or hands it back with a live route.
    ///
    /// While the cache is enabled the message is parked. Otherwise `route`
    /// is asked for a destination under the cache lock; if it has none the
    /// cache is enabled and the message parked. Because the gate and the
    /// route are read under the same lock as [`drain_and_disable`], a
    /// message can never be parked behind a drain that already finished.
    ///
    /// [`drain_and_disable`]: Self::drain_and_disable
    pub async fn save_or_route<T>(
        &self,
        msg: Message,
        route: impl FnOnce() -> Option<T>,
    ) -> Option<(Message, T)> {
        let mut state = self.state.lock().await;

        if !self.enabled() {
            if let Some(target) = route() {
                return Some((msg, target));
            }
            self.set_enabled(true);
        }

        trace!(id = %msg.id(), fingerprint = %msg.fingerprint(), "Caching outbound message");
        state.insert(msg, self.max_entries);
        None
    }
}

// ============================================================================
// OutboundCache - Drain
// ============================================================================

impl OutboundCache {
    /// Feeds entries head to tail into `sink`, holding the lock throughout.
    ///
    /// An entry is removed only after `sink` accepted it. On the first
    /// error the remaining entries stay in place and in order, so the call
    /// can simply be retried. Returns the number of entries delivered.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `sink`.
    pub async fn drain<F, Fut>(&self, sink: F) -> Result<usize>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        Self::drain_locked(&mut state, sink).await
    }

    /// Like [`drain`](Self::drain), then disables the cache under the same
    /// lock once it is empty.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `sink`; the cache stays enabled.
    pub async fn drain_and_disable<F, Fut>(&self, sink: F) -> Result<usize>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        let delivered = Self::drain_locked(&mut state, sink).await?;
        self.set_enabled(false);
        Ok(delivered)
    }

    async fn drain_locked<F, Fut>(state: &mut CacheState, mut sink: F) -> Result<usize>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut delivered = 0;

        while let Some(fingerprint) = state.order.front().cloned() {
            let Some(msg) = state.entries.get(&fingerprint).cloned() else {
                state.order.pop_front();
                continue;
            };

            sink(msg).await?;

            state.order.pop_front();
            state.entries.remove(&fingerprint);
            delivered += 1;
        }

        if delivered > 0 {
            debug!(delivered, "Outbound cache drained");
        }
        Ok(delivered)
    }
}

// ============================================================================
// OutboundCache - Inspection
// ============================================================================

impl OutboundCache {
    /// Drops every entry. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.order.len();
        state.clear();
        count
    }

    /// Returns the number of cached messages.
    pub async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.order.is_empty()
    }

    /// Returns the cached messages in drain order.
    pub async fn snapshot(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|f| state.entries.get(f).cloned())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex as SyncMutex;

    use crate::error::Error;

    fn keyed(id: &str, resource: &str) -> Message {
        Message::with_id(id).build_router("edge", "resource", resource, "update")
    }

    async fn drain_ids(cache: &OutboundCache) -> Vec<String> {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        cache
            .drain(move |msg| {
                let seen = Arc::clone(&sink_seen);
                async move {
                    seen.lock().push(msg.id().to_string());
                    Ok(())
                }
            })
            .await
            .expect("drain");
        seen.lock().clone()
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_keep_order() {
        let cache = OutboundCache::new(10);
        cache.save(keyed("m1", "f1")).await;
        cache.save(keyed("m2", "f2")).await;
        cache.save(keyed("m3", "f3")).await;

        assert_eq!(drain_ids(&cache).await, ["m1", "m2", "m3"]);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_latest_wins_single_key() {
        let cache = OutboundCache::new(10);
        cache.save(keyed("m1", "f1").set_timestamp(1)).await;
        cache.save(keyed("m2", "f1").set_timestamp(2)).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(drain_ids(&cache).await, ["m2"]);
    }

    #[tokio::test]
    async fn test_replacement_moves_to_tail() {
        let cache = OutboundCache::new(10);
        cache.save(keyed("m1", "f1")).await;
        cache.save(keyed("m2", "f2")).await;
        cache.save(keyed("m3", "f1")).await;
        cache.save(keyed("m4", "f3")).await;

        let snapshot: Vec<_> = cache
            .snapshot()
            .await
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        assert_eq!(snapshot, ["m2", "m3", "m4"]);
        assert_eq!(drain_ids(&cache).await, ["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let cache = OutboundCache::new(2);
        cache.save(keyed("m1", "f1")).await;
        cache.save(keyed("m2", "f2")).await;
        cache.save(keyed("m3", "f3")).await;

        assert_eq!(drain_ids(&cache).await, ["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_failed_sink_keeps_remaining_entries() {
        let cache = OutboundCache::new(10);
        cache.save(keyed("m1", "f1")).await;
        cache.save(keyed("m2", "f2")).await;
        cache.save(keyed("m3", "f3")).await;

        let err = cache
            .drain(|msg| async move {
                if msg.id() == "m2" {
                    Err(Error::Closed)
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_closed());

        // m1 went out, m2 and m3 are retried in order.
        assert_eq!(drain_ids(&cache).await, ["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_save_or_route() {
        let cache = OutboundCache::new(10);

        let routed = cache.save_or_route(keyed("m1", "f1"), || Some("wire")).await;
        assert_eq!(routed.map(|(m, t)| (m.id().to_string(), t)), Some(("m1".into(), "wire")));
        assert!(cache.is_empty().await);

        // No route: parked, and the gate opens for later senders.
        assert!(cache.save_or_route(keyed("m2", "f2"), || None::<()>).await.is_none());
        assert!(cache.enabled());

        assert!(cache.save_or_route(keyed("m3", "f3"), || Some(())).await.is_none());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_drain_and_disable() {
        let cache = OutboundCache::new(10);
        cache.set_enabled(true);
        cache.save(keyed("m1", "f1")).await;

        let failed = cache.drain_and_disable(|_| async { Err(Error::Closed) }).await;
        assert!(failed.is_err());
        assert!(cache.enabled());

        let delivered = cache
            .drain_and_disable(|_| async { Ok(()) })
            .await
            .expect("drain");
        assert_eq!(delivered, 1);
        assert!(!cache.enabled());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = OutboundCache::new(10);
        cache.save(keyed("m1", "f1")).await;
        cache.save(keyed("m2", "f2")).await;

        assert_eq!(cache.clear().await, 2);
        assert!(cache.snapshot().await.is_empty());
    }
}
