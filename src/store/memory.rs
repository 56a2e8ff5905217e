//! In-memory correlation store.
//!
//! Entries live for the process lifetime only. Each key gets one expiry
//! timer, armed when the key is created; the timer carries the key's
//! generation so it never removes a key that was deleted and re-created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::common::error::StoreResult;
use crate::common::types::{Direction, MessageId};
use crate::store::expiry::schedule_expiry;
use crate::store::CorrelationStore;

type BridgeEntries = HashMap<(Direction, MessageId), Entry>;

#[derive(Debug)]
struct Entry {
    /// Destination ids in the order they were dispatched.
    destinations: Vec<MessageId>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// bridge name -> (direction, source id) -> entry
    entries: Mutex<HashMap<String, BridgeEntries>>,
    next_generation: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, BridgeEntries>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, bridge: &str, direction: Direction, source: MessageId, generation: u64) {
        let mut entries = self.lock();
        let Some(bridge_entries) = entries.get_mut(bridge) else {
            return;
        };
        let current = bridge_entries
            .get(&(direction, source))
            .map(|e| e.generation);
        if current == Some(generation) {
            bridge_entries.remove(&(direction, source));
            trace!(bridge, %direction, source, "Correlation expired");
        }
        if bridge_entries.is_empty() {
            entries.remove(bridge);
        }
    }
}

/// Process-local correlation store.
#[derive(Debug, Clone)]
pub struct MemoryCorrelationStore {
    inner: Arc<Inner>,
    ttl: Duration,
}

impl MemoryCorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            ttl,
        }
    }

    /// Number of live keys across all bridges.
    pub fn len(&self) -> usize {
        self.inner.lock().values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arm_expiry(&self, bridge: &str, direction: Direction, source: MessageId, generation: u64) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let bridge = bridge.to_string();
        schedule_expiry(self.ttl, async move {
            if let Some(inner) = inner.upgrade() {
                inner.expire(&bridge, direction, source, generation);
            }
        });
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn insert(
        &self,
        bridge: &str,
        direction: Direction,
        source: MessageId,
        destination: MessageId,
    ) -> StoreResult<()> {
        let created = {
            let mut entries = self.inner.lock();
            let bridge_entries = entries.entry(bridge.to_string()).or_default();
            match bridge_entries.get_mut(&(direction, source)) {
                Some(entry) => {
                    if !entry.destinations.contains(&destination) {
                        entry.destinations.push(destination);
                    }
                    None
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    bridge_entries.insert(
                        (direction, source),
                        Entry {
                            destinations: vec![destination],
                            generation,
                        },
                    );
                    Some(generation)
                }
            }
        };

        if let Some(generation) = created {
            self.arm_expiry(bridge, direction, source, generation);
        }
        Ok(())
    }

    async fn get(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>> {
        Ok(self
            .inner
            .lock()
            .get(bridge)
            .and_then(|b| b.get(&(direction, source)))
            .map(|e| e.destinations.clone())
            .unwrap_or_default())
    }

    async fn get_reverse(
        &self,
        bridge: &str,
        direction: Direction,
        destination: MessageId,
    ) -> StoreResult<Option<MessageId>> {
        Ok(self.inner.lock().get(bridge).and_then(|b| {
            b.iter()
                .find(|((d, _), entry)| *d == direction && entry.destinations.contains(&destination))
                .map(|((_, source), _)| *source)
        }))
    }

    async fn remove(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>> {
        let mut entries = self.inner.lock();
        let Some(bridge_entries) = entries.get_mut(bridge) else {
            return Ok(Vec::new());
        };
        let removed = bridge_entries
            .remove(&(direction, source))
            .map(|e| e.destinations)
            .unwrap_or_default();
        if bridge_entries.is_empty() {
            entries.remove(bridge);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T2D: Direction = Direction::TelegramToDiscord;
    const D2T: Direction = Direction::DiscordToTelegram;
    const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    fn sorted(mut ids: Vec<MessageId>) -> Vec<MessageId> {
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_insert_accumulates_destinations() {
        let store = MemoryCorrelationStore::new(TTL);
        store.insert("general", T2D, 1, 100).await.unwrap();
        store.insert("general", T2D, 1, 101).await.unwrap();
        store.insert("general", T2D, 1, 101).await.unwrap();

        assert_eq!(store.get("general", T2D, 1).await.unwrap(), vec![100, 101]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_bridge_and_direction() {
        let store = MemoryCorrelationStore::new(TTL);
        store.insert("general", T2D, 1, 100).await.unwrap();
        store.insert("offtopic", T2D, 1, 200).await.unwrap();
        store.insert("general", D2T, 1, 300).await.unwrap();

        assert_eq!(store.get("general", T2D, 1).await.unwrap(), vec![100]);
        assert_eq!(store.get("offtopic", T2D, 1).await.unwrap(), vec![200]);
        assert_eq!(store.get("general", D2T, 1).await.unwrap(), vec![300]);
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = MemoryCorrelationStore::new(TTL);
        assert!(store.get("general", T2D, 42).await.unwrap().is_empty());
        assert_eq!(store.get_reverse("general", T2D, 42).await.unwrap(), None);
        assert!(store.remove("general", T2D, 42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_reverse_finds_source() {
        let store = MemoryCorrelationStore::new(TTL);
        store.insert("general", T2D, 1, 100).await.unwrap();
        store.insert("general", T2D, 1, 101).await.unwrap();
        store.insert("general", T2D, 2, 200).await.unwrap();

        assert_eq!(store.get_reverse("general", T2D, 101).await.unwrap(), Some(1));
        assert_eq!(store.get_reverse("general", T2D, 200).await.unwrap(), Some(2));
        assert_eq!(store.get_reverse("general", D2T, 101).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_consumes_key() {
        let store = MemoryCorrelationStore::new(TTL);
        store.insert("general", T2D, 1, 100).await.unwrap();
        store.insert("general", T2D, 1, 101).await.unwrap();

        assert_eq!(sorted(store.remove("general", T2D, 1).await.unwrap()), vec![100, 101]);
        assert!(store.get("general", T2D, 1).await.unwrap().is_empty());
        assert_eq!(store.get_reverse("general", T2D, 100).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = MemoryCorrelationStore::new(Duration::from_secs(60));
        store.insert("general", T2D, 1, 100).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        store.insert("general", T2D, 1, 101).await.unwrap();
        assert_eq!(store.get("general", T2D, 1).await.unwrap(), vec![100, 101]);

        // The timer was armed at creation; the second insert did not re-arm it.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.get("general", T2D, 1).await.unwrap().is_empty());
        assert_eq!(store.get_reverse("general", T2D, 101).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_keeps_recreated_key() {
        let store = MemoryCorrelationStore::new(Duration::from_secs(60));
        store.insert("general", T2D, 1, 100).await.unwrap();

        tokio::time::sleep(Duration::from_secs(40)).await;
        store.remove("general", T2D, 1).await.unwrap();
        store.insert("general", T2D, 1, 500).await.unwrap();

        // First timer fires at 60s and must leave the new key alone.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.get("general", T2D, 1).await.unwrap(), vec![500]);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.get("general", T2D, 1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_longer_than_timer_limit() {
        let store = MemoryCorrelationStore::new(Duration::from_secs(40 * 24 * 60 * 60));
        store.insert("general", D2T, 9, 900).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30 * 24 * 60 * 60)).await;
        assert_eq!(store.get("general", D2T, 9).await.unwrap(), vec![900]);

        tokio::time::sleep(Duration::from_secs(11 * 24 * 60 * 60)).await;
        assert!(store.get("general", D2T, 9).await.unwrap().is_empty());
    }
}
