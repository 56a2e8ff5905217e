//! Message correlation store.
//!
//! Maps a source message id, scoped by bridge name and direction, to the
//! ordered set of message ids it produced on the other platform. Keys
//! expire a fixed TTL after they are first created.

pub mod expiry;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::common::error::StoreResult;
use crate::common::types::{Direction, MessageId};
use crate::config::MessagesConfig;

pub use memory::MemoryCorrelationStore;
pub use sqlite::SqliteCorrelationStore;

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Record that `source` produced `destination`.
    ///
    /// Adding an id already present is a no-op. The expiry timer is armed
    /// only when the key is created.
    async fn insert(
        &self,
        bridge: &str,
        direction: Direction,
        source: MessageId,
        destination: MessageId,
    ) -> StoreResult<()>;

    /// Destination ids for `source`, in dispatch order. Empty when unknown.
    async fn get(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>>;

    /// Source id whose destinations contain `destination`.
    async fn get_reverse(
        &self,
        bridge: &str,
        direction: Direction,
        destination: MessageId,
    ) -> StoreResult<Option<MessageId>>;

    /// Remove the key and return what it held.
    async fn remove(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>>;
}

pub type SharedCorrelationStore = Arc<dyn CorrelationStore>;

/// Open the backend selected by `config`.
pub fn open_store(config: &MessagesConfig) -> StoreResult<SharedCorrelationStore> {
    let ttl = Duration::from_secs(config.ttl_seconds);
    if config.persistent {
        let store = SqliteCorrelationStore::open(&config.database, ttl)?;
        info!(database = %config.database, ttl_seconds = config.ttl_seconds, "Using durable correlation store");
        Ok(Arc::new(store))
    } else {
        info!(ttl_seconds = config.ttl_seconds, "Using in-memory correlation store");
        Ok(Arc::new(MemoryCorrelationStore::new(ttl)))
    }
}
