//! Durable correlation store backed by SQLite.
//!
//! Rows carry an absolute `expires_at` (unix millis). Reads ignore expired
//! rows, so a restart never resurrects a correlation past its TTL; the rows
//! themselves are purged on open and by the per-key expiry timer.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::common::error::{StoreError, StoreResult};
use crate::common::types::{Direction, MessageId};
use crate::store::expiry::schedule_expiry;
use crate::store::CorrelationStore;

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bridges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS correlations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bridge_id INTEGER NOT NULL REFERENCES bridges(id),
    direction TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    UNIQUE (bridge_id, direction, source_id)
);
CREATE TABLE IF NOT EXISTS destinations (
    correlation_id INTEGER NOT NULL REFERENCES correlations(id),
    destination_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (correlation_id, destination_id)
);
CREATE INDEX IF NOT EXISTS destinations_by_id ON destinations (destination_id);
"#;

type SharedConnection = Arc<StdMutex<Connection>>;

#[derive(Clone)]
pub struct SqliteCorrelationStore {
    conn: SharedConnection,
    ttl: Duration,
}

impl SqliteCorrelationStore {
    /// Open (or create) the database at `path` and purge expired rows.
    pub fn open(path: impl AsRef<Path>, ttl: Duration) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?, ttl)
    }

    /// Store on a private in-memory database.
    pub fn open_in_memory(ttl: Duration) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, ttl)
    }

    fn from_connection(conn: Connection, ttl: Duration) -> StoreResult<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        let purged = purge_expired(&conn, now_millis())?;
        if purged > 0 {
            info!(purged, "Purged expired correlations");
        }
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            ttl,
        })
    }

    async fn with_conn<F, T>(&self, func: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), func).await
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn arm_expiry(&self, correlation_id: i64) {
        let conn: Weak<StdMutex<Connection>> = Arc::downgrade(&self.conn);
        schedule_expiry(self.ttl, async move {
            let Some(conn) = conn.upgrade() else {
                return;
            };
            let result = run_blocking(conn, move |conn| {
                let removed = conn.execute(
                    "DELETE FROM correlations WHERE id = ?1 AND expires_at <= ?2",
                    params![correlation_id, now_millis()],
                )?;
                if removed > 0 {
                    conn.execute(
                        "DELETE FROM destinations WHERE correlation_id = ?1",
                        params![correlation_id],
                    )?;
                }
                Ok(removed)
            })
            .await;
            if let Err(e) = result {
                warn!(correlation_id, error = %e, "Failed to expire correlation");
            }
        });
    }
}

async fn run_blocking<F, T>(conn: SharedConnection, func: F) -> StoreResult<T>
where
    F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        func(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Task {
        message: e.to_string(),
    })?
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn purge_expired(conn: &Connection, now: i64) -> StoreResult<usize> {
    conn.execute(
        "DELETE FROM destinations WHERE correlation_id IN
         (SELECT id FROM correlations WHERE expires_at <= ?1)",
        params![now],
    )?;
    Ok(conn.execute("DELETE FROM correlations WHERE expires_at <= ?1", params![now])?)
}

#[async_trait]
impl CorrelationStore for SqliteCorrelationStore {
    async fn insert(
        &self,
        bridge: &str,
        direction: Direction,
        source: MessageId,
        destination: MessageId,
    ) -> StoreResult<()> {
        let bridge = bridge.to_string();
        let ttl = self.ttl_millis();

        let created = self
            .with_conn(move |conn| {
                let now = now_millis();
                let tx = conn.transaction()?;

                tx.execute("INSERT OR IGNORE INTO bridges (name) VALUES (?1)", params![bridge])?;
                let bridge_id: i64 =
                    tx.query_row("SELECT id FROM bridges WHERE name = ?1", params![bridge], |row| row.get(0))?;

                // An expired row for the same key must not absorb the new id.
                let stale: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM correlations
                         WHERE bridge_id = ?1 AND direction = ?2 AND source_id = ?3 AND expires_at <= ?4",
                        params![bridge_id, direction.code(), source, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(stale) = stale {
                    tx.execute("DELETE FROM destinations WHERE correlation_id = ?1", params![stale])?;
                    tx.execute("DELETE FROM correlations WHERE id = ?1", params![stale])?;
                }

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM correlations WHERE bridge_id = ?1 AND direction = ?2 AND source_id = ?3",
                        params![bridge_id, direction.code(), source],
                        |row| row.get(0),
                    )
                    .optional()?;
                let (correlation_id, created) = match existing {
                    Some(id) => (id, false),
                    None => {
                        tx.execute(
                            "INSERT INTO correlations (bridge_id, direction, source_id, expires_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![bridge_id, direction.code(), source, now.saturating_add(ttl)],
                        )?;
                        (tx.last_insert_rowid(), true)
                    }
                };

                tx.execute(
                    "INSERT OR IGNORE INTO destinations (correlation_id, destination_id, position)
                     VALUES (?1, ?2, (SELECT COUNT(*) FROM destinations WHERE correlation_id = ?1))",
                    params![correlation_id, destination],
                )?;
                tx.commit()?;

                Ok(created.then_some(correlation_id))
            })
            .await?;

        if let Some(correlation_id) = created {
            debug!(correlation_id, %direction, source, "Created correlation");
            self.arm_expiry(correlation_id);
        }
        Ok(())
    }

    async fn get(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>> {
        let bridge = bridge.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.destination_id FROM destinations d
                 JOIN correlations c ON c.id = d.correlation_id
                 JOIN bridges b ON b.id = c.bridge_id
                 WHERE b.name = ?1 AND c.direction = ?2 AND c.source_id = ?3 AND c.expires_at > ?4
                 ORDER BY d.position",
            )?;
            let ids = stmt
                .query_map(params![bridge, direction.code(), source, now_millis()], |row| row.get(0))?
                .collect::<Result<Vec<MessageId>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn get_reverse(
        &self,
        bridge: &str,
        direction: Direction,
        destination: MessageId,
    ) -> StoreResult<Option<MessageId>> {
        let bridge = bridge.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT c.source_id FROM destinations d
                     JOIN correlations c ON c.id = d.correlation_id
                     JOIN bridges b ON b.id = c.bridge_id
                     WHERE b.name = ?1 AND c.direction = ?2 AND d.destination_id = ?3 AND c.expires_at > ?4
                     LIMIT 1",
                    params![bridge, direction.code(), destination, now_millis()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn remove(&self, bridge: &str, direction: Direction, source: MessageId) -> StoreResult<Vec<MessageId>> {
        let bridge = bridge.to_string();
        self.with_conn(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;

            let row: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT c.id, c.expires_at FROM correlations c
                     JOIN bridges b ON b.id = c.bridge_id
                     WHERE b.name = ?1 AND c.direction = ?2 AND c.source_id = ?3",
                    params![bridge, direction.code(), source],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((correlation_id, expires_at)) = row else {
                return Ok(Vec::new());
            };

            let ids = if expires_at > now {
                let mut stmt = tx.prepare(
                    "SELECT destination_id FROM destinations WHERE correlation_id = ?1 ORDER BY position",
                )?;
                let ids = stmt
                    .query_map(params![correlation_id], |row| row.get(0))?
                    .collect::<Result<Vec<MessageId>, _>>()?;
                ids
            } else {
                Vec::new()
            };

            tx.execute("DELETE FROM destinations WHERE correlation_id = ?1", params![correlation_id])?;
            tx.execute("DELETE FROM correlations WHERE id = ?1", params![correlation_id])?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }
}
