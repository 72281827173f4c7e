//! Shared database handle and the write transaction wrapper
//!
//! Every mutation runs inside one [`WriteTx`]. The first statement of a write
//! transaction bumps the single-row `write_lock` table, which takes SQLite's
//! write lock before anything is read. Writers therefore queue up on
//! `busy_timeout` and each one re-validates its preconditions against the
//! latest committed state.

use otmdb_common::db::RuntimeSettings;
use otmdb_common::{EventBus, EventRecord, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;
use tracing::{debug, warn};

/// Database pool, event bus and runtime settings shared by all services
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    bus: EventBus,
    settings: RuntimeSettings,
}

impl Store {
    /// Wrap an initialized pool, loading runtime settings from it
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        let settings = RuntimeSettings::load(&pool).await?;
        Ok(Self::new(pool, EventBus::default(), settings))
    }

    pub fn new(pool: SqlitePool, bus: EventBus, settings: RuntimeSettings) -> Self {
        Self {
            pool,
            bus,
            settings,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Upper bound for `first`/`last`
    pub fn max_page_size(&self) -> u32 {
        u32::try_from(self.settings.max_page_size).unwrap_or(u32::MAX)
    }

    /// Connection for read paths
    pub async fn reader(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Begin a write transaction holding the database write lock
    pub async fn begin_write(&self, caller: &'static str) -> Result<WriteTx> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE write_lock SET generation = generation + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        let wait_ms = start.elapsed().as_millis();
        if wait_ms > 1000 {
            warn!(caller = caller, wait_ms = wait_ms, "Slow write lock acquisition");
        } else {
            debug!(caller = caller, wait_ms = wait_ms, "Write lock acquired");
        }

        Ok(WriteTx {
            tx,
            bus: self.bus.clone(),
            pending: Vec::new(),
            caller,
            acquired_at: Instant::now(),
            now_millis: otmdb_common::time::now_millis(),
        })
    }
}

/// Write transaction with deferred event publication
///
/// Event records appended through it are published to the [`EventBus`] only
/// after a successful commit. Dropping it without committing rolls back
/// every write, including the event rows.
pub struct WriteTx {
    tx: Transaction<'static, Sqlite>,
    bus: EventBus,
    pending: Vec<EventRecord>,
    caller: &'static str,
    acquired_at: Instant,
    now_millis: i64,
}

impl WriteTx {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Timestamp shared by every row written in this transaction
    pub fn now_millis(&self) -> i64 {
        self.now_millis
    }

    pub(crate) fn queue_event(&mut self, record: EventRecord) {
        self.pending.push(record);
    }

    /// Commit and publish queued events; returns the published records
    pub async fn commit(self) -> Result<Vec<EventRecord>> {
        let WriteTx {
            tx,
            bus,
            pending,
            caller,
            acquired_at,
            ..
        } = self;

        tx.commit().await?;

        let held_ms = acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            warn!(caller = caller, held_ms = held_ms, "Long write transaction");
        } else {
            debug!(
                caller = caller,
                held_ms = held_ms,
                events = pending.len(),
                "Write transaction committed"
            );
        }

        for record in &pending {
            bus.emit_lossy(record.clone());
        }

        Ok(pending)
    }
}
