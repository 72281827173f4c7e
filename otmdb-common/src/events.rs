//! Event records and the EventBus
//!
//! Every committed mutation in the catalogue leaves one or more rows in the
//! append-only `event_log` table. [`EventRecord`] is the in-memory shape of one
//! such row. After the owning transaction commits, its records are pushed to
//! the [`EventBus`] so notification fan-out can react without taking part in
//! the transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of entity an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Tag,
    TagParent,
    Video,
    VideoSource,
    VideoTag,
    Semitag,
    RegistrationRequest,
}

impl EntityKind {
    /// Value stored in `event_log.entity_kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tag => "TAG",
            EntityKind::TagParent => "TAG_PARENT",
            EntityKind::Video => "VIDEO",
            EntityKind::VideoSource => "VIDEO_SOURCE",
            EntityKind::VideoTag => "VIDEO_TAG",
            EntityKind::Semitag => "SEMITAG",
            EntityKind::RegistrationRequest => "REGISTRATION_REQUEST",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TAG" => Ok(EntityKind::Tag),
            "TAG_PARENT" => Ok(EntityKind::TagParent),
            "VIDEO" => Ok(EntityKind::Video),
            "VIDEO_SOURCE" => Ok(EntityKind::VideoSource),
            "VIDEO_TAG" => Ok(EntityKind::VideoTag),
            "SEMITAG" => Ok(EntityKind::Semitag),
            "REGISTRATION_REQUEST" => Ok(EntityKind::RegistrationRequest),
            other => Err(crate::Error::Internal(format!("unknown entity kind: {other}"))),
        }
    }
}

/// One row of the append-only event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic id, total order per entity
    pub id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    /// Event type name, scoped to `entity_kind` (e.g. `ATTACH`)
    pub event_type: String,
    /// Acting user
    pub user_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ========================================
// EventBus Implementation
// ========================================

/// Distribution bus for committed event records
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block writers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// The bus is a notification sink only. Nothing published here is
/// authoritative: subscribers that miss records re-read `event_log`.
///
/// # Examples
///
/// ```
/// use otmdb_common::events::EventBus;
///
/// let bus = EventBus::new(100);
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EventRecord,
    ) -> Result<usize, broadcast::error::SendError<EventRecord>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EventRecord) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
