//! Timeline projection over the event log
//!
//! Merges video registrations, registration requests and their moderation
//! into one newest-first sequence. Read-only.

use crate::error::QueryError;
use crate::event_log::{record_from_row, EventType, RegistrationEventType, VideoEventType};
use crate::models::VideoSourceKind;
use crate::store::Store;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use otmdb_common::pagination::{Cursor, PaginationError};
use otmdb_common::{EntityKind, Error, EventRecord, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

/// One timeline item, by originating event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEntry {
    MadRegistered {
        event_id: i64,
        video_id: Uuid,
        user_id: String,
        title: String,
        created_at: DateTime<Utc>,
    },
    RegistrationRequested {
        event_id: i64,
        request_id: Uuid,
        user_id: String,
        source: VideoSourceKind,
        source_id: String,
        created_at: DateTime<Utc>,
    },
    RegistrationAccepted {
        event_id: i64,
        request_id: Uuid,
        video_id: Uuid,
        user_id: String,
        created_at: DateTime<Utc>,
    },
    RegistrationRejected {
        event_id: i64,
        request_id: Uuid,
        user_id: String,
        note: Option<String>,
        created_at: DateTime<Utc>,
    },
}

impl TimelineEntry {
    pub fn event_id(&self) -> i64 {
        match self {
            TimelineEntry::MadRegistered { event_id, .. }
            | TimelineEntry::RegistrationRequested { event_id, .. }
            | TimelineEntry::RegistrationAccepted { event_id, .. }
            | TimelineEntry::RegistrationRejected { event_id, .. } => *event_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::MadRegistered { created_at, .. }
            | TimelineEntry::RegistrationRequested { created_at, .. }
            | TimelineEntry::RegistrationAccepted { created_at, .. }
            | TimelineEntry::RegistrationRejected { created_at, .. } => *created_at,
        }
    }

    pub fn cursor(&self) -> TimelineCursor {
        TimelineCursor {
            created_at: self.created_at().timestamp_millis(),
            event_id: self.event_id(),
        }
    }

    fn from_record(record: EventRecord) -> Result<Self> {
        #[derive(Deserialize)]
        struct Registered {
            title: String,
        }
        #[derive(Deserialize)]
        struct Requested {
            source: VideoSourceKind,
            source_id: String,
        }
        #[derive(Deserialize)]
        struct Accepted {
            video_id: Uuid,
        }
        #[derive(Deserialize)]
        struct Rejected {
            note: Option<String>,
        }

        let EventRecord {
            id: event_id,
            entity_kind,
            entity_id,
            event_type,
            user_id,
            payload,
            created_at,
        } = record;

        let unexpected = || {
            Error::Internal(format!(
                "event {event_id}: {entity_kind} {event_type} is not a timeline event"
            ))
        };

        match entity_kind {
            EntityKind::Video => match VideoEventType::parse(&event_type) {
                Some(VideoEventType::Register) => {
                    let p: Registered = serde_json::from_value(payload)?;
                    Ok(TimelineEntry::MadRegistered {
                        event_id,
                        video_id: entity_id,
                        user_id,
                        title: p.title,
                        created_at,
                    })
                }
                None => Err(unexpected()),
            },
            EntityKind::RegistrationRequest => match RegistrationEventType::parse(&event_type) {
                Some(RegistrationEventType::Request) => {
                    let p: Requested = serde_json::from_value(payload)?;
                    Ok(TimelineEntry::RegistrationRequested {
                        event_id,
                        request_id: entity_id,
                        user_id,
                        source: p.source,
                        source_id: p.source_id,
                        created_at,
                    })
                }
                Some(RegistrationEventType::Accept) => {
                    let p: Accepted = serde_json::from_value(payload)?;
                    Ok(TimelineEntry::RegistrationAccepted {
                        event_id,
                        request_id: entity_id,
                        video_id: p.video_id,
                        user_id,
                        created_at,
                    })
                }
                Some(RegistrationEventType::Reject) => {
                    let p: Rejected = serde_json::from_value(payload)?;
                    Ok(TimelineEntry::RegistrationRejected {
                        event_id,
                        request_id: entity_id,
                        user_id,
                        note: p.note,
                        created_at,
                    })
                }
                None => Err(unexpected()),
            },
            _ => Err(unexpected()),
        }
    }
}

/// Resume position: entries strictly older than this one follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineCursor {
    pub created_at: i64,
    pub event_id: i64,
}

impl TimelineCursor {
    pub fn encode(&self) -> String {
        Cursor::new(self.created_at, self.event_id.to_string()).encode()
    }

    pub fn decode(raw: &str) -> std::result::Result<Self, PaginationError> {
        let cursor = Cursor::decode(raw)?;
        let event_id = cursor
            .id
            .parse::<i64>()
            .map_err(|_| PaginationError::InvalidCursor(raw.to_string()))?;
        Ok(Self {
            created_at: cursor.created_at,
            event_id,
        })
    }
}

/// Half-open time window `[since, until)`; unbounded sides are `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimelineWindow {
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
        }
    }

    fn bounds(&self) -> (i64, i64) {
        (
            self.since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN),
            self.until.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX),
        )
    }
}

/// One page of the timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePage {
    pub entries: Vec<TimelineEntry>,
    /// Set when more entries follow the last one
    pub next_cursor: Option<String>,
}

async fn fetch_batch(
    conn: &mut SqliteConnection,
    window: TimelineWindow,
    after: Option<TimelineCursor>,
    limit: i64,
) -> Result<Vec<TimelineEntry>> {
    let (since, until) = window.bounds();
    let keyset = if after.is_some() {
        " AND (created_at < ? OR (created_at = ? AND id < ?))"
    } else {
        ""
    };
    let sql = format!(
        r#"
        SELECT id, entity_kind, entity_id, event_type, user_id, payload, created_at
        FROM event_log
        WHERE ((entity_kind = ? AND event_type = ?) OR entity_kind = ?)
          AND created_at >= ? AND created_at < ?{keyset}
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#
    );

    let mut query = sqlx::query(&sql)
        .bind(VideoEventType::ENTITY.as_str())
        .bind(VideoEventType::Register.as_str())
        .bind(RegistrationEventType::ENTITY.as_str())
        .bind(since)
        .bind(until);
    if let Some(cursor) = after {
        query = query
            .bind(cursor.created_at)
            .bind(cursor.created_at)
            .bind(cursor.event_id);
    }
    let rows = query.bind(limit).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| record_from_row(row).and_then(TimelineEntry::from_record))
        .collect()
}

/// Newest-first projection of registration activity
#[derive(Clone)]
pub struct TimelineProjector {
    store: Store,
}

impl TimelineProjector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Up to `limit` entries after `after`, with a resume cursor
    pub async fn page(
        &self,
        window: TimelineWindow,
        after: Option<&str>,
        limit: u32,
    ) -> std::result::Result<TimelinePage, QueryError> {
        let max = self.store.max_page_size();
        if limit > max {
            return Err(PaginationError::PageSizeTooLarge { requested: limit, max }.into());
        }
        let after = after.map(TimelineCursor::decode).transpose()?;

        let mut conn = self.store.reader().await?;
        let mut entries = fetch_batch(&mut conn, window, after, i64::from(limit) + 1).await?;

        let has_more = entries.len() > limit as usize;
        entries.truncate(limit as usize);
        let next_cursor = if has_more {
            entries.last().map(|e| e.cursor().encode())
        } else {
            None
        };
        Ok(TimelinePage {
            entries,
            next_cursor,
        })
    }

    /// Every entry in the window after `after`, fetched in batches
    ///
    /// The stream ends after the oldest entry. Restart it from the cursor of
    /// the last entry received to continue after an interruption.
    pub fn stream(
        &self,
        window: TimelineWindow,
        after: Option<TimelineCursor>,
    ) -> impl Stream<Item = Result<TimelineEntry>> + Send + 'static {
        let store = self.store.clone();
        let batch_size = store.settings().timeline_batch_size.max(1);

        async_stream::try_stream! {
            let mut cursor = after;
            loop {
                let batch = {
                    let mut conn = store.reader().await?;
                    fetch_batch(&mut conn, window, cursor, batch_size as i64).await?
                };
                debug!(entries = batch.len(), "Timeline batch fetched");

                let exhausted = batch.len() < batch_size;
                for entry in batch {
                    cursor = Some(entry.cursor());
                    yield entry;
                }
                if exhausted {
                    break;
                }
            }
        }
    }
}
