//! Append-only event log
//!
//! Each component appends events for the entities it owns inside the same
//! [`WriteTx`] as the state change. Event types are closed per entity kind:
//! one enum per kind implements [`EventType`], so a video-tag trail can only
//! ever decode to `ATTACH`/`DETACH`/`REATTACH`.

use crate::models::{time_col, uuid_col, UserId};
use crate::store::WriteTx;
use chrono::{DateTime, Utc};
use otmdb_common::{EntityKind, Error, EventRecord, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::fmt;
use uuid::Uuid;

/// Closed set of event types for one entity kind
pub trait EventType: Copy + fmt::Debug + Send + Sync + 'static {
    const ENTITY: EntityKind;

    fn as_str(&self) -> &'static str;

    fn parse(raw: &str) -> Option<Self>;
}

macro_rules! event_types {
    ($(#[$meta:meta])* $name:ident, $entity:expr, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl EventType for $name {
            const ENTITY: EntityKind = $entity;

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

event_types!(
    /// Tag lifecycle and name/category changes
    TagEventType, EntityKind::Tag, {
        Register => "REGISTER",
        AddName => "ADD_NAME",
        RemoveName => "REMOVE_NAME",
        ChangePrimaryName => "CHANGE_PRIMARY_NAME",
        SetCategoryType => "SET_CATEGORY_TYPE",
    }
);

event_types!(TagParentEventType, EntityKind::TagParent, {
    Create => "CREATE",
    Explicitize => "EXPLICITIZE",
});

event_types!(VideoEventType, EntityKind::Video, {
    Register => "REGISTER",
});

event_types!(VideoSourceEventType, EntityKind::VideoSource, {
    Create => "CREATE",
});

event_types!(VideoTagEventType, EntityKind::VideoTag, {
    Attach => "ATTACH",
    Detach => "DETACH",
    Reattach => "REATTACH",
});

event_types!(SemitagEventType, EntityKind::Semitag, {
    Attached => "ATTACHED",
    Resolve => "RESOLVE",
    Reject => "REJECT",
});

event_types!(RegistrationEventType, EntityKind::RegistrationRequest, {
    Request => "REQUEST",
    Accept => "ACCEPT",
    Reject => "REJECT",
});

/// Event record decoded to its entity's event type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedEvent<E: EventType> {
    pub id: i64,
    pub entity_id: Uuid,
    pub event_type: E,
    pub user_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl<E: EventType> TryFrom<EventRecord> for TypedEvent<E> {
    type Error = Error;

    fn try_from(record: EventRecord) -> Result<Self> {
        if record.entity_kind != E::ENTITY {
            return Err(Error::Internal(format!(
                "event {} belongs to {}, expected {}",
                record.id,
                record.entity_kind,
                E::ENTITY
            )));
        }
        let event_type = E::parse(&record.event_type).ok_or_else(|| {
            Error::Internal(format!(
                "event {}: unknown {} event type {:?}",
                record.id,
                E::ENTITY,
                record.event_type
            ))
        })?;
        Ok(Self {
            id: record.id,
            entity_id: record.entity_id,
            event_type,
            user_id: record.user_id,
            payload: record.payload,
            created_at: record.created_at,
        })
    }
}

/// Append one event inside the caller's transaction
///
/// The record is queued on the transaction and published after commit.
pub async fn append<E: EventType>(
    tx: &mut WriteTx,
    entity_id: Uuid,
    event_type: E,
    actor: &UserId,
    payload: serde_json::Value,
) -> Result<EventRecord> {
    let created_at = tx.now_millis();
    let payload_text = serde_json::to_string(&payload)?;

    let result = sqlx::query(
        r#"
        INSERT INTO event_log (entity_kind, entity_id, event_type, user_id, payload, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(E::ENTITY.as_str())
    .bind(entity_id.to_string())
    .bind(event_type.as_str())
    .bind(actor.as_str())
    .bind(&payload_text)
    .bind(created_at)
    .execute(tx.conn())
    .await?;

    let record = EventRecord {
        id: result.last_insert_rowid(),
        entity_kind: E::ENTITY,
        entity_id,
        event_type: event_type.as_str().to_string(),
        user_id: actor.as_str().to_string(),
        payload,
        created_at: otmdb_common::time::from_millis(created_at),
    };
    tx.queue_event(record.clone());

    Ok(record)
}

/// Events of one entity, newest first
///
/// `limit = None` returns everything after `skip`.
pub async fn history<E: EventType>(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    limit: Option<u32>,
    skip: u32,
) -> Result<Vec<TypedEvent<E>>> {
    let rows = sqlx::query(
        r#"
        SELECT id, entity_kind, entity_id, event_type, user_id, payload, created_at
        FROM event_log
        WHERE entity_kind = ? AND entity_id = ?
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(E::ENTITY.as_str())
    .bind(entity_id.to_string())
    .bind(limit.map(i64::from).unwrap_or(-1))
    .bind(i64::from(skip))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| record_from_row(row).and_then(TypedEvent::try_from))
        .collect()
}

/// Full event trail of one entity, oldest first
pub async fn trail<E: EventType>(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Vec<TypedEvent<E>>> {
    let mut events = history::<E>(conn, entity_id, None, 0).await?;
    events.reverse();
    Ok(events)
}

pub(crate) fn record_from_row(row: &SqliteRow) -> Result<EventRecord> {
    let entity_kind: String = row.try_get("entity_kind")?;
    let payload: String = row.try_get("payload")?;
    Ok(EventRecord {
        id: row.try_get("id")?,
        entity_kind: entity_kind.parse()?,
        entity_id: uuid_col(row, "entity_id")?,
        event_type: row.try_get("event_type")?,
        user_id: row.try_get("user_id")?,
        payload: serde_json::from_str(&payload)?,
        created_at: time_col(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings_are_closed_per_entity() {
        assert_eq!(VideoTagEventType::parse("REATTACH"), Some(VideoTagEventType::Reattach));
        assert_eq!(VideoTagEventType::parse("REGISTER"), None);
        assert_eq!(TagEventType::parse("REGISTER"), Some(TagEventType::Register));
        assert_eq!(SemitagEventType::Attached.as_str(), "ATTACHED");
        assert_eq!(RegistrationEventType::ENTITY, EntityKind::RegistrationRequest);
    }

    #[test]
    fn test_typed_event_rejects_wrong_entity() {
        let record = EventRecord {
            id: 7,
            entity_kind: EntityKind::Tag,
            entity_id: Uuid::new_v4(),
            event_type: "REGISTER".to_string(),
            user_id: "u".to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        };
        assert!(TypedEvent::<VideoEventType>::try_from(record.clone()).is_err());
        let typed = TypedEvent::<TagEventType>::try_from(record).unwrap();
        assert_eq!(typed.event_type, TagEventType::Register);
    }
}
