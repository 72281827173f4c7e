//! Semitags: unmoderated tag suggestions on a video
//!
//! A semitag starts unchecked and is checked exactly once, either resolved
//! into a real tagging or rejected. Both outcomes leave a [`SemitagChecking`].

use crate::error::{internal_from_sqlx, OperationError, QueryError, INTERNAL_SERVER_ERROR};
use crate::event_log::{self, SemitagEventType};
use crate::models::{Semitag, SemitagChecking, Tag, UserId, VideoTag};
use crate::page::{fetch_page, PageSource};
use crate::store::{Store, WriteTx};
use crate::tagging::{self, attach_tx};
use crate::{tag_graph, videos};
use otmdb_common::pagination::{Connection, ConnectionArgs, Cursor, PageQuery, SortOrder};
use otmdb_common::uuid_utils::generate;
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

const SEMITAG_COLUMNS: &str = "id, video_id, name, is_checked, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum SuggestSemitagError {
    #[error("video not found: {0}")]
    VideoNotFound(Uuid),

    #[error("semitag name must not be empty")]
    InvalidName,

    #[error("semitag {:?} already attached to video {}", .0.name, .0.video_id)]
    AlreadyAttached(Semitag),

    #[error("semitag {:?} on video {} was already checked", .0.name, .0.video_id)]
    AlreadyChecked(Semitag),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveSemitagError {
    #[error("semitag not found: {0}")]
    NotFound(Uuid),

    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    #[error("semitag {} already checked", .0.id)]
    AlreadyChecked(Semitag),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RejectSemitagError {
    #[error("semitag not found: {0}")]
    NotFound(Uuid),

    #[error("semitag {} already checked", .0.id)]
    AlreadyChecked(Semitag),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

internal_from_sqlx!(SuggestSemitagError, ResolveSemitagError, RejectSemitagError);

impl OperationError for SuggestSemitagError {
    fn code(&self) -> &'static str {
        match self {
            SuggestSemitagError::VideoNotFound(_) => "VIDEO_NOT_FOUND",
            SuggestSemitagError::InvalidName => "INVALID_NAME",
            SuggestSemitagError::AlreadyAttached(_) => "ALREADY_ATTACHED",
            SuggestSemitagError::AlreadyChecked(_) => "ALREADY_CHECKED",
            SuggestSemitagError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for ResolveSemitagError {
    fn code(&self) -> &'static str {
        match self {
            ResolveSemitagError::NotFound(_) => "NOT_FOUND",
            ResolveSemitagError::TagNotFound(_) => "TAG_NOT_FOUND",
            ResolveSemitagError::AlreadyChecked(_) => "ALREADY_CHECKED",
            ResolveSemitagError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for RejectSemitagError {
    fn code(&self) -> &'static str {
        match self {
            RejectSemitagError::NotFound(_) => "NOT_FOUND",
            RejectSemitagError::AlreadyChecked(_) => "ALREADY_CHECKED",
            RejectSemitagError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outcome of resolving a semitag into a tagging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemitagResolution {
    pub semitag: Semitag,
    pub checking: SemitagChecking,
    /// Active tagging the semitag now points at
    pub video_tag: VideoTag,
}

/// Outcome of rejecting a semitag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemitagRejection {
    pub semitag: Semitag,
    pub checking: SemitagChecking,
}

/// Candidate tag for a semitag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSuggestion {
    pub tag: Tag,
    pub can_resolve: bool,
}

pub(crate) async fn find_semitag(
    conn: &mut SqliteConnection,
    semitag_id: Uuid,
) -> otmdb_common::Result<Option<Semitag>> {
    let sql = format!("SELECT {SEMITAG_COLUMNS} FROM semitags WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(semitag_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Semitag::from_row).transpose()
}

async fn find_semitag_by_name(
    conn: &mut SqliteConnection,
    video_id: Uuid,
    name: &str,
) -> otmdb_common::Result<Option<Semitag>> {
    let sql = format!("SELECT {SEMITAG_COLUMNS} FROM semitags WHERE video_id = ? AND name = ?");
    let row = sqlx::query(&sql)
        .bind(video_id.to_string())
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Semitag::from_row).transpose()
}

async fn find_checking(
    conn: &mut SqliteConnection,
    semitag_id: Uuid,
) -> otmdb_common::Result<Option<SemitagChecking>> {
    let row = sqlx::query(
        r#"
        SELECT id, semitag_id, video_tag_id, checked_by, note, created_at
        FROM semitag_checkings
        WHERE semitag_id = ?
        "#,
    )
    .bind(semitag_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(SemitagChecking::from_row).transpose()
}

/// Insert an unchecked semitag and its ATTACHED event
///
/// Name uniqueness per video is the caller's responsibility.
pub(crate) async fn insert_semitag_tx(
    tx: &mut WriteTx,
    video_id: Uuid,
    name: &str,
    actor: &UserId,
) -> otmdb_common::Result<Semitag> {
    let now = tx.now_millis();
    let id = generate();

    sqlx::query(
        r#"
        INSERT INTO semitags (id, video_id, name, is_checked, created_at, updated_at)
        VALUES (?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(video_id.to_string())
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(tx.conn())
    .await?;

    event_log::append(
        tx,
        id,
        SemitagEventType::Attached,
        actor,
        json!({ "video_id": video_id, "name": name }),
    )
    .await?;

    let created_at = otmdb_common::time::from_millis(now);
    Ok(Semitag {
        id,
        video_id,
        name: name.to_string(),
        is_checked: false,
        created_at,
        updated_at: created_at,
    })
}

async fn mark_checked(tx: &mut WriteTx, semitag_id: Uuid) -> otmdb_common::Result<()> {
    let result = sqlx::query("UPDATE semitags SET is_checked = 1, updated_at = ? WHERE id = ? AND is_checked = 0")
        .bind(tx.now_millis())
        .bind(semitag_id.to_string())
        .execute(tx.conn())
        .await?;
    if result.rows_affected() != 1 {
        return Err(otmdb_common::Error::Internal(format!(
            "semitag {semitag_id} was not unchecked"
        )));
    }
    Ok(())
}

async fn insert_checking(
    tx: &mut WriteTx,
    semitag_id: Uuid,
    video_tag_id: Option<Uuid>,
    note: Option<&str>,
    actor: &UserId,
) -> otmdb_common::Result<SemitagChecking> {
    let now = tx.now_millis();
    let id = generate();
    sqlx::query(
        r#"
        INSERT INTO semitag_checkings (id, semitag_id, video_tag_id, checked_by, note, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(semitag_id.to_string())
    .bind(video_tag_id.map(|v| v.to_string()))
    .bind(actor.as_str())
    .bind(note)
    .bind(now)
    .execute(tx.conn())
    .await?;

    Ok(SemitagChecking {
        id,
        semitag_id,
        video_tag_id,
        checked_by: actor.as_str().to_string(),
        note: note.map(str::to_string),
        created_at: otmdb_common::time::from_millis(now),
    })
}

/// Resolve an unchecked semitag to a tag inside an open transaction
///
/// An active tagging of the tag on the semitag's video is reused as is; a
/// removed one is re-attached; otherwise a new tagging is attached.
pub(crate) async fn resolve_tx(
    tx: &mut WriteTx,
    semitag: &Semitag,
    tag_id: Uuid,
    note: Option<&str>,
    actor: &UserId,
) -> otmdb_common::Result<SemitagResolution> {
    mark_checked(tx, semitag.id).await?;

    let outcome = attach_tx(tx, semitag.video_id, tag_id, actor).await?;
    let video_tag = outcome.video_tag().clone();

    event_log::append(
        tx,
        semitag.id,
        SemitagEventType::Resolve,
        actor,
        json!({
            "video_id": semitag.video_id,
            "tag_id": tag_id,
            "video_tag_id": video_tag.id,
            "note": note,
        }),
    )
    .await?;

    let checking = insert_checking(tx, semitag.id, Some(video_tag.id), note, actor).await?;

    Ok(SemitagResolution {
        semitag: Semitag {
            is_checked: true,
            updated_at: checking.created_at,
            ..semitag.clone()
        },
        checking,
        video_tag,
    })
}

/// Semitag suggestion and moderation
#[derive(Clone)]
pub struct SemitagService {
    store: Store,
}

impl SemitagService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn suggest(
        &self,
        video_id: Uuid,
        name: &str,
        actor: &UserId,
    ) -> Result<Semitag, SuggestSemitagError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SuggestSemitagError::InvalidName);
        }

        let mut tx = self.store.begin_write("semitag::suggest").await?;

        if !videos::video_exists(tx.conn(), video_id).await? {
            debug!(video_id = %video_id, "suggest semitag: video not found");
            return Err(SuggestSemitagError::VideoNotFound(video_id));
        }
        if let Some(existing) = find_semitag_by_name(tx.conn(), video_id, name).await? {
            debug!(video_id = %video_id, name = name, "suggest semitag: duplicate name");
            return Err(if existing.is_checked {
                SuggestSemitagError::AlreadyChecked(existing)
            } else {
                SuggestSemitagError::AlreadyAttached(existing)
            });
        }

        let semitag = insert_semitag_tx(&mut tx, video_id, name, actor).await?;
        tx.commit().await?;

        info!(
            user_id = %actor,
            video_id = %video_id,
            semitag_id = %semitag.id,
            name = name,
            "Semitag attached to video"
        );
        Ok(semitag)
    }

    pub async fn resolve(
        &self,
        semitag_id: Uuid,
        tag_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<SemitagResolution, ResolveSemitagError> {
        let mut tx = self.store.begin_write("semitag::resolve").await?;

        let semitag = find_semitag(tx.conn(), semitag_id)
            .await?
            .ok_or(ResolveSemitagError::NotFound(semitag_id))?;
        if semitag.is_checked {
            debug!(semitag_id = %semitag_id, "resolve semitag: already checked");
            return Err(ResolveSemitagError::AlreadyChecked(semitag));
        }
        if !tag_graph::tag_exists(tx.conn(), tag_id).await? {
            debug!(tag_id = %tag_id, "resolve semitag: tag not found");
            return Err(ResolveSemitagError::TagNotFound(tag_id));
        }

        let resolution = resolve_tx(&mut tx, &semitag, tag_id, note, actor).await?;
        tx.commit().await?;

        info!(
            user_id = %actor,
            semitag_id = %semitag_id,
            tag_id = %tag_id,
            video_tag_id = %resolution.video_tag.id,
            "Semitag resolved"
        );
        Ok(resolution)
    }

    pub async fn reject(
        &self,
        semitag_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<SemitagRejection, RejectSemitagError> {
        let mut tx = self.store.begin_write("semitag::reject").await?;

        let semitag = find_semitag(tx.conn(), semitag_id)
            .await?
            .ok_or(RejectSemitagError::NotFound(semitag_id))?;
        if semitag.is_checked {
            debug!(semitag_id = %semitag_id, "reject semitag: already checked");
            return Err(RejectSemitagError::AlreadyChecked(semitag));
        }

        mark_checked(&mut tx, semitag_id).await?;
        event_log::append(
            &mut tx,
            semitag_id,
            SemitagEventType::Reject,
            actor,
            json!({ "video_id": semitag.video_id, "note": note }),
        )
        .await?;
        let checking = insert_checking(&mut tx, semitag_id, None, note, actor).await?;

        tx.commit().await?;

        info!(user_id = %actor, semitag_id = %semitag_id, "Semitag rejected");
        Ok(SemitagRejection {
            semitag: Semitag {
                is_checked: true,
                updated_at: checking.created_at,
                ..semitag
            },
            checking,
        })
    }

    pub async fn get(&self, semitag_id: Uuid) -> otmdb_common::Result<Option<Semitag>> {
        let mut conn = self.store.reader().await?;
        find_semitag(&mut conn, semitag_id).await
    }

    pub async fn checking(&self, semitag_id: Uuid) -> otmdb_common::Result<Option<SemitagChecking>> {
        let mut conn = self.store.reader().await?;
        find_checking(&mut conn, semitag_id).await
    }

    /// True iff the semitag's video has no active tagging with the tag
    pub async fn can_resolve_to(&self, semitag_id: Uuid, tag_id: Uuid) -> Result<bool, QueryError> {
        let mut conn = self.store.reader().await?;
        let semitag = find_semitag(&mut conn, semitag_id)
            .await?
            .ok_or(QueryError::NotFound(semitag_id))?;
        let existing = tagging::find_video_tag(&mut conn, semitag.video_id, tag_id).await?;
        Ok(existing.map_or(true, |vt| vt.is_removed))
    }

    /// Tags with a name equal to the semitag's, ignoring ASCII case
    pub async fn suggest_tags(&self, semitag_id: Uuid) -> Result<Vec<TagSuggestion>, QueryError> {
        let mut conn = self.store.reader().await?;
        let semitag = find_semitag(&mut conn, semitag_id)
            .await?
            .ok_or(QueryError::NotFound(semitag_id))?;

        let tags = tag_graph::tags_named(&mut conn, &semitag.name).await?;
        let mut suggestions = Vec::with_capacity(tags.len());
        for tag in tags {
            let existing = tagging::find_video_tag(&mut conn, semitag.video_id, tag.id).await?;
            suggestions.push(TagSuggestion {
                can_resolve: existing.map_or(true, |vt| vt.is_removed),
                tag,
            });
        }
        Ok(suggestions)
    }

    /// Semitags across all videos, optionally filtered by checked state
    pub async fn find(
        &self,
        checked: Option<bool>,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<Semitag>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let from_where = match checked {
            Some(true) => "FROM semitags WHERE is_checked = 1",
            Some(false) => "FROM semitags WHERE is_checked = 0",
            None => "FROM semitags WHERE 1 = 1",
        };
        let mut conn = self.store.reader().await?;
        let page = fetch_page(
            &mut conn,
            PageSource {
                select: SEMITAG_COLUMNS,
                from_where,
                scope: Vec::new(),
                time_col: "created_at",
                id_col: "id",
            },
            &query,
            Semitag::from_row,
            |s| Cursor::new(s.created_at.timestamp_millis(), s.id.to_string()),
        )
        .await?;
        Ok(page)
    }
}
