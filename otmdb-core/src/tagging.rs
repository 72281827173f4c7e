//! Video <-> Tag attachment with soft delete
//!
//! One `video_tags` row per (video, tag) pair. Detaching flips `is_removed`,
//! re-attaching flips it back; rows are never deleted. Each transition
//! appends exactly one VIDEO_TAG event.

use crate::error::{internal_from_sqlx, OperationError, INTERNAL_SERVER_ERROR};
use crate::event_log::{self, TypedEvent, VideoTagEventType};
use crate::models::{UserId, VideoTag};
use crate::store::{Store, WriteTx};
use crate::{tag_graph, videos};
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("video not found: {0}")]
    VideoNotFound(Uuid),

    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    #[error("video {} is already tagged with {}", .0.video_id, .0.tag_id)]
    ExistsTagging(VideoTag),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DetachError {
    #[error("no active tagging of {tag_id} on video {video_id}")]
    NotFound { video_id: Uuid, tag_id: Uuid },

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

internal_from_sqlx!(AttachError, DetachError);

impl OperationError for AttachError {
    fn code(&self) -> &'static str {
        match self {
            AttachError::VideoNotFound(_) => "VIDEO_NOT_FOUND",
            AttachError::TagNotFound(_) => "TAG_NOT_FOUND",
            AttachError::ExistsTagging(_) => "EXISTS_TAGGING",
            AttachError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for DetachError {
    fn code(&self) -> &'static str {
        match self {
            DetachError::NotFound { .. } => "NOT_FOUND",
            DetachError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

/// What [`attach_tx`] did to the pair
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttachOutcome {
    /// New row, ATTACH appended
    Attached(VideoTag),
    /// Removed row restored, REATTACH appended
    Reattached(VideoTag),
    /// Row was already active, nothing written
    Existing(VideoTag),
}

impl AttachOutcome {
    pub(crate) fn video_tag(&self) -> &VideoTag {
        match self {
            AttachOutcome::Attached(vt) | AttachOutcome::Reattached(vt) | AttachOutcome::Existing(vt) => vt,
        }
    }
}

pub(crate) async fn find_video_tag(
    conn: &mut SqliteConnection,
    video_id: Uuid,
    tag_id: Uuid,
) -> otmdb_common::Result<Option<VideoTag>> {
    let row = sqlx::query(
        r#"
        SELECT id, video_id, tag_id, is_removed, created_at, updated_at
        FROM video_tags
        WHERE video_id = ? AND tag_id = ?
        "#,
    )
    .bind(video_id.to_string())
    .bind(tag_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(VideoTag::from_row).transpose()
}

/// Attach or re-attach inside an open transaction
///
/// Video and tag existence are the caller's responsibility.
pub(crate) async fn attach_tx(
    tx: &mut WriteTx,
    video_id: Uuid,
    tag_id: Uuid,
    actor: &UserId,
) -> otmdb_common::Result<AttachOutcome> {
    let now = tx.now_millis();
    let payload = json!({ "video_id": video_id, "tag_id": tag_id });

    match find_video_tag(tx.conn(), video_id, tag_id).await? {
        None => {
            let id = otmdb_common::uuid_utils::generate();
            sqlx::query(
                r#"
                INSERT INTO video_tags (id, video_id, tag_id, is_removed, created_at, updated_at)
                VALUES (?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(video_id.to_string())
            .bind(tag_id.to_string())
            .bind(now)
            .bind(now)
            .execute(tx.conn())
            .await?;

            event_log::append(tx, id, VideoTagEventType::Attach, actor, payload).await?;

            let created = find_video_tag(tx.conn(), video_id, tag_id)
                .await?
                .ok_or_else(|| otmdb_common::Error::Internal(format!("video_tag {id} vanished")))?;
            Ok(AttachOutcome::Attached(created))
        }
        Some(existing) if existing.is_removed => {
            sqlx::query("UPDATE video_tags SET is_removed = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(existing.id.to_string())
                .execute(tx.conn())
                .await?;

            event_log::append(tx, existing.id, VideoTagEventType::Reattach, actor, payload).await?;

            Ok(AttachOutcome::Reattached(VideoTag {
                is_removed: false,
                updated_at: otmdb_common::time::from_millis(now),
                ..existing
            }))
        }
        Some(existing) => Ok(AttachOutcome::Existing(existing)),
    }
}

/// Attach/detach tags on videos
#[derive(Clone)]
pub struct TaggingService {
    store: Store,
}

impl TaggingService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn attach(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
        actor: &UserId,
    ) -> Result<VideoTag, AttachError> {
        let mut tx = self.store.begin_write("tagging::attach").await?;

        if !videos::video_exists(tx.conn(), video_id).await? {
            debug!(video_id = %video_id, "attach: video not found");
            return Err(AttachError::VideoNotFound(video_id));
        }
        if !tag_graph::tag_exists(tx.conn(), tag_id).await? {
            debug!(tag_id = %tag_id, "attach: tag not found");
            return Err(AttachError::TagNotFound(tag_id));
        }

        let video_tag = match attach_tx(&mut tx, video_id, tag_id, actor).await? {
            AttachOutcome::Existing(active) => {
                debug!(video_id = %video_id, tag_id = %tag_id, "attach: already tagged");
                return Err(AttachError::ExistsTagging(active));
            }
            AttachOutcome::Attached(vt) | AttachOutcome::Reattached(vt) => vt,
        };

        tx.commit().await?;

        info!(
            user_id = %actor,
            video_id = %video_id,
            tag_id = %tag_id,
            video_tag_id = %video_tag.id,
            "Tag attached to video"
        );
        Ok(video_tag)
    }

    /// Soft-remove an active tagging
    ///
    /// Detaching an absent or already removed tagging is an error.
    pub async fn detach(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
        actor: &UserId,
    ) -> Result<VideoTag, DetachError> {
        let mut tx = self.store.begin_write("tagging::detach").await?;

        let existing = match find_video_tag(tx.conn(), video_id, tag_id).await? {
            Some(vt) if !vt.is_removed => vt,
            _ => {
                debug!(video_id = %video_id, tag_id = %tag_id, "detach: no active tagging");
                return Err(DetachError::NotFound { video_id, tag_id });
            }
        };

        let now = tx.now_millis();
        sqlx::query("UPDATE video_tags SET is_removed = 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(existing.id.to_string())
            .execute(tx.conn())
            .await?;

        event_log::append(
            &mut tx,
            existing.id,
            VideoTagEventType::Detach,
            actor,
            json!({ "video_id": video_id, "tag_id": tag_id }),
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %actor,
            video_id = %video_id,
            tag_id = %tag_id,
            video_tag_id = %existing.id,
            "Tag detached from video"
        );
        Ok(VideoTag {
            is_removed: true,
            updated_at: otmdb_common::time::from_millis(now),
            ..existing
        })
    }

    /// True iff the video has no active tagging with the tag
    pub async fn can_tag_to(&self, tag_id: Uuid, video_id: Uuid) -> otmdb_common::Result<bool> {
        let mut conn = self.store.reader().await?;
        let existing = find_video_tag(&mut conn, video_id, tag_id).await?;
        Ok(existing.map_or(true, |vt| vt.is_removed))
    }

    /// Event trail of the pair, oldest first
    pub async fn history(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
    ) -> otmdb_common::Result<Vec<TypedEvent<VideoTagEventType>>> {
        let mut conn = self.store.reader().await?;
        match find_video_tag(&mut conn, video_id, tag_id).await? {
            Some(vt) => event_log::trail(&mut conn, vt.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
    ) -> otmdb_common::Result<Option<VideoTag>> {
        let mut conn = self.store.reader().await?;
        find_video_tag(&mut conn, video_id, tag_id).await
    }
}
