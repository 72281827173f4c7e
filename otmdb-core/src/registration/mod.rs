//! Registration workflow: PENDING -> ACCEPTED | REJECTED
//!
//! One engine, instantiated per video source through a [`SourceAdapter`].
//! A request is checked exactly once. Acceptance creates the video with its
//! source record, requested taggings and semitags in the same transaction
//! that marks the request checked.

pub mod source;

use crate::error::{internal_from_sqlx, OperationError, QueryError, INTERNAL_SERVER_ERROR};
use crate::event_log::{self, RegistrationEventType};
use crate::models::{
    RegistrationChecking, RegistrationRequest, RequestSemitagging, RequestTagging, Semitag, UserId,
    Video, VideoSource, VideoSourceKind, VideoTag,
};
use crate::page::{fetch_page, PageSource};
use crate::store::{Store, WriteTx};
use crate::tagging::attach_tx;
use crate::videos::{self, NewVideo};
use crate::{semitag, tag_graph};
use otmdb_common::pagination::{Connection, ConnectionArgs, Cursor, PageQuery, SortOrder};
use otmdb_common::uuid_utils::generate;
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

pub use source::{Bilibili, InvalidSourceId, Nicovideo, Soundcloud, SourceAdapter, Youtube};

const REQUEST_COLUMNS: &str = "id, source, source_id, title, thumbnail_url, requested_by, is_checked, created_at, updated_at";

// ========================================
// Errors
// ========================================

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidSourceId(#[from] InvalidSourceId),

    #[error("title must not be empty")]
    InvalidTitle,

    #[error("semitag names must not be empty")]
    InvalidSemitagName,

    #[error("tag requested twice: {0}")]
    DuplicatedTagging(Uuid),

    #[error("semitag requested twice: {0:?}")]
    DuplicatedSemitagging(String),

    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    /// Carries the source record of the already registered video
    #[error("{} {} is already registered as video {}", .0.source, .0.source_id, .0.video_id)]
    VideoAlreadyRegistered(VideoSource),

    /// Carries the pending request for the same external id
    #[error("{} {} already has pending request {}", .0.source, .0.source_id, .0.id)]
    RequestAlreadyExists(RegistrationRequest),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("registration request not found: {0}")]
    NotFound(Uuid),

    /// Carries the existing disposition
    #[error("registration request {} already checked", .0.request_id)]
    AlreadyChecked(RegistrationChecking),

    #[error("{} {} is already registered as video {}", .0.source, .0.source_id, .0.video_id)]
    VideoAlreadyRegistered(VideoSource),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RejectError {
    #[error("registration request not found: {0}")]
    RequestNotFound(Uuid),

    /// Carries the request and its existing disposition
    #[error("registration request {} already checked", .request.id)]
    RequestAlreadyChecked {
        request: RegistrationRequest,
        checking: RegistrationChecking,
    },

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

internal_from_sqlx!(SubmitError, AcceptError, RejectError);

impl OperationError for SubmitError {
    fn code(&self) -> &'static str {
        match self {
            SubmitError::InvalidSourceId(_) => "INVALID_SOURCE_ID",
            SubmitError::InvalidTitle => "INVALID_TITLE",
            SubmitError::InvalidSemitagName => "INVALID_SEMITAG_NAME",
            SubmitError::DuplicatedTagging(_) => "DUPLICATED_TAGGING",
            SubmitError::DuplicatedSemitagging(_) => "DUPLICATED_SEMITAGGING",
            SubmitError::TagNotFound(_) => "TAG_NOT_FOUND",
            SubmitError::VideoAlreadyRegistered(_) => "VIDEO_ALREADY_REGISTERED",
            SubmitError::RequestAlreadyExists(_) => "REQUEST_ALREADY_EXISTS",
            SubmitError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for AcceptError {
    fn code(&self) -> &'static str {
        match self {
            AcceptError::NotFound(_) => "NOT_FOUND",
            AcceptError::AlreadyChecked(_) => "ALREADY_CHECKED",
            AcceptError::VideoAlreadyRegistered(_) => "VIDEO_ALREADY_REGISTERED",
            AcceptError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for RejectError {
    fn code(&self) -> &'static str {
        match self {
            RejectError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            RejectError::RequestAlreadyChecked { .. } => "REQUEST_ALREADY_CHECKED",
            RejectError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

// ========================================
// Inputs and outputs
// ========================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedTagging {
    pub tag_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedSemitagging {
    pub name: String,
    pub note: Option<String>,
}

/// Arguments of [`RegistrationWorkflow::submit`]
#[derive(Debug, Clone, Default)]
pub struct NewRegistrationRequest {
    /// Raw external id, validated by the source adapter
    pub source_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub taggings: Vec<RequestedTagging>,
    pub semitaggings: Vec<RequestedSemitagging>,
}

impl NewRegistrationRequest {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn tag(mut self, tag_id: Uuid) -> Self {
        self.taggings.push(RequestedTagging { tag_id, note: None });
        self
    }

    pub fn semitag(mut self, name: impl Into<String>) -> Self {
        self.semitaggings.push(RequestedSemitagging {
            name: name.into(),
            note: None,
        });
        self
    }
}

/// Everything created by an acceptance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedRegistration {
    pub request: RegistrationRequest,
    pub checking: RegistrationChecking,
    pub video: Video,
    pub source: VideoSource,
    pub video_tags: Vec<VideoTag>,
    pub semitags: Vec<Semitag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRegistration {
    pub request: RegistrationRequest,
    pub checking: RegistrationChecking,
}

// ========================================
// Row helpers
// ========================================

pub(crate) async fn find_request(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> otmdb_common::Result<Option<RegistrationRequest>> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM registration_requests WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(request_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(RegistrationRequest::from_row).transpose()
}

async fn find_pending(
    conn: &mut SqliteConnection,
    source: VideoSourceKind,
    source_id: &str,
) -> otmdb_common::Result<Option<RegistrationRequest>> {
    let sql = format!(
        "SELECT {REQUEST_COLUMNS} FROM registration_requests WHERE source = ? AND source_id = ? AND is_checked = 0"
    );
    let row = sqlx::query(&sql)
        .bind(source.as_str())
        .bind(source_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(RegistrationRequest::from_row).transpose()
}

pub(crate) async fn find_checking(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> otmdb_common::Result<Option<RegistrationChecking>> {
    let row = sqlx::query(
        r#"
        SELECT id, request_id, checked_by, note, video_id, created_at
        FROM registration_checkings
        WHERE request_id = ?
        "#,
    )
    .bind(request_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(RegistrationChecking::from_row).transpose()
}

/// Checking of a request already marked checked
async fn existing_checking(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> otmdb_common::Result<RegistrationChecking> {
    find_checking(conn, request_id).await?.ok_or_else(|| {
        otmdb_common::Error::Internal(format!(
            "registration request {request_id} is checked but has no checking"
        ))
    })
}

pub(crate) async fn find_taggings(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> otmdb_common::Result<Vec<RequestTagging>> {
    sqlx::query(
        "SELECT id, request_id, tag_id, note FROM registration_request_taggings WHERE request_id = ? ORDER BY position",
    )
    .bind(request_id.to_string())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(RequestTagging::from_row)
    .collect()
}

pub(crate) async fn find_semitaggings(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> otmdb_common::Result<Vec<RequestSemitagging>> {
    sqlx::query(
        "SELECT id, request_id, name, note FROM registration_request_semitaggings WHERE request_id = ? ORDER BY position",
    )
    .bind(request_id.to_string())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(RequestSemitagging::from_row)
    .collect()
}

/// Mark checked and record the disposition
async fn check_tx(
    tx: &mut WriteTx,
    request: &RegistrationRequest,
    video_id: Option<Uuid>,
    note: Option<&str>,
    actor: &UserId,
) -> otmdb_common::Result<(RegistrationRequest, RegistrationChecking)> {
    let now = tx.now_millis();

    let result = sqlx::query(
        "UPDATE registration_requests SET is_checked = 1, updated_at = ? WHERE id = ? AND is_checked = 0",
    )
    .bind(now)
    .bind(request.id.to_string())
    .execute(tx.conn())
    .await?;
    if result.rows_affected() != 1 {
        return Err(otmdb_common::Error::Internal(format!(
            "registration request {} was not pending",
            request.id
        )));
    }

    let id = generate();
    sqlx::query(
        r#"
        INSERT INTO registration_checkings (id, request_id, checked_by, note, video_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(request.id.to_string())
    .bind(actor.as_str())
    .bind(note)
    .bind(video_id.map(|v| v.to_string()))
    .bind(now)
    .execute(tx.conn())
    .await?;

    let at = otmdb_common::time::from_millis(now);
    Ok((
        RegistrationRequest {
            is_checked: true,
            updated_at: at,
            ..request.clone()
        },
        RegistrationChecking {
            id,
            request_id: request.id,
            checked_by: actor.as_str().to_string(),
            note: note.map(str::to_string),
            video_id,
            created_at: at,
        },
    ))
}

// ========================================
// RegistrationWorkflow
// ========================================

/// Registration requests of one video source
#[derive(Clone)]
pub struct RegistrationWorkflow<A: SourceAdapter> {
    store: Store,
    adapter: A,
}

impl<A: SourceAdapter> RegistrationWorkflow<A> {
    pub fn new(store: Store, adapter: A) -> Self {
        Self { store, adapter }
    }

    pub fn source(&self) -> VideoSourceKind {
        A::SOURCE
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Load a request of this workflow's source
    async fn load(
        &self,
        conn: &mut SqliteConnection,
        request_id: Uuid,
    ) -> otmdb_common::Result<Option<RegistrationRequest>> {
        Ok(find_request(conn, request_id)
            .await?
            .filter(|r| r.source == A::SOURCE))
    }

    /// Create a pending request
    pub async fn submit(
        &self,
        new: NewRegistrationRequest,
        actor: &UserId,
    ) -> Result<RegistrationRequest, SubmitError> {
        let source_id = self.adapter.validate_external_id(&new.source_id)?;
        let title = new.title.trim();
        if title.is_empty() {
            return Err(SubmitError::InvalidTitle);
        }

        let mut seen_tags = HashSet::new();
        for tagging in &new.taggings {
            if !seen_tags.insert(tagging.tag_id) {
                return Err(SubmitError::DuplicatedTagging(tagging.tag_id));
            }
        }
        let mut seen_names = HashSet::new();
        let mut semitag_names = Vec::with_capacity(new.semitaggings.len());
        for semitagging in &new.semitaggings {
            let name = semitagging.name.trim();
            if name.is_empty() {
                return Err(SubmitError::InvalidSemitagName);
            }
            if !seen_names.insert(name.to_string()) {
                return Err(SubmitError::DuplicatedSemitagging(name.to_string()));
            }
            semitag_names.push(name.to_string());
        }

        let mut tx = self.store.begin_write("registration::submit").await?;

        for tagging in &new.taggings {
            if !tag_graph::tag_exists(tx.conn(), tagging.tag_id).await? {
                debug!(tag_id = %tagging.tag_id, "submit: tag not found");
                return Err(SubmitError::TagNotFound(tagging.tag_id));
            }
        }
        if let Some(existing) = videos::find_source(tx.conn(), A::SOURCE, &source_id).await? {
            debug!(source = %A::SOURCE, source_id = %source_id, "submit: video already registered");
            return Err(SubmitError::VideoAlreadyRegistered(existing));
        }
        if let Some(pending) = find_pending(tx.conn(), A::SOURCE, &source_id).await? {
            debug!(source = %A::SOURCE, source_id = %source_id, "submit: request already pending");
            return Err(SubmitError::RequestAlreadyExists(pending));
        }

        let now = tx.now_millis();
        let request_id = generate();
        let sql = format!(
            "INSERT INTO registration_requests ({REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(request_id.to_string())
            .bind(A::SOURCE.as_str())
            .bind(&source_id)
            .bind(title)
            .bind(new.thumbnail_url.as_deref())
            .bind(actor.as_str())
            .bind(now)
            .bind(now)
            .execute(tx.conn())
            .await?;

        for (position, tagging) in new.taggings.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO registration_request_taggings (id, request_id, tag_id, note, position)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(generate().to_string())
            .bind(request_id.to_string())
            .bind(tagging.tag_id.to_string())
            .bind(tagging.note.as_deref())
            .bind(position as i64)
            .execute(tx.conn())
            .await?;
        }
        for (position, (name, semitagging)) in semitag_names.iter().zip(&new.semitaggings).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO registration_request_semitaggings (id, request_id, name, note, position)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(generate().to_string())
            .bind(request_id.to_string())
            .bind(name)
            .bind(semitagging.note.as_deref())
            .bind(position as i64)
            .execute(tx.conn())
            .await?;
        }

        event_log::append(
            &mut tx,
            request_id,
            RegistrationEventType::Request,
            actor,
            json!({ "source": A::SOURCE, "source_id": source_id, "title": title }),
        )
        .await?;

        let request = self
            .load(tx.conn(), request_id)
            .await?
            .ok_or_else(|| otmdb_common::Error::Internal(format!("request {request_id} vanished")))?;
        tx.commit().await?;

        info!(
            user_id = %actor,
            request_id = %request_id,
            source = %A::SOURCE,
            source_id = %source_id,
            "Registration requested"
        );
        Ok(request)
    }

    /// Accept a pending request, registering its video
    pub async fn accept(
        &self,
        request_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<AcceptedRegistration, AcceptError> {
        let mut tx = self.store.begin_write("registration::accept").await?;

        let request = self
            .load(tx.conn(), request_id)
            .await?
            .ok_or(AcceptError::NotFound(request_id))?;
        if request.is_checked {
            let checking = existing_checking(tx.conn(), request_id).await?;
            debug!(request_id = %request_id, "accept: already checked");
            return Err(AcceptError::AlreadyChecked(checking));
        }
        if let Some(existing) = videos::find_source(tx.conn(), A::SOURCE, &request.source_id).await? {
            debug!(request_id = %request_id, video_id = %existing.video_id, "accept: video already registered");
            return Err(AcceptError::VideoAlreadyRegistered(existing));
        }

        let taggings = find_taggings(tx.conn(), request_id).await?;
        let semitaggings = find_semitaggings(tx.conn(), request_id).await?;

        let (video, source) = videos::insert_video_tx(
            &mut tx,
            NewVideo {
                title: &request.title,
                thumbnail_url: request.thumbnail_url.as_deref(),
                source: A::SOURCE,
                source_id: &request.source_id,
            },
            actor,
        )
        .await?;

        let mut video_tags = Vec::with_capacity(taggings.len());
        for tagging in &taggings {
            let outcome = attach_tx(&mut tx, video.id, tagging.tag_id, actor).await?;
            video_tags.push(outcome.video_tag().clone());
        }
        let mut semitags = Vec::with_capacity(semitaggings.len());
        for semitagging in &semitaggings {
            semitags.push(semitag::insert_semitag_tx(&mut tx, video.id, &semitagging.name, actor).await?);
        }

        let (request, checking) = check_tx(&mut tx, &request, Some(video.id), note, actor).await?;
        event_log::append(
            &mut tx,
            request_id,
            RegistrationEventType::Accept,
            actor,
            json!({ "source": A::SOURCE, "video_id": video.id, "note": note }),
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %actor,
            request_id = %request_id,
            video_id = %video.id,
            source = %A::SOURCE,
            tags = video_tags.len(),
            semitags = semitags.len(),
            "Registration accepted"
        );
        Ok(AcceptedRegistration {
            request,
            checking,
            video,
            source,
            video_tags,
            semitags,
        })
    }

    /// Reject a pending request
    pub async fn reject(
        &self,
        request_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<RejectedRegistration, RejectError> {
        let mut tx = self.store.begin_write("registration::reject").await?;

        let request = self
            .load(tx.conn(), request_id)
            .await?
            .ok_or(RejectError::RequestNotFound(request_id))?;
        if request.is_checked {
            let checking = existing_checking(tx.conn(), request_id).await?;
            debug!(request_id = %request_id, "reject: already checked");
            return Err(RejectError::RequestAlreadyChecked { request, checking });
        }

        let (request, checking) = check_tx(&mut tx, &request, None, note, actor).await?;
        event_log::append(
            &mut tx,
            request_id,
            RegistrationEventType::Reject,
            actor,
            json!({ "source": A::SOURCE, "note": note }),
        )
        .await?;

        tx.commit().await?;

        info!(user_id = %actor, request_id = %request_id, source = %A::SOURCE, "Registration rejected");
        Ok(RejectedRegistration { request, checking })
    }

    // ----------------------------------------
    // Read paths
    // ----------------------------------------

    pub async fn get(&self, request_id: Uuid) -> otmdb_common::Result<Option<RegistrationRequest>> {
        let mut conn = self.store.reader().await?;
        self.load(&mut conn, request_id).await
    }

    /// Request for an external id: the pending one, else the most recent
    pub async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> otmdb_common::Result<Option<RegistrationRequest>> {
        let mut conn = self.store.reader().await?;
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM registration_requests WHERE source = ? AND source_id = ? ORDER BY is_checked, created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(A::SOURCE.as_str())
            .bind(source_id.trim())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(RegistrationRequest::from_row).transpose()
    }

    /// Requests of this source, optionally filtered by checked state
    pub async fn find(
        &self,
        checked: Option<bool>,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<RegistrationRequest>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let from_where = match checked {
            Some(true) => "FROM registration_requests WHERE source = ? AND is_checked = 1",
            Some(false) => "FROM registration_requests WHERE source = ? AND is_checked = 0",
            None => "FROM registration_requests WHERE source = ?",
        };
        let mut conn = self.store.reader().await?;
        let page = fetch_page(
            &mut conn,
            PageSource {
                select: REQUEST_COLUMNS,
                from_where,
                scope: vec![A::SOURCE.as_str().to_string()],
                time_col: "created_at",
                id_col: "id",
            },
            &query,
            RegistrationRequest::from_row,
            |r| Cursor::new(r.created_at.timestamp_millis(), r.id.to_string()),
        )
        .await?;
        Ok(page)
    }

    pub async fn taggings(&self, request_id: Uuid) -> otmdb_common::Result<Vec<RequestTagging>> {
        let mut conn = self.store.reader().await?;
        find_taggings(&mut conn, request_id).await
    }

    pub async fn semitaggings(&self, request_id: Uuid) -> otmdb_common::Result<Vec<RequestSemitagging>> {
        let mut conn = self.store.reader().await?;
        find_semitaggings(&mut conn, request_id).await
    }

    /// Disposition of a checked request, `None` while pending
    pub async fn checking(&self, request_id: Uuid) -> otmdb_common::Result<Option<RegistrationChecking>> {
        let mut conn = self.store.reader().await?;
        find_checking(&mut conn, request_id).await
    }
}
