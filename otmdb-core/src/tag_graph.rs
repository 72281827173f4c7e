//! Tag graph: tags, their names and parent edges
//!
//! Edges point child -> parent. A child has at most one explicit parent at any
//! time and at most one edge per parent; self loops are rejected. Every check
//! runs inside the write transaction, and the schema carries matching unique
//! indexes underneath.

use crate::error::{internal_from_sqlx, OperationError, QueryError, INTERNAL_SERVER_ERROR};
use crate::event_log::{self, TagEventType, TagParentEventType, TypedEvent};
use crate::models::{CategoryType, Tag, TagName, TagParent, TagType, UserId, VideoTag};
use crate::page::{fetch_page, PageSource};
use crate::semitag::{self, SemitagResolution};
use crate::store::{Store, WriteTx};
use otmdb_common::pagination::{Connection, ConnectionArgs, Cursor, PageQuery, SortOrder};
use otmdb_common::uuid_utils::generate;
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

const TAG_COLUMNS: &str = "id, is_category_tag, category_type, created_by, created_at, updated_at";
const EDGE_COLUMNS: &str =
    "tp.id, tp.child_id, tp.parent_id, tp.is_explicit, tp.created_by, tp.created_at, tp.updated_at";

// ========================================
// Errors
// ========================================

#[derive(Debug, thiserror::Error)]
pub enum CreateTagError {
    #[error("invalid names: {0}")]
    InvalidNames(String),

    #[error("primary name index {index} out of range for {len} names")]
    PrimaryIndexOutOfRange { index: usize, len: usize },

    #[error("parent tag not found: {0}")]
    ParentNotFound(Uuid),

    #[error("implicit parent listed twice: {0}")]
    DuplicatedImplicitParent(Uuid),

    #[error("tag {0} given as both explicit and implicit parent")]
    ExplicitImplicitCollision(Uuid),

    #[error("semitag listed twice for resolution: {0}")]
    DuplicatedResolveSemitag(Uuid),

    #[error("semitag not found: {0}")]
    SemitagNotFound(Uuid),

    #[error("semitag already checked: {0}")]
    SemitagAlreadyChecked(Uuid),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExplicitizeError {
    #[error("tag parent edge not found: {0}")]
    NotFound(Uuid),

    /// Carries the edge that is already explicit for the child
    #[error("child {} already has explicit parent {}", .0.child_id, .0.parent_id)]
    AlreadyExplicit(TagParent),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AddParentError {
    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    #[error("tag {0} cannot be its own parent")]
    SelfLoop(Uuid),

    #[error("edge {} -> {} already exists", .0.child_id, .0.parent_id)]
    AlreadyExists(TagParent),

    #[error("child {} already has explicit parent {}", .0.child_id, .0.parent_id)]
    ExplicitParentExists(TagParent),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TagNameError {
    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    #[error("tag name must not be empty")]
    InvalidName,

    #[error("tag already has name {0:?}")]
    NameAlreadyExists(String),

    #[error("tag has no name {0:?}")]
    NameNotFound(String),

    #[error("primary name {0:?} cannot be removed")]
    PrimaryNameRemoval(String),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SetCategoryTypeError {
    #[error("tag not found: {0}")]
    TagNotFound(Uuid),

    #[error("tag {0} is not a category tag")]
    NotCategoryTag(Uuid),

    #[error(transparent)]
    Internal(#[from] otmdb_common::Error),
}

internal_from_sqlx!(
    CreateTagError,
    ExplicitizeError,
    AddParentError,
    TagNameError,
    SetCategoryTypeError,
);

impl OperationError for CreateTagError {
    fn code(&self) -> &'static str {
        match self {
            CreateTagError::InvalidNames(_) | CreateTagError::PrimaryIndexOutOfRange { .. } => {
                "INVALID_NAMES"
            }
            CreateTagError::ParentNotFound(_) => "PARENT_NOT_FOUND",
            CreateTagError::DuplicatedImplicitParent(_) => "DUPLICATED_IMPLICIT_PARENT",
            CreateTagError::ExplicitImplicitCollision(_) => "EXPLICIT_IMPLICIT_COLLISION",
            CreateTagError::DuplicatedResolveSemitag(_) => "DUPLICATED_RESOLVE_SEMITAG",
            CreateTagError::SemitagNotFound(_) => "SEMITAG_NOT_FOUND",
            CreateTagError::SemitagAlreadyChecked(_) => "SEMITAG_ALREADY_CHECKED",
            CreateTagError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for ExplicitizeError {
    fn code(&self) -> &'static str {
        match self {
            ExplicitizeError::NotFound(_) => "NOT_FOUND",
            ExplicitizeError::AlreadyExplicit(_) => "ALREADY_EXPLICIT",
            ExplicitizeError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for AddParentError {
    fn code(&self) -> &'static str {
        match self {
            AddParentError::TagNotFound(_) => "TAG_NOT_FOUND",
            AddParentError::SelfLoop(_) => "SELF_LOOP",
            AddParentError::AlreadyExists(_) => "ALREADY_EXISTS",
            AddParentError::ExplicitParentExists(_) => "EXPLICIT_PARENT_EXISTS",
            AddParentError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for TagNameError {
    fn code(&self) -> &'static str {
        match self {
            TagNameError::TagNotFound(_) => "TAG_NOT_FOUND",
            TagNameError::InvalidName => "INVALID_NAME",
            TagNameError::NameAlreadyExists(_) => "NAME_ALREADY_EXISTS",
            TagNameError::NameNotFound(_) => "NAME_NOT_FOUND",
            TagNameError::PrimaryNameRemoval(_) => "CANNOT_REMOVE_PRIMARY_NAME",
            TagNameError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

impl OperationError for SetCategoryTypeError {
    fn code(&self) -> &'static str {
        match self {
            SetCategoryTypeError::TagNotFound(_) => "TAG_NOT_FOUND",
            SetCategoryTypeError::NotCategoryTag(_) => "NOT_CATEGORY_TAG",
            SetCategoryTypeError::Internal(_) => INTERNAL_SERVER_ERROR,
        }
    }
}

// ========================================
// Inputs and outputs
// ========================================

/// Arguments of [`TagGraphStore::create_tag`]
#[derive(Debug, Clone, Default)]
pub struct NewTag {
    pub names: Vec<String>,
    pub primary_index: usize,
    pub explicit_parent: Option<Uuid>,
    pub implicit_parents: Vec<Uuid>,
    pub is_category_tag: bool,
    /// Unchecked semitags to resolve to the new tag in the same transaction
    pub resolve_semitags: Vec<Uuid>,
}

impl NewTag {
    /// Tag with the given names, the first one primary
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Result of [`TagGraphStore::create_tag`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTag {
    pub tag: Tag,
    pub parents: Vec<TagParent>,
    pub resolutions: Vec<SemitagResolution>,
}

/// Trimmed, non-empty, unique names
fn validate_names(names: &[String], primary_index: usize) -> Result<Vec<String>, CreateTagError> {
    if names.is_empty() {
        return Err(CreateTagError::InvalidNames("at least one name is required".to_string()));
    }
    let mut seen = HashSet::new();
    let mut cleaned = Vec::with_capacity(names.len());
    for raw in names {
        let name = raw.trim();
        if name.is_empty() {
            return Err(CreateTagError::InvalidNames("names must not be empty".to_string()));
        }
        if !seen.insert(name.to_string()) {
            return Err(CreateTagError::InvalidNames(format!("name {:?} given twice", name)));
        }
        cleaned.push(name.to_string());
    }
    if primary_index >= cleaned.len() {
        return Err(CreateTagError::PrimaryIndexOutOfRange {
            index: primary_index,
            len: cleaned.len(),
        });
    }
    Ok(cleaned)
}

/// First id that occurs a second time
fn first_duplicate(ids: &[Uuid]) -> Option<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().find(|id| !seen.insert(*id))
}

// ========================================
// Row helpers
// ========================================

pub(crate) async fn tag_exists(conn: &mut SqliteConnection, tag_id: Uuid) -> otmdb_common::Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?)")
        .bind(tag_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn load_names(conn: &mut SqliteConnection, tag_id: Uuid) -> otmdb_common::Result<Vec<TagName>> {
    sqlx::query("SELECT id, name, is_primary FROM tag_names WHERE tag_id = ? ORDER BY position")
        .bind(tag_id.to_string())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(TagName::from_row)
        .collect()
}

pub(crate) async fn load_tag(conn: &mut SqliteConnection, tag_id: Uuid) -> otmdb_common::Result<Option<Tag>> {
    let sql = format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(tag_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut tag = Tag::from_row(&row)?;
    tag.names = load_names(conn, tag_id).await?;
    Ok(Some(tag))
}

/// Tags having a name equal to `name`, ignoring ASCII case
pub(crate) async fn tags_named(conn: &mut SqliteConnection, name: &str) -> otmdb_common::Result<Vec<Tag>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT n.tag_id
        FROM tag_names n JOIN tags t ON t.id = n.tag_id
        WHERE n.name = ? COLLATE NOCASE
        ORDER BY t.created_at, t.id
        "#,
    )
    .bind(name.trim())
    .fetch_all(&mut *conn)
    .await?;

    let mut tags = Vec::with_capacity(ids.len());
    for raw in ids {
        let id = otmdb_common::uuid_utils::parse_column("tag_names.tag_id", &raw)?;
        if let Some(tag) = load_tag(conn, id).await? {
            tags.push(tag);
        }
    }
    Ok(tags)
}

async fn find_edge(conn: &mut SqliteConnection, edge_id: Uuid) -> otmdb_common::Result<Option<TagParent>> {
    let sql = format!("SELECT {EDGE_COLUMNS} FROM tag_parents tp WHERE tp.id = ?");
    let row = sqlx::query(&sql)
        .bind(edge_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(TagParent::from_row).transpose()
}

async fn find_edge_between(
    conn: &mut SqliteConnection,
    child_id: Uuid,
    parent_id: Uuid,
) -> otmdb_common::Result<Option<TagParent>> {
    let sql = format!("SELECT {EDGE_COLUMNS} FROM tag_parents tp WHERE tp.child_id = ? AND tp.parent_id = ?");
    let row = sqlx::query(&sql)
        .bind(child_id.to_string())
        .bind(parent_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(TagParent::from_row).transpose()
}

async fn find_explicit_edge(
    conn: &mut SqliteConnection,
    child_id: Uuid,
) -> otmdb_common::Result<Option<TagParent>> {
    let sql = format!("SELECT {EDGE_COLUMNS} FROM tag_parents tp WHERE tp.child_id = ? AND tp.is_explicit = 1");
    let row = sqlx::query(&sql)
        .bind(child_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(TagParent::from_row).transpose()
}

async fn insert_edge_tx(
    tx: &mut WriteTx,
    child_id: Uuid,
    parent_id: Uuid,
    is_explicit: bool,
    actor: &UserId,
) -> otmdb_common::Result<TagParent> {
    let now = tx.now_millis();
    let id = generate();
    sqlx::query(
        r#"
        INSERT INTO tag_parents (id, child_id, parent_id, is_explicit, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(child_id.to_string())
    .bind(parent_id.to_string())
    .bind(is_explicit)
    .bind(actor.as_str())
    .bind(now)
    .bind(now)
    .execute(tx.conn())
    .await?;

    event_log::append(
        tx,
        id,
        TagParentEventType::Create,
        actor,
        json!({ "child_id": child_id, "parent_id": parent_id, "is_explicit": is_explicit }),
    )
    .await?;

    let created_at = otmdb_common::time::from_millis(now);
    Ok(TagParent {
        id,
        child_id,
        parent_id,
        is_explicit,
        created_by: actor.as_str().to_string(),
        created_at,
        updated_at: created_at,
    })
}

async fn insert_name_tx(
    tx: &mut WriteTx,
    tag_id: Uuid,
    name: &str,
    is_primary: bool,
    position: i64,
) -> otmdb_common::Result<TagName> {
    let id = generate();
    sqlx::query(
        r#"
        INSERT INTO tag_names (id, tag_id, name, is_primary, position, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(tag_id.to_string())
    .bind(name)
    .bind(is_primary)
    .bind(position)
    .bind(tx.now_millis())
    .execute(tx.conn())
    .await?;
    Ok(TagName {
        id,
        name: name.to_string(),
        is_primary,
    })
}

async fn touch_tag(tx: &mut WriteTx, tag_id: Uuid) -> otmdb_common::Result<()> {
    sqlx::query("UPDATE tags SET updated_at = ? WHERE id = ?")
        .bind(tx.now_millis())
        .bind(tag_id.to_string())
        .execute(tx.conn())
        .await?;
    Ok(())
}

/// Tag loaded inside a transaction; missing means a broken invariant
async fn reload_tag(tx: &mut WriteTx, tag_id: Uuid) -> otmdb_common::Result<Tag> {
    load_tag(tx.conn(), tag_id)
        .await?
        .ok_or_else(|| otmdb_common::Error::Internal(format!("tag {tag_id} vanished")))
}

// ========================================
// TagGraphStore
// ========================================

/// Tags, names and the parent graph
#[derive(Clone)]
pub struct TagGraphStore {
    store: Store,
}

impl TagGraphStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Register a tag with its names, parents and semitag resolutions
    ///
    /// Everything is written in one transaction; any failure leaves no trace.
    pub async fn create_tag(&self, new: NewTag, actor: &UserId) -> Result<CreatedTag, CreateTagError> {
        let names = validate_names(&new.names, new.primary_index)?;
        if let Some(dup) = first_duplicate(&new.implicit_parents) {
            return Err(CreateTagError::DuplicatedImplicitParent(dup));
        }
        if let Some(explicit) = new.explicit_parent {
            if new.implicit_parents.contains(&explicit) {
                return Err(CreateTagError::ExplicitImplicitCollision(explicit));
            }
        }
        if let Some(dup) = first_duplicate(&new.resolve_semitags) {
            return Err(CreateTagError::DuplicatedResolveSemitag(dup));
        }

        let mut tx = self.store.begin_write("tag_graph::create_tag").await?;

        for parent_id in new.explicit_parent.iter().chain(new.implicit_parents.iter()) {
            if !tag_exists(tx.conn(), *parent_id).await? {
                debug!(parent_id = %parent_id, "create tag: parent not found");
                return Err(CreateTagError::ParentNotFound(*parent_id));
            }
        }

        let mut semitags = Vec::with_capacity(new.resolve_semitags.len());
        for semitag_id in &new.resolve_semitags {
            let semitag = semitag::find_semitag(tx.conn(), *semitag_id)
                .await?
                .ok_or(CreateTagError::SemitagNotFound(*semitag_id))?;
            if semitag.is_checked {
                return Err(CreateTagError::SemitagAlreadyChecked(*semitag_id));
            }
            semitags.push(semitag);
        }

        let now = tx.now_millis();
        let tag_id = generate();
        sqlx::query(
            r#"
            INSERT INTO tags (id, is_category_tag, category_type, created_by, created_at, updated_at)
            VALUES (?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(tag_id.to_string())
        .bind(new.is_category_tag)
        .bind(actor.as_str())
        .bind(now)
        .bind(now)
        .execute(tx.conn())
        .await?;

        for (position, name) in names.iter().enumerate() {
            insert_name_tx(&mut tx, tag_id, name, position == new.primary_index, position as i64).await?;
        }

        event_log::append(
            &mut tx,
            tag_id,
            TagEventType::Register,
            actor,
            json!({
                "names": names,
                "primary_name": names[new.primary_index],
                "is_category_tag": new.is_category_tag,
                "explicit_parent": new.explicit_parent,
                "implicit_parents": new.implicit_parents,
            }),
        )
        .await?;

        let mut parents = Vec::with_capacity(new.implicit_parents.len() + 1);
        if let Some(explicit) = new.explicit_parent {
            parents.push(insert_edge_tx(&mut tx, tag_id, explicit, true, actor).await?);
        }
        for implicit in &new.implicit_parents {
            parents.push(insert_edge_tx(&mut tx, tag_id, *implicit, false, actor).await?);
        }

        let mut resolutions = Vec::with_capacity(semitags.len());
        for semitag in &semitags {
            resolutions.push(semitag::resolve_tx(&mut tx, semitag, tag_id, None, actor).await?);
        }

        let tag = reload_tag(&mut tx, tag_id).await?;
        tx.commit().await?;

        info!(
            user_id = %actor,
            tag_id = %tag_id,
            name = %names[new.primary_index],
            parents = parents.len(),
            resolved_semitags = resolutions.len(),
            "Tag registered"
        );
        Ok(CreatedTag {
            tag,
            parents,
            resolutions,
        })
    }

    /// Promote an implicit edge to the child's explicit parent
    pub async fn explicitize(&self, edge_id: Uuid, actor: &UserId) -> Result<TagParent, ExplicitizeError> {
        let mut tx = self.store.begin_write("tag_graph::explicitize").await?;

        let edge = find_edge(tx.conn(), edge_id)
            .await?
            .ok_or(ExplicitizeError::NotFound(edge_id))?;
        if edge.is_explicit {
            debug!(edge_id = %edge_id, "explicitize: edge already explicit");
            return Err(ExplicitizeError::AlreadyExplicit(edge));
        }
        if let Some(current) = find_explicit_edge(tx.conn(), edge.child_id).await? {
            debug!(edge_id = %edge_id, explicit_edge_id = %current.id, "explicitize: child has explicit parent");
            return Err(ExplicitizeError::AlreadyExplicit(current));
        }

        let now = tx.now_millis();
        sqlx::query("UPDATE tag_parents SET is_explicit = 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(edge_id.to_string())
            .execute(tx.conn())
            .await?;

        event_log::append(
            &mut tx,
            edge_id,
            TagParentEventType::Explicitize,
            actor,
            json!({ "child_id": edge.child_id, "parent_id": edge.parent_id }),
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %actor,
            edge_id = %edge_id,
            child_id = %edge.child_id,
            parent_id = %edge.parent_id,
            "Tag parent explicitized"
        );
        Ok(TagParent {
            is_explicit: true,
            updated_at: otmdb_common::time::from_millis(now),
            ..edge
        })
    }

    /// Add a parent edge to an existing tag
    pub async fn add_parent(
        &self,
        child_id: Uuid,
        parent_id: Uuid,
        is_explicit: bool,
        actor: &UserId,
    ) -> Result<TagParent, AddParentError> {
        if child_id == parent_id {
            return Err(AddParentError::SelfLoop(child_id));
        }

        let mut tx = self.store.begin_write("tag_graph::add_parent").await?;

        for id in [child_id, parent_id] {
            if !tag_exists(tx.conn(), id).await? {
                debug!(tag_id = %id, "add parent: tag not found");
                return Err(AddParentError::TagNotFound(id));
            }
        }
        if let Some(existing) = find_edge_between(tx.conn(), child_id, parent_id).await? {
            return Err(AddParentError::AlreadyExists(existing));
        }
        if is_explicit {
            if let Some(current) = find_explicit_edge(tx.conn(), child_id).await? {
                return Err(AddParentError::ExplicitParentExists(current));
            }
        }

        let edge = insert_edge_tx(&mut tx, child_id, parent_id, is_explicit, actor).await?;
        tx.commit().await?;

        info!(
            user_id = %actor,
            edge_id = %edge.id,
            child_id = %child_id,
            parent_id = %parent_id,
            is_explicit = is_explicit,
            "Tag parent added"
        );
        Ok(edge)
    }

    pub async fn add_name(&self, tag_id: Uuid, name: &str, actor: &UserId) -> Result<Tag, TagNameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TagNameError::InvalidName);
        }

        let mut tx = self.store.begin_write("tag_graph::add_name").await?;
        let tag = load_tag(tx.conn(), tag_id)
            .await?
            .ok_or(TagNameError::TagNotFound(tag_id))?;
        if tag.names.iter().any(|n| n.name == name) {
            return Err(TagNameError::NameAlreadyExists(name.to_string()));
        }

        let position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), -1) + 1 FROM tag_names WHERE tag_id = ?")
                .bind(tag_id.to_string())
                .fetch_one(tx.conn())
                .await?;
        insert_name_tx(&mut tx, tag_id, name, false, position).await?;
        touch_tag(&mut tx, tag_id).await?;
        event_log::append(&mut tx, tag_id, TagEventType::AddName, actor, json!({ "name": name })).await?;

        let tag = reload_tag(&mut tx, tag_id).await?;
        tx.commit().await?;

        info!(user_id = %actor, tag_id = %tag_id, name = name, "Tag name added");
        Ok(tag)
    }

    pub async fn remove_name(&self, tag_id: Uuid, name: &str, actor: &UserId) -> Result<Tag, TagNameError> {
        let mut tx = self.store.begin_write("tag_graph::remove_name").await?;
        let tag = load_tag(tx.conn(), tag_id)
            .await?
            .ok_or(TagNameError::TagNotFound(tag_id))?;
        let Some(existing) = tag.names.iter().find(|n| n.name == name) else {
            return Err(TagNameError::NameNotFound(name.to_string()));
        };
        if existing.is_primary {
            return Err(TagNameError::PrimaryNameRemoval(name.to_string()));
        }

        sqlx::query("DELETE FROM tag_names WHERE id = ?")
            .bind(existing.id.to_string())
            .execute(tx.conn())
            .await?;
        touch_tag(&mut tx, tag_id).await?;
        event_log::append(&mut tx, tag_id, TagEventType::RemoveName, actor, json!({ "name": name })).await?;

        let tag = reload_tag(&mut tx, tag_id).await?;
        tx.commit().await?;

        info!(user_id = %actor, tag_id = %tag_id, name = name, "Tag name removed");
        Ok(tag)
    }

    /// Make an existing name primary; no event when it already is
    pub async fn change_primary_name(
        &self,
        tag_id: Uuid,
        name: &str,
        actor: &UserId,
    ) -> Result<Tag, TagNameError> {
        let mut tx = self.store.begin_write("tag_graph::change_primary_name").await?;
        let tag = load_tag(tx.conn(), tag_id)
            .await?
            .ok_or(TagNameError::TagNotFound(tag_id))?;
        let Some(target) = tag.names.iter().find(|n| n.name == name) else {
            return Err(TagNameError::NameNotFound(name.to_string()));
        };
        if target.is_primary {
            return Ok(tag);
        }
        let previous = tag.primary_name().map(str::to_string);

        // Clear first so the one-primary index never sees two
        sqlx::query("UPDATE tag_names SET is_primary = 0 WHERE tag_id = ? AND is_primary = 1")
            .bind(tag_id.to_string())
            .execute(tx.conn())
            .await?;
        sqlx::query("UPDATE tag_names SET is_primary = 1 WHERE id = ?")
            .bind(target.id.to_string())
            .execute(tx.conn())
            .await?;
        touch_tag(&mut tx, tag_id).await?;
        event_log::append(
            &mut tx,
            tag_id,
            TagEventType::ChangePrimaryName,
            actor,
            json!({ "from": previous, "to": name }),
        )
        .await?;

        let tag = reload_tag(&mut tx, tag_id).await?;
        tx.commit().await?;

        info!(user_id = %actor, tag_id = %tag_id, name = name, "Tag primary name changed");
        Ok(tag)
    }

    pub async fn set_category_type(
        &self,
        tag_id: Uuid,
        category_type: Option<CategoryType>,
        actor: &UserId,
    ) -> Result<Tag, SetCategoryTypeError> {
        let mut tx = self.store.begin_write("tag_graph::set_category_type").await?;
        let tag = load_tag(tx.conn(), tag_id)
            .await?
            .ok_or(SetCategoryTypeError::TagNotFound(tag_id))?;
        if !tag.is_category_tag {
            return Err(SetCategoryTypeError::NotCategoryTag(tag_id));
        }

        sqlx::query("UPDATE tags SET category_type = ?, updated_at = ? WHERE id = ?")
            .bind(category_type.map(|c| c.as_str()))
            .bind(tx.now_millis())
            .bind(tag_id.to_string())
            .execute(tx.conn())
            .await?;
        event_log::append(
            &mut tx,
            tag_id,
            TagEventType::SetCategoryType,
            actor,
            json!({ "from": tag.category_type, "to": category_type }),
        )
        .await?;

        let tag = reload_tag(&mut tx, tag_id).await?;
        tx.commit().await?;

        info!(user_id = %actor, tag_id = %tag_id, category_type = ?category_type, "Tag category type set");
        Ok(tag)
    }

    // ----------------------------------------
    // Read paths
    // ----------------------------------------

    pub async fn get_tag(&self, tag_id: Uuid) -> otmdb_common::Result<Option<Tag>> {
        let mut conn = self.store.reader().await?;
        load_tag(&mut conn, tag_id).await
    }

    pub async fn find_tags(&self, order: SortOrder, args: &ConnectionArgs) -> Result<Connection<Tag>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let mut conn = self.store.reader().await?;
        let page = fetch_page(
            &mut conn,
            PageSource {
                select: TAG_COLUMNS,
                from_where: "FROM tags WHERE 1 = 1",
                scope: Vec::new(),
                time_col: "created_at",
                id_col: "id",
            },
            &query,
            Tag::from_row,
            |t| Cursor::new(t.created_at.timestamp_millis(), t.id.to_string()),
        )
        .await?;

        let mut tags = Vec::with_capacity(page.edges.len());
        for edge in page.edges {
            let mut tag = edge.node;
            tag.names = load_names(&mut conn, tag.id).await?;
            tags.push(otmdb_common::pagination::Edge {
                cursor: edge.cursor,
                node: tag,
            });
        }
        Ok(Connection {
            edges: tags,
            page_info: page.page_info,
            total_count: page.total_count,
        })
    }

    pub async fn explicit_parent_of(&self, tag_id: Uuid) -> otmdb_common::Result<Option<TagParent>> {
        let mut conn = self.store.reader().await?;
        find_explicit_edge(&mut conn, tag_id).await
    }

    pub async fn get_edge(&self, edge_id: Uuid) -> otmdb_common::Result<Option<TagParent>> {
        let mut conn = self.store.reader().await?;
        find_edge(&mut conn, edge_id).await
    }

    /// Edges pointing at `tag_id`
    pub async fn children_of(
        &self,
        tag_id: Uuid,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<TagParent>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let mut conn = self.store.reader().await?;
        if !tag_exists(&mut conn, tag_id).await? {
            return Err(QueryError::NotFound(tag_id));
        }

        let page = fetch_page(
            &mut conn,
            PageSource {
                select: EDGE_COLUMNS,
                from_where: "FROM tag_parents tp WHERE tp.parent_id = ?",
                scope: vec![tag_id.to_string()],
                time_col: "tp.created_at",
                id_col: "tp.id",
            },
            &query,
            TagParent::from_row,
            |e| Cursor::new(e.created_at.timestamp_millis(), e.id.to_string()),
        )
        .await?;
        Ok(page)
    }

    /// Edges from `tag_id` to its parents
    ///
    /// `category_only = Some(b)` keeps only parents whose `is_category_tag == b`.
    pub async fn parents_of(
        &self,
        tag_id: Uuid,
        category_only: Option<bool>,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<TagParent>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let mut conn = self.store.reader().await?;
        if !tag_exists(&mut conn, tag_id).await? {
            return Err(QueryError::NotFound(tag_id));
        }

        let from_where = match category_only {
            Some(true) => "FROM tag_parents tp JOIN tags p ON p.id = tp.parent_id WHERE tp.child_id = ? AND p.is_category_tag = 1",
            Some(false) => "FROM tag_parents tp JOIN tags p ON p.id = tp.parent_id WHERE tp.child_id = ? AND p.is_category_tag = 0",
            None => "FROM tag_parents tp WHERE tp.child_id = ?",
        };
        let page = fetch_page(
            &mut conn,
            PageSource {
                select: EDGE_COLUMNS,
                from_where,
                scope: vec![tag_id.to_string()],
                time_col: "tp.created_at",
                id_col: "tp.id",
            },
            &query,
            TagParent::from_row,
            |e| Cursor::new(e.created_at.timestamp_millis(), e.id.to_string()),
        )
        .await?;
        Ok(page)
    }

    /// Classify a tag by the category tags among its direct parents
    pub async fn resolve_category_type(&self, tag_id: Uuid) -> Result<TagType, QueryError> {
        let mut conn = self.store.reader().await?;
        let tag = load_tag(&mut conn, tag_id)
            .await?
            .ok_or(QueryError::NotFound(tag_id))?;
        if tag.is_category_tag {
            return Ok(TagType::Category(tag.category_type));
        }

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.category_type
            FROM tag_parents tp JOIN tags p ON p.id = tp.parent_id
            WHERE tp.child_id = ? AND p.is_category_tag = 1 AND p.category_type IS NOT NULL
            "#,
        )
        .bind(tag_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        let categories = rows
            .iter()
            .map(|row| -> otmdb_common::Result<CategoryType> {
                let raw: String = row.try_get("category_type")?;
                raw.parse()
                    .map_err(|_| otmdb_common::Error::Internal(format!("tags.category_type: {raw:?}")))
            })
            .collect::<otmdb_common::Result<Vec<_>>>()?;

        Ok(classify(&categories))
    }

    /// Active taggings of the tag
    pub async fn tagged_videos(
        &self,
        tag_id: Uuid,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<VideoTag>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let mut conn = self.store.reader().await?;
        if !tag_exists(&mut conn, tag_id).await? {
            return Err(QueryError::NotFound(tag_id));
        }

        let page = fetch_page(
            &mut conn,
            PageSource {
                select: "id, video_id, tag_id, is_removed, created_at, updated_at",
                from_where: "FROM video_tags WHERE tag_id = ? AND is_removed = 0",
                scope: vec![tag_id.to_string()],
                time_col: "created_at",
                id_col: "id",
            },
            &query,
            VideoTag::from_row,
            |vt| Cursor::new(vt.created_at.timestamp_millis(), vt.id.to_string()),
        )
        .await?;
        Ok(page)
    }

    /// Tag events, newest first
    pub async fn tag_events(
        &self,
        tag_id: Uuid,
        limit: Option<u32>,
        skip: u32,
    ) -> otmdb_common::Result<Vec<TypedEvent<TagEventType>>> {
        let mut conn = self.store.reader().await?;
        event_log::history::<TagEventType>(&mut conn, tag_id, limit, skip).await
    }
}

/// Zero categories -> Unknown, one -> that category, more -> Subtle
fn classify(categories: &[CategoryType]) -> TagType {
    let distinct: HashSet<CategoryType> = categories.iter().copied().collect();
    match distinct.len() {
        0 => TagType::Unknown,
        1 => distinct
            .into_iter()
            .next()
            .map_or(TagType::Unknown, TagType::Typed),
        _ => TagType::Subtle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(&[]), TagType::Unknown);
        assert_eq!(classify(&[CategoryType::Music]), TagType::Typed(CategoryType::Music));
        assert_eq!(
            classify(&[CategoryType::Music, CategoryType::Music]),
            TagType::Typed(CategoryType::Music)
        );
        assert_eq!(
            classify(&[CategoryType::Music, CategoryType::Copyright]),
            TagType::Subtle
        );
    }

    #[test]
    fn test_first_duplicate_reports_repeated_id() {
        let (t2, t3) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(first_duplicate(&[t2, t2, t3]), Some(t2));
        assert_eq!(first_duplicate(&[t2, t3, t3]), Some(t3));
        assert_eq!(first_duplicate(&[t2, t3]), None);
    }

    #[test]
    fn test_validate_names() {
        assert!(matches!(
            validate_names(&[], 0),
            Err(CreateTagError::InvalidNames(_))
        ));
        assert!(matches!(
            validate_names(&["a".to_string(), " a ".to_string()], 0),
            Err(CreateTagError::InvalidNames(_))
        ));
        assert!(matches!(
            validate_names(&["a".to_string()], 1),
            Err(CreateTagError::PrimaryIndexOutOfRange { index: 1, len: 1 })
        ));
        assert_eq!(
            validate_names(&[" rock ".to_string(), "ロック".to_string()], 1).unwrap(),
            vec!["rock".to_string(), "ロック".to_string()]
        );
    }

    #[test]
    fn test_create_tag_error_codes() {
        assert_eq!(
            CreateTagError::PrimaryIndexOutOfRange { index: 3, len: 1 }.code(),
            "INVALID_NAMES"
        );
        assert_eq!(
            CreateTagError::DuplicatedImplicitParent(Uuid::nil()).code(),
            "DUPLICATED_IMPLICIT_PARENT"
        );
    }
}
