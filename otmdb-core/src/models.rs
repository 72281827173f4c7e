//! Domain types shared by the catalogue services
//!
//! Identities are UUIDv4 stored as TEXT. Timestamps are UTC milliseconds
//! stored as INTEGER. Row mapping is done by hand with `Row::try_get` so a
//! corrupt row surfaces as an internal error instead of a panic.

use chrono::{DateTime, Utc};
use otmdb_common::time::from_millis;
use otmdb_common::uuid_utils::parse_column;
use otmdb_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ========================================
// Actor
// ========================================

/// Acting user, required for every mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput("user id must not be empty".to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ========================================
// Enumerations
// ========================================

/// Classification axis of a category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryType {
    Music,
    Copyright,
    Character,
    Phrase,
    Series,
    Tactics,
    Style,
    Event,
}

impl CategoryType {
    pub const ALL: [CategoryType; 8] = [
        CategoryType::Music,
        CategoryType::Copyright,
        CategoryType::Character,
        CategoryType::Phrase,
        CategoryType::Series,
        CategoryType::Tactics,
        CategoryType::Style,
        CategoryType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Music => "MUSIC",
            CategoryType::Copyright => "COPYRIGHT",
            CategoryType::Character => "CHARACTER",
            CategoryType::Phrase => "PHRASE",
            CategoryType::Series => "SERIES",
            CategoryType::Tactics => "TACTICS",
            CategoryType::Style => "STYLE",
            CategoryType::Event => "EVENT",
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CategoryType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown category type: {s}")))
    }
}

/// Result of classifying a tag through its category parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagType {
    /// The tag is itself a category tag
    Category(Option<CategoryType>),
    /// Exactly one distinct category among the parents
    Typed(CategoryType),
    /// Parents span more than one category
    Subtle,
    /// No category parent
    Unknown,
}

/// External video service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoSourceKind {
    Nicovideo,
    Youtube,
    Soundcloud,
    Bilibili,
}

impl VideoSourceKind {
    pub const ALL: [VideoSourceKind; 4] = [
        VideoSourceKind::Nicovideo,
        VideoSourceKind::Youtube,
        VideoSourceKind::Soundcloud,
        VideoSourceKind::Bilibili,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSourceKind::Nicovideo => "NICOVIDEO",
            VideoSourceKind::Youtube => "YOUTUBE",
            VideoSourceKind::Soundcloud => "SOUNDCLOUD",
            VideoSourceKind::Bilibili => "BILIBILI",
        }
    }
}

impl fmt::Display for VideoSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoSourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VideoSourceKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown video source: {s}")))
    }
}

/// Disposition of a registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

// ========================================
// Tags
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagName {
    pub id: Uuid,
    pub name: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    /// Names in insertion order
    pub names: Vec<TagName>,
    pub is_category_tag: bool,
    pub category_type: Option<CategoryType>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    pub fn primary_name(&self) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.is_primary)
            .map(|n| n.name.as_str())
    }

    /// Map a `tags` row; names are attached by the caller
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let category_type: Option<String> = row.try_get("category_type")?;
        Ok(Self {
            id: uuid_col(row, "id")?,
            names: Vec::new(),
            is_category_tag: row.try_get("is_category_tag")?,
            category_type: category_type
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|_| Error::Internal(format!("tags.category_type: {:?}", category_type)))?,
            created_by: row.try_get("created_by")?,
            created_at: time_col(row, "created_at")?,
            updated_at: time_col(row, "updated_at")?,
        })
    }
}

impl TagName {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            name: row.try_get("name")?,
            is_primary: row.try_get("is_primary")?,
        })
    }
}

/// Directed edge child -> parent in the tag graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagParent {
    pub id: Uuid,
    pub child_id: Uuid,
    pub parent_id: Uuid,
    pub is_explicit: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TagParent {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            child_id: uuid_col(row, "child_id")?,
            parent_id: uuid_col(row, "parent_id")?,
            is_explicit: row.try_get("is_explicit")?,
            created_by: row.try_get("created_by")?,
            created_at: time_col(row, "created_at")?,
            updated_at: time_col(row, "updated_at")?,
        })
    }
}

// ========================================
// Videos
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Video {
    /// Map a `videos` row joined with its primary title and thumbnail
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            title: row.try_get("title")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            created_by: row.try_get("created_by")?,
            created_at: time_col(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTitle {
    pub id: Uuid,
    pub title: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoThumbnail {
    pub id: Uuid,
    pub image_url: String,
    pub is_primary: bool,
}

/// Video with everything attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetail {
    pub video: Video,
    pub titles: Vec<VideoTitle>,
    pub thumbnails: Vec<VideoThumbnail>,
    pub sources: Vec<VideoSource>,
    /// Active taggings only
    pub tags: Vec<VideoTag>,
    pub semitags: Vec<Semitag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSource {
    pub id: Uuid,
    pub video_id: Uuid,
    pub source: VideoSourceKind,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
}

impl VideoSource {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            video_id: uuid_col(row, "video_id")?,
            source: source_col(row, "source")?,
            source_id: row.try_get("source_id")?,
            created_at: time_col(row, "created_at")?,
        })
    }
}

/// Video <-> Tag edge, soft-deleted through `is_removed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTag {
    pub id: Uuid,
    pub video_id: Uuid,
    pub tag_id: Uuid,
    pub is_removed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoTag {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            video_id: uuid_col(row, "video_id")?,
            tag_id: uuid_col(row, "tag_id")?,
            is_removed: row.try_get("is_removed")?,
            created_at: time_col(row, "created_at")?,
            updated_at: time_col(row, "updated_at")?,
        })
    }
}

// ========================================
// Semitags
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semitag {
    pub id: Uuid,
    pub video_id: Uuid,
    pub name: String,
    pub is_checked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Semitag {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            video_id: uuid_col(row, "video_id")?,
            name: row.try_get("name")?,
            is_checked: row.try_get("is_checked")?,
            created_at: time_col(row, "created_at")?,
            updated_at: time_col(row, "updated_at")?,
        })
    }
}

/// Terminal disposition of a semitag
///
/// `video_tag_id` is set when the semitag was resolved, `None` when rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemitagChecking {
    pub id: Uuid,
    pub semitag_id: Uuid,
    pub video_tag_id: Option<Uuid>,
    pub checked_by: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SemitagChecking {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            semitag_id: uuid_col(row, "semitag_id")?,
            video_tag_id: opt_uuid_col(row, "video_tag_id")?,
            checked_by: row.try_get("checked_by")?,
            note: row.try_get("note")?,
            created_at: time_col(row, "created_at")?,
        })
    }
}

// ========================================
// Registration
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: Uuid,
    pub source: VideoSourceKind,
    pub source_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub requested_by: String,
    pub is_checked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationRequest {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            source: source_col(row, "source")?,
            source_id: row.try_get("source_id")?,
            title: row.try_get("title")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            requested_by: row.try_get("requested_by")?,
            is_checked: row.try_get("is_checked")?,
            created_at: time_col(row, "created_at")?,
            updated_at: time_col(row, "updated_at")?,
        })
    }
}

/// Tag the requester wants attached on acceptance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTagging {
    pub id: Uuid,
    pub request_id: Uuid,
    pub tag_id: Uuid,
    pub note: Option<String>,
}

impl RequestTagging {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            request_id: uuid_col(row, "request_id")?,
            tag_id: uuid_col(row, "tag_id")?,
            note: row.try_get("note")?,
        })
    }
}

/// Semitag the requester wants suggested on acceptance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSemitagging {
    pub id: Uuid,
    pub request_id: Uuid,
    pub name: String,
    pub note: Option<String>,
}

impl RequestSemitagging {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            request_id: uuid_col(row, "request_id")?,
            name: row.try_get("name")?,
            note: row.try_get("note")?,
        })
    }
}

/// Terminal disposition of a registration request
///
/// `video_id` is set for an acceptance and `None` for a rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationChecking {
    pub id: Uuid,
    pub request_id: Uuid,
    pub checked_by: String,
    pub note: Option<String>,
    pub video_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RegistrationChecking {
    pub fn status(&self) -> RequestStatus {
        match self.video_id {
            Some(_) => RequestStatus::Accepted,
            None => RequestStatus::Rejected,
        }
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            request_id: uuid_col(row, "request_id")?,
            checked_by: row.try_get("checked_by")?,
            note: row.try_get("note")?,
            video_id: opt_uuid_col(row, "video_id")?,
            created_at: time_col(row, "created_at")?,
        })
    }
}

// ========================================
// Column helpers
// ========================================

pub(crate) fn uuid_col(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    parse_column(column, &raw)
}

pub(crate) fn opt_uuid_col(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| parse_column(column, &r)).transpose()
}

pub(crate) fn time_col(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = row.try_get(column)?;
    Ok(from_millis(millis))
}

fn source_col(row: &SqliteRow, column: &str) -> Result<VideoSourceKind> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| Error::Internal(format!("{column}: unknown source {raw:?}")))
}
