//! Video rows and the read-side VideoCatalog
//!
//! Videos are only ever created by accepting a registration request; the
//! insert helper here is called from inside that transaction.

use crate::error::QueryError;
use crate::event_log::{self, VideoEventType, VideoSourceEventType};
use crate::models::{
    Semitag, UserId, Video, VideoDetail, VideoSource, VideoSourceKind, VideoTag, VideoThumbnail,
    VideoTitle,
};
use crate::page::{fetch_page, PageSource};
use crate::store::{Store, WriteTx};
use otmdb_common::pagination::{Connection, ConnectionArgs, Cursor, PageQuery, SortOrder};
use otmdb_common::uuid_utils::generate;
use otmdb_common::Result;
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

const VIDEO_SELECT: &str = r#"
    v.id, v.created_by, v.created_at,
    COALESCE(t.title, '') AS title,
    th.image_url AS thumbnail_url
"#;

const VIDEO_FROM: &str = r#"
    FROM videos v
    LEFT JOIN video_titles t ON t.video_id = v.id AND t.is_primary = 1
    LEFT JOIN video_thumbnails th ON th.video_id = v.id AND th.is_primary = 1
"#;

pub(crate) async fn video_exists(conn: &mut SqliteConnection, video_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?)")
        .bind(video_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

pub(crate) async fn find_video(conn: &mut SqliteConnection, video_id: Uuid) -> Result<Option<Video>> {
    let sql = format!("SELECT {VIDEO_SELECT} {VIDEO_FROM} WHERE v.id = ?");
    let row = sqlx::query(&sql)
        .bind(video_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Video::from_row).transpose()
}

pub(crate) async fn find_source(
    conn: &mut SqliteConnection,
    source: VideoSourceKind,
    source_id: &str,
) -> Result<Option<VideoSource>> {
    let row = sqlx::query(
        r#"
        SELECT id, video_id, source, source_id, created_at
        FROM video_sources
        WHERE source = ? AND source_id = ?
        "#,
    )
    .bind(source.as_str())
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(VideoSource::from_row).transpose()
}

/// Fields of a video being registered
pub(crate) struct NewVideo<'a> {
    pub title: &'a str,
    pub thumbnail_url: Option<&'a str>,
    pub source: VideoSourceKind,
    pub source_id: &'a str,
}

/// Insert a video with its primary title, thumbnail and source record
pub(crate) async fn insert_video_tx(
    tx: &mut WriteTx,
    new: NewVideo<'_>,
    actor: &UserId,
) -> Result<(Video, VideoSource)> {
    let now = tx.now_millis();
    let video_id = generate();

    sqlx::query("INSERT INTO videos (id, created_by, created_at) VALUES (?, ?, ?)")
        .bind(video_id.to_string())
        .bind(actor.as_str())
        .bind(now)
        .execute(tx.conn())
        .await?;

    sqlx::query(
        "INSERT INTO video_titles (id, video_id, title, is_primary, created_at) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(generate().to_string())
    .bind(video_id.to_string())
    .bind(new.title)
    .bind(now)
    .execute(tx.conn())
    .await?;

    if let Some(url) = new.thumbnail_url {
        sqlx::query(
            "INSERT INTO video_thumbnails (id, video_id, image_url, is_primary, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(generate().to_string())
        .bind(video_id.to_string())
        .bind(url)
        .bind(now)
        .execute(tx.conn())
        .await?;
    }

    let source_row_id = generate();
    sqlx::query(
        "INSERT INTO video_sources (id, video_id, source, source_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(source_row_id.to_string())
    .bind(video_id.to_string())
    .bind(new.source.as_str())
    .bind(new.source_id)
    .bind(now)
    .execute(tx.conn())
    .await?;

    event_log::append(
        tx,
        video_id,
        VideoEventType::Register,
        actor,
        json!({ "title": new.title, "source": new.source, "source_id": new.source_id }),
    )
    .await?;
    event_log::append(
        tx,
        source_row_id,
        VideoSourceEventType::Create,
        actor,
        json!({ "video_id": video_id, "source": new.source, "source_id": new.source_id }),
    )
    .await?;

    let created_at = otmdb_common::time::from_millis(now);
    let video = Video {
        id: video_id,
        title: new.title.to_string(),
        thumbnail_url: new.thumbnail_url.map(str::to_string),
        created_by: actor.as_str().to_string(),
        created_at,
    };
    let source = VideoSource {
        id: source_row_id,
        video_id,
        source: new.source,
        source_id: new.source_id.to_string(),
        created_at,
    };
    debug!(video_id = %video_id, source = %new.source, source_id = new.source_id, "Video inserted");
    Ok((video, source))
}

async fn load_detail(conn: &mut SqliteConnection, video: Video) -> Result<VideoDetail> {
    let id = video.id.to_string();

    let titles = sqlx::query(
        "SELECT id, title, is_primary FROM video_titles WHERE video_id = ? ORDER BY created_at, id",
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| -> Result<VideoTitle> {
        Ok(VideoTitle {
            id: crate::models::uuid_col(row, "id")?,
            title: row.try_get("title")?,
            is_primary: row.try_get("is_primary")?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let thumbnails = sqlx::query(
        "SELECT id, image_url, is_primary FROM video_thumbnails WHERE video_id = ? ORDER BY created_at, id",
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| -> Result<VideoThumbnail> {
        Ok(VideoThumbnail {
            id: crate::models::uuid_col(row, "id")?,
            image_url: row.try_get("image_url")?,
            is_primary: row.try_get("is_primary")?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let sources = sqlx::query(
        "SELECT id, video_id, source, source_id, created_at FROM video_sources WHERE video_id = ? ORDER BY created_at, id",
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(VideoSource::from_row)
    .collect::<Result<Vec<_>>>()?;

    let tags = sqlx::query(
        r#"
        SELECT id, video_id, tag_id, is_removed, created_at, updated_at
        FROM video_tags
        WHERE video_id = ? AND is_removed = 0
        ORDER BY created_at, id
        "#,
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(VideoTag::from_row)
    .collect::<Result<Vec<_>>>()?;

    let semitags = sqlx::query(
        r#"
        SELECT id, video_id, name, is_checked, created_at, updated_at
        FROM semitags
        WHERE video_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(Semitag::from_row)
    .collect::<Result<Vec<_>>>()?;

    Ok(VideoDetail {
        video,
        titles,
        thumbnails,
        sources,
        tags,
        semitags,
    })
}

/// Read paths over registered videos
#[derive(Clone)]
pub struct VideoCatalog {
    store: Store,
}

impl VideoCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoDetail>> {
        let mut conn = self.store.reader().await?;
        match find_video(&mut conn, video_id).await? {
            Some(video) => Ok(Some(load_detail(&mut conn, video).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_videos(
        &self,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> std::result::Result<Connection<Video>, QueryError> {
        let query = PageQuery::new(args, order, self.store.max_page_size())?;
        let mut conn = self.store.reader().await?;
        let from_where = format!("{VIDEO_FROM} WHERE 1 = 1");
        let page = fetch_page(
            &mut conn,
            PageSource {
                select: VIDEO_SELECT,
                from_where: &from_where,
                scope: Vec::new(),
                time_col: "v.created_at",
                id_col: "v.id",
            },
            &query,
            Video::from_row,
            |v| Cursor::new(v.created_at.timestamp_millis(), v.id.to_string()),
        )
        .await?;
        Ok(page)
    }

    /// Video registered from the given external id
    pub async fn find_by_source(
        &self,
        source: VideoSourceKind,
        source_id: &str,
    ) -> Result<Option<VideoDetail>> {
        let mut conn = self.store.reader().await?;
        let Some(record) = find_source(&mut conn, source, source_id).await? else {
            return Ok(None);
        };
        match find_video(&mut conn, record.video_id).await? {
            Some(video) => Ok(Some(load_detail(&mut conn, video).await?)),
            None => Ok(None),
        }
    }
}
