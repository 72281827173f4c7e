//! Database initialization
//!
//! Creates the database file on first run, applies connection pragmas,
//! creates every table (idempotent), runs versioned migrations and
//! initializes default settings.

use crate::db::settings::{self, init_default_settings, DEFAULT_BUSY_TIMEOUT_MS};
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = open_pool(db_path, DEFAULT_BUSY_TIMEOUT_MS).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    // Versioned migrations for databases created by older builds
    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    // Busy timeout bounds how long a write transaction waits for the write lock.
    // Pragmas are per connection, so a changed value means reopening the pool.
    let timeout_ms = settings::get_i64(&pool, settings::BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS).await?;
    let pool = if timeout_ms != DEFAULT_BUSY_TIMEOUT_MS {
        pool.close().await;
        open_pool(db_path, timeout_ms).await?
    } else {
        pool
    };

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

async fn open_pool(db_path: &Path, busy_timeout_ms: i64) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL allows concurrent readers alongside the single writer
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms.max(0) as u64));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    settings::create_settings_table(pool).await?;
    create_write_lock_table(pool).await?;
    create_event_log_table(pool).await?;

    // Tag graph
    create_tags_table(pool).await?;
    create_tag_names_table(pool).await?;
    create_tag_parents_table(pool).await?;

    // Videos and their associations
    create_videos_table(pool).await?;
    create_video_titles_table(pool).await?;
    create_video_thumbnails_table(pool).await?;
    create_video_sources_table(pool).await?;
    create_video_tags_table(pool).await?;
    create_semitags_table(pool).await?;
    create_semitag_checkings_table(pool).await?;

    // Registration workflow
    create_registration_requests_table(pool).await?;
    create_registration_request_taggings_table(pool).await?;
    create_registration_request_semitaggings_table(pool).await?;
    create_registration_checkings_table(pool).await?;

    Ok(())
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#],
    )
    .await
}

/// Single-row table every write transaction updates first
///
/// Touching it as the first statement takes SQLite's write lock before any
/// read happens, so precondition checks inside the transaction always see the
/// latest committed state and concurrent writers queue up on `busy_timeout`.
async fn create_write_lock_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS write_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                generation INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "INSERT OR IGNORE INTO write_lock (id, generation) VALUES (1, 0)",
        ],
    )
    .await
}

/// Append-only event log shared by every component
async fn create_event_log_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_event_log_entity ON event_log(entity_kind, entity_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_event_log_created ON event_log(created_at, id)",
            // Rows are never changed once written
            r#"
            CREATE TRIGGER IF NOT EXISTS event_log_no_update
            BEFORE UPDATE ON event_log
            BEGIN
                SELECT RAISE(ABORT, 'event_log is append-only');
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS event_log_no_delete
            BEFORE DELETE ON event_log
            BEGIN
                SELECT RAISE(ABORT, 'event_log is append-only');
            END
            "#,
        ],
    )
    .await
}

async fn create_tags_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                is_category_tag INTEGER NOT NULL DEFAULT 0,
                category_type TEXT,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK (category_type IS NULL OR is_category_tag = 1)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_tags_created ON tags(created_at, id)",
        ],
    )
    .await
}

async fn create_tag_names_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS tag_names (
                id TEXT PRIMARY KEY,
                tag_id TEXT NOT NULL REFERENCES tags(id),
                name TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (tag_id, name)
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tag_names_primary ON tag_names(tag_id) WHERE is_primary = 1",
            "CREATE INDEX IF NOT EXISTS idx_tag_names_name ON tag_names(name COLLATE NOCASE)",
        ],
    )
    .await
}

async fn create_tag_parents_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS tag_parents (
                id TEXT PRIMARY KEY,
                child_id TEXT NOT NULL REFERENCES tags(id),
                parent_id TEXT NOT NULL REFERENCES tags(id),
                is_explicit INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (child_id, parent_id),
                CHECK (child_id <> parent_id)
            )
            "#,
            // At most one explicit parent per child
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tag_parents_explicit ON tag_parents(child_id) WHERE is_explicit = 1",
            "CREATE INDEX IF NOT EXISTS idx_tag_parents_parent ON tag_parents(parent_id, created_at)",
        ],
    )
    .await
}

async fn create_videos_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_videos_created ON videos(created_at, id)",
        ],
    )
    .await
}

async fn create_video_titles_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS video_titles (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                title TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_video_titles_primary ON video_titles(video_id) WHERE is_primary = 1",
        ],
    )
    .await
}

async fn create_video_thumbnails_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS video_thumbnails (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                image_url TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_video_thumbnails_primary ON video_thumbnails(video_id) WHERE is_primary = 1",
        ],
    )
    .await
}

async fn create_video_sources_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS video_sources (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                source TEXT NOT NULL CHECK (source IN ('NICOVIDEO', 'YOUTUBE', 'SOUNDCLOUD', 'BILIBILI')),
                source_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (source, source_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_video_sources_video ON video_sources(video_id)",
        ],
    )
    .await
}

async fn create_video_tags_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS video_tags (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                tag_id TEXT NOT NULL REFERENCES tags(id),
                is_removed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (video_id, tag_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_video_tags_tag ON video_tags(tag_id, created_at)",
        ],
    )
    .await
}

async fn create_semitags_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS semitags (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                name TEXT NOT NULL,
                is_checked INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (video_id, name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_semitags_unchecked ON semitags(is_checked, created_at)",
        ],
    )
    .await
}

async fn create_semitag_checkings_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS semitag_checkings (
            id TEXT PRIMARY KEY,
            semitag_id TEXT NOT NULL UNIQUE REFERENCES semitags(id),
            video_tag_id TEXT REFERENCES video_tags(id),
            checked_by TEXT NOT NULL,
            note TEXT,
            created_at INTEGER NOT NULL
        )
        "#],
    )
    .await
}

async fn create_registration_requests_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS registration_requests (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL CHECK (source IN ('NICOVIDEO', 'YOUTUBE', 'SOUNDCLOUD', 'BILIBILI')),
                source_id TEXT NOT NULL,
                title TEXT NOT NULL,
                thumbnail_url TEXT,
                requested_by TEXT NOT NULL,
                is_checked INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            // One pending request per external id
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_registration_requests_pending ON registration_requests(source, source_id) WHERE is_checked = 0",
            "CREATE INDEX IF NOT EXISTS idx_registration_requests_source ON registration_requests(source, created_at)",
        ],
    )
    .await
}

async fn create_registration_request_taggings_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS registration_request_taggings (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL REFERENCES registration_requests(id),
            tag_id TEXT NOT NULL REFERENCES tags(id),
            note TEXT,
            position INTEGER NOT NULL,
            UNIQUE (request_id, tag_id)
        )
        "#],
    )
    .await
}

async fn create_registration_request_semitaggings_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS registration_request_semitaggings (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL REFERENCES registration_requests(id),
            name TEXT NOT NULL,
            note TEXT,
            position INTEGER NOT NULL,
            UNIQUE (request_id, name)
        )
        "#],
    )
    .await
}

async fn create_registration_checkings_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS registration_checkings (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL UNIQUE REFERENCES registration_requests(id),
            checked_by TEXT NOT NULL,
            note TEXT,
            video_id TEXT REFERENCES videos(id),
            created_at INTEGER NOT NULL
        )
        "#],
    )
    .await
}
