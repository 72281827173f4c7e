//! Runtime settings stored in the `settings` table
//!
//! Bootstrap values (root folder, logging) come from TOML. Everything that can
//! be tuned on a running database lives here as key/value rows.

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, warn};

pub const BUSY_TIMEOUT_MS: &str = "busy_timeout_ms";
pub const MAX_PAGE_SIZE: &str = "max_page_size";
pub const TIMELINE_BATCH_SIZE: &str = "timeline_batch_size";

pub const DEFAULT_BUSY_TIMEOUT_MS: i64 = 5000;
pub const DEFAULT_MAX_PAGE_SIZE: i64 = crate::pagination::DEFAULT_MAX_PAGE_SIZE as i64;
pub const DEFAULT_TIMELINE_BATCH_SIZE: i64 = 50;

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert defaults for any setting that is missing
///
/// Existing values are never overwritten.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, BUSY_TIMEOUT_MS, &DEFAULT_BUSY_TIMEOUT_MS.to_string()).await?;
    ensure_setting(pool, MAX_PAGE_SIZE, &DEFAULT_MAX_PAGE_SIZE.to_string()).await?;
    ensure_setting(pool, TIMELINE_BATCH_SIZE, &DEFAULT_TIMELINE_BATCH_SIZE.to_string()).await?;
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE tolerates several processes initializing the same file
    let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        debug!("Initialized setting {} = {}", key, default_value);
    }

    Ok(())
}

/// Raw setting value, `None` when the key is absent
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Integer setting, `default` when absent
///
/// A row whose value is NULL is reset to `default`.
pub async fn get_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        Some(Some(raw)) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Config(format!("Setting {} is not an integer: {:?}", key, raw))),
        Some(None) => {
            warn!("Setting {} is NULL, resetting to default {}", key, default);
            set(pool, key, &default.to_string()).await?;
            Ok(default)
        }
        None => Ok(default),
    }
}

/// Insert or replace a setting
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Settings the core services read once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub busy_timeout_ms: i64,
    pub max_page_size: usize,
    pub timeline_batch_size: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_page_size: DEFAULT_MAX_PAGE_SIZE as usize,
            timeline_batch_size: DEFAULT_TIMELINE_BATCH_SIZE as usize,
        }
    }
}

impl RuntimeSettings {
    /// Load from the database, validating ranges
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let busy_timeout_ms = get_i64(pool, BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS).await?;
        let max_page_size = get_i64(pool, MAX_PAGE_SIZE, DEFAULT_MAX_PAGE_SIZE).await?;
        let timeline_batch_size =
            get_i64(pool, TIMELINE_BATCH_SIZE, DEFAULT_TIMELINE_BATCH_SIZE).await?;

        if busy_timeout_ms < 0 {
            return Err(Error::Config(format!(
                "{} must not be negative, got {}",
                BUSY_TIMEOUT_MS, busy_timeout_ms
            )));
        }
        if max_page_size < 1 {
            return Err(Error::Config(format!(
                "{} must be at least 1, got {}",
                MAX_PAGE_SIZE, max_page_size
            )));
        }
        if timeline_batch_size < 1 {
            return Err(Error::Config(format!(
                "{} must be at least 1, got {}",
                TIMELINE_BATCH_SIZE, timeline_batch_size
            )));
        }

        Ok(Self {
            busy_timeout_ms,
            max_page_size: max_page_size as usize,
            timeline_batch_size: timeline_batch_size as usize,
        })
    }
}
