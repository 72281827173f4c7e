//! Shared fixtures for otmdb-core integration tests
//!
//! Each test gets its own file-backed database in a TempDir. Keep the
//! returned TempDir alive for the duration of the test.

#![allow(dead_code)]

use otmdb_common::db::init::init_database;
use otmdb_core::models::{Tag, Video};
use otmdb_core::registration::NewRegistrationRequest;
use otmdb_core::tag_graph::NewTag;
use otmdb_core::{CategoryType, Otmdb, UserId, VideoSourceKind};
use tempfile::TempDir;


pub async fn setup() -> (TempDir, Otmdb) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("otmdb.db")).await.unwrap();
    let otmdb = Otmdb::open(pool).await.unwrap();
    (temp_dir, otmdb)
}

pub fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

pub async fn tag(otmdb: &Otmdb, name: &str) -> Tag {
    otmdb
        .register_tag(NewTag::named([name]), &user("alice"))
        .await
        .unwrap()
        .tag
}

pub async fn tag_with(otmdb: &Otmdb, new: NewTag) -> Tag {
    otmdb.register_tag(new, &user("alice")).await.unwrap().tag
}

pub async fn category(otmdb: &Otmdb, name: &str, category_type: CategoryType) -> Tag {
    let new = NewTag {
        is_category_tag: true,
        ..NewTag::named([name])
    };
    let tag = tag_with(otmdb, new).await;
    otmdb
        .tags()
        .set_category_type(tag.id, Some(category_type), &user("alice"))
        .await
        .unwrap()
}

/// Nicovideo id unique within a test
pub fn nico_id(n: u32) -> String {
    format!("sm{}", 1000 + n)
}

/// Register a video through submit + accept
pub async fn video(otmdb: &Otmdb, source_id: &str) -> Video {
    video_with(otmdb, NewRegistrationRequest::new(source_id, format!("MAD {source_id}"))).await
}

pub async fn video_with(otmdb: &Otmdb, new: NewRegistrationRequest) -> Video {
    let request = otmdb
        .request_registration(VideoSourceKind::Nicovideo, new, &user("bob"))
        .await
        .unwrap();
    otmdb
        .accept_registration(VideoSourceKind::Nicovideo, request.id, None, &user("moderator"))
        .await
        .unwrap()
        .video
}

pub async fn event_count(otmdb: &Otmdb) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM event_log")
        .fetch_one(otmdb.store().pool())
        .await
        .unwrap()
}

pub async fn row_count(otmdb: &Otmdb, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(otmdb.store().pool())
        .await
        .unwrap()
}

