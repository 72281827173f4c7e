//! Integration tests for the timeline projection

mod helpers;

use chrono::Duration;
use futures::StreamExt;
use helpers::*;
use otmdb_common::db::init::init_database;
use otmdb_common::db::settings;
use otmdb_core::registration::NewRegistrationRequest;
use otmdb_core::timeline::{TimelineEntry, TimelineWindow};
use otmdb_core::{Otmdb, VideoSourceKind};
use tempfile::TempDir;

const NICO: VideoSourceKind = VideoSourceKind::Nicovideo;

/// r1 submitted and accepted, r2 submitted and rejected
async fn seed(otmdb: &Otmdb) {
    let r1 = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm1", "first"), &user("bob"))
        .await
        .unwrap();
    otmdb.accept_registration(NICO, r1.id, None, &user("mod")).await.unwrap();
    let r2 = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm2", "second"), &user("carol"))
        .await
        .unwrap();
    otmdb
        .reject_registration(NICO, r2.id, Some("dup"), &user("mod"))
        .await
        .unwrap();
}

fn kinds(entries: &[TimelineEntry]) -> Vec<&'static str> {
    entries
        .iter()
        .map(|e| match e {
            TimelineEntry::MadRegistered { .. } => "registered",
            TimelineEntry::RegistrationRequested { .. } => "requested",
            TimelineEntry::RegistrationAccepted { .. } => "accepted",
            TimelineEntry::RegistrationRejected { .. } => "rejected",
        })
        .collect()
}

#[tokio::test]
async fn test_page_merges_newest_first() {
    let (_dir, otmdb) = setup().await;
    seed(&otmdb).await;

    let page = otmdb.timeline(TimelineWindow::default(), None, 10).await.unwrap();
    assert_eq!(
        kinds(&page.entries),
        vec!["rejected", "requested", "accepted", "registered", "requested"]
    );
    assert!(page.next_cursor.is_none());

    for pair in page.entries.windows(2) {
        assert!(
            (pair[0].created_at(), pair[0].event_id()) > (pair[1].created_at(), pair[1].event_id()),
            "entries must be strictly descending"
        );
    }

    match &page.entries[0] {
        TimelineEntry::RegistrationRejected { note, user_id, .. } => {
            assert_eq!(note.as_deref(), Some("dup"));
            assert_eq!(user_id, "mod");
        }
        other => panic!("unexpected entry {:?}", other),
    }
}

#[tokio::test]
async fn test_page_resumes_from_cursor() {
    let (_dir, otmdb) = setup().await;
    seed(&otmdb).await;
    let all = otmdb.timeline(TimelineWindow::default(), None, 10).await.unwrap().entries;

    let mut collected = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = otmdb
            .timeline(TimelineWindow::default(), cursor.as_deref(), 2)
            .await
            .unwrap();
        assert!(page.entries.len() <= 2);
        collected.extend(page.entries);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(collected, all);
}

#[tokio::test]
async fn test_page_arguments() {
    let (_dir, otmdb) = setup().await;

    let err = otmdb.timeline(TimelineWindow::default(), None, 10_000).await.unwrap_err();
    assert_eq!(otmdb_core::OperationError::code(&err), "PAGE_SIZE_TOO_LARGE");

    let err = otmdb
        .timeline(TimelineWindow::default(), Some("not-a-cursor"), 10)
        .await
        .unwrap_err();
    assert_eq!(otmdb_core::OperationError::code(&err), "INVALID_CURSOR");
}

#[tokio::test]
async fn test_window_bounds() {
    let (_dir, otmdb) = setup().await;
    seed(&otmdb).await;
    let now = chrono::Utc::now();

    let future = TimelineWindow {
        since: Some(now + Duration::hours(1)),
        until: None,
    };
    assert!(otmdb.timeline(future, None, 10).await.unwrap().entries.is_empty());

    let past = TimelineWindow {
        since: None,
        until: Some(now - Duration::hours(1)),
    };
    assert!(otmdb.timeline(past, None, 10).await.unwrap().entries.is_empty());

    let around = TimelineWindow::between(now - Duration::hours(1), now + Duration::hours(1));
    assert_eq!(otmdb.timeline(around, None, 10).await.unwrap().entries.len(), 5);
}

#[tokio::test]
async fn test_stream_fetches_in_batches_and_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("otmdb.db")).await.unwrap();
    settings::set(&pool, settings::TIMELINE_BATCH_SIZE, "2").await.unwrap();
    let otmdb = Otmdb::open(pool).await.unwrap();
    assert_eq!(otmdb.store().settings().timeline_batch_size, 2);
    seed(&otmdb).await;

    let expected = otmdb.timeline(TimelineWindow::default(), None, 10).await.unwrap().entries;

    let streamed: Vec<TimelineEntry> = otmdb
        .timeline_stream(TimelineWindow::default(), None)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(streamed, expected);

    let resumed: Vec<TimelineEntry> = otmdb
        .timeline_stream(TimelineWindow::default(), Some(streamed[2].cursor()))
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(resumed, expected[3..].to_vec());
}

#[tokio::test]
async fn test_timeline_never_writes() {
    let (_dir, otmdb) = setup().await;
    seed(&otmdb).await;
    let before = event_count(&otmdb).await;

    otmdb.timeline(TimelineWindow::default(), None, 10).await.unwrap();
    let _: Vec<_> = otmdb.timeline_stream(TimelineWindow::default(), None).collect().await;

    assert_eq!(event_count(&otmdb).await, before);
}
