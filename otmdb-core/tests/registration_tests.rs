//! Integration tests for the registration workflow

mod helpers;

use helpers::*;
use otmdb_common::pagination::{ConnectionArgs, SortOrder};
use otmdb_core::event_log::{self, RegistrationEventType};
use otmdb_core::models::RequestStatus;
use otmdb_core::registration::{
    AcceptError, NewRegistrationRequest, RejectError, RequestedSemitagging, RequestedTagging, SubmitError,
};
use otmdb_core::{OperationError, VideoSourceKind};
use uuid::Uuid;

const NICO: VideoSourceKind = VideoSourceKind::Nicovideo;

#[tokio::test]
async fn test_submit_creates_pending_request_without_video() {
    let (_dir, otmdb) = setup().await;
    let t = tag(&otmdb, "tag").await;

    let request = otmdb
        .request_registration(
            NICO,
            NewRegistrationRequest {
                thumbnail_url: Some("https://example.com/t.jpg".into()),
                taggings: vec![RequestedTagging {
                    tag_id: t.id,
                    note: Some("obvious".into()),
                }],
                semitaggings: vec![RequestedSemitagging {
                    name: "unknown song".into(),
                    note: None,
                }],
                ..NewRegistrationRequest::new(" sm9 ", "  Title ")
            },
            &user("bob"),
        )
        .await
        .unwrap();

    assert_eq!(request.source, NICO);
    assert_eq!(request.source_id, "sm9");
    assert_eq!(request.title, "Title");
    assert!(!request.is_checked);
    assert_eq!(row_count(&otmdb, "videos").await, 0);

    let detail = otmdb.get_registration_request(request.id).await.unwrap().unwrap();
    assert_eq!(detail.taggings.len(), 1);
    assert_eq!(detail.taggings[0].note.as_deref(), Some("obvious"));
    assert_eq!(detail.semitaggings[0].name, "unknown song");
    assert!(detail.checking.is_none());

    let mut conn = otmdb.store().pool().acquire().await.unwrap();
    let events = event_log::history::<RegistrationEventType>(&mut conn, request.id, None, 0)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, RegistrationEventType::Request);
}

#[tokio::test]
async fn test_submit_validation() {
    let (_dir, otmdb) = setup().await;
    let bob = user("bob");
    let t = tag(&otmdb, "tag").await;

    let err = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("youtube-id", "x"), &bob)
        .await
        .unwrap_err();
    assert!(matches!(&err, SubmitError::InvalidSourceId(e) if e.kind == NICO));
    assert_eq!(err.code(), "INVALID_SOURCE_ID");

    let err = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm1", "x").tag(t.id).tag(t.id), &bob)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::DuplicatedTagging(id) if id == t.id));

    let err = otmdb
        .request_registration(
            NICO,
            NewRegistrationRequest::new("sm1", "x").semitag("a").semitag(" a"),
            &bob,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATED_SEMITAGGING");

    let missing = Uuid::new_v4();
    let err = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm1", "x").tag(t.id).tag(missing), &bob)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::TagNotFound(id) if id == missing));

    assert_eq!(row_count(&otmdb, "registration_requests").await, 0);
}

#[tokio::test]
async fn test_pending_duplicate_is_rejected() {
    let (_dir, otmdb) = setup().await;
    let first = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm1", "x"), &user("bob"))
        .await
        .unwrap();

    match otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm1", "y"), &user("carol"))
        .await
    {
        Err(SubmitError::RequestAlreadyExists(pending)) => assert_eq!(pending.id, first.id),
        other => panic!("expected REQUEST_ALREADY_EXISTS, got {:?}", other),
    }

    // Same external id on another source is a different video
    otmdb
        .request_registration(
            VideoSourceKind::Soundcloud,
            NewRegistrationRequest::new("1", "x"),
            &user("bob"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_accept_registers_video_with_intents() {
    let (_dir, otmdb) = setup().await;
    let t = tag(&otmdb, "tag").await;
    let request = otmdb
        .request_registration(
            NICO,
            NewRegistrationRequest {
                thumbnail_url: Some("https://example.com/t.jpg".into()),
                ..NewRegistrationRequest::new("sm9", "Title").tag(t.id).semitag("maybe")
            },
            &user("bob"),
        )
        .await
        .unwrap();

    let accepted = otmdb
        .accept_registration(NICO, request.id, Some("ok"), &user("mod"))
        .await
        .unwrap();
    assert!(accepted.request.is_checked);
    assert_eq!(accepted.checking.status(), RequestStatus::Accepted);
    assert_eq!(accepted.checking.video_id, Some(accepted.video.id));
    assert_eq!(accepted.source.source_id, "sm9");

    let detail = otmdb.get_video(accepted.video.id).await.unwrap().unwrap();
    assert_eq!(detail.video.title, "Title");
    assert_eq!(detail.video.thumbnail_url.as_deref(), Some("https://example.com/t.jpg"));
    assert_eq!(detail.tags.len(), 1);
    assert_eq!(detail.tags[0].tag_id, t.id);
    assert_eq!(detail.semitags.len(), 1);
    assert_eq!(detail.semitags[0].name, "maybe");
    assert_eq!(detail.sources.len(), 1);

    let found = otmdb.videos().find_by_source(NICO, "sm9").await.unwrap().unwrap();
    assert_eq!(found.video.id, accepted.video.id);

    let stored = otmdb.nicovideo().checking(request.id).await.unwrap().unwrap();
    assert_eq!(stored, accepted.checking);
}

#[tokio::test]
async fn test_accept_twice_returns_existing_checking() {
    let (_dir, otmdb) = setup().await;
    let request = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "x"), &user("bob"))
        .await
        .unwrap();
    let accepted = otmdb.accept_registration(NICO, request.id, None, &user("mod")).await.unwrap();

    match otmdb.accept_registration(NICO, request.id, None, &user("mod2")).await {
        Err(AcceptError::AlreadyChecked(checking)) => assert_eq!(checking, accepted.checking),
        other => panic!("expected ALREADY_CHECKED, got {:?}", other),
    }
    assert_eq!(row_count(&otmdb, "videos").await, 1);

    let err = otmdb
        .accept_registration(NICO, Uuid::new_v4(), None, &user("mod"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    // A request is only visible to its own source's workflow
    let err = otmdb
        .accept_registration(VideoSourceKind::Youtube, request.id, None, &user("mod"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_resubmit_after_accept_reports_registered_video() {
    let (_dir, otmdb) = setup().await;
    let request = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "x"), &user("bob"))
        .await
        .unwrap();
    let accepted = otmdb.accept_registration(NICO, request.id, None, &user("mod")).await.unwrap();

    match otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "again"), &user("carol"))
        .await
    {
        Err(SubmitError::VideoAlreadyRegistered(source)) => {
            assert_eq!(source, accepted.source);
            assert_eq!(source.video_id, accepted.video.id);
        }
        other => panic!("expected VIDEO_ALREADY_REGISTERED, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reject_twice_returns_identical_rejecting() {
    let (_dir, otmdb) = setup().await;
    let request = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "x"), &user("bob"))
        .await
        .unwrap();

    let rejected = otmdb
        .reject_registration(NICO, request.id, Some("not a MAD"), &user("mod"))
        .await
        .unwrap();
    assert_eq!(rejected.checking.status(), RequestStatus::Rejected);
    assert_eq!(rejected.checking.note.as_deref(), Some("not a MAD"));

    match otmdb
        .reject_registration(NICO, request.id, Some("again"), &user("mod2"))
        .await
    {
        Err(RejectError::RequestAlreadyChecked { request: r, checking }) => {
            assert_eq!(checking, rejected.checking);
            assert_eq!(r, rejected.request);
        }
        other => panic!("expected REQUEST_ALREADY_CHECKED, got {:?}", other),
    }

    let err = otmdb
        .reject_registration(NICO, Uuid::new_v4(), None, &user("mod"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REQUEST_NOT_FOUND");

    let err = otmdb.accept_registration(NICO, request.id, None, &user("mod")).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED");
    assert_eq!(row_count(&otmdb, "videos").await, 0);
}

#[tokio::test]
async fn test_resubmit_after_reject_is_allowed() {
    let (_dir, otmdb) = setup().await;
    let first = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "x"), &user("bob"))
        .await
        .unwrap();
    otmdb.reject_registration(NICO, first.id, None, &user("mod")).await.unwrap();

    let second = otmdb
        .request_registration(NICO, NewRegistrationRequest::new("sm9", "x"), &user("bob"))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);

    let latest = otmdb.nicovideo().find_by_source_id("sm9").await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
}

#[tokio::test]
async fn test_find_requests_by_checked_state() {
    let (_dir, otmdb) = setup().await;
    let mut ids = Vec::new();
    for n in 0..3 {
        let r = otmdb
            .request_registration(NICO, NewRegistrationRequest::new(nico_id(n), "x"), &user("bob"))
            .await
            .unwrap();
        ids.push(r.id);
    }
    otmdb.reject_registration(NICO, ids[0], None, &user("mod")).await.unwrap();

    let pending = otmdb
        .find_registration_requests(NICO, Some(false), SortOrder::Desc, &ConnectionArgs::first(10))
        .await
        .unwrap();
    assert_eq!(pending.total_count, 2);
    assert!(pending.nodes().all(|r| !r.is_checked));

    let checked = otmdb
        .find_registration_requests(NICO, Some(true), SortOrder::Desc, &ConnectionArgs::first(10))
        .await
        .unwrap();
    assert_eq!(checked.total_count, 1);

    let youtube = otmdb
        .find_registration_requests(VideoSourceKind::Youtube, None, SortOrder::Desc, &ConnectionArgs::first(10))
        .await
        .unwrap();
    assert_eq!(youtube.total_count, 0);
}

#[tokio::test]
async fn test_every_source_runs_the_same_workflow() {
    let (_dir, otmdb) = setup().await;
    for (source, id) in [
        (VideoSourceKind::Nicovideo, "sm9"),
        (VideoSourceKind::Youtube, "dQw4w9WgXcQ"),
        (VideoSourceKind::Soundcloud, "123456"),
        (VideoSourceKind::Bilibili, "BV1xx411c7mD"),
    ] {
        let request = otmdb
            .request_registration(source, NewRegistrationRequest::new(id, "x"), &user("bob"))
            .await
            .unwrap();
        let accepted = otmdb.accept_registration(source, request.id, None, &user("mod")).await.unwrap();
        assert_eq!(accepted.source.source, source);
    }
    assert_eq!(row_count(&otmdb, "videos").await, 4);
}

#[tokio::test]
async fn test_find_videos_pages_through_accepted_videos() {
    let (_dir, otmdb) = setup().await;
    for n in 0..3 {
        video(&otmdb, &nico_id(n)).await;
    }

    let first = otmdb.find_videos(SortOrder::Asc, &ConnectionArgs::first(2)).await.unwrap();
    assert_eq!(first.total_count, 3);
    assert_eq!(first.edges.len(), 2);
    assert!(first.page_info.has_next_page);

    let mut args = ConnectionArgs::first(2);
    args.after = first.page_info.end_cursor.clone();
    let second = otmdb.find_videos(SortOrder::Asc, &args).await.unwrap();
    assert_eq!(second.edges.len(), 1);
    assert!(!second.page_info.has_next_page);

    let last = &second.edges[0].node;
    assert!(first.nodes().all(|v| v.id != last.id));
}
