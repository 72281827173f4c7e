//! Integration tests for semitag suggestion and moderation

mod helpers;

use helpers::*;
use otmdb_common::pagination::{ConnectionArgs, SortOrder};
use otmdb_core::event_log::VideoTagEventType;
use otmdb_core::semitag::{ResolveSemitagError, SuggestSemitagError};
use otmdb_core::tag_graph::{CreateTagError, NewTag};
use otmdb_core::OperationError;
use uuid::Uuid;

#[tokio::test]
async fn test_suggest_semitag() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let alice = user("alice");

    let semitag = otmdb.add_semitag_to_video(video.id, " Bad Apple ", &alice).await.unwrap();
    assert_eq!(semitag.name, "Bad Apple");
    assert!(!semitag.is_checked);

    match otmdb.add_semitag_to_video(video.id, "Bad Apple", &alice).await {
        Err(SuggestSemitagError::AlreadyAttached(existing)) => assert_eq!(existing.id, semitag.id),
        other => panic!("expected ALREADY_ATTACHED, got {:?}", other),
    }

    otmdb.reject_semitag(semitag.id, None, &user("mod")).await.unwrap();
    let err = otmdb.add_semitag_to_video(video.id, "Bad Apple", &alice).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED");

    let err = otmdb.add_semitag_to_video(Uuid::new_v4(), "x", &alice).await.unwrap_err();
    assert_eq!(err.code(), "VIDEO_NOT_FOUND");
}

#[tokio::test]
async fn test_resolve_attaches_tag() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "Bad Apple!!").await;
    let semitag = otmdb.add_semitag_to_video(video.id, "bad apple", &user("alice")).await.unwrap();

    let resolution = otmdb
        .resolve_semitag(semitag.id, t.id, Some("same work"), &user("mod"))
        .await
        .unwrap();
    assert!(resolution.semitag.is_checked);
    assert_eq!(resolution.video_tag.tag_id, t.id);
    assert_eq!(resolution.checking.video_tag_id, Some(resolution.video_tag.id));
    assert_eq!(resolution.checking.note.as_deref(), Some("same work"));

    let stored = otmdb.semitags().checking(semitag.id).await.unwrap().unwrap();
    assert_eq!(stored, resolution.checking);

    match otmdb.resolve_semitag(semitag.id, t.id, None, &user("mod")).await {
        Err(ResolveSemitagError::AlreadyChecked(s)) => assert!(s.is_checked),
        other => panic!("expected ALREADY_CHECKED, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolve_on_already_tagged_video_creates_no_duplicate() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let active = otmdb.add_tag_to_video(video.id, t.id, &user("alice")).await.unwrap();
    let semitag = otmdb.add_semitag_to_video(video.id, "tag", &user("alice")).await.unwrap();

    assert!(!otmdb.semitags().can_resolve_to(semitag.id, t.id).await.unwrap());

    let resolution = otmdb.resolve_semitag(semitag.id, t.id, None, &user("mod")).await.unwrap();
    assert_eq!(resolution.video_tag.id, active.id);
    assert_eq!(row_count(&otmdb, "video_tags").await, 1);

    let trail: Vec<_> = otmdb
        .video_tag_history(video.id, t.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(trail, vec![VideoTagEventType::Attach]);
}

#[tokio::test]
async fn test_resolve_reattaches_removed_tagging() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    otmdb.add_tag_to_video(video.id, t.id, &user("alice")).await.unwrap();
    otmdb.remove_tag_from_video(video.id, t.id, &user("alice")).await.unwrap();
    let semitag = otmdb.add_semitag_to_video(video.id, "tag", &user("alice")).await.unwrap();

    assert!(otmdb.semitags().can_resolve_to(semitag.id, t.id).await.unwrap());
    let resolution = otmdb.resolve_semitag(semitag.id, t.id, None, &user("mod")).await.unwrap();
    assert!(!resolution.video_tag.is_removed);

    let trail: Vec<_> = otmdb
        .video_tag_history(video.id, t.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        trail,
        vec![
            VideoTagEventType::Attach,
            VideoTagEventType::Detach,
            VideoTagEventType::Reattach,
        ]
    );
}

#[tokio::test]
async fn test_resolve_errors() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let semitag = otmdb.add_semitag_to_video(video.id, "x", &user("alice")).await.unwrap();

    let err = otmdb.resolve_semitag(Uuid::new_v4(), t.id, None, &user("mod")).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    let err = otmdb
        .resolve_semitag(semitag.id, Uuid::new_v4(), None, &user("mod"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TAG_NOT_FOUND");
    assert!(!otmdb.semitags().get(semitag.id).await.unwrap().unwrap().is_checked);
}

#[tokio::test]
async fn test_reject_records_checking_without_tagging() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let semitag = otmdb.add_semitag_to_video(video.id, "noise", &user("alice")).await.unwrap();

    let rejection = otmdb
        .reject_semitag(semitag.id, Some("not a work"), &user("mod"))
        .await
        .unwrap();
    assert!(rejection.semitag.is_checked);
    assert_eq!(rejection.checking.video_tag_id, None);
    assert_eq!(row_count(&otmdb, "video_tags").await, 0);

    let err = otmdb.reject_semitag(semitag.id, None, &user("mod")).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED");
}

#[tokio::test]
async fn test_suggest_tags_matches_names_ignoring_case() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let matching = tag(&otmdb, "Bad Apple!!").await;
    tag(&otmdb, "Unrelated").await;
    let semitag = otmdb.add_semitag_to_video(video.id, "bad apple!!", &user("alice")).await.unwrap();

    let suggestions = otmdb.semitags().suggest_tags(semitag.id).await.unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].tag.id, matching.id);
    assert!(suggestions[0].can_resolve);
}

#[tokio::test]
async fn test_create_tag_resolves_semitags() {
    let (_dir, otmdb) = setup().await;
    let v1 = video(&otmdb, &nico_id(1)).await;
    let v2 = video(&otmdb, &nico_id(2)).await;
    let s1 = otmdb.add_semitag_to_video(v1.id, "new work", &user("alice")).await.unwrap();
    let s2 = otmdb.add_semitag_to_video(v2.id, "new work", &user("alice")).await.unwrap();

    let created = otmdb
        .register_tag(
            NewTag {
                resolve_semitags: vec![s1.id, s2.id],
                ..NewTag::named(["New Work"])
            },
            &user("mod"),
        )
        .await
        .unwrap();
    assert_eq!(created.resolutions.len(), 2);
    assert!(created.resolutions.iter().all(|r| r.video_tag.tag_id == created.tag.id));

    let err = otmdb
        .register_tag(
            NewTag {
                resolve_semitags: vec![s1.id],
                ..NewTag::named(["Another"])
            },
            &user("mod"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CreateTagError::SemitagAlreadyChecked(id) if id == s1.id));

    let err = otmdb
        .register_tag(
            NewTag {
                resolve_semitags: vec![s2.id, s2.id],
                ..NewTag::named(["Third"])
            },
            &user("mod"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATED_RESOLVE_SEMITAG");

    let unchecked = otmdb
        .semitags()
        .find(Some(false), SortOrder::Desc, &ConnectionArgs::first(10))
        .await
        .unwrap();
    assert_eq!(unchecked.total_count, 0);
}
