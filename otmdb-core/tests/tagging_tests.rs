//! Integration tests for attaching and detaching tags

mod helpers;

use helpers::*;
use otmdb_core::event_log::{self, TagEventType, VideoTagEventType};
use otmdb_core::tagging::{AttachError, DetachError};
use otmdb_core::OperationError;
use uuid::Uuid;

#[tokio::test]
async fn test_attach_detach_attach_reuses_one_row() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let alice = user("alice");

    let first = otmdb.add_tag_to_video(video.id, t.id, &alice).await.unwrap();
    let removed = otmdb.remove_tag_from_video(video.id, t.id, &alice).await.unwrap();
    assert!(removed.is_removed);
    let again = otmdb.add_tag_to_video(video.id, t.id, &alice).await.unwrap();

    assert_eq!(first.id, removed.id);
    assert_eq!(first.id, again.id);
    assert!(!again.is_removed);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video_tags WHERE video_id = ? AND tag_id = ?")
        .bind(video.id.to_string())
        .bind(t.id.to_string())
        .fetch_one(otmdb.store().pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

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
async fn test_attach_errors() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let alice = user("alice");

    let err = otmdb.add_tag_to_video(Uuid::new_v4(), t.id, &alice).await.unwrap_err();
    assert_eq!(err.code(), "VIDEO_NOT_FOUND");
    let err = otmdb.add_tag_to_video(video.id, Uuid::new_v4(), &alice).await.unwrap_err();
    assert_eq!(err.code(), "TAG_NOT_FOUND");

    let active = otmdb.add_tag_to_video(video.id, t.id, &alice).await.unwrap();
    match otmdb.add_tag_to_video(video.id, t.id, &alice).await {
        Err(AttachError::ExistsTagging(existing)) => assert_eq!(existing, active),
        other => panic!("expected EXISTS_TAGGING, got {:?}", other),
    }
}

#[tokio::test]
async fn test_detach_is_not_idempotent() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let alice = user("alice");

    let err = otmdb.remove_tag_from_video(video.id, t.id, &alice).await.unwrap_err();
    assert!(matches!(err, DetachError::NotFound { .. }));

    otmdb.add_tag_to_video(video.id, t.id, &alice).await.unwrap();
    otmdb.remove_tag_from_video(video.id, t.id, &alice).await.unwrap();

    let events_before = event_count(&otmdb).await;
    let err = otmdb.remove_tag_from_video(video.id, t.id, &alice).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(event_count(&otmdb).await, events_before);
}

#[tokio::test]
async fn test_can_tag_to_follows_active_state() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let alice = user("alice");
    let tagging = otmdb.tagging();

    assert!(tagging.can_tag_to(t.id, video.id).await.unwrap());
    otmdb.add_tag_to_video(video.id, t.id, &alice).await.unwrap();
    assert!(!tagging.can_tag_to(t.id, video.id).await.unwrap());
    otmdb.remove_tag_from_video(video.id, t.id, &alice).await.unwrap();
    assert!(tagging.can_tag_to(t.id, video.id).await.unwrap());
}

#[tokio::test]
async fn test_tagged_videos_lists_active_only() {
    use otmdb_common::pagination::{ConnectionArgs, SortOrder};

    let (_dir, otmdb) = setup().await;
    let v1 = video(&otmdb, &nico_id(1)).await;
    let v2 = video(&otmdb, &nico_id(2)).await;
    let t = tag(&otmdb, "tag").await;
    let alice = user("alice");

    otmdb.add_tag_to_video(v1.id, t.id, &alice).await.unwrap();
    otmdb.add_tag_to_video(v2.id, t.id, &alice).await.unwrap();
    otmdb.remove_tag_from_video(v2.id, t.id, &alice).await.unwrap();

    let err = otmdb
        .tags()
        .tagged_videos(t.id, SortOrder::Desc, &ConnectionArgs::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LIMIT_REQUIRED");

    let page = otmdb
        .tags()
        .tagged_videos(t.id, SortOrder::Desc, &ConnectionArgs::first(10))
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.edges[0].node.video_id, v1.id);

    let detail = otmdb.get_video(v2.id).await.unwrap().unwrap();
    assert!(detail.tags.is_empty());
}

#[tokio::test]
async fn test_events_published_after_commit() {
    let (_dir, otmdb) = setup().await;
    let video = video(&otmdb, &nico_id(1)).await;
    let t = tag(&otmdb, "tag").await;
    let mut rx = otmdb.subscribe();

    let vt = otmdb.add_tag_to_video(video.id, t.id, &user("alice")).await.unwrap();
    let record = rx.recv().await.unwrap();
    assert_eq!(record.entity_id, vt.id);
    assert_eq!(record.event_type, "ATTACH");
    assert_eq!(record.user_id, "alice");

    otmdb.add_tag_to_video(video.id, t.id, &user("alice")).await.unwrap_err();
    assert!(rx.try_recv().is_err(), "failed operations publish nothing");
}

#[tokio::test]
async fn test_dropped_write_rolls_back() {
    let (_dir, otmdb) = setup().await;
    let t = tag(&otmdb, "tag").await;
    let events_before = event_count(&otmdb).await;
    let mut rx = otmdb.subscribe();

    let mut tx = otmdb.store().begin_write("test").await.unwrap();
    sqlx::query("UPDATE tags SET is_category_tag = 1 WHERE id = ?")
        .bind(t.id.to_string())
        .execute(tx.conn())
        .await
        .unwrap();
    event_log::append(
        &mut tx,
        t.id,
        TagEventType::SetCategoryType,
        &user("alice"),
        serde_json::json!({ "is_category_tag": true }),
    )
    .await
    .unwrap();
    drop(tx);

    assert_eq!(event_count(&otmdb).await, events_before);
    assert!(!otmdb.get_tag(t.id).await.unwrap().unwrap().is_category_tag);
    assert_eq!(otmdb.tag_events(t.id, None, 0).await.unwrap().len(), 1);
    assert!(rx.try_recv().is_err(), "rolled back events are never published");

    // The write lock is free again
    tag(&otmdb, "after").await;
    assert_eq!(event_count(&otmdb).await, events_before + 1);
}

#[tokio::test]
async fn test_aborted_write_task_rolls_back() {
    let (_dir, otmdb) = setup().await;
    let t = tag(&otmdb, "tag").await;
    let events_before = event_count(&otmdb).await;
    let names_before = row_count(&otmdb, "tag_names").await;
    let mut rx = otmdb.subscribe();

    let (written_tx, written_rx) = tokio::sync::oneshot::channel();
    let store = otmdb.store().clone();
    let tag_id = t.id;
    let handle = tokio::spawn(async move {
        let mut tx = store.begin_write("test").await.unwrap();
        sqlx::query(
            "INSERT INTO tag_names (id, tag_id, name, is_primary, position, created_at) VALUES (?, ?, 'alias', 0, 1, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tag_id.to_string())
        .bind(tx.now_millis())
        .execute(tx.conn())
        .await
        .unwrap();
        event_log::append(
            &mut tx,
            tag_id,
            TagEventType::AddName,
            &user("alice"),
            serde_json::json!({ "name": "alias" }),
        )
        .await
        .unwrap();
        written_tx.send(()).unwrap();
        std::future::pending::<()>().await;
        tx.commit().await.unwrap();
    });

    written_rx.await.unwrap();
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert_eq!(event_count(&otmdb).await, events_before);
    assert_eq!(row_count(&otmdb, "tag_names").await, names_before);
    assert!(rx.try_recv().is_err());

    let added = otmdb.tags().add_name(t.id, "alias", &user("alice")).await.unwrap();
    assert_eq!(added.names.len(), 2);
}
