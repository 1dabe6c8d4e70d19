//! Multipart session behavior of the filesystem backend.

mod common;

use bytes::Bytes;
use common::{filesystem, seeded_bytes, sha256_hash};
use satchel_storage::{CompletedPart, ObjectAttrs, ObjectStore, StorageError};
use std::sync::Arc;

fn part(part_number: u32, etag: &str) -> CompletedPart {
    CompletedPart {
        part_number,
        etag: etag.to_string(),
    }
}

/// Upload `chunks` as parts 1..=n and return their etags in part order.
async fn upload_all(
    store: &dyn ObjectStore,
    key: &str,
    session: &str,
    chunks: &[Bytes],
) -> Vec<String> {
    let mut etags = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let etag = store
            .upload_part(key, session, i as u32 + 1, chunk.clone())
            .await
            .unwrap();
        etags.push(etag);
    }
    etags
}

#[tokio::test]
async fn test_parts_assemble_in_part_number_order() {
    let (_dir, store) = filesystem().await;
    let key = "files/alice/1-abcdefgh-data.bin";
    let session = store
        .create_session(key, &ObjectAttrs::with_content_type("application/octet-stream"))
        .await
        .unwrap();

    // Arrive out of order.
    let e3 = store
        .upload_part(key, &session, 3, Bytes::from("ccc"))
        .await
        .unwrap();
    let e1 = store
        .upload_part(key, &session, 1, Bytes::from("a"))
        .await
        .unwrap();
    let e2 = store
        .upload_part(key, &session, 2, Bytes::from("bb"))
        .await
        .unwrap();
    assert_eq!(e1, sha256_hash(b"a"));

    store
        .complete_session(key, &session, &[part(1, &e1), part(2, &e2), part(3, &e3)])
        .await
        .unwrap();

    let object = store.get(key).await.unwrap();
    assert_eq!(object.data, Bytes::from("abbccc"));
    assert_eq!(
        object.meta.content_type.as_deref(),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn test_completion_order_of_part_list_does_not_matter() {
    let (_dir, store) = filesystem().await;
    let chunks: Vec<Bytes> = (0..3).map(|i| seeded_bytes(i, 4096 + i as usize)).collect();

    let mut assembled = Vec::new();
    for (name, order) in [("ordered", [1u32, 2, 3]), ("shuffled", [3, 1, 2])] {
        let key = format!("files/alice/{name}");
        let session = store
            .create_session(&key, &ObjectAttrs::default())
            .await
            .unwrap();
        let etags = upload_all(&store, &key, &session, &chunks).await;
        let parts: Vec<CompletedPart> = order
            .iter()
            .map(|n| part(*n, &etags[*n as usize - 1]))
            .collect();
        store.complete_session(&key, &session, &parts).await.unwrap();
        assembled.push(store.get(&key).await.unwrap().data);
    }

    assert_eq!(assembled[0], assembled[1]);
    assert_eq!(assembled[0].len(), 4096 * 3 + 3);
}

#[tokio::test]
async fn test_reuploaded_part_replaces_earlier_bytes() {
    let (_dir, store) = filesystem().await;
    let key = "files/bob/retry";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();

    let e1 = store.upload_part(key, &session, 1, Bytes::from("11")).await.unwrap();
    let e2 = store.upload_part(key, &session, 2, Bytes::from("22")).await.unwrap();
    let first = store.upload_part(key, &session, 3, Bytes::from("first")).await.unwrap();
    let second = store
        .upload_part(key, &session, 3, Bytes::from("second"))
        .await
        .unwrap();
    assert_ne!(first, second);

    store
        .complete_session(key, &session, &[part(1, &e1), part(2, &e2), part(3, &second)])
        .await
        .unwrap();
    assert_eq!(store.get(key).await.unwrap().data, Bytes::from("1122second"));
}

#[tokio::test]
async fn test_stale_etag_after_reupload_is_rejected() {
    let (_dir, store) = filesystem().await;
    let key = "files/bob/stale";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();

    let stale = store.upload_part(key, &session, 1, Bytes::from("old")).await.unwrap();
    store.upload_part(key, &session, 1, Bytes::from("new")).await.unwrap();

    let err = store
        .complete_session(key, &session, &[part(1, &stale)])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidPart { part_number: 1, .. }));
    assert!(!store.exists(key).await.unwrap());
}

#[tokio::test]
async fn test_never_uploaded_part_is_rejected() {
    let (_dir, store) = filesystem().await;
    let key = "files/bob/gap";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();
    let e1 = store.upload_part(key, &session, 1, Bytes::from("x")).await.unwrap();

    let err = store
        .complete_session(key, &session, &[part(1, &e1), part(2, &sha256_hash(b"y"))])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidPart { part_number: 2, .. }));

    // The session survives a rejected completion.
    let e2 = store.upload_part(key, &session, 2, Bytes::from("y")).await.unwrap();
    store
        .complete_session(key, &session, &[part(1, &e1), part(2, &e2)])
        .await
        .unwrap();
    assert_eq!(store.get(key).await.unwrap().data, Bytes::from("xy"));
}

#[tokio::test]
async fn test_duplicate_and_empty_part_lists_rejected() {
    let (_dir, store) = filesystem().await;
    let key = "files/bob/dup";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();
    let e1 = store.upload_part(key, &session, 1, Bytes::from("x")).await.unwrap();

    assert!(matches!(
        store
            .complete_session(key, &session, &[part(1, &e1), part(1, &e1)])
            .await,
        Err(StorageError::InvalidPart { .. })
    ));
    assert!(matches!(
        store.complete_session(key, &session, &[]).await,
        Err(StorageError::InvalidPart { .. })
    ));
}

#[tokio::test]
async fn test_part_number_bounds() {
    let (_dir, store) = filesystem().await;
    let key = "files/bob/bounds";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();
    for n in [0u32, 10_001] {
        assert!(matches!(
            store.upload_part(key, &session, n, Bytes::from("x")).await,
            Err(StorageError::InvalidPart { .. })
        ));
    }
    store
        .upload_part(key, &session, 10_000, Bytes::from("x"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_completed_session_is_consumed() {
    let (_dir, store) = filesystem().await;
    let key = "files/carol/once";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();
    let e1 = store.upload_part(key, &session, 1, Bytes::from("x")).await.unwrap();
    store
        .complete_session(key, &session, &[part(1, &e1)])
        .await
        .unwrap();

    assert!(matches!(
        store.complete_session(key, &session, &[part(1, &e1)]).await,
        Err(StorageError::SessionNotFound(_))
    ));
    assert!(matches!(
        store.upload_part(key, &session, 2, Bytes::from("y")).await,
        Err(StorageError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_abort_discards_parts_and_is_idempotent() {
    let (_dir, store) = filesystem().await;
    let key = "files/carol/abandoned";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();
    store.upload_part(key, &session, 1, Bytes::from("x")).await.unwrap();

    store.abort_session(key, &session).await.unwrap();
    store.abort_session(key, &session).await.unwrap();

    assert!(matches!(
        store.upload_part(key, &session, 2, Bytes::from("y")).await,
        Err(StorageError::SessionNotFound(_))
    ));
    assert!(!store.exists(key).await.unwrap());
    assert!(store.list("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_parallel_part_uploads() {
    let (_dir, store) = filesystem().await;
    let store = Arc::new(store);
    let key = "files/dave/parallel";
    let session = store
        .create_session(key, &ObjectAttrs::default())
        .await
        .unwrap();

    let chunks: Vec<Bytes> = (0..8).map(|i| seeded_bytes(100 + i, 10_000)).collect();
    let mut handles = Vec::new();
    for (i, chunk) in chunks.iter().cloned().enumerate().rev() {
        let store = store.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            let part_number = i as u32 + 1;
            let etag = store
                .upload_part(key, &session, part_number, chunk)
                .await
                .unwrap();
            part(part_number, &etag)
        }));
    }
    let mut parts = Vec::new();
    for handle in handles {
        parts.push(handle.await.unwrap());
    }

    store.complete_session(key, &session, &parts).await.unwrap();
    let expected: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(store.get(key).await.unwrap().data, Bytes::from(expected));
}
