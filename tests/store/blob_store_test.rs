//! Blob store put/get contract tests.

use sealrun::digest::sha256_hex;
use sealrun::store::{BlobStore, StoreError};

const MAX: usize = 1024;
const OVER_MAX: usize = 1025;

fn store_in(dir: &tempfile::TempDir) -> BlobStore {
    BlobStore::new(dir.path().join("blobs"), MAX)
}

#[tokio::test]
async fn put_then_get_returns_same_bytes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    for data in [b"x".to_vec(), b"Hello World!".to_vec(), vec![0u8; MAX], (0..=255u8).collect()] {
        let id = store.put(&data).await.expect("put");
        assert_eq!(store.get(&id).await.expect("get"), data);
    }
}

#[tokio::test]
async fn id_is_sha256_hex_of_content() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    let id = store.put(b"Hello World!").await.expect("put");
    assert_eq!(
        id,
        "7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069"
    );
    assert!(store.root().join(&id).is_file());
}

#[tokio::test]
async fn repeated_put_is_idempotent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    let first = store.put(b"same").await.expect("first");
    let second = store.put(b"same").await.expect("second");
    assert_eq!(first, second);

    // Only the published blob remains; no staging files leak.
    let entries: Vec<_> = std::fs::read_dir(store.root())
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].to_string_lossy(), first);
}

#[tokio::test]
async fn concurrent_identical_puts_agree() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = std::sync::Arc::new(store_in(&tmp));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move { store.put(b"shared").await }));
    }
    for handle in handles {
        let id = handle.await.expect("join").expect("put");
        assert_eq!(id, sha256_hex(b"shared"));
    }
    assert_eq!(store.get(&sha256_hex(b"shared")).await.expect("get"), b"shared");
}

#[tokio::test]
async fn empty_put_is_rejected_without_touching_disk() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    assert!(matches!(store.put(b"").await, Err(StoreError::Empty)));
    assert!(!store.root().exists());
}

#[tokio::test]
async fn oversize_put_is_rejected_at_max_plus_one() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    match store.put(&vec![7u8; OVER_MAX]).await {
        Err(StoreError::Oversize { size, max }) => {
            assert_eq!(size, OVER_MAX);
            assert_eq!(max, MAX);
        }
        other => panic!("expected oversize error, got: {other:?}"),
    }
    assert!(!store.root().exists());

    assert!(store.put(&vec![7u8; MAX]).await.is_ok());
}

#[tokio::test]
async fn get_rejects_malformed_ids() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);

    let too_short = "a".repeat(63);
    let too_long = "a".repeat(65);
    let not_hex = "z".repeat(64);
    for id in ["", too_short.as_str(), too_long.as_str(), not_hex.as_str()] {
        match store.get(id).await {
            Err(StoreError::InvalidIdentifier { id: got, len }) => {
                assert_eq!(got, id);
                assert_eq!(len, id.len());
            }
            other => panic!("expected invalid identifier for {id:?}, got: {other:?}"),
        }
    }
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);
    let id = sha256_hex(b"never stored");

    match store.get(&id).await {
        Err(StoreError::NotFound { id: got, source }) => {
            assert_eq!(got, id);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected not found, got: {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn unwritable_root_is_storage_unavailable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let blocker = tmp.path().join("file");
    std::fs::write(&blocker, b"x").expect("write");
    let store = BlobStore::new(blocker.join("blobs"), MAX);

    assert!(matches!(
        store.put(b"data").await,
        Err(StoreError::StorageUnavailable { .. })
    ));
}

#[tokio::test]
async fn get_verified_detects_tampering() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);
    let id = store.put(b"original").await.expect("put");

    assert_eq!(
        store.get_verified(None, &id).await.expect("intact"),
        b"original"
    );

    std::fs::write(store.root().join(&id), b"tampered").expect("overwrite");
    match store.get_verified(None, &id).await {
        Err(StoreError::Corrupted { id: got, actual }) => {
            assert_eq!(got, id);
            assert_eq!(actual, sha256_hex(b"tampered"));
        }
        other => panic!("expected corrupted, got: {other:?}"),
    }
}

#[tokio::test]
async fn contains_reflects_presence() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = store_in(&tmp);
    let id = sha256_hex(b"later");

    assert!(!store.contains(None, &id).await.expect("absent"));
    store.put(b"later").await.expect("put");
    assert!(store.contains(None, &id).await.expect("present"));
    assert!(matches!(
        store.contains(None, "short").await,
        Err(StoreError::InvalidIdentifier { .. })
    ));
}
