use super::*;
use crate::error::Error;

#[test]
fn test_key_helpers() {
    assert_eq!(trace_key("trace", "owui-abc"), "trace/owui-abc.jsonl");
    assert_eq!(trace_key("/trace/", "s1"), "trace/s1.jsonl");
    assert_eq!(join_key(&["a", "", "/b/", "c.txt"]), "a/b/c.txt");
    assert_eq!(artifact_prefix("s1"), "artifacts/s1");
}

#[tokio::test]
async fn test_memory_put_get_overwrite() {
    let store = MemoryBlobStore::new();
    assert!(!store.exists("trace/s1.jsonl").await.unwrap());

    store
        .put("trace/s1.jsonl", Bytes::from_static(b"one\n"))
        .await
        .unwrap();
    store
        .put("trace/s1.jsonl", Bytes::from_static(b"two\n"))
        .await
        .unwrap();

    assert!(store.exists("trace/s1.jsonl").await.unwrap());
    assert_eq!(
        store.get("trace/s1.jsonl").await.unwrap(),
        Bytes::from_static(b"two\n")
    );
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_memory_missing_is_not_found() {
    let store = MemoryBlobStore::new();
    let err = store.get("nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    // delete is idempotent
    store.delete("nope").await.unwrap();
}

#[tokio::test]
async fn test_memory_delete_prefix() {
    let store = MemoryBlobStore::new();
    for key in ["artifacts/s1/a.png", "artifacts/s1/b.csv", "artifacts/s10/c.png"] {
        store.put(key, Bytes::from_static(b"x")).await.unwrap();
    }
    let removed = store.delete_prefix("artifacts/s1/").await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.exists("artifacts/s10/c.png").await.unwrap());
}

#[tokio::test]
async fn test_fs_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());

    store
        .put("trace/s1.jsonl", Bytes::from_static(b"{}\n"))
        .await
        .unwrap();
    assert!(store.exists("trace/s1.jsonl").await.unwrap());
    assert_eq!(
        store.get("trace/s1.jsonl").await.unwrap(),
        Bytes::from_static(b"{}\n")
    );

    store.delete("trace/s1.jsonl").await.unwrap();
    assert!(!store.exists("trace/s1.jsonl").await.unwrap());
    assert!(store.get("trace/s1.jsonl").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_fs_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());
    let err = store
        .put("../outside.txt", Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[tokio::test]
async fn test_fs_delete_prefix_counts_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());
    store
        .put("artifacts/s1/a.png", Bytes::from_static(b"x"))
        .await
        .unwrap();
    store
        .put("artifacts/s1/nested/b.csv", Bytes::from_static(b"y"))
        .await
        .unwrap();

    assert_eq!(store.delete_prefix("artifacts/s1/").await.unwrap(), 2);
    assert_eq!(store.delete_prefix("artifacts/s1/").await.unwrap(), 0);
}

#[test]
fn test_http_direct_url() {
    let store = HttpBlobStore::new("http://minio:9000/", "traces").unwrap();
    assert_eq!(
        store.direct_url("trace/s1.jsonl").as_deref(),
        Some("http://minio:9000/traces/trace/s1.jsonl")
    );
}
