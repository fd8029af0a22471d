//! Contract tests run against every store implementation

use std::sync::Arc;

use confsync_model::{ChangeRequest, ChangeOperation, RequestId};
use confsync_store::{
    get_json, get_json_opt, layout, put_json, FsStore, MemoryStore, ObjectStore, RetryPolicy,
    RetryingStore,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

async fn exercise(store: &dyn ObjectStore) {
    // idempotent overwrite
    store.put("changes", "pending/n1/a.json", b"one".to_vec()).await.unwrap();
    store.put("changes", "pending/n1/a.json", b"two".to_vec()).await.unwrap();
    assert_eq!(store.get("changes", "pending/n1/a.json").await.unwrap(), b"two");

    // prefix listing is sorted and bucket-scoped
    store.put("changes", "pending/n1/b.json", vec![]).await.unwrap();
    store.put("changes", "pending/n2/c.json", vec![]).await.unwrap();
    assert_eq!(
        store.list("changes", &layout::pending_prefix("n1")).await.unwrap(),
        vec!["pending/n1/a.json".to_string(), "pending/n1/b.json".to_string()]
    );
    assert!(store.list("backups", "").await.unwrap().is_empty());

    // move = copy + delete
    store
        .move_object("changes", "pending/n1/b.json", "changes", "completed/b.json")
        .await
        .unwrap();
    assert!(!store.exists("changes", "pending/n1/b.json").await.unwrap());
    assert!(store.exists("changes", "completed/b.json").await.unwrap());

    // delete is idempotent
    store.delete("changes", "completed/b.json").await.unwrap();
    store.delete("changes", "completed/b.json").await.unwrap();

    // JSON helpers
    let request = ChangeRequest::new("n1", "lobby", "ops")
        .with_id(RequestId::from("r-json"))
        .with_operation(ChangeOperation::delete_line("motd.txt", "^ad"));
    let key = layout::pending_key("n1", &request.id);
    put_json(store, layout::CHANGES, &key, &request).await.unwrap();
    let back: ChangeRequest = get_json(store, layout::CHANGES, &key).await.unwrap();
    assert_eq!(back, request);
    let missing: Option<ChangeRequest> =
        get_json_opt(store, layout::CHANGES, "pending/n1/none.json").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn memory_store_contract() {
    exercise(&MemoryStore::new()).await;
}

#[tokio::test]
async fn fs_store_contract() {
    let dir = TempDir::new().unwrap();
    exercise(&FsStore::new(dir.path())).await;
}

#[tokio::test]
async fn retrying_store_contract() {
    let store = RetryingStore::new(MemoryStore::new(), RetryPolicy::default().without_jitter());
    exercise(&store).await;
}

#[tokio::test]
async fn shared_arc_store_contract() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    exercise(&store).await;
}

#[tokio::test]
async fn bad_json_is_serialization_error() {
    let store = MemoryStore::new();
    store.put("changes", "pending/n1/x.json", b"{not json".to_vec()).await.unwrap();
    let err = get_json::<_, ChangeRequest>(&store, "changes", "pending/n1/x.json")
        .await
        .unwrap_err();
    assert!(matches!(err, confsync_store::StoreError::Serialization { .. }));
}
