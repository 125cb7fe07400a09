use yvault_core::config::{BackendKind, StorageConfig};
use yvault_storage::{build_operator, check_health, BackendStore};

#[tokio::test]
async fn local_backend_assembles_and_serves_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        backend: BackendKind::Local,
        root: dir.path().to_path_buf(),
        ..Default::default()
    };
    let op = build_operator(&storage, None).unwrap();
    check_health(&op).await.unwrap();

    let store = BackendStore::new(op);
    store.put_part("obj", 1, vec![1u8; 7]).await.unwrap();
    store.put_part("obj", 2, vec![2u8; 7]).await.unwrap();
    store.put_part("obj", 3, vec![3u8; 5]).await.unwrap();
    let stored = store.complete("obj", 3).await.unwrap();
    assert_eq!(stored.len, 19);

    assert_eq!(store.get_range("obj", 7, 13).await.unwrap(), vec![2u8; 7]);
    assert_eq!(store.get_range("obj", 14, 18).await.unwrap(), vec![3u8; 5]);

    assert!(dir.path().join("objects").join("obj").exists());
    assert!(!dir.path().join("uploads").join("obj").join("00000001").exists());

    store.delete_object("obj").await.unwrap();
    assert!(!dir.path().join("objects").join("obj").exists());
}
