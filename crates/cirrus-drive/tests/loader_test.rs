//! Integration tests: folder loading, bootstrap and decryption order.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cirrus_core::DriveError;
use cirrus_drive::{CryptoPool, KeyChainDecryptor, LoadMode, NodeCache};
use common::{child_names, fixture, slow_fixture};

#[tokio::test]
async fn bootstrap_caches_share_and_root() {
    let fx = fixture().await;
    let share = fx.client.node("share1").expect("share cached");
    let root = fx.client.node("root123").expect("root cached");

    assert!(share.is_share());
    assert_eq!(root.parent_id.as_deref(), Some("share1"));
    assert_eq!(share.size, root.size);
    assert!(!root.is_loaded());
}

#[tokio::test]
async fn get_folder_children_decrypts_names() {
    let fx = fixture().await;
    let children = fx.client.get_folder_children("folderA").await;
    // folderA is not cached until its parent is listed
    assert!(matches!(children, Err(DriveError::NotFound(_))));

    fx.client.get_folder_children("root123").await.unwrap();
    let mut names = child_names(&fx.client, "root123");
    names.sort();
    assert_eq!(names, vec!["Folder A".to_string(), "top.txt".to_string()]);

    fx.client.get_folder_children("folderA").await.unwrap();
    assert_eq!(
        child_names(&fx.client, "folderA"),
        vec!["notes.txt".to_string(), "photo.jpg".to_string(), "Folder B".to_string()]
    );
}

#[tokio::test]
async fn second_load_is_served_from_cache() {
    let fx = fixture().await;
    let first = fx
        .client
        .load_children("root123", 0, 150, LoadMode::Replace)
        .await
        .unwrap();
    let second = fx
        .client
        .load_children("root123", 0, 150, LoadMode::Replace)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total_items, 2);
    assert!(!first.has_more);
    assert_eq!(fx.remote.folder_fetches(), 1);

    fx.client.get_folder_children("root123").await.unwrap();
    assert_eq!(fx.remote.folder_fetches(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_load_is_busy() {
    let fx = slow_fixture(Duration::from_millis(100)).await;
    let (a, b) = tokio::join!(
        fx.client.load_children("root123", 0, 150, LoadMode::Append),
        fx.client.load_children("root123", 0, 150, LoadMode::Append),
    );

    let busy = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(DriveError::Busy { .. })))
        .count();
    assert_eq!(busy, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(fx.remote.folder_fetches(), 1);
}

#[tokio::test]
async fn pages_merge_in_server_order() {
    let fx = fixture().await;
    fx.client.get_folder_children("root123").await.unwrap();

    let first = fx
        .client
        .load_children("folderA", 0, 2, LoadMode::Replace)
        .await
        .unwrap();
    assert!(first.has_more);
    assert_eq!(first.total_pages, 2);
    assert_eq!(child_names(&fx.client, "folderA").len(), 2);

    let second = fx
        .client
        .load_children("folderA", 2, 2, LoadMode::Append)
        .await
        .unwrap();
    assert!(!second.has_more);
    assert_eq!(
        child_names(&fx.client, "folderA"),
        vec!["notes.txt".to_string(), "photo.jpg".to_string(), "Folder B".to_string()]
    );
}

#[tokio::test]
async fn refresh_in_background_picks_up_new_children() {
    let mut fx = fixture().await;
    assert!(fx.client.refresh_in_background("root123").is_none());

    fx.client.get_folder_children("root123").await.unwrap();
    fx.seeder
        .file("root123", "file5", "added.txt", 5)
        .expect("seed file");

    fx.client
        .refresh_in_background("root123")
        .expect("folder is loaded")
        .await
        .expect("refresh task");
    assert!(child_names(&fx.client, "root123").contains(&"added.txt".to_string()));
    assert_eq!(fx.remote.folder_fetches(), 2);
}

#[tokio::test]
async fn out_of_order_decryption_fails_for_that_node_only() {
    let fx = fixture().await;
    let root = fx.client.node("root123").unwrap();

    let cache = Arc::new(NodeCache::new());
    let pool = Arc::new(CryptoPool::new(1).unwrap());
    let decryptor = KeyChainDecryptor::new(cache.clone(), pool, Duration::from_secs(5));

    // folderB sits two levels below root; root keys cannot open it
    let grandchild = fx.remote.link("folderB").unwrap();
    let err = decryptor
        .decrypt_link(grandchild, root.keys.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::Decryption { .. }));
    assert!(err.is_node_scoped());
    assert_eq!(cache.failure("folderB").map(|f| f.count), Some(1));

    let child = fx.remote.link("folderA").unwrap();
    let node = decryptor.decrypt_link(child, root.keys.clone()).await.unwrap();
    assert_eq!(node.name, "Folder A");
}

#[tokio::test]
async fn tampered_child_is_skipped_not_fatal() {
    let fx = fixture().await;
    fx.remote.tamper("file4", |link| link.node_passphrase = "AAAA".into());

    let children = fx.client.get_folder_children("root123").await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "Folder A");
    assert!(fx.client.cache().failure("file4").is_some());
}

#[tokio::test]
async fn offset_past_the_end_is_an_empty_last_page() {
    let fx = fixture().await;
    let result = fx
        .client
        .load_children("root123", u64::MAX, 150, LoadMode::Append)
        .await
        .unwrap();
    assert!(!result.has_more);
    assert_eq!(result.total_items, 2);
    assert!(child_names(&fx.client, "root123").is_empty());
}
