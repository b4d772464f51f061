use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::time::{Duration, timeout};

use super::*;
use crate::store::test_helpers::{RecordingStore, path};
use crate::store::{MemoryStore, RemoteStore};

fn memory_directory() -> (CanvasDirectory, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (CanvasDirectory::new(store.clone()), store)
}

async fn next_list(stream: &mut BoxStream<'static, Vec<CanvasRecord>>) -> Vec<CanvasRecord> {
    timeout(Duration::from_millis(500), stream.next())
        .await
        .expect("directory timed out")
        .expect("directory stream ended")
}

#[tokio::test]
async fn create_new_writes_a_blank_record() {
    let (directory, store) = memory_directory();
    let id = directory.create_new().await.unwrap();

    let stored = store.get(&path(&format!("canvas/{id}"))).await.unwrap().unwrap();
    assert!(stored["name"].as_str().unwrap().starts_with("Canvas "));
    assert!(stored["createdAt"].is_i64());
    assert_eq!(stored["json"], Snapshot::empty().into_value());
    assert_eq!(stored["json"]["background"], json!("#f8fafc"));
}

#[tokio::test]
async fn created_record_reads_back() {
    let (directory, _store) = memory_directory();
    let id = directory.create_new().await.unwrap();

    let record = directory.get(&id).await.unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.snapshot(), Some(Snapshot::empty()));
    assert!(record.created_at.is_some());
}

#[tokio::test]
async fn get_missing_is_none() {
    let (directory, _store) = memory_directory();
    assert!(directory.get("nope").await.unwrap().is_none());
    assert!(matches!(directory.get("a.b").await, Err(SyncError::InvalidCanvasId(_))));
}

#[tokio::test]
async fn list_emits_on_every_change_in_creation_order() {
    let (directory, _store) = memory_directory();
    let mut list = directory.list();
    assert!(next_list(&mut list).await.is_empty());

    let first = directory.create_new().await.unwrap();
    let ids: Vec<_> = next_list(&mut list).await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.clone()]);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = directory.create_new().await.unwrap();
    let ids: Vec<_> = next_list(&mut list).await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn list_reemits_when_a_snapshot_changes() {
    let (directory, store) = memory_directory();
    let id = directory.create_new().await.unwrap();
    let mut list = directory.list();
    assert_eq!(next_list(&mut list).await.len(), 1);

    store.set(&path(&format!("canvas/{id}/json/background")), json!("#000000")).await.unwrap();
    let records = next_list(&mut list).await;
    assert_eq!(records[0].snapshot().unwrap().background(), Some("#000000"));
}

#[tokio::test]
async fn list_once_skips_non_object_rows() {
    let (directory, store) = memory_directory();
    store.set(&path("canvas/good"), json!({"name": "Good"})).await.unwrap();
    store.set(&path("canvas/bad"), json!("oops")).await.unwrap();

    let records = directory.list_once().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].display_name(), "Good");
}

#[tokio::test]
async fn create_new_surfaces_write_failure() {
    let store = Arc::new(RecordingStore::new());
    store.set_fail_writes(true);
    let directory = CanvasDirectory::new(store);
    assert!(matches!(directory.create_new().await, Err(SyncError::Store(_))));
}

#[test]
fn default_name_uses_utc_time() {
    let created: CreatedAt = serde_json::from_value(json!("2024-03-01T09:05:07Z")).unwrap();
    assert_eq!(default_name(created), "Canvas 2024-03-01 09:05:07 UTC");
}
