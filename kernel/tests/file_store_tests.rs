mod common;

use common::LedgerFixture;
use ledger_kernel::log::FileCommitStore;
use ledger_kernel::{Bucket, CommitFilter, Ledger, LedgerError, StreamId};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

async fn fixture_at(path: &Path) -> LedgerFixture {
    LedgerFixture::with_store(Arc::new(FileCommitStore::open(path).await.unwrap()))
}

/// The same bucket seen through a freshly opened store, as after a restart.
async fn reopen(path: &Path, bucket_name: &str) -> (Ledger, Bucket) {
    let ledger = Ledger::new(Arc::new(FileCommitStore::open(path).await.unwrap()));
    let bucket = ledger.bucket(bucket_name).unwrap();
    (ledger, bucket)
}

#[tokio::test]
async fn written_streams_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let fixture = fixture_at(&path).await;
    let stream = StreamId::new();

    for (expected, value) in ["v1", "v2", "v3"].iter().enumerate() {
        fixture
            .bucket
            .write(stream, expected as i64, vec![json!({ "n1": value })])
            .await
            .unwrap()
            .dispatch
            .await
            .unwrap();
    }

    let (_ledger, bucket) = reopen(&path, &fixture.bucket_name).await;

    assert_eq!(bucket.bucket_revision().await.unwrap(), 3);
    assert_eq!(bucket.stream_revision(&stream).await.unwrap(), 3);
    assert_eq!(bucket.events(&stream).await.unwrap().len(), 3);
    assert!(!bucket.has_undispatched_commits().await.unwrap());

    let err = bucket.write(stream, 1, vec![json!({ "n1": "late" })]).await.unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrencyConflict { current: 3, .. }));

    let next = bucket.write(stream, 3, vec![json!({ "n1": "v4" })]).await.unwrap();
    assert_eq!(next.commit.bucket_revision, 4);
}

#[tokio::test]
async fn stream_heads_are_enforced_after_restart_without_pre_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let fixture = fixture_at(&path).await;
    let stream = StreamId::new();

    fixture
        .bucket
        .write(stream, 0, vec![json!({ "n1": "v1" }), json!({ "n1": "v2" })])
        .await
        .unwrap()
        .dispatch
        .await
        .unwrap();

    let (_ledger, mut bucket) = reopen(&path, &fixture.bucket_name).await;
    bucket.set_check_stream_revision_before_writing(false);

    let err = bucket.write(stream, 1, vec![json!({ "n1": "x" })]).await.unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrencyConflict { current: 2, .. }));
    let err = bucket.write(stream, 5, vec![json!({ "n1": "x" })]).await.unwrap_err();
    assert!(matches!(err, LedgerError::NonSequential { current: 2, .. }));
    assert_eq!(bucket.bucket_revision().await.unwrap(), 1);
}

#[tokio::test]
async fn failed_dispatch_keeps_writes_blocked_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let fixture = fixture_at(&path).await;
    let stream = StreamId::new();

    fixture.dispatcher.fail(true);
    let result = fixture.bucket.write(stream, 0, vec![json!({ "n1": "v1" })]).await.unwrap();
    assert!(result.dispatch.await.is_err());

    let (ledger, bucket) = reopen(&path, &fixture.bucket_name).await;
    assert!(bucket.has_undispatched_commits().await.unwrap());

    let err = bucket.write(stream, 1, vec![json!({ "n1": "v2" })]).await.unwrap_err();
    assert!(matches!(err, LedgerError::UndispatchedEventsPending { .. }));

    // No dispatchers on the reopened ledger: the sweep only has to mark.
    let report = bucket.dispatch_undispatched().await.unwrap();
    assert_eq!(report.dispatched, 1);

    let meta = ledger.store().bucket_meta(&fixture.bucket_name).await.unwrap().unwrap();
    assert!(!meta.dispatch_blocked);
    bucket.write(stream, 1, vec![json!({ "n1": "v2" })]).await.unwrap();
}

#[tokio::test]
async fn rollback_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let fixture = fixture_at(&path).await;
    let stream = StreamId::new();

    for (expected, value) in ["v1", "v2", "v3"].iter().enumerate() {
        fixture
            .bucket
            .write(stream, expected as i64, vec![json!({ "n1": value })])
            .await
            .unwrap()
            .dispatch
            .await
            .unwrap();
    }
    let report = fixture.bucket.rollback(1).await.unwrap();
    assert_eq!(report.removed, 2);

    let (_ledger, bucket) = reopen(&path, &fixture.bucket_name).await;

    assert_eq!(bucket.bucket_revision().await.unwrap(), 1);
    assert_eq!(bucket.stream_revision(&stream).await.unwrap(), 1);
    assert!(bucket.commits(&CommitFilter::all().from(2)).await.unwrap().is_empty());

    let next = bucket.write(stream, 1, vec![json!({ "n1": "v4" })]).await.unwrap();
    assert_eq!(next.commit.bucket_revision, 2);
    assert_eq!(next.commit.stream_revision_start, 2);
}

#[tokio::test]
async fn rollback_of_failed_commit_unblocks_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let fixture = fixture_at(&path).await;
    let stream = StreamId::new();

    fixture
        .bucket
        .write(stream, 0, vec![json!({ "n1": "v1" })])
        .await
        .unwrap()
        .dispatch
        .await
        .unwrap();
    fixture.dispatcher.fail(true);
    let failed = fixture.bucket.write(stream, 1, vec![json!({ "n1": "v2" })]).await.unwrap();
    assert!(failed.dispatch.await.is_err());

    fixture.bucket.rollback(1).await.unwrap();

    let (_ledger, bucket) = reopen(&path, &fixture.bucket_name).await;
    assert!(!bucket.has_undispatched_commits().await.unwrap());
    let next = bucket.write(stream, 1, vec![json!({ "n1": "v3" })]).await.unwrap();
    assert_eq!(next.commit.bucket_revision, 2);
}
