/// Transaction tests
///
/// Lifecycle of a unit of work through the repository: begin, dirty tracking,
/// commit, rollback and failure handling.
/// Run with: cargo test --test transaction_tests

mod common;

use common::{FlakyStore, manual_repository, path};
use repokernel::{
    Clock, KernelConfig, KernelError, ManualClock, Repository, Resource, TransactionInfo,
    TransactionState,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn flaky_repository() -> (Repository, FlakyStore) {
    let store = FlakyStore::new();
    let repo = Repository::with_clock(
        Arc::new(store.clone()),
        KernelConfig::default(),
        Arc::new(ManualClock::default()),
    )
    .unwrap();
    (repo, store)
}

#[tokio::test]
async fn test_create_then_commit() {
    let (repo, _clock) = manual_repository(Duration::from_secs(180));
    let tx = repo.begin_transaction().await.unwrap();
    let handle = repo.transaction(tx).await.unwrap();

    handle
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();
    repo.commit(tx).await.unwrap();

    assert_eq!(
        handle.lock().await.state().await.unwrap(),
        TransactionState::Committed
    );
    assert!(matches!(
        repo.registry().get(tx).await,
        Err(KernelError::TransactionNotFound(_))
    ));
    assert!(repo.get_resource(&path("/a")).await.is_ok());
}

#[tokio::test]
async fn test_state_tracks_pending_changes() {
    let (repo, _clock) = manual_repository(Duration::from_secs(180));
    let tx = repo.begin_transaction().await.unwrap();
    let handle = repo.transaction(tx).await.unwrap();

    assert_eq!(
        handle.lock().await.state().await.unwrap(),
        TransactionState::New
    );

    {
        let mut unit = handle.lock().await;
        unit.put_resource(Resource::container(path("/a"))).await.unwrap();
        assert_eq!(unit.state().await.unwrap(), TransactionState::Dirty);

        unit.delete_resource(&path("/a")).await.unwrap();
        // A staged delete is still a pending change.
        assert_eq!(unit.state().await.unwrap(), TransactionState::Dirty);
    }

    repo.rollback(tx).await.unwrap();
    assert_eq!(
        handle.lock().await.state().await.unwrap(),
        TransactionState::RolledBack
    );
}

#[tokio::test]
async fn test_second_commit_never_double_applies() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    let handle = repo.transaction(tx).await.unwrap();
    handle
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    repo.commit(tx).await.unwrap();
    let err = repo.commit(tx).await.unwrap_err();
    assert!(matches!(err, KernelError::TransactionNotFound(_)));

    let err = handle
        .lock()
        .await
        .put_resource(Resource::container(path("/b")))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::IllegalStateTransition(_)));

    assert_eq!(store.faults.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_commit_keeps_transaction_for_retry() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    repo.transaction(tx)
        .await
        .unwrap()
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    store.faults.fail_save.store(true, Ordering::SeqCst);
    let err = repo.commit(tx).await.unwrap_err();
    assert!(err.is_retryable());

    let info = repo.transaction_info(tx).await.unwrap();
    assert_eq!(info.state, TransactionState::Dirty);
    assert!(repo.get_resource(&path("/a")).await.is_err());

    store.faults.fail_save.store(false, Ordering::SeqCst);
    repo.commit(tx).await.unwrap();
    assert!(repo.get_resource(&path("/a")).await.is_ok());
}

#[tokio::test]
async fn test_failed_commit_can_be_rolled_back() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    repo.transaction(tx)
        .await
        .unwrap()
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    store.faults.fail_save.store(true, Ordering::SeqCst);
    assert!(repo.commit(tx).await.is_err());

    repo.rollback(tx).await.unwrap();
    assert!(repo.registry().is_empty().await);
    assert!(repo.get_resource(&path("/a")).await.is_err());
}

#[tokio::test]
async fn test_failed_rollback_leaves_unit_dirty() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    repo.transaction(tx)
        .await
        .unwrap()
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    store.faults.fail_revert.store(true, Ordering::SeqCst);
    let err = repo.rollback(tx).await.unwrap_err();
    assert!(matches!(err, KernelError::PersistenceFailure(_)));
    assert_eq!(
        repo.transaction_info(tx).await.unwrap().state,
        TransactionState::Dirty
    );

    store.faults.fail_revert.store(false, Ordering::SeqCst);
    repo.rollback(tx).await.unwrap();
}

#[tokio::test]
async fn test_lost_session_evicts_transaction() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    let handle = repo.transaction(tx).await.unwrap();
    handle
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    store.faults.lose_session_on_save.store(true, Ordering::SeqCst);
    let err = repo.commit(tx).await.unwrap_err();
    assert!(matches!(err, KernelError::StoreUnavailable(_)));

    assert!(repo.registry().is_empty().await);
    assert!(matches!(
        repo.registry().get(tx).await,
        Err(KernelError::TransactionNotFound(_))
    ));
    assert!(handle.lock().await.is_released());
    assert!(repo.get_resource(&path("/a")).await.is_err());
}

#[tokio::test]
async fn test_close_failure_does_not_undo_commit() {
    let (repo, store) = flaky_repository();
    let tx = repo.begin_transaction().await.unwrap();
    repo.transaction(tx)
        .await
        .unwrap()
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    store.faults.fail_close.store(true, Ordering::SeqCst);
    repo.commit(tx).await.unwrap();

    assert!(repo.registry().is_empty().await);
    assert!(repo.get_resource(&path("/a")).await.is_ok());
}

#[tokio::test]
async fn test_conflicting_transactions() {
    let (repo, _clock) = manual_repository(Duration::from_secs(180));
    let first = repo.begin_transaction().await.unwrap();
    let second = repo.begin_transaction().await.unwrap();

    for (tx, by) in [(first, "first"), (second, "second")] {
        repo.transaction(tx)
            .await
            .unwrap()
            .lock()
            .await
            .put_resource(Resource::container(path("/shared")).with_property("by", by))
            .await
            .unwrap();
    }

    repo.commit(first).await.unwrap();
    let err = repo.commit(second).await.unwrap_err();
    assert!(matches!(err, KernelError::PersistenceFailure(_)));

    repo.rollback(second).await.unwrap();
    let stored = repo.get_resource(&path("/shared")).await.unwrap();
    assert_eq!(stored.property("by"), Some("first"));
}

#[tokio::test]
async fn test_operations_on_unknown_transaction() {
    let (repo, _clock) = manual_repository(Duration::from_secs(180));
    let unknown = repokernel::TransactionId::new();

    assert!(matches!(
        repo.commit(unknown).await,
        Err(KernelError::TransactionNotFound(_))
    ));
    assert!(matches!(
        repo.rollback(unknown).await,
        Err(KernelError::TransactionNotFound(_))
    ));
    assert!(matches!(
        repo.touch(unknown).await,
        Err(KernelError::TransactionNotFound(_))
    ));
}

#[tokio::test]
async fn test_transaction_info_serializes() {
    let (repo, clock) = manual_repository(Duration::from_secs(180));
    let tx = repo.begin_transaction().await.unwrap();

    let info = repo.transaction_info(tx).await.unwrap();
    assert_eq!(info.created, clock.now());
    assert_eq!(info.expires, clock.now() + chrono::Duration::seconds(180));

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["id"], tx.to_string());
    assert_eq!(json["state"], "NEW");

    let back: TransactionInfo = serde_json::from_value(json).unwrap();
    assert_eq!(back, info);
}

#[tokio::test]
async fn test_activity_renews_expiry() {
    let (repo, clock) = manual_repository(Duration::from_secs(60));
    let tx = repo.begin_transaction().await.unwrap();
    let handle = repo.registry().get(tx).await.unwrap();
    let initial = handle.lock().await.expires_at();

    clock.advance(chrono::Duration::seconds(30));
    handle
        .lock()
        .await
        .put_resource(Resource::container(path("/a")))
        .await
        .unwrap();

    let renewed = handle.lock().await.expires_at();
    assert_eq!(renewed, initial + chrono::Duration::seconds(30));
}
