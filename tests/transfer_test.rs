mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use coffer::application::LedgerError;
use coffer::cache::{BalanceCache, balance_key};
use coffer::domain::{EntryKind, build_integrity_report};
use coffer::lock::{MemoryLock, NamedLock, lock_name};
use coffer::storage::EntryStore;
use common::{FailingLock, StalledStore, WalletlessStore, test_engine_with, test_ledger};

const TTL: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_transfer_moves_money() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 10000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 5000).await?;

    let entry = ledger.engine.transfer(alice.id, bob.id, 3000, "lunch").await?;

    assert_eq!(ledger.stored_balance(alice.id).await?, 7000);
    assert_eq!(ledger.stored_balance(bob.id).await?, 8000);

    assert_eq!(entry.kind, EntryKind::Transfer);
    assert_eq!(entry.wallet_id, alice_wallet.id);
    assert_eq!(entry.dest_wallet_id, Some(bob_wallet.id));
    assert_eq!(entry.amount, 3000);
    assert_eq!(entry.balance_before, 10000);
    assert_eq!(entry.balance_after, 7000);
    assert_eq!(entry.description, "lunch");

    // Exactly one transfer entry, visible to both wallets
    let (alice_entries, _) = ledger
        .store
        .list_entries_by_wallet(alice_wallet.id, 10, 0)
        .await?;
    let (bob_entries, _) = ledger
        .store
        .list_entries_by_wallet(bob_wallet.id, 10, 0)
        .await?;
    let transfers: Vec<_> = alice_entries
        .iter()
        .filter(|e| e.kind == EntryKind::Transfer)
        .collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, entry.id);
    assert!(bob_entries.iter().any(|e| e.id == entry.id));
    Ok(())
}

#[tokio::test]
async fn test_transfer_conserves_total() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 12345).await?;
    let (bob, _) = ledger.user("bob", 678).await?;
    let total = 12345 + 678;

    for (from, to, amount) in [
        (alice.id, bob.id, 1),
        (bob.id, alice.id, 679),
        (alice.id, bob.id, 13023),
        (bob.id, alice.id, 5000),
    ] {
        ledger.engine.transfer(from, to, amount, "").await?;
        let sum = ledger.stored_balance(alice.id).await? + ledger.stored_balance(bob.id).await?;
        assert_eq!(sum, total);
    }
    Ok(())
}

#[tokio::test]
async fn test_transfer_to_self_is_rejected() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 10000).await?;

    assert!(matches!(
        ledger.engine.transfer(alice.id, alice.id, 100, "").await,
        Err(LedgerError::SameSenderReceiver)
    ));
    assert_eq!(ledger.stored_balance(alice.id).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_transfer_rejects_non_positive_amount() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 10000).await?;
    let (bob, _) = ledger.user("bob", 0).await?;

    for amount in [0, -500] {
        assert!(matches!(
            ledger.engine.transfer(alice.id, bob.id, amount, "").await,
            Err(LedgerError::InvalidAmount)
        ));
    }
    assert_eq!(ledger.stored_balance(alice.id).await?, 10000);
    assert_eq!(ledger.stored_balance(bob.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_transfer_insufficient_funds_changes_nothing() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 1000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 5000).await?;
    let entries_before = ledger.entry_count().await?;

    let result = ledger.engine.transfer(alice.id, bob.id, 1001, "").await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(ledger.stored_balance(alice.id).await?, 1000);
    assert_eq!(ledger.stored_balance(bob.id).await?, 5000);
    assert_eq!(ledger.entry_count().await?, entries_before);

    // Locks were released on the error path
    assert!(!ledger.locks.is_held(&lock_name(alice_wallet.id)));
    assert!(!ledger.locks.is_held(&lock_name(bob_wallet.id)));
    Ok(())
}

#[tokio::test]
async fn test_transfer_to_unknown_user() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 1000).await?;

    assert!(matches!(
        ledger.engine.transfer(alice.id, 999, 100, "").await,
        Err(LedgerError::UserNotFound(999))
    ));
    assert!(matches!(
        ledger.engine.transfer(999, alice.id, 100, "").await,
        Err(LedgerError::UserNotFound(999))
    ));
    assert_eq!(ledger.stored_balance(alice.id).await?, 1000);
    Ok(())
}

#[tokio::test]
async fn test_transfer_with_walletless_user() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 10000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 5000).await?;
    let entries_before = ledger.entry_count().await?;

    for missing in [alice.id, bob.id] {
        let engine = ledger.engine_over(Arc::new(WalletlessStore {
            inner: ledger.store.clone(),
            missing,
        }));

        let result = engine.transfer(alice.id, bob.id, 1000, "").await;
        assert!(
            matches!(result, Err(LedgerError::WalletNotFound(id)) if id == missing),
            "missing wallet of user {}: {:?}",
            missing,
            result
        );
    }

    assert_eq!(ledger.stored_balance(alice.id).await?, 10000);
    assert_eq!(ledger.stored_balance(bob.id).await?, 5000);
    assert_eq!(ledger.entry_count().await?, entries_before);
    assert!(!ledger.locks.is_held(&lock_name(alice_wallet.id)));
    assert!(!ledger.locks.is_held(&lock_name(bob_wallet.id)));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_transfer_releases_locks() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 10000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 0).await?;
    let entries_before = ledger.entry_count().await?;

    let store = Arc::new(StalledStore::new(ledger.store.clone()));
    let engine = ledger.engine_over(store.clone());

    // The caller gives up while the commit is still in flight
    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        engine.transfer(alice.id, bob.id, 3000, ""),
    )
    .await;
    assert!(attempt.is_err(), "transfer should still be waiting on its commit");
    assert_eq!(store.commits_started(), 1);

    // Let the releases spawned by the dropped guard run
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!ledger.locks.is_held(&lock_name(alice_wallet.id)));
    assert!(!ledger.locks.is_held(&lock_name(bob_wallet.id)));

    assert_eq!(ledger.stored_balance(alice.id).await?, 10000);
    assert_eq!(ledger.stored_balance(bob.id).await?, 0);
    assert_eq!(ledger.entry_count().await?, entries_before);

    // The pair is free for the next transfer
    ledger.engine.transfer(alice.id, bob.id, 3000, "").await?;
    assert_eq!(ledger.stored_balance(bob.id).await?, 3000);
    Ok(())
}

#[tokio::test]
async fn test_transfer_releases_locks() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 10000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 0).await?;

    ledger.engine.transfer(alice.id, bob.id, 100, "").await?;

    assert!(!ledger.locks.is_held(&lock_name(alice_wallet.id)));
    assert!(!ledger.locks.is_held(&lock_name(bob_wallet.id)));
    Ok(())
}

#[tokio::test]
async fn test_locked_wallet_is_unavailable() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 10000).await?;
    let (bob, bob_wallet) = ledger.user("bob", 0).await?;
    let entries_before = ledger.entry_count().await?;

    // Another transfer is holding bob's wallet
    let token = ledger
        .locks
        .try_acquire(&lock_name(bob_wallet.id), TTL)
        .await?
        .expect("lock should be free");

    let result = ledger.engine.transfer(alice.id, bob.id, 100, "").await;
    let err = result.unwrap_err();
    assert!(matches!(err, LedgerError::LockUnavailable));
    assert!(err.is_retryable());
    assert_eq!(ledger.stored_balance(alice.id).await?, 10000);
    assert_eq!(ledger.entry_count().await?, entries_before);

    ledger
        .locks
        .release(&lock_name(bob_wallet.id), &token)
        .await?;
    ledger.engine.transfer(alice.id, bob.id, 100, "").await?;
    assert_eq!(ledger.stored_balance(bob.id).await?, 100);
    Ok(())
}

#[tokio::test]
async fn test_deposit_does_not_need_locks() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, alice_wallet) = ledger.user("alice", 0).await?;

    ledger
        .locks
        .try_acquire(&lock_name(alice_wallet.id), TTL)
        .await?;

    ledger.engine.deposit(alice.id, 100, "").await?;
    ledger.engine.withdraw(alice.id, 40, "").await?;
    assert_eq!(ledger.stored_balance(alice.id).await?, 60);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_lock_service_is_unavailable() -> Result<()> {
    let (engine, store, _temp) =
        test_engine_with(Arc::new(coffer::cache::NoCache), Arc::new(FailingLock)).await?;
    let (alice, _) = store.create_user("alice", "a@example.com", "USD", 1000).await?;
    let (bob, _) = store.create_user("bob", "b@example.com", "USD", 0).await?;

    assert!(matches!(
        engine.transfer(alice.id, bob.id, 100, "").await,
        Err(LedgerError::LockUnavailable)
    ));
    Ok(())
}

#[tokio::test]
async fn test_transfer_invalidates_both_balances() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 10000).await?;
    let (bob, _) = ledger.user("bob", 5000).await?;

    ledger.engine.get_balance(alice.id).await?;
    ledger.engine.get_balance(bob.id).await?;
    assert_eq!(ledger.cache.len(), 2);

    ledger.engine.transfer(alice.id, bob.id, 3000, "").await?;

    assert!(ledger.cache.get(&balance_key(alice.id)).await?.is_none());
    assert!(ledger.cache.get(&balance_key(bob.id)).await?.is_none());
    assert_eq!(ledger.engine.get_balance(alice.id).await?.balance, 7000);
    assert_eq!(ledger.engine.get_balance(bob.id).await?.balance, 8000);
    Ok(())
}

#[tokio::test]
async fn test_ledger_explains_balances_after_mixed_activity() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let (alice, _) = ledger.user("alice", 10000).await?;
    let (bob, _) = ledger.user("bob", 5000).await?;
    let (carol, _) = ledger.user("carol", 0).await?;

    ledger.engine.deposit(carol.id, 2500, "").await?;
    ledger.engine.transfer(alice.id, bob.id, 3000, "").await?;
    ledger.engine.transfer(bob.id, carol.id, 7999, "").await?;
    ledger.engine.withdraw(carol.id, 10000, "").await?;
    let _ = ledger.engine.withdraw(alice.id, 1_000_000, "").await;

    let wallets = ledger.store.list_wallets().await?;
    let entries = ledger.store.list_all_entries().await?;
    let report = build_integrity_report(&wallets, &entries);

    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.total_balance, 10000 + 5000 + 2500 - 10000);
    Ok(())
}

#[tokio::test]
async fn test_memory_lock_is_shared_across_engines() -> Result<()> {
    // Two engines over the same database and lock table behave like two nodes
    let locks = Arc::new(MemoryLock::new());
    let (first, store, _temp) =
        test_engine_with(Arc::new(coffer::cache::NoCache), locks.clone()).await?;
    let second = coffer::application::LedgerEngine::new(
        Arc::new(store.clone()),
        Arc::new(coffer::cache::NoCache),
        locks.clone(),
        Default::default(),
    );
    let (alice, wallet) = store.create_user("alice", "a@example.com", "USD", 1000).await?;
    let (bob, _) = store.create_user("bob", "b@example.com", "USD", 0).await?;

    let token = locks.try_acquire(&lock_name(wallet.id), TTL).await?.unwrap();
    assert!(matches!(
        first.transfer(alice.id, bob.id, 1, "").await,
        Err(LedgerError::LockUnavailable)
    ));
    assert!(matches!(
        second.transfer(bob.id, alice.id, 1, "").await,
        Err(LedgerError::LockUnavailable)
    ));
    locks.release(&lock_name(wallet.id), &token).await?;

    second.transfer(alice.id, bob.id, 1, "").await?;
    Ok(())
}
