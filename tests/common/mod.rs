// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use coffer::application::{EngineConfig, LedgerEngine};
use coffer::cache::{BalanceCache, MemoryCache};
use coffer::domain::{Cents, LedgerEntry, Posting, User, UserId, Wallet, WalletId};
use coffer::lock::{LockToken, MemoryLock, NamedLock};
use coffer::storage::{
    CommitOutcome, EntryStore, LedgerStore, SqliteStore, UserStore, WalletStore,
};
use tempfile::TempDir;

/// An engine over a temporary database, with handles on its backends.
pub struct TestLedger {
    pub engine: LedgerEngine,
    pub store: SqliteStore,
    pub cache: Arc<MemoryCache>,
    pub locks: Arc<MemoryLock>,
}

impl TestLedger {
    /// Create a user whose wallet opens with `balance` cents.
    pub async fn user(&self, username: &str, balance: Cents) -> Result<(User, Wallet)> {
        self.store
            .create_user(username, &format!("{}@example.com", username), "USD", balance)
            .await
    }

    /// Stored balance, bypassing the cache.
    pub async fn stored_balance(&self, user_id: UserId) -> Result<Cents> {
        let wallet = self
            .store
            .get_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| anyhow!("no wallet for user {}", user_id))?;
        Ok(wallet.balance)
    }

    pub async fn entry_count(&self) -> Result<usize> {
        Ok(self.store.list_all_entries().await?.len())
    }

    /// A second engine over `store`, sharing this ledger's cache and locks.
    pub fn engine_over(&self, store: Arc<dyn LedgerStore>) -> LedgerEngine {
        LedgerEngine::new(
            store,
            self.cache.clone(),
            self.locks.clone(),
            EngineConfig::default(),
        )
    }
}

async fn test_store() -> Result<(SqliteStore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::init(&format!("sqlite:{}", db_path.display())).await?;
    Ok((store, temp_dir))
}

/// Helper to create a test engine with a temporary database and in-memory
/// cache and locks
pub async fn test_ledger() -> Result<(TestLedger, TempDir)> {
    let (store, temp_dir) = test_store().await?;
    let cache = Arc::new(MemoryCache::new());
    let locks = Arc::new(MemoryLock::new());
    let engine = LedgerEngine::new(
        Arc::new(store.clone()),
        cache.clone(),
        locks.clone(),
        EngineConfig::default(),
    );
    Ok((
        TestLedger {
            engine,
            store,
            cache,
            locks,
        },
        temp_dir,
    ))
}

/// Helper to create a test engine with the given cache and locks
pub async fn test_engine_with(
    cache: Arc<dyn BalanceCache>,
    locks: Arc<dyn NamedLock>,
) -> Result<(LedgerEngine, SqliteStore, TempDir)> {
    let (store, temp_dir) = test_store().await?;
    let engine = LedgerEngine::new(
        Arc::new(store.clone()),
        cache,
        locks,
        EngineConfig::default(),
    );
    Ok((engine, store, temp_dir))
}

/// A cache whose backend is down.
pub struct FailingCache;

#[async_trait]
impl BalanceCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("connection refused"))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn delete(&self, _keys: &[String]) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// A cache that returns garbage for every key.
pub struct CorruptCache;

#[async_trait]
impl BalanceCache for CorruptCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(Some(b"{\"balance\": \"lots\"".to_vec()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}

/// A lock service that cannot be reached.
pub struct FailingLock;

#[async_trait]
impl NamedLock for FailingLock {
    async fn try_acquire(&self, _name: &str, _ttl: Duration) -> Result<Option<LockToken>> {
        Err(anyhow!("lock service unreachable"))
    }

    async fn release(&self, _name: &str, _token: &LockToken) -> Result<()> {
        Err(anyhow!("lock service unreachable"))
    }
}

/// A store where one user exists but their wallet is missing. Every other
/// call goes to the real store.
pub struct WalletlessStore {
    pub inner: SqliteStore,
    pub missing: UserId,
}

#[async_trait]
impl UserStore for WalletlessStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }
}

#[async_trait]
impl WalletStore for WalletlessStore {
    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        if user_id == self.missing {
            return Ok(None);
        }
        self.inner.get_wallet_by_user(user_id).await
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        self.inner.get_wallet(id).await
    }

    async fn commit(&self, posting: &Posting) -> Result<CommitOutcome> {
        self.inner.commit(posting).await
    }
}

#[async_trait]
impl EntryStore for WalletlessStore {
    async fn list_entries_by_wallet(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64)> {
        self.inner
            .list_entries_by_wallet(wallet_id, limit, offset)
            .await
    }
}

/// A store whose commits never finish, as with a hung database.
pub struct StalledStore {
    pub inner: SqliteStore,
    pub commits: AtomicUsize,
}

impl StalledStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
        }
    }

    pub fn commits_started(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for StalledStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }
}

#[async_trait]
impl WalletStore for StalledStore {
    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.inner.get_wallet_by_user(user_id).await
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        self.inner.get_wallet(id).await
    }

    async fn commit(&self, _posting: &Posting) -> Result<CommitOutcome> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[async_trait]
impl EntryStore for StalledStore {
    async fn list_entries_by_wallet(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64)> {
        self.inner
            .list_entries_by_wallet(wallet_id, limit, offset)
            .await
    }
}
