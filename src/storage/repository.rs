use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::domain::{
    BalanceChange, BalanceError, Cents, EntryKind, LedgerEntry, Posting, User, UserId, Wallet,
    WalletId,
};

use super::{CommitOutcome, EntryStore, UserStore, WalletStore, MIGRATION_001_INITIAL};

const ENTRY_COLUMNS: &str = "id, wallet_id, dest_wallet_id, type, amount, balance_before, balance_after, description, transaction_time, created_at";
const WALLET_COLUMNS: &str = "id, user_id, balance, currency, version, created_at, updated_at";

/// How long a writer waits for SQLite's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed ledger store: users, wallets and the append-only
/// transactions table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    // ========================
    // User operations
    // ========================

    /// Create a user together with their wallet.
    ///
    /// A positive opening balance is recorded as a deposit entry so the
    /// wallet's balance is always explained by its ledger.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        currency: &str,
        opening_balance: Cents,
    ) -> Result<(User, Wallet)> {
        anyhow::ensure!(opening_balance >= 0, "Opening balance cannot be negative");

        let now = db_now();
        let stamp = to_db_time(now);
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin user transaction")?;

        let user_id = sqlx::query(
            "INSERT INTO users (username, email, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut *tx)
        .await
        .context("Failed to save user")?
        .last_insert_rowid();

        let version = if opening_balance > 0 { 1 } else { 0 };
        let wallet_id = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance, currency, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(opening_balance)
        .bind(currency)
        .bind(version)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut *tx)
        .await
        .context("Failed to save wallet")?
        .last_insert_rowid();

        if opening_balance > 0 {
            sqlx::query(
                r#"
                INSERT INTO transactions (wallet_id, dest_wallet_id, type, amount, balance_before, balance_after, description, transaction_time, created_at)
                VALUES (?, NULL, ?, ?, 0, ?, 'opening balance', ?, ?)
                "#,
            )
            .bind(wallet_id)
            .bind(EntryKind::Deposit.as_str())
            .bind(opening_balance)
            .bind(opening_balance)
            .bind(&stamp)
            .bind(&stamp)
            .execute(&mut *tx)
            .await
            .context("Failed to record opening balance")?;
        }

        tx.commit().await.context("Failed to commit new user")?;

        let user = User {
            id: user_id,
            username: username.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        };
        let wallet = Wallet {
            id: wallet_id,
            user_id,
            balance: opening_balance,
            currency: currency.to_string(),
            version,
            created_at: now,
            updated_at: now,
        };
        Ok((user, wallet))
    }

    /// Get a user by username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by username")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    // ========================
    // Wallet operations
    // ========================

    /// List all wallets, ordered by id.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(&format!("SELECT {} FROM wallets ORDER BY id", WALLET_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list wallets")?;

        rows.iter().map(Self::row_to_wallet).collect()
    }

    // ========================
    // Ledger operations
    // ========================

    /// List every ledger entry in insertion order.
    pub async fn list_all_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY id",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            created_at: parse_db_time(row.get("created_at"))?,
            updated_at: parse_db_time(row.get("updated_at"))?,
        })
    }

    fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
        Ok(Wallet {
            id: row.get("id"),
            user_id: row.get("user_id"),
            balance: row.get("balance"),
            currency: row.get("currency"),
            version: row.get("version"),
            created_at: parse_db_time(row.get("created_at"))?,
            updated_at: parse_db_time(row.get("updated_at"))?,
        })
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let kind_str: String = row.get("type");

        Ok(LedgerEntry {
            id: row.get("id"),
            wallet_id: row.get("wallet_id"),
            dest_wallet_id: row.get("dest_wallet_id"),
            kind: EntryKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", kind_str))?,
            amount: row.get("amount"),
            balance_before: row.get("balance_before"),
            balance_after: row.get("balance_after"),
            description: row.get("description"),
            transaction_time: parse_db_time(row.get("transaction_time"))?,
            created_at: parse_db_time(row.get("created_at"))?,
        })
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }
}

#[async_trait]
impl WalletStore for SqliteStore {
    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallets WHERE user_id = ?",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet by user")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!("SELECT {} FROM wallets WHERE id = ?", WALLET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    async fn commit(&self, posting: &Posting) -> Result<CommitOutcome> {
        let stamp = to_db_time(db_now());
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin posting transaction")?;

        // The first UPDATE takes SQLite's write lock, so each check below runs
        // against the latest committed balance and no writer can slip in
        // before the entry is appended.
        let mut source_after = None;
        for change in &posting.changes {
            let (low, high) = change.allowed_range();
            let after: Option<Cents> = sqlx::query(
                r#"
                UPDATE wallets
                SET balance = balance + ?, version = version + 1, updated_at = ?
                WHERE id = ? AND balance BETWEEN ? AND ?
                RETURNING balance
                "#,
            )
            .bind(change.delta)
            .bind(&stamp)
            .bind(change.wallet_id)
            .bind(low)
            .bind(high)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to update wallet balance")?
            .map(|row| row.get("balance"));

            let Some(after) = after else {
                let reason = rejection(&mut *tx, change).await?;
                tx.rollback()
                    .await
                    .context("Failed to roll back posting")?;
                debug!(wallet_id = change.wallet_id, %reason, "posting rejected");
                return Ok(CommitOutcome::Rejected {
                    wallet_id: change.wallet_id,
                    reason,
                });
            };
            if source_after.is_none() {
                source_after = Some(after);
            }
        }

        // Stamped under the write lock so entry times follow commit order
        let now = db_now();
        let entry = source_after
            .and_then(|after| posting.record(after, now))
            .context("Posting has no balance changes")?;

        let entry_id = sqlx::query(
            r#"
            INSERT INTO transactions (wallet_id, dest_wallet_id, type, amount, balance_before, balance_after, description, transaction_time, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.wallet_id)
        .bind(entry.dest_wallet_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(to_db_time(entry.transaction_time))
        .bind(to_db_time(now))
        .execute(&mut *tx)
        .await
        .context("Failed to append ledger entry")?
        .last_insert_rowid();

        tx.commit().await.context("Failed to commit posting")?;

        Ok(CommitOutcome::Committed(entry.into_entry(entry_id, now)))
    }
}

/// Why `change` did not apply, read inside the posting's transaction.
async fn rejection(conn: &mut SqliteConnection, change: &BalanceChange) -> Result<BalanceError> {
    let balance: Cents = sqlx::query("SELECT balance FROM wallets WHERE id = ?")
        .bind(change.wallet_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read wallet balance")?
        .map(|row| row.get("balance"))
        .with_context(|| format!("Wallet {} not found", change.wallet_id))?;

    match change.apply_to(balance) {
        Err(reason) => Ok(reason),
        Ok(_) => anyhow::bail!(
            "Wallet {} rejected a change its balance allows",
            change.wallet_id
        ),
    }
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn list_entries_by_wallet(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64)> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE wallet_id = ? OR dest_wallet_id = ?
            ORDER BY transaction_time DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            ENTRY_COLUMNS
        ))
        .bind(wallet_id)
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list ledger entries for wallet")?;

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM transactions WHERE wallet_id = ? OR dest_wallet_id = ?",
        )
        .bind(wallet_id)
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count ledger entries for wallet")?
        .get("total");

        let entries = rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }
}

/// Current time at the precision the database stores.
fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}
