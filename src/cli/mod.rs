use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{LedgerEngine, LedgerError};
use crate::config::Settings;
use crate::domain::{
    DEFAULT_CURRENCY, EntryKind, HistoryPage, LedgerEntry, User, UserId, Wallet, WalletId,
    build_integrity_report, format_cents, parse_cents,
};
use crate::storage::{SqliteStore, UserStore, WalletStore};

/// Users created by `coffer seed`, each with 1000.00 in their wallet.
const SEED_USERS: [(&str, &str); 3] = [
    ("alice", "alice@example.com"),
    ("bob", "bob@example.com"),
    ("charlie", "charlie@example.com"),
];
const SEED_BALANCE: &str = "1000.00";

/// Coffer - wallet ledger
#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Per-user wallets with an append-only ledger of every balance change")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Create the demo users alice, bob and charlie
    Seed,

    /// Add money to a user's wallet
    Deposit {
        /// User id or username
        user: String,

        /// Amount (e.g., "50.00" or "50")
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Note stored with the ledger entry
        #[arg(short = 'n', long)]
        note: Option<String>,
    },

    /// Take money out of a user's wallet
    Withdraw {
        /// User id or username
        user: String,

        /// Amount (e.g., "50.00" or "50")
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Note stored with the ledger entry
        #[arg(short = 'n', long)]
        note: Option<String>,
    },

    /// Move money between two users
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Sending user id or username
        #[arg(long)]
        from: String,

        /// Receiving user id or username
        #[arg(long)]
        to: String,

        /// Note stored with the ledger entry
        #[arg(short = 'n', long)]
        note: Option<String>,
    },

    /// Show a user's balance
    Balance {
        /// User id or username
        user: String,
    },

    /// List a user's ledger entries, newest first
    History {
        /// User id or username
        user: String,

        /// Page size (defaults to 10)
        #[arg(short, long, allow_hyphen_values = true)]
        limit: Option<i64>,

        /// Entries to skip
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Verify that stored balances match the ledger
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user together with their wallet
    Create {
        /// Username (must be unique)
        username: String,

        /// Email address
        email: String,

        /// Currency code of the wallet
        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Opening balance (e.g., "100.00")
        #[arg(long, default_value = "0")]
        opening: String,
    },

    /// Show a user and their wallet
    Show {
        /// User id or username
        user: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let settings = self.settings;
        let url = settings.database_url();

        match self.command {
            Commands::Init => {
                SqliteStore::init(&url).await?;
                println!("Database initialized: {}", settings.database);
            }

            Commands::User(user_cmd) => {
                let store = SqliteStore::connect(&url).await?;
                run_user_command(&store, user_cmd).await?;
            }

            Commands::Seed => {
                let store = SqliteStore::init(&url).await?;
                run_seed_command(&store).await?;
            }

            Commands::Deposit { user, amount, note } => {
                let store = SqliteStore::connect(&url).await?;
                let user = resolve_user(&store, &user).await?;
                let amount = parse_amount(&amount)?;
                let engine = settings.build_engine(store).await?;

                let entry = engine
                    .deposit(user.id, amount, note.as_deref().unwrap_or(""))
                    .await?;
                println!(
                    "Deposited {} to {}: balance {} (entry {})",
                    format_cents(entry.amount),
                    user.username,
                    format_cents(entry.balance_after),
                    entry.id
                );
            }

            Commands::Withdraw { user, amount, note } => {
                let store = SqliteStore::connect(&url).await?;
                let user = resolve_user(&store, &user).await?;
                let amount = parse_amount(&amount)?;
                let engine = settings.build_engine(store).await?;

                let entry = engine
                    .withdraw(user.id, amount, note.as_deref().unwrap_or(""))
                    .await?;
                println!(
                    "Withdrew {} from {}: balance {} (entry {})",
                    format_cents(entry.amount),
                    user.username,
                    format_cents(entry.balance_after),
                    entry.id
                );
            }

            Commands::Transfer {
                amount,
                from,
                to,
                note,
            } => {
                let store = SqliteStore::connect(&url).await?;
                let sender = resolve_user(&store, &from).await?;
                let receiver = resolve_user(&store, &to).await?;
                let amount = parse_amount(&amount)?;
                let engine = settings.build_engine(store).await?;

                let entry = engine
                    .transfer(sender.id, receiver.id, amount, note.as_deref().unwrap_or(""))
                    .await?;
                println!(
                    "Transferred {} {} -> {} (entry {})",
                    format_cents(entry.amount),
                    sender.username,
                    receiver.username,
                    entry.id
                );
            }

            Commands::Balance { user } => {
                let store = SqliteStore::connect(&url).await?;
                let user = resolve_user(&store, &user).await?;
                let engine = settings.build_engine(store).await?;

                let wallet = engine.get_balance(user.id).await?;
                println!(
                    "{}: {} {}",
                    user.username,
                    format_cents(wallet.balance),
                    wallet.currency
                );
            }

            Commands::History {
                user,
                limit,
                offset,
                format,
            } => {
                let store = SqliteStore::connect(&url).await?;
                let user = resolve_user(&store, &user).await?;
                let wallet = store
                    .get_wallet_by_user(user.id)
                    .await?
                    .ok_or(LedgerError::WalletNotFound(user.id))?;
                let engine = settings.build_engine(store).await?;
                run_history_command(&engine, &user, &wallet, limit.unwrap_or(0), offset, &format)
                    .await?;
            }

            Commands::Check => {
                let store = SqliteStore::connect(&url).await?;
                run_check_command(&store).await?;
            }
        }

        Ok(())
    }
}

async fn run_user_command(store: &SqliteStore, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            username,
            email,
            currency,
            opening,
        } => {
            let opening = parse_cents(&opening)
                .context("Invalid opening balance. Use '100.00' or '100'")?;
            if opening < 0 {
                anyhow::bail!("Opening balance cannot be negative");
            }
            if store.get_user_by_username(&username).await?.is_some() {
                anyhow::bail!("User already exists: {}", username);
            }

            let (user, wallet) = store
                .create_user(&username, &email, &currency.to_uppercase(), opening)
                .await?;
            println!(
                "Created user: {} (id {}) with wallet {} holding {} {}",
                user.username,
                user.id,
                wallet.id,
                format_cents(wallet.balance),
                wallet.currency
            );
        }

        UserCommands::Show { user } => {
            let user = resolve_user(store, &user).await?;
            let wallet = store
                .get_wallet_by_user(user.id)
                .await?
                .ok_or(LedgerError::WalletNotFound(user.id))?;
            print_user(&user, &wallet);
        }
    }
    Ok(())
}

async fn run_seed_command(store: &SqliteStore) -> Result<()> {
    let opening = parse_cents(SEED_BALANCE)?;
    for (username, email) in SEED_USERS {
        if store.get_user_by_username(username).await?.is_some() {
            println!("Skipped {}: already exists", username);
            continue;
        }
        let (user, wallet) = store
            .create_user(username, email, DEFAULT_CURRENCY, opening)
            .await?;
        println!(
            "Created {} (id {}) with {} {}",
            user.username,
            user.id,
            format_cents(wallet.balance),
            wallet.currency
        );
    }
    Ok(())
}

async fn run_history_command(
    engine: &LedgerEngine,
    user: &User,
    wallet: &Wallet,
    limit: i64,
    offset: i64,
    format: &str,
) -> Result<()> {
    let page = engine.get_history(user.id, limit, offset).await?;

    match format {
        "table" => print_history_table(user, wallet, &page),
        "json" => crate::io::write_history_json(&page, std::io::stdout())?,
        "csv" => {
            crate::io::write_entries_csv(&page.entries, std::io::stdout())?;
        }
        _ => anyhow::bail!(
            "Invalid format '{}'. Valid formats: table, json, csv",
            format
        ),
    }
    Ok(())
}

fn print_history_table(user: &User, wallet: &Wallet, page: &HistoryPage) {
    if page.entries.is_empty() {
        println!("No transactions found for {}.", user.username);
        return;
    }

    println!(
        "{:<6} {:<20} {:<10} {:>12} {:>12} DESCRIPTION",
        "ID", "TIME", "TYPE", "AMOUNT", "BALANCE"
    );
    println!("{}", "-".repeat(76));
    for entry in &page.entries {
        print_history_row(entry, wallet.id);
    }
    println!(
        "\nShowing {} of {} (offset {}, limit {})",
        page.entries.len(),
        page.total,
        page.offset,
        page.limit
    );
}

fn print_history_row(entry: &LedgerEntry, wallet_id: WalletId) {
    // Balances are recorded for the source wallet only
    let incoming = entry.kind == EntryKind::Transfer && entry.dest_wallet_id == Some(wallet_id);

    let (amount, balance) = if incoming {
        (format!("+{}", format_cents(entry.amount)), String::new())
    } else {
        let sign = if entry.kind == EntryKind::Deposit { "+" } else { "-" };
        (
            format!("{}{}", sign, format_cents(entry.amount)),
            format_cents(entry.balance_after),
        )
    };

    println!(
        "{:<6} {:<20} {:<10} {:>12} {:>12} {}",
        entry.id,
        entry.transaction_time.format("%Y-%m-%d %H:%M:%S"),
        entry.kind,
        amount,
        balance,
        truncate(&entry.description, 30)
    );
}

async fn run_check_command(store: &SqliteStore) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let wallets = store.list_wallets().await?;
    let entries = store.list_all_entries().await?;
    let report = build_integrity_report(&wallets, &entries);

    println!("Wallets:      {}", report.wallet_count);
    println!("Entries:      {}", report.entry_count);
    println!("Total held:   {}", format_cents(report.total_balance));
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

fn print_user(user: &User, wallet: &Wallet) {
    println!("User:     {} (id {})", user.username, user.id);
    println!("Email:    {}", user.email);
    println!("Created:  {}", user.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Wallet:   {}", wallet.id);
    println!(
        "Balance:  {} {}",
        format_cents(wallet.balance),
        wallet.currency
    );
}

/// Accept either a username or a numeric user id. Usernames win, so an
/// all-digit username still resolves to its owner.
async fn resolve_user(store: &SqliteStore, user: &str) -> Result<User, LedgerError> {
    if let Some(found) = store.get_user_by_username(user).await? {
        return Ok(found);
    }
    match user.parse::<UserId>() {
        Ok(id) => store
            .get_user(id)
            .await?
            .ok_or(LedgerError::UserNotFound(id)),
        Err(_) => Err(LedgerError::UsernameNotFound(user.to_string())),
    }
}

fn parse_amount(amount: &str) -> Result<i64> {
    parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
