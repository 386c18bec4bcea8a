//! SQLite Persistent Storage
//!
//! Durable storage for payment intents and ledger accounts that survives
//! service restarts. Uses connection pooling via r2d2 for concurrent access.
//!
//! Amounts are stored as decimal strings, timestamps as unix seconds.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;
use std::time::Duration;

use super::traits::{IntentStore, Ledger, LedgerError, StorageError, StorageResult};
use crate::types::account::{CreditReceipt, LedgerCreditEvent, LedgerStats, UserAccount};
use crate::types::intent::{IntentStats, IntentStatus, PaymentIntent};

/// SQLite-backed payment intent store with connection pooling
pub struct SqliteIntentStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteIntentStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let pool = file_pool(db_path)?;
        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let pool = memory_pool()?;
        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS payment_intents (
                intent_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                rail TEXT NOT NULL,
                amount TEXT NOT NULL,
                correlation_token TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_intents_status ON payment_intents(status);
            CREATE INDEX IF NOT EXISTS idx_intents_token ON payment_intents(correlation_token);
            CREATE INDEX IF NOT EXISTS idx_intents_user ON payment_intents(user_id);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to PaymentIntent
    fn row_to_intent(row: &rusqlite::Row) -> rusqlite::Result<PaymentIntent> {
        let rail_str: String = row.get("rail")?;
        let status_str: String = row.get("status")?;
        let amount_str: String = row.get("amount")?;
        let expires_at = match row.get::<_, Option<i64>>("expires_at")? {
            Some(secs) => Some(ts_to_datetime(secs)?),
            None => None,
        };

        Ok(PaymentIntent {
            intent_id: row.get("intent_id")?,
            user_id: row.get("user_id")?,
            rail: rail_str.parse().map_err(bad_column)?,
            amount: parse_decimal(&amount_str)?,
            correlation_token: row.get("correlation_token")?,
            status: status_str.parse().map_err(bad_column)?,
            created_at: ts_to_datetime(row.get("created_at")?)?,
            expires_at,
            updated_at: ts_to_datetime(row.get("updated_at")?)?,
        })
    }

    // Synchronous helper methods for the trait implementation

    fn insert_sync(&self, intent: &PaymentIntent) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO payment_intents (
                intent_id, user_id, rail, amount, correlation_token,
                status, created_at, expires_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                intent.intent_id,
                intent.user_id,
                intent.rail.to_string(),
                intent.amount.to_string(),
                intent.correlation_token,
                intent.status.to_string(),
                intent.created_at.timestamp(),
                intent.expires_at.map(|at| at.timestamp()),
                intent.updated_at.timestamp(),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StorageError::Duplicate(intent.intent_id.clone());
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn transition_sync(
        &self,
        intent_id: &str,
        from: IntentStatus,
        to: IntentStatus,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        // The WHERE clause carries the compare half of the compare-and-set;
        // SQLite applies the UPDATE atomically.
        let rows_affected = conn
            .execute(
                r#"
            UPDATE payment_intents SET status = ?3, updated_at = ?4
            WHERE intent_id = ?1 AND status = ?2
            "#,
                params![
                    intent_id,
                    from.to_string(),
                    to.to_string(),
                    Utc::now().timestamp()
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected > 0 {
            return Ok(true);
        }

        // Zero rows is either a lost race or an unknown intent
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM payment_intents WHERE intent_id = ?1",
                params![intent_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if exists.is_none() {
            return Err(StorageError::NotFound(intent_id.to_string()));
        }

        Ok(false)
    }

    fn get_sync(&self, intent_id: &str) -> Result<Option<PaymentIntent>, StorageError> {
        let conn = self.conn()?;

        let intent = conn
            .query_row(
                "SELECT * FROM payment_intents WHERE intent_id = ?1",
                params![intent_id],
                |row| Self::row_to_intent(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(intent)
    }

    fn get_by_token_sync(&self, token: &str) -> Result<Option<PaymentIntent>, StorageError> {
        let conn = self.conn()?;

        let intent = conn
            .query_row(
                "SELECT * FROM payment_intents WHERE correlation_token = ?1",
                params![token],
                |row| Self::row_to_intent(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(intent)
    }

    fn get_active_onchain_sync(&self) -> Result<Vec<PaymentIntent>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM payment_intents
            WHERE status = 'pending' AND rail = 'on_chain'
            ORDER BY created_at ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let intents = stmt
            .query_map([], |row| Self::row_to_intent(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(intents)
    }

    fn stats_sync(&self) -> Result<IntentStats, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, amount FROM payment_intents")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut stats = IntentStats::default();
        for row in rows {
            let (status, amount) = row.map_err(|e| StorageError::Database(e.to_string()))?;
            stats.total += 1;
            match status.as_str() {
                "pending" => stats.pending += 1,
                "confirmed" => {
                    stats.confirmed += 1;
                    stats.confirmed_amount += amount.parse::<Decimal>().unwrap_or(Decimal::ZERO);
                }
                "expired" => stats.expired += 1,
                "failed" => stats.failed += 1,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl IntentStore for SqliteIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> StorageResult<()> {
        self.insert_sync(intent)
    }

    async fn transition(
        &self,
        intent_id: &str,
        from: IntentStatus,
        to: IntentStatus,
    ) -> StorageResult<bool> {
        self.transition_sync(intent_id, from, to)
    }

    async fn get(&self, intent_id: &str) -> StorageResult<Option<PaymentIntent>> {
        self.get_sync(intent_id)
    }

    async fn get_by_token(&self, token: &str) -> StorageResult<Option<PaymentIntent>> {
        self.get_by_token_sync(token)
    }

    async fn get_active_onchain(&self) -> StorageResult<Vec<PaymentIntent>> {
        self.get_active_onchain_sync()
    }

    async fn stats(&self) -> StorageResult<IntentStats> {
        self.stats_sync()
    }
}

/// SQLite-backed ledger with connection pooling
///
/// Credits and debits run inside immediate-mode transactions so a concurrent
/// credit and purchase debit for the same user can never interleave.
pub struct SqliteLedger {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLedger {
    /// Create a new ledger with the given database path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let pool = file_pool(db_path)?;
        let ledger = Self { pool };
        ledger.run_migrations()?;

        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let pool = memory_pool()?;
        let ledger = Self { pool };
        ledger.run_migrations()?;

        Ok(ledger)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                user_id INTEGER PRIMARY KEY,
                balance TEXT NOT NULL,
                total_deposited TEXT NOT NULL,
                total_spent TEXT NOT NULL,
                purchase_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credit_events (
                intent_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                amount TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_created_at ON accounts(created_at);
            CREATE INDEX IF NOT EXISTS idx_credit_events_user ON credit_events(user_id);
            CREATE INDEX IF NOT EXISTS idx_credit_events_applied_at ON credit_events(applied_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn db(e: rusqlite::Error) -> LedgerError {
        LedgerError::Storage(StorageError::Database(e.to_string()))
    }

    /// Convert a database row to UserAccount
    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<UserAccount> {
        let balance: String = row.get("balance")?;
        let total_deposited: String = row.get("total_deposited")?;
        let total_spent: String = row.get("total_spent")?;

        Ok(UserAccount {
            user_id: row.get("user_id")?,
            balance: parse_decimal(&balance)?,
            total_deposited: parse_decimal(&total_deposited)?,
            total_spent: parse_decimal(&total_spent)?,
            purchase_count: row.get::<_, i64>("purchase_count")? as u32,
            created_at: ts_to_datetime(row.get("created_at")?)?,
        })
    }

    /// Convert a database row to LedgerCreditEvent
    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<LedgerCreditEvent> {
        let amount: String = row.get("amount")?;

        Ok(LedgerCreditEvent {
            intent_id: row.get("intent_id")?,
            user_id: row.get("user_id")?,
            amount: parse_decimal(&amount)?,
            applied_at: ts_to_datetime(row.get("applied_at")?)?,
        })
    }

    // Synchronous helper methods for the trait implementation

    fn open_account_sync(&self, user_id: i64) -> Result<UserAccount, LedgerError> {
        let conn = self.conn()?;
        let fresh = UserAccount::new(user_id);

        conn.execute(
            r#"
            INSERT OR IGNORE INTO accounts (
                user_id, balance, total_deposited, total_spent, purchase_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                fresh.user_id,
                fresh.balance.to_string(),
                fresh.total_deposited.to_string(),
                fresh.total_spent.to_string(),
                fresh.purchase_count as i64,
                fresh.created_at.timestamp(),
            ],
        )
        .map_err(Self::db)?;

        // account_sync checks out its own pooled connection; this one must be
        // returned first or the single-connection memory pool deadlocks.
        drop(conn);

        self.account_sync(user_id)?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn account_sync(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError> {
        let conn = self.conn()?;

        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| Self::row_to_account(row),
            )
            .optional()
            .map_err(Self::db)?;

        Ok(account)
    }

    fn credit_sync(
        &self,
        intent_id: &str,
        user_id: i64,
        amount: Decimal,
    ) -> Result<CreditReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Self::db)?;

        let account = tx
            .query_row(
                "SELECT * FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| Self::row_to_account(row),
            )
            .optional()
            .map_err(Self::db)?
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        // The primary key on intent_id is the idempotency witness; a second
        // credit for the same intent dies here before any balance change.
        let event = LedgerCreditEvent::new(intent_id.to_string(), user_id, amount);
        tx.execute(
            "INSERT INTO credit_events (intent_id, user_id, amount, applied_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.intent_id,
                event.user_id,
                event.amount.to_string(),
                event.applied_at.timestamp(),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                return LedgerError::DuplicateCredit(intent_id.to_string());
            }
            Self::db(e)
        })?;

        let new_balance = account.balance + amount;
        let new_deposited = account.total_deposited + amount;
        tx.execute(
            "UPDATE accounts SET balance = ?2, total_deposited = ?3 WHERE user_id = ?1",
            params![user_id, new_balance.to_string(), new_deposited.to_string()],
        )
        .map_err(Self::db)?;

        tx.commit().map_err(Self::db)?;

        Ok(CreditReceipt {
            event,
            balance_after: new_balance,
        })
    }

    fn debit_purchase_sync(&self, user_id: i64, price: Decimal) -> Result<UserAccount, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(price));
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Self::db)?;

        let account = tx
            .query_row(
                "SELECT * FROM accounts WHERE user_id = ?1",
                params![user_id],
                |row| Self::row_to_account(row),
            )
            .optional()
            .map_err(Self::db)?
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        if account.balance < price {
            return Err(LedgerError::InsufficientFunds {
                needed: price,
                available: account.balance,
            });
        }

        let updated = UserAccount {
            balance: account.balance - price,
            total_spent: account.total_spent + price,
            purchase_count: account.purchase_count + 1,
            ..account
        };
        tx.execute(
            "UPDATE accounts SET balance = ?2, total_spent = ?3, purchase_count = ?4 WHERE user_id = ?1",
            params![
                user_id,
                updated.balance.to_string(),
                updated.total_spent.to_string(),
                updated.purchase_count as i64,
            ],
        )
        .map_err(Self::db)?;

        tx.commit().map_err(Self::db)?;

        Ok(updated)
    }

    fn credit_event_sync(&self, intent_id: &str) -> Result<Option<LedgerCreditEvent>, LedgerError> {
        let conn = self.conn()?;

        let event = conn
            .query_row(
                "SELECT * FROM credit_events WHERE intent_id = ?1",
                params![intent_id],
                |row| Self::row_to_event(row),
            )
            .optional()
            .map_err(Self::db)?;

        Ok(event)
    }

    fn stats_sync(&self, now: DateTime<Utc>) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn()?;
        let day_ago = (now - ChronoDuration::days(1)).timestamp();
        let week_ago = (now - ChronoDuration::days(7)).timestamp();

        let mut stats = LedgerStats::default();

        let mut stmt = conn
            .prepare("SELECT amount, applied_at FROM credit_events")
            .map_err(Self::db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(Self::db)?;

        for row in rows {
            let (amount_str, applied_at) = row.map_err(Self::db)?;
            let amount = amount_str.parse::<Decimal>().unwrap_or(Decimal::ZERO);

            stats.deposits_total += 1;
            stats.amount_total += amount;
            if applied_at >= week_ago {
                stats.deposits_week += 1;
                stats.amount_week += amount;
            }
            if applied_at >= day_ago {
                stats.deposits_today += 1;
                stats.amount_today += amount;
            }
        }

        stats.accounts_total = self.count_accounts(&conn, None)?;
        stats.accounts_week = self.count_accounts(&conn, Some(week_ago))?;
        stats.accounts_today = self.count_accounts(&conn, Some(day_ago))?;

        Ok(stats)
    }

    fn count_accounts(
        &self,
        conn: &rusqlite::Connection,
        since: Option<i64>,
    ) -> Result<u64, LedgerError> {
        let count: i64 = match since {
            Some(since) => conn
                .query_row(
                    "SELECT COUNT(*) FROM accounts WHERE created_at >= ?1",
                    params![since],
                    |row| row.get(0),
                )
                .map_err(Self::db)?,
            None => conn
                .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
                .map_err(Self::db)?,
        };

        Ok(count as u64)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn open_account(&self, user_id: i64) -> Result<UserAccount, LedgerError> {
        self.open_account_sync(user_id)
    }

    async fn account(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError> {
        self.account_sync(user_id)
    }

    async fn credit(
        &self,
        intent_id: &str,
        user_id: i64,
        amount: Decimal,
    ) -> Result<CreditReceipt, LedgerError> {
        self.credit_sync(intent_id, user_id, amount)
    }

    async fn debit_purchase(
        &self,
        user_id: i64,
        price: Decimal,
    ) -> Result<UserAccount, LedgerError> {
        self.debit_purchase_sync(user_id, price)
    }

    async fn credit_event(&self, intent_id: &str) -> Result<Option<LedgerCreditEvent>, LedgerError> {
        self.credit_event_sync(intent_id)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<LedgerStats, LedgerError> {
        self.stats_sync(now)
    }
}

// Pool and row helpers shared by both stores

fn file_pool<P: AsRef<Path>>(db_path: P) -> Result<Pool<SqliteConnectionManager>, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.as_ref().parent() {
        std::fs::create_dir_all(parent).ok();
    }

    // Immediate transactions from pooled connections can contend for the
    // write lock; a busy timeout makes the loser wait instead of erroring.
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));

    Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn memory_pool() -> Result<Pool<SqliteConnectionManager>, StorageError> {
    // A single connection: each in-memory connection would otherwise see
    // its own empty database.
    let manager = SqliteConnectionManager::memory();

    Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == 1555 || err.extended_code == 2067
    )
}

fn bad_column(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, msg.into())
}

fn parse_decimal(s: &str) -> rusqlite::Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| bad_column(format!("bad decimal {:?}: {}", s, e)))
}

fn ts_to_datetime(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| bad_column(format!("timestamp out of range: {}", secs)))
}
