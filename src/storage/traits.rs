//! Storage Trait Definitions
//!
//! Defines abstract storage interfaces for payment intents and the ledger.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::account::{CreditReceipt, LedgerCreditEvent, LedgerStats, UserAccount};
use crate::types::intent::{IntentStats, IntentStatus, PaymentIntent};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Credit already applied for intent: {0}")]
    DuplicateCredit(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Payment intent storage interface
///
/// Implementations:
/// - `SqliteIntentStore` - Production storage with SQLite
/// - `MemoryIntentStore` - In-memory storage for testing
///
/// Intents are audit records and are never deleted.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Insert a freshly created pending intent.
    /// Rejects duplicate intent ids and duplicate correlation tokens.
    async fn insert(&self, intent: &PaymentIntent) -> StorageResult<()>;

    /// Atomically move an intent from `from` to `to`.
    ///
    /// Returns `false` when the intent is no longer in `from` (a concurrent
    /// caller already transitioned it). At most one of any set of concurrent
    /// callers observes `true`. Unknown ids are `NotFound`.
    async fn transition(
        &self,
        intent_id: &str,
        from: IntentStatus,
        to: IntentStatus,
    ) -> StorageResult<bool>;

    /// Get an intent by ID
    async fn get(&self, intent_id: &str) -> StorageResult<Option<PaymentIntent>>;

    /// Get an intent by correlation token
    async fn get_by_token(&self, token: &str) -> StorageResult<Option<PaymentIntent>>;

    /// Pending on-chain intents that still need polling
    async fn get_active_onchain(&self) -> StorageResult<Vec<PaymentIntent>>;

    /// Intent counters for the stats screen
    async fn stats(&self) -> StorageResult<IntentStats>;
}

/// Balance ledger interface
///
/// Implementations:
/// - `SqliteLedger` - Production storage with SQLite
/// - `MemoryLedger` - In-memory storage for testing
///
/// Every balance mutation for one user is serialized against all others for
/// that user; read-modify-write never spans two calls.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Get-or-create an account. Idempotent; an existing account is untouched.
    async fn open_account(&self, user_id: i64) -> Result<UserAccount, LedgerError>;

    /// Get an account by user id
    async fn account(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError>;

    /// Apply a confirmed intent's credit.
    ///
    /// `balance += amount; total_deposited += amount`, atomically, and records
    /// the credit event. A second call for the same `intent_id` fails with
    /// `DuplicateCredit` and changes nothing.
    async fn credit(
        &self,
        intent_id: &str,
        user_id: i64,
        amount: Decimal,
    ) -> Result<CreditReceipt, LedgerError>;

    /// Spend from the balance for a purchase.
    ///
    /// Fails with `InsufficientFunds` when `balance < price`; on success
    /// `balance -= price; total_spent += price; purchase_count += 1`,
    /// atomically. No mutation happens on failure.
    async fn debit_purchase(&self, user_id: i64, price: Decimal)
        -> Result<UserAccount, LedgerError>;

    /// Audit lookup of the credit applied for an intent, if any
    async fn credit_event(&self, intent_id: &str) -> Result<Option<LedgerCreditEvent>, LedgerError>;

    /// Deposit and account counters over rolling day/week windows ending at `now`
    async fn stats(&self, now: DateTime<Utc>) -> Result<LedgerStats, LedgerError>;
}
