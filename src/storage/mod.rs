//! Storage Layer Module
//!
//! Provides persistence for payment intents and ledger accounts.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::{MemoryIntentStore, MemoryLedger};
pub use sqlite::{SqliteIntentStore, SqliteLedger};
pub use traits::{IntentStore, Ledger, LedgerError, StorageError, StorageResult};
