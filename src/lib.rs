//! paydesk - Payment Reconciliation Backend
//!
//! Matches user funding requests against external payment evidence and
//! credits an internal balance ledger exactly once per payment.
//!
//! ## Funding Rails
//!
//! 1. **On-chain** - The user sends coins to the service wallet with a
//!    correlation token in the transfer memo; a background task polls a
//!    chain explorer until the payment appears or a deadline passes.
//! 2. **Invoice** - The user pays a hosted invoice at a custodial
//!    provider; payment is checked on demand when the user asks.
//!
//! ## Settlement Guarantee
//!
//! Every intent settles exactly once. All settlement paths go through a
//! compare-and-set status transition in the intent store, and only the
//! transition winner credits the ledger, so concurrent checks, late
//! expiry, and racing confirmations cannot double-credit a balance.

pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod sources;
pub mod storage;
pub mod types;

// Re-exports: Configuration
pub use config::{ConfigError, PaydeskConfig};

// Re-exports: Errors
pub use error::{PaydeskError, Result};

// Re-exports: Logging
pub use logging::{init_from_config, init_logging, LogLevel, LoggingError};

// Re-exports: Reconciliation engine
pub use reconcile::{
    CheckOutcome, EngineError, IntentOutcome, NotificationSink, OutcomeKind, Reconciler,
    TracingNotifier,
};

// Re-exports: Payment sources
pub use sources::{
    ChainExplorer, CreatedInvoice, InvoiceIssuer, InvoiceProvider, MatchCriteria, PaymentSource,
    SourceError, SourceMatch, MEMO_MATCH_TOLERANCE,
};

// Re-exports: Storage
pub use storage::{
    IntentStore, Ledger, LedgerError, MemoryIntentStore, MemoryLedger, SqliteIntentStore,
    SqliteLedger, StorageError,
};

// Re-exports: Shared types
pub use types::{
    CreditReceipt, FundingReceipt, IntentStats, IntentStatus, LedgerCreditEvent, LedgerStats,
    PayInstructions, PaymentIntent, PaymentRail, ReconcilerConfig, UserAccount,
};
