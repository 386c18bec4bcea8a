//! Reconciliation Module
//!
//! Matches funding intents against external payment evidence and settles
//! them exactly once:
//!
//! ```text
//! PENDING → CONFIRMED   (payment matched; ledger credited)
//! PENDING → EXPIRED     (deadline passed with no payment)
//! PENDING → FAILED      (abandoned by the user)
//! ```
//!
//! ## Components
//!
//! - **engine**: Opens intents, polls on-chain payments, answers
//!   on-demand invoice checks
//! - **supervisor**: Registry of per-intent polling tasks
//! - **notify**: Settlement outcomes delivered to the user-facing layer
//!
//! The engine never settles an intent directly. Every path goes through
//! the intent store's compare-and-set transition, and only the winner of
//! that transition credits the ledger.

pub mod engine;
pub mod notify;
pub mod supervisor;

// Re-exports
pub use engine::{CheckOutcome, EngineError, Reconciler};
pub use notify::{IntentOutcome, NotificationSink, OutcomeKind, TracingNotifier};
pub use supervisor::TaskSupervisor;
