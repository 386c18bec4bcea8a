//! Shared Types Module
//!
//! Data types shared across the paydesk core.

pub mod account;
pub mod intent;
pub mod units;

// Re-exports for convenience
pub use account::{CreditReceipt, LedgerCreditEvent, LedgerStats, UserAccount};
pub use intent::{
    FundingReceipt, IntentStats, IntentStatus, PayInstructions, PaymentIntent, PaymentRail,
    ReconcilerConfig,
};
pub use units::{base_units_to_coins, coins_to_base_units, parse_amount, BASE_UNITS_PER_COIN};
