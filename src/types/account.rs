//! Ledger Account Types
//!
//! Balance records, credit audit events and the reporting counters
//! derived from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A customer balance record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Chat platform numeric user id
    pub user_id: i64,
    /// Spendable balance
    pub balance: Decimal,
    /// Lifetime sum of confirmed deposits
    pub total_deposited: Decimal,
    /// Lifetime sum of completed purchases
    pub total_spent: Decimal,
    /// Number of completed purchases
    pub purchase_count: u32,
    /// First-contact timestamp
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Fresh account with a zero balance
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            purchase_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit record of a balance credit tied to one intent.
/// At most one of these may ever exist per intent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCreditEvent {
    pub intent_id: String,
    pub user_id: i64,
    pub amount: Decimal,
    pub applied_at: DateTime<Utc>,
}

impl LedgerCreditEvent {
    pub fn new(intent_id: String, user_id: i64, amount: Decimal) -> Self {
        Self {
            intent_id,
            user_id,
            amount,
            applied_at: Utc::now(),
        }
    }
}

/// Returned by a successful credit
#[derive(Debug, Clone, Serialize)]
pub struct CreditReceipt {
    pub event: LedgerCreditEvent,
    pub balance_after: Decimal,
}

/// Deposit and account counters for the reporting screen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub deposits_today: u64,
    pub deposits_week: u64,
    pub deposits_total: u64,
    pub amount_today: Decimal,
    pub amount_week: Decimal,
    pub amount_total: Decimal,
    pub accounts_today: u64,
    pub accounts_week: u64,
    pub accounts_total: u64,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Deposits: {} today | {} week | {} total ({} all-time) / Accounts: {} today | {} week | {} total",
            self.deposits_today,
            self.deposits_week,
            self.deposits_total,
            self.amount_total,
            self.accounts_today,
            self.accounts_week,
            self.accounts_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_account_is_empty() {
        let account = UserAccount::new(7);

        assert_eq!(account.user_id, 7);
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.total_deposited, Decimal::ZERO);
        assert_eq!(account.total_spent, Decimal::ZERO);
        assert_eq!(account.purchase_count, 0);
    }

    #[test]
    fn test_credit_event_carries_amount() {
        let event = LedgerCreditEvent::new("pi_1_00000001".to_string(), 7, dec!(12.5));

        assert_eq!(event.amount, dec!(12.5));
        assert_eq!(event.user_id, 7);
    }
}
