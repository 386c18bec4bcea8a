//! In-Memory Storage Implementations
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{IntentStore, Ledger, LedgerError, StorageError, StorageResult};
use crate::types::account::{CreditReceipt, LedgerCreditEvent, LedgerStats, UserAccount};
use crate::types::intent::{IntentStats, IntentStatus, PaymentIntent, PaymentRail};

/// In-memory payment intent store
///
/// Thread-safe storage for intent records.
/// Uses Arc<RwLock<>> for concurrent access.
#[derive(Clone, Default)]
pub struct MemoryIntentStore {
    /// Records indexed by intent ID
    records: Arc<RwLock<HashMap<String, PaymentIntent>>>,
    /// Index: correlation token -> intent ID
    by_token: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryIntentStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> StorageResult<()> {
        let mut records = self.records.write().await;
        let mut by_token = self.by_token.write().await;

        if records.contains_key(&intent.intent_id) {
            return Err(StorageError::Duplicate(format!(
                "intent: {}",
                intent.intent_id
            )));
        }

        if by_token.contains_key(&intent.correlation_token) {
            return Err(StorageError::Duplicate(format!(
                "token: {}",
                intent.correlation_token
            )));
        }

        by_token.insert(intent.correlation_token.clone(), intent.intent_id.clone());
        records.insert(intent.intent_id.clone(), intent.clone());

        Ok(())
    }

    async fn transition(
        &self,
        intent_id: &str,
        from: IntentStatus,
        to: IntentStatus,
    ) -> StorageResult<bool> {
        // One write guard covers the compare and the set
        let mut records = self.records.write().await;

        let intent = records
            .get_mut(intent_id)
            .ok_or_else(|| StorageError::NotFound(intent_id.to_string()))?;

        if intent.status != from {
            return Ok(false);
        }

        intent.set_status(to);
        Ok(true)
    }

    async fn get(&self, intent_id: &str) -> StorageResult<Option<PaymentIntent>> {
        let records = self.records.read().await;
        Ok(records.get(intent_id).cloned())
    }

    async fn get_by_token(&self, token: &str) -> StorageResult<Option<PaymentIntent>> {
        let by_token = self.by_token.read().await;
        let id = match by_token.get(token) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        drop(by_token);

        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn get_active_onchain(&self) -> StorageResult<Vec<PaymentIntent>> {
        let records = self.records.read().await;
        let mut active: Vec<PaymentIntent> = records
            .values()
            .filter(|r| r.status == IntentStatus::Pending && r.rail == PaymentRail::OnChain)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);

        Ok(active)
    }

    async fn stats(&self) -> StorageResult<IntentStats> {
        let records = self.records.read().await;

        let mut stats = IntentStats::default();
        stats.total = records.len() as u64;

        for record in records.values() {
            match record.status {
                IntentStatus::Pending => stats.pending += 1,
                IntentStatus::Confirmed => {
                    stats.confirmed += 1;
                    stats.confirmed_amount += record.amount;
                }
                IntentStatus::Expired => stats.expired += 1,
                IntentStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

/// In-memory ledger
///
/// Credits and debits mutate under a single write guard so balance updates
/// for one user can never interleave.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    /// Accounts indexed by user ID
    accounts: Arc<RwLock<HashMap<i64, UserAccount>>>,
    /// Credit events indexed by intent ID
    credits: Arc<RwLock<HashMap<String, LedgerCreditEvent>>>,
}

impl MemoryLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn open_account(&self, user_id: i64) -> Result<UserAccount, LedgerError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id));

        Ok(account.clone())
    }

    async fn account(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&user_id).cloned())
    }

    async fn credit(
        &self,
        intent_id: &str,
        user_id: i64,
        amount: Decimal,
    ) -> Result<CreditReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        // Both guards held across the whole check-and-apply
        let mut accounts = self.accounts.write().await;
        let mut credits = self.credits.write().await;

        if credits.contains_key(intent_id) {
            return Err(LedgerError::DuplicateCredit(intent_id.to_string()));
        }

        let account = accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        let event = LedgerCreditEvent::new(intent_id.to_string(), user_id, amount);
        credits.insert(event.intent_id.clone(), event.clone());

        account.balance += amount;
        account.total_deposited += amount;

        Ok(CreditReceipt {
            event,
            balance_after: account.balance,
        })
    }

    async fn debit_purchase(
        &self,
        user_id: i64,
        price: Decimal,
    ) -> Result<UserAccount, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(price));
        }

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        if account.balance < price {
            return Err(LedgerError::InsufficientFunds {
                needed: price,
                available: account.balance,
            });
        }

        account.balance -= price;
        account.total_spent += price;
        account.purchase_count += 1;

        Ok(account.clone())
    }

    async fn credit_event(&self, intent_id: &str) -> Result<Option<LedgerCreditEvent>, LedgerError> {
        let credits = self.credits.read().await;
        Ok(credits.get(intent_id).cloned())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<LedgerStats, LedgerError> {
        let day_ago = now - ChronoDuration::days(1);
        let week_ago = now - ChronoDuration::days(7);

        let mut stats = LedgerStats::default();

        let credits = self.credits.read().await;
        for event in credits.values() {
            stats.deposits_total += 1;
            stats.amount_total += event.amount;
            if event.applied_at >= week_ago {
                stats.deposits_week += 1;
                stats.amount_week += event.amount;
            }
            if event.applied_at >= day_ago {
                stats.deposits_today += 1;
                stats.amount_today += event.amount;
            }
        }
        drop(credits);

        let accounts = self.accounts.read().await;
        stats.accounts_total = accounts.len() as u64;
        for account in accounts.values() {
            if account.created_at >= week_ago {
                stats.accounts_week += 1;
            }
            if account.created_at >= day_ago {
                stats.accounts_today += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryIntentStore::new();
        let intent = PaymentIntent::onchain(1, dec!(2), Duration::from_secs(60));

        store.insert(&intent).await.unwrap();

        let retrieved = store.get(&intent.intent_id).await.unwrap().unwrap();
        assert_eq!(retrieved.amount, dec!(2));

        let by_token = store
            .get_by_token(&intent.correlation_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_token.intent_id, intent.intent_id);
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let store = MemoryIntentStore::new();
        let first = PaymentIntent::invoice(1, dec!(5), "inv_x".to_string());
        let second = PaymentIntent::invoice(2, dec!(6), "inv_x".to_string());

        store.insert(&first).await.unwrap();
        let result = store.insert(&second).await;

        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_transition_only_one_winner() {
        let store = Arc::new(MemoryIntentStore::new());
        let intent = PaymentIntent::onchain(1, dec!(1), Duration::from_secs(60));
        store.insert(&intent).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = intent.intent_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, IntentStatus::Pending, IntentStatus::Confirmed)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let ledger = MemoryLedger::new();
        ledger.open_account(9).await.unwrap();

        let receipt = ledger.credit("pi_1", 9, dec!(50)).await.unwrap();
        assert_eq!(receipt.balance_after, dec!(50));

        assert!(matches!(
            ledger.credit("pi_1", 9, dec!(50)).await,
            Err(LedgerError::DuplicateCredit(_))
        ));

        let account = ledger.debit_purchase(9, dec!(20)).await.unwrap();
        assert_eq!(account.balance, dec!(30));
        assert_eq!(account.total_deposited, dec!(50));
        assert_eq!(account.total_spent, dec!(20));
        assert_eq!(account.purchase_count, 1);

        assert!(matches!(
            ledger.debit_purchase(9, dec!(100)).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_credits_and_debits_lose_no_updates() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.open_account(5).await.unwrap();
        ledger.credit("pi_seed", 5, dec!(50)).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.credit(&format!("pi_{}", n), 5, dec!(1)).await.unwrap();
            }));
        }
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit_purchase(5, dec!(1)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Balance cannot dip below zero here, so no debit ever fails;
        // the end state must reflect every one of the twenty updates
        let account = ledger.account(5).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(50));
        assert_eq!(account.total_deposited, dec!(60));
        assert_eq!(account.total_spent, dec!(10));
        assert_eq!(account.purchase_count, 10);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let store = MemoryIntentStore::new();
        let ledger = MemoryLedger::new();

        let pending = PaymentIntent::onchain(1, dec!(1), Duration::from_secs(60));
        let mut confirmed = PaymentIntent::onchain(2, dec!(3), Duration::from_secs(60));
        confirmed.set_status(IntentStatus::Confirmed);

        store.insert(&pending).await.unwrap();
        store.insert(&confirmed).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.confirmed_amount, dec!(3));

        ledger.open_account(1).await.unwrap();
        ledger.credit("pi_c", 1, dec!(3)).await.unwrap();

        let ledger_stats = ledger.stats(Utc::now()).await.unwrap();
        assert_eq!(ledger_stats.deposits_total, 1);
        assert_eq!(ledger_stats.amount_total, dec!(3));
        assert_eq!(ledger_stats.accounts_total, 1);
    }
}
