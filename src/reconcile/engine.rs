//! Reconciliation Engine
//!
//! Drives pending funding intents to a terminal state. On-chain intents
//! get a background polling task bounded by a deadline; invoice intents
//! are checked on demand, possibly from several callers at once. Every
//! settlement path funnels through the intent store's compare-and-set
//! transition, and only the transition winner credits the ledger, so one
//! payment can never be credited twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::{interval, sleep_until, Instant};
use tracing::{error, info, warn};

use crate::reconcile::notify::{IntentOutcome, NotificationSink};
use crate::reconcile::supervisor::TaskSupervisor;
use crate::sources::{InvoiceIssuer, MatchCriteria, PaymentSource};
use crate::storage::{IntentStore, Ledger, LedgerError, StorageError};
use crate::types::{
    FundingReceipt, IntentStats, IntentStatus, PayInstructions, PaymentIntent, PaymentRail,
    ReconcilerConfig,
};

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no account for user {0}")]
    UnknownUser(i64),

    #[error("amount too small: minimum {min}, got {got}")]
    AmountTooSmall { min: Decimal, got: Decimal },

    #[error("amount too large: maximum {max}, got {got}")]
    AmountTooLarge { max: Decimal, got: Decimal },

    #[error("intent not found: {0}")]
    IntentNotFound(String),

    #[error("on-demand checks apply to invoice intents only: {0}")]
    WrongRail(String),

    #[error("invoice creation failed: {0}")]
    InvoiceCreation(#[from] crate::sources::SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result of an on-demand invoice check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The provider has not reported payment yet
    Pending,
    /// This call won the confirmation and credited the balance
    NewlyConfirmed,
    /// An earlier call already confirmed and credited
    AlreadyConfirmed,
    /// The intent expired before payment arrived
    Expired,
    /// The intent was abandoned by the user
    Abandoned,
}

/// Payment reconciliation engine
///
/// All collaborators are injected, so tests swap in in-memory stores and
/// scripted sources. Cloning is shallow; clones share the same stores
/// and task supervisor.
#[derive(Clone)]
pub struct Reconciler {
    config: ReconcilerConfig,
    intents: Arc<dyn IntentStore>,
    ledger: Arc<dyn Ledger>,
    chain: Arc<dyn PaymentSource>,
    invoices: Arc<dyn PaymentSource>,
    issuer: Arc<dyn InvoiceIssuer>,
    notifier: Arc<dyn NotificationSink>,
    supervisor: Arc<TaskSupervisor>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        intents: Arc<dyn IntentStore>,
        ledger: Arc<dyn Ledger>,
        chain: Arc<dyn PaymentSource>,
        invoices: Arc<dyn PaymentSource>,
        issuer: Arc<dyn InvoiceIssuer>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            intents,
            ledger,
            chain,
            invoices,
            issuer,
            notifier,
            supervisor: Arc::new(TaskSupervisor::new()),
        }
    }

    /// Open a funding intent for an existing user and return pay
    /// instructions. On-chain intents start a background polling task;
    /// invoice intents are created at the provider first, so a failed
    /// provider call leaves nothing behind.
    pub async fn request_funding(
        &self,
        user_id: i64,
        rail: PaymentRail,
        amount: Decimal,
    ) -> Result<FundingReceipt, EngineError> {
        self.validate_amount(rail, amount)?;

        if self.ledger.account(user_id).await?.is_none() {
            return Err(EngineError::UnknownUser(user_id));
        }

        match rail {
            PaymentRail::OnChain => self.request_onchain(user_id, amount).await,
            PaymentRail::Invoice => self.request_invoice(user_id, amount).await,
        }
    }

    fn validate_amount(&self, rail: PaymentRail, amount: Decimal) -> Result<(), EngineError> {
        match rail {
            PaymentRail::OnChain => {
                if amount < self.config.min_onchain_amount {
                    return Err(EngineError::AmountTooSmall {
                        min: self.config.min_onchain_amount,
                        got: amount,
                    });
                }
            }
            PaymentRail::Invoice => {
                if amount < self.config.invoice_min {
                    return Err(EngineError::AmountTooSmall {
                        min: self.config.invoice_min,
                        got: amount,
                    });
                }
                if amount > self.config.invoice_max {
                    return Err(EngineError::AmountTooLarge {
                        max: self.config.invoice_max,
                        got: amount,
                    });
                }
            }
        }
        Ok(())
    }

    async fn request_onchain(
        &self,
        user_id: i64,
        amount: Decimal,
    ) -> Result<FundingReceipt, EngineError> {
        let intent = PaymentIntent::onchain(user_id, amount, self.config.onchain_deadline);
        self.intents.insert(&intent).await?;

        info!(
            intent_id = %intent.intent_id,
            user_id,
            amount = %amount,
            "opened on-chain intent"
        );

        self.spawn_poll(intent.clone(), self.config.onchain_deadline)
            .await;

        let pay = PayInstructions::OnChain {
            wallet_address: self.config.wallet_address.clone(),
            memo_token: intent.correlation_token.clone(),
        };
        Ok(FundingReceipt { intent, pay })
    }

    async fn request_invoice(
        &self,
        user_id: i64,
        amount: Decimal,
    ) -> Result<FundingReceipt, EngineError> {
        let created = self.issuer.create_invoice(amount).await?;

        let intent = PaymentIntent::invoice(user_id, amount, created.invoice_id);
        self.intents.insert(&intent).await?;

        info!(
            intent_id = %intent.intent_id,
            user_id,
            amount = %amount,
            invoice_id = %intent.correlation_token,
            "opened invoice intent"
        );

        let pay = PayInstructions::Invoice {
            pay_url: created.pay_url,
        };
        Ok(FundingReceipt { intent, pay })
    }

    /// Check an invoice intent against the provider right now.
    /// Safe to call concurrently; exactly one caller ever observes
    /// `NewlyConfirmed`.
    pub async fn check_now(&self, intent_id: &str) -> Result<CheckOutcome, EngineError> {
        let intent = self
            .intents
            .get(intent_id)
            .await?
            .ok_or_else(|| EngineError::IntentNotFound(intent_id.to_string()))?;

        if intent.rail != PaymentRail::Invoice {
            return Err(EngineError::WrongRail(intent_id.to_string()));
        }

        match intent.status {
            IntentStatus::Confirmed => return Ok(CheckOutcome::AlreadyConfirmed),
            IntentStatus::Expired => return Ok(CheckOutcome::Expired),
            IntentStatus::Failed => return Ok(CheckOutcome::Abandoned),
            IntentStatus::Pending => {}
        }

        let criteria = MatchCriteria::Invoice {
            invoice_id: intent.correlation_token.clone(),
        };
        let matched = match self.invoices.find_match(&criteria).await {
            Ok(matched) => matched,
            Err(e) => {
                // No answer this attempt; the caller can try again
                warn!(intent_id = %intent.intent_id, error = %e, "invoice check failed");
                return Ok(CheckOutcome::Pending);
            }
        };

        let matched = match matched {
            Some(matched) => matched,
            None => return Ok(CheckOutcome::Pending),
        };

        // The provider reports the settled amount; credit what it says
        if self.confirm(&intent, matched.amount).await? {
            return Ok(CheckOutcome::NewlyConfirmed);
        }

        // Lost the transition race; report whatever the winner did
        let status = self
            .intents
            .get(intent_id)
            .await?
            .map(|current| current.status);
        match status {
            Some(IntentStatus::Expired) => Ok(CheckOutcome::Expired),
            Some(IntentStatus::Failed) => Ok(CheckOutcome::Abandoned),
            _ => Ok(CheckOutcome::AlreadyConfirmed),
        }
    }

    /// Cancel a still-pending intent. Returns false if it already
    /// reached a terminal state.
    pub async fn abandon(&self, intent_id: &str) -> Result<bool, EngineError> {
        let intent = self
            .intents
            .get(intent_id)
            .await?
            .ok_or_else(|| EngineError::IntentNotFound(intent_id.to_string()))?;

        let done = self
            .intents
            .transition(intent_id, IntentStatus::Pending, IntentStatus::Failed)
            .await?;
        if done {
            info!(intent_id, rail = %intent.rail, "intent abandoned");
            self.supervisor.cancel(intent_id).await;
        }
        Ok(done)
    }

    /// Restart polling for on-chain intents still pending after a
    /// restart. Intents already past their deadline are expired on the
    /// spot. Returns how many polling tasks were started.
    pub async fn resume(&self) -> Result<usize, EngineError> {
        let pending = self.intents.get_active_onchain().await?;
        let mut resumed = 0;

        for intent in pending {
            let remaining = intent
                .remaining_deadline(Utc::now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                self.expire(&intent).await;
                continue;
            }
            self.spawn_poll(intent, remaining).await;
            resumed += 1;
        }

        if resumed > 0 {
            info!(resumed, "resumed on-chain polling");
        }
        Ok(resumed)
    }

    /// Await the polling task for an intent, if one is still running.
    /// Lets tests and shutdown paths observe the terminal transition
    /// without sleeping.
    pub async fn wait_for(&self, intent_id: &str) {
        if let Some(handle) = self.supervisor.take(intent_id).await {
            handle.await.ok();
        }
    }

    /// Abort all polling tasks
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// Number of intents currently being polled
    pub async fn active_polls(&self) -> usize {
        self.supervisor.active().await
    }

    pub async fn intent_stats(&self) -> Result<IntentStats, EngineError> {
        Ok(self.intents.stats().await?)
    }

    async fn spawn_poll(&self, intent: PaymentIntent, deadline: Duration) {
        let engine = self.clone();
        let intent_id = intent.intent_id.clone();
        let handle = tokio::spawn(async move {
            engine.poll_onchain(intent, deadline).await;
        });
        self.supervisor.register(&intent_id, handle).await;
    }

    /// Bounded polling loop for one on-chain intent. Exits after the
    /// first terminal transition, whichever path made it.
    async fn poll_onchain(&self, intent: PaymentIntent, deadline: Duration) {
        let deadline_at = Instant::now() + deadline;
        let mut ticker = interval(self.config.poll_interval);
        let criteria = MatchCriteria::OnChain {
            token: intent.correlation_token.clone(),
            expected: intent.amount,
        };

        loop {
            tokio::select! {
                _ = sleep_until(deadline_at) => {
                    self.expire(&intent).await;
                    break;
                }
                _ = ticker.tick() => {
                    match self.intents.get(&intent.intent_id).await {
                        Ok(Some(current)) if current.is_terminal() => break,
                        Ok(Some(_)) => {}
                        Ok(None) => break,
                        Err(e) => {
                            warn!(intent_id = %intent.intent_id, error = %e, "intent reload failed");
                            continue;
                        }
                    }

                    match self.chain.find_match(&criteria).await {
                        Ok(Some(matched)) => {
                            // The requested amount is credited; the match
                            // tolerance only absorbs conversion rounding
                            if let Err(e) = self.confirm(&intent, intent.amount).await {
                                error!(
                                    intent_id = %intent.intent_id,
                                    observed = %matched.amount,
                                    error = %e,
                                    "credit after confirmation failed"
                                );
                            }
                            break;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // Treated as no match; the next tick retries
                            warn!(intent_id = %intent.intent_id, error = %e, "chain check failed");
                        }
                    }
                }
            }
        }

        self.supervisor.forget(&intent.intent_id).await;
    }

    /// Attempt pending -> confirmed. The winner credits the ledger and
    /// notifies; a lost race does neither.
    async fn confirm(
        &self,
        intent: &PaymentIntent,
        credit_amount: Decimal,
    ) -> Result<bool, EngineError> {
        let won = self
            .intents
            .transition(&intent.intent_id, IntentStatus::Pending, IntentStatus::Confirmed)
            .await?;
        if !won {
            return Ok(false);
        }

        let receipt = self
            .ledger
            .credit(&intent.intent_id, intent.user_id, credit_amount)
            .await?;

        info!(
            intent_id = %intent.intent_id,
            user_id = intent.user_id,
            rail = %intent.rail,
            credited = %receipt.event.amount,
            balance_after = %receipt.balance_after,
            "intent confirmed"
        );
        self.notifier
            .intent_outcome(IntentOutcome::confirmed(intent, receipt.event.amount))
            .await;
        Ok(true)
    }

    /// Attempt pending -> expired. A confirmation that already landed
    /// wins; late expiry is a no-op.
    async fn expire(&self, intent: &PaymentIntent) {
        match self
            .intents
            .transition(&intent.intent_id, IntentStatus::Pending, IntentStatus::Expired)
            .await
        {
            Ok(true) => {
                info!(intent_id = %intent.intent_id, user_id = intent.user_id, "intent expired");
                self.notifier
                    .intent_outcome(IntentOutcome::expired(intent))
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(intent_id = %intent.intent_id, error = %e, "expiry transition failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::notify::{MockNotificationSink, OutcomeKind, TracingNotifier};
    use crate::sources::{CreatedInvoice, MockInvoiceIssuer, MockPaymentSource, SourceError, SourceMatch};
    use crate::storage::{MemoryIntentStore, MemoryLedger};
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn test_config() -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_millis(10),
            onchain_deadline: Duration::from_secs(5),
            wallet_address: "UQDesk-test-wallet".to_string(),
            ..ReconcilerConfig::default()
        }
    }

    struct Harness {
        intents: Arc<MemoryIntentStore>,
        ledger: Arc<MemoryLedger>,
        chain: MockPaymentSource,
        invoices: MockPaymentSource,
        issuer: MockInvoiceIssuer,
        notifier: Option<MockNotificationSink>,
        config: ReconcilerConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                intents: Arc::new(MemoryIntentStore::new()),
                ledger: Arc::new(MemoryLedger::new()),
                chain: MockPaymentSource::new(),
                invoices: MockPaymentSource::new(),
                issuer: MockInvoiceIssuer::new(),
                notifier: None,
                config: test_config(),
            }
        }

        async fn with_account(self, user_id: i64) -> Self {
            self.ledger.open_account(user_id).await.unwrap();
            self
        }

        fn build(self) -> Reconciler {
            let notifier: Arc<dyn NotificationSink> = match self.notifier {
                Some(mock) => Arc::new(mock),
                None => Arc::new(TracingNotifier),
            };
            Reconciler::new(
                self.config,
                self.intents,
                self.ledger,
                Arc::new(self.chain),
                Arc::new(self.invoices),
                Arc::new(self.issuer),
                notifier,
            )
        }
    }

    #[tokio::test]
    async fn test_request_funding_rejects_unknown_user() {
        let engine = Harness::new().build();

        let err = engine
            .request_funding(40, PaymentRail::OnChain, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownUser(40)));
    }

    #[tokio::test]
    async fn test_request_funding_validates_bounds() {
        let engine = Harness::new().with_account(1).await.build();

        let err = engine
            .request_funding(1, PaymentRail::OnChain, dec!(0.05))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmountTooSmall { .. }));

        let err = engine
            .request_funding(1, PaymentRail::Invoice, dec!(0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmountTooSmall { .. }));

        let err = engine
            .request_funding(1, PaymentRail::Invoice, dec!(2000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmountTooLarge { .. }));

        assert_eq!(engine.intent_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_invoice_creation_failure_leaves_no_intent() {
        let mut harness = Harness::new().with_account(1).await;
        harness
            .issuer
            .expect_create_invoice()
            .times(1)
            .returning(|_| Err(SourceError::Provider("UNKNOWN_ERROR".to_string())));
        let engine = harness.build();

        let err = engine
            .request_funding(1, PaymentRail::Invoice, dec!(25))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvoiceCreation(_)));
        assert_eq!(engine.intent_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_request_invoice_persists_provider_token() {
        let mut harness = Harness::new().with_account(1).await;
        let intents = harness.intents.clone();
        harness.issuer.expect_create_invoice().times(1).returning(|_| {
            Ok(CreatedInvoice {
                invoice_id: "91170".to_string(),
                pay_url: "https://t.me/pay/91170".to_string(),
            })
        });
        let engine = harness.build();

        let receipt = engine
            .request_funding(1, PaymentRail::Invoice, dec!(25))
            .await
            .unwrap();

        assert_eq!(receipt.intent.correlation_token, "91170");
        assert_eq!(receipt.intent.status, IntentStatus::Pending);
        assert!(receipt.intent.expires_at.is_none());
        assert!(matches!(receipt.pay, PayInstructions::Invoice { ref pay_url } if pay_url.contains("91170")));

        let stored = intents.get_by_token("91170").await.unwrap().unwrap();
        assert_eq!(stored.intent_id, receipt.intent.intent_id);
    }

    #[tokio::test]
    async fn test_check_now_rejects_onchain_rail() {
        let harness = Harness::new().with_account(1).await;
        let intent = PaymentIntent::onchain(1, dec!(2), Duration::from_secs(60));
        harness.intents.insert(&intent).await.unwrap();
        let engine = harness.build();

        let err = engine.check_now(&intent.intent_id).await.unwrap_err();
        assert!(matches!(err, EngineError::WrongRail(_)));
    }

    #[tokio::test]
    async fn test_check_now_unknown_intent() {
        let engine = Harness::new().build();
        let err = engine.check_now("pi_missing").await.unwrap_err();
        assert!(matches!(err, EngineError::IntentNotFound(_)));
    }

    #[tokio::test]
    async fn test_check_now_unpaid_then_paid() {
        let mut harness = Harness::new().with_account(1).await;
        let ledger = harness.ledger.clone();
        let intent = PaymentIntent::invoice(1, dec!(25), "91170".to_string());
        harness.intents.insert(&intent).await.unwrap();

        let mut seq = Sequence::new();
        harness
            .invoices
            .expect_find_match()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        harness
            .invoices
            .expect_find_match()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Some(SourceMatch {
                    amount: dec!(25),
                    observed_at: None,
                }))
            });
        let engine = harness.build();

        assert_eq!(
            engine.check_now(&intent.intent_id).await.unwrap(),
            CheckOutcome::Pending
        );
        assert_eq!(
            engine.check_now(&intent.intent_id).await.unwrap(),
            CheckOutcome::NewlyConfirmed
        );
        // Terminal state short-circuits; the provider is not called again
        assert_eq!(
            engine.check_now(&intent.intent_id).await.unwrap(),
            CheckOutcome::AlreadyConfirmed
        );

        let account = ledger.account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(25));
        assert_eq!(account.total_deposited, dec!(25));
    }

    #[tokio::test]
    async fn test_check_now_absorbs_provider_error() {
        let mut harness = Harness::new().with_account(1).await;
        let ledger = harness.ledger.clone();
        let intent = PaymentIntent::invoice(1, dec!(25), "91170".to_string());
        harness.intents.insert(&intent).await.unwrap();
        harness
            .invoices
            .expect_find_match()
            .times(1)
            .returning(|_| Err(SourceError::Provider("upstream timeout".to_string())));
        let engine = harness.build();

        assert_eq!(
            engine.check_now(&intent.intent_id).await.unwrap(),
            CheckOutcome::Pending
        );
        assert_eq!(ledger.account(1).await.unwrap().unwrap().balance, dec!(0));
    }

    #[tokio::test]
    async fn test_abandon_pending_intent() {
        let harness = Harness::new().with_account(1).await;
        let ledger = harness.ledger.clone();
        let intent = PaymentIntent::invoice(1, dec!(25), "91170".to_string());
        harness.intents.insert(&intent).await.unwrap();
        let engine = harness.build();

        assert!(engine.abandon(&intent.intent_id).await.unwrap());
        assert!(!engine.abandon(&intent.intent_id).await.unwrap());
        assert_eq!(
            engine.check_now(&intent.intent_id).await.unwrap(),
            CheckOutcome::Abandoned
        );
        assert_eq!(ledger.account(1).await.unwrap().unwrap().balance, dec!(0));
    }

    #[tokio::test]
    async fn test_onchain_poll_credits_requested_amount() {
        let mut harness = Harness::new().with_account(1).await;
        let intents = harness.intents.clone();
        let ledger = harness.ledger.clone();
        harness.chain.expect_find_match().returning(|criteria| {
            let MatchCriteria::OnChain { expected, .. } = criteria else {
                return Ok(None);
            };
            // Slight overpayment; the ledger must still credit the
            // requested amount
            Ok(Some(SourceMatch {
                amount: *expected + dec!(0.1),
                observed_at: None,
            }))
        });

        let mut notifier = MockNotificationSink::new();
        notifier
            .expect_intent_outcome()
            .withf(|outcome| matches!(outcome.kind, OutcomeKind::Confirmed { credited } if credited == dec!(2.5)))
            .times(1)
            .returning(|_| ());
        harness.notifier = Some(notifier);
        let engine = harness.build();

        let receipt = engine
            .request_funding(1, PaymentRail::OnChain, dec!(2.5))
            .await
            .unwrap();
        assert!(matches!(
            receipt.pay,
            PayInstructions::OnChain { ref wallet_address, .. } if wallet_address == "UQDesk-test-wallet"
        ));

        engine.wait_for(&receipt.intent.intent_id).await;

        let stored = intents.get(&receipt.intent.intent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Confirmed);
        assert_eq!(ledger.account(1).await.unwrap().unwrap().balance, dec!(2.5));
        assert_eq!(engine.active_polls().await, 0);
    }

    #[tokio::test]
    async fn test_onchain_poll_expires_once_without_credit() {
        let mut harness = Harness::new().with_account(1).await;
        harness.config.onchain_deadline = Duration::from_millis(60);
        let intents = harness.intents.clone();
        let ledger = harness.ledger.clone();
        harness.chain.expect_find_match().returning(|_| Ok(None));

        let mut notifier = MockNotificationSink::new();
        notifier
            .expect_intent_outcome()
            .withf(|outcome| outcome.kind == OutcomeKind::Expired)
            .times(1)
            .returning(|_| ());
        harness.notifier = Some(notifier);
        let engine = harness.build();

        let receipt = engine
            .request_funding(1, PaymentRail::OnChain, dec!(2.5))
            .await
            .unwrap();
        engine.wait_for(&receipt.intent.intent_id).await;

        let stored = intents.get(&receipt.intent.intent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Expired);
        assert_eq!(ledger.account(1).await.unwrap().unwrap().balance, dec!(0));

        // A payment surfacing after expiry must not flip the state back
        assert!(!intents
            .transition(
                &receipt.intent.intent_id,
                IntentStatus::Pending,
                IntentStatus::Confirmed
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_onchain_poll_retries_through_errors() {
        let mut harness = Harness::new().with_account(1).await;
        let intents = harness.intents.clone();
        let ledger = harness.ledger.clone();

        let mut seq = Sequence::new();
        harness
            .chain
            .expect_find_match()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SourceError::Provider("HTTP 502".to_string())));
        harness
            .chain
            .expect_find_match()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Some(SourceMatch {
                    amount: dec!(2.5),
                    observed_at: None,
                }))
            });
        let engine = harness.build();

        let receipt = engine
            .request_funding(1, PaymentRail::OnChain, dec!(2.5))
            .await
            .unwrap();
        engine.wait_for(&receipt.intent.intent_id).await;

        let stored = intents.get(&receipt.intent.intent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Confirmed);
        assert_eq!(ledger.account(1).await.unwrap().unwrap().balance, dec!(2.5));
    }

    #[tokio::test]
    async fn test_abandon_stops_onchain_polling() {
        let mut harness = Harness::new().with_account(1).await;
        let intents = harness.intents.clone();
        // Long interval keeps the task parked between ticks
        harness.config.poll_interval = Duration::from_secs(3600);
        harness.chain.expect_find_match().returning(|_| Ok(None));
        let engine = harness.build();

        let receipt = engine
            .request_funding(1, PaymentRail::OnChain, dec!(2.5))
            .await
            .unwrap();

        assert!(engine.abandon(&receipt.intent.intent_id).await.unwrap());
        assert_eq!(engine.active_polls().await, 0);

        let stored = intents.get(&receipt.intent.intent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn test_resume_respawns_and_expires() {
        let harness = Harness::new().with_account(1).await;
        let intents = harness.intents.clone();

        let live = PaymentIntent::onchain(1, dec!(2), Duration::from_secs(300));
        let stale = PaymentIntent::onchain(1, dec!(3), Duration::ZERO);
        intents.insert(&live).await.unwrap();
        intents.insert(&stale).await.unwrap();

        let mut harness = harness;
        harness.chain.expect_find_match().returning(|_| Ok(None));
        let engine = harness.build();

        let resumed = engine.resume().await.unwrap();
        assert_eq!(resumed, 1);

        let stale_stored = intents.get(&stale.intent_id).await.unwrap().unwrap();
        assert_eq!(stale_stored.status, IntentStatus::Expired);
        let live_stored = intents.get(&live.intent_id).await.unwrap().unwrap();
        assert_eq!(live_stored.status, IntentStatus::Pending);

        engine.shutdown().await;
    }
}
