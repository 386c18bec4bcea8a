//! Outcome Notifications
//!
//! The chat layer implements `NotificationSink` to tell the user when an
//! intent settles. `TracingNotifier` keeps headless runs observable.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::types::{PaymentIntent, PaymentRail};

/// Terminal outcome of one intent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Payment matched; `credited` is what the ledger applied
    Confirmed { credited: Decimal },
    /// Deadline elapsed with no matching payment
    Expired,
}

/// Notification payload delivered once per settled intent
#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub intent_id: String,
    pub user_id: i64,
    pub rail: PaymentRail,
    pub kind: OutcomeKind,
}

impl IntentOutcome {
    pub fn confirmed(intent: &PaymentIntent, credited: Decimal) -> Self {
        Self {
            intent_id: intent.intent_id.clone(),
            user_id: intent.user_id,
            rail: intent.rail,
            kind: OutcomeKind::Confirmed { credited },
        }
    }

    pub fn expired(intent: &PaymentIntent) -> Self {
        Self {
            intent_id: intent.intent_id.clone(),
            user_id: intent.user_id,
            rail: intent.rail,
            kind: OutcomeKind::Expired,
        }
    }
}

/// Consumer of settlement outcomes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Called at most once per intent, after its terminal transition
    async fn intent_outcome(&self, outcome: IntentOutcome);
}

/// Sink that only logs, for headless operation
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn intent_outcome(&self, outcome: IntentOutcome) {
        match &outcome.kind {
            OutcomeKind::Confirmed { credited } => info!(
                intent_id = %outcome.intent_id,
                user_id = outcome.user_id,
                rail = %outcome.rail,
                credited = %credited,
                "intent confirmed"
            ),
            OutcomeKind::Expired => info!(
                intent_id = %outcome.intent_id,
                user_id = outcome.user_id,
                rail = %outcome.rail,
                "intent expired"
            ),
        }
    }
}
