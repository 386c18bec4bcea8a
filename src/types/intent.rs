//! Payment Intent Types
//!
//! Types for tracking funding requests through their lifecycle:
//! pending → confirmed | expired | failed

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Funding channel a payment intent settles through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    /// Direct wallet transfer, matched by memo comment
    OnChain,
    /// Custodial provider invoice, matched by invoice id
    Invoice,
}

impl std::fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OnChain => "on_chain",
            Self::Invoice => "invoice",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PaymentRail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_chain" => Ok(Self::OnChain),
            "invoice" => Ok(Self::Invoice),
            _ => Err(format!("unknown rail: {}", s)),
        }
    }
}

/// Status of a payment intent through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for the payment to appear on its rail
    Pending,
    /// Payment matched and credited, terminal
    Confirmed,
    /// Polling deadline elapsed with no match, terminal
    Expired,
    /// Abandoned by the user, terminal
    Failed,
}

impl IntentStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Default for IntentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// A funding request tracked from submission to a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Unique intent ID
    pub intent_id: String,
    /// Chat platform numeric user id the credit belongs to
    pub user_id: i64,
    /// Which rail settles this intent
    pub rail: PaymentRail,
    /// Requested amount, in coins for on-chain and in the invoice asset otherwise
    pub amount: Decimal,
    /// Memo comment (on-chain) or provider invoice id (invoice rail).
    /// Globally unique and never reused.
    pub correlation_token: String,
    /// Current status
    pub status: IntentStatus,
    /// Timestamp when the intent was created
    pub created_at: DateTime<Utc>,
    /// Polling deadline; on-chain intents only, invoice intents never expire on their own
    pub expires_at: Option<DateTime<Utc>>,
    /// Timestamp of last status update
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Create a pending on-chain intent with a generated correlation token
    pub fn onchain(user_id: i64, amount: Decimal, deadline: Duration) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(deadline).unwrap_or_default();

        Self {
            intent_id: Self::generate_id(now),
            user_id,
            rail: PaymentRail::OnChain,
            amount,
            correlation_token: Uuid::new_v4().simple().to_string(),
            status: IntentStatus::Pending,
            created_at: now,
            expires_at: Some(now + ttl),
            updated_at: now,
        }
    }

    /// Create a pending invoice intent keyed by the provider's invoice id
    pub fn invoice(user_id: i64, amount: Decimal, invoice_id: String) -> Self {
        let now = Utc::now();

        Self {
            intent_id: Self::generate_id(now),
            user_id,
            rail: PaymentRail::Invoice,
            amount,
            correlation_token: invoice_id,
            status: IntentStatus::Pending,
            created_at: now,
            expires_at: None,
            updated_at: now,
        }
    }

    fn generate_id(now: DateTime<Utc>) -> String {
        format!("pi_{}_{:08x}", now.timestamp(), rand::random::<u32>())
    }

    /// Update status and touch timestamp
    pub fn set_status(&mut self, status: IntentStatus) {
        self.status = status;
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the polling deadline has passed
    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// Time left until the polling deadline, zero if already past
    pub fn remaining_deadline(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Update timestamp
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What the payer has to do, rendered by the chat layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayInstructions {
    /// Transfer the amount to `wallet_address` with `memo_token` as the comment
    OnChain {
        wallet_address: String,
        memo_token: String,
    },
    /// Open the provider-hosted payment page
    Invoice { pay_url: String },
}

/// Result of an accepted funding request
#[derive(Debug, Clone, Serialize)]
pub struct FundingReceipt {
    pub intent: PaymentIntent,
    pub pay: PayInstructions,
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Interval between on-chain poll attempts
    pub poll_interval: Duration,
    /// How long an on-chain intent is polled before it expires
    pub onchain_deadline: Duration,
    /// Smallest accepted on-chain top-up, in coins
    pub min_onchain_amount: Decimal,
    /// Smallest accepted invoice amount, in the invoice asset
    pub invoice_min: Decimal,
    /// Largest accepted invoice amount, in the invoice asset
    pub invoice_max: Decimal,
    /// Receiving wallet address shown in pay instructions
    pub wallet_address: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            onchain_deadline: Duration::from_secs(1800),
            min_onchain_amount: Decimal::new(1, 1),
            invoice_min: Decimal::ONE,
            invoice_max: Decimal::new(1500, 0),
            wallet_address: String::new(), // Must be set via env
        }
    }
}

/// Intent counters for the operator stats screen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentStats {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub expired: u64,
    pub failed: u64,
    /// Sum of confirmed intent amounts
    pub confirmed_amount: Decimal,
}

impl std::fmt::Display for IntentStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Intents: {} total | {} pending | {} confirmed | {} expired | {} failed | {} confirmed amount",
            self.total, self.pending, self.confirmed, self.expired, self.failed, self.confirmed_amount
        )
    }
}
