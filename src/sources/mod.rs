//! Payment Sources Module
//!
//! External systems of truth a pending intent is reconciled against:
//! the chain explorer for wallet transfers and the custodial invoice
//! provider for hosted invoices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod chain;
pub mod invoice;

pub use chain::{ChainExplorer, MEMO_MATCH_TOLERANCE};
pub use invoice::{CreatedInvoice, InvoiceProvider, API_TOKEN_HEADER};

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Criteria not supported by this source")]
    Unsupported,
}

/// What to look for on a payment source
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCriteria {
    /// A wallet transfer carrying this memo, worth enough to cover `expected`
    OnChain { token: String, expected: Decimal },
    /// A provider invoice reported as paid
    Invoice { invoice_id: String },
}

/// A payment observed on a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMatch {
    /// Amount the source reports, in coins or the invoice asset
    pub amount: Decimal,
    /// Provider-side timestamp, when the source exposes one
    pub observed_at: Option<DateTime<Utc>>,
}

/// A system of truth pending intents are verified against
///
/// Implementations:
/// - `ChainExplorer` - wallet transfer scan for on-chain intents
/// - `InvoiceProvider` - paid-status check for invoice intents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentSource: Send + Sync {
    /// Look for a payment satisfying `criteria`.
    ///
    /// `Ok(None)` means nothing matched this attempt. Transport trouble is
    /// an error; callers decide whether to retry.
    async fn find_match(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<SourceMatch>, SourceError>;
}

/// Creates provider invoices ahead of intent persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvoiceIssuer: Send + Sync {
    /// Create a hosted invoice for `amount`.
    /// On failure nothing is left behind on the provider side to reconcile.
    async fn create_invoice(&self, amount: Decimal) -> Result<CreatedInvoice, SourceError>;
}
