//! Chain Explorer
//!
//! Polls the wallet transaction endpoint to find inbound transfers whose
//! memo comment matches a pending intent's correlation token.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{MatchCriteria, PaymentSource, SourceError, SourceMatch};
use crate::types::units::base_units_to_coins;

/// Fraction of the requested amount a transfer must reach to match.
/// Absorbs base-unit conversion rounding, not underpayment: a transfer
/// below the band never matches.
pub const MEMO_MATCH_TOLERANCE: Decimal = dec!(0.999);

/// Chain explorer that scans recent wallet transfers
#[derive(Debug, Clone)]
pub struct ChainExplorer {
    client: Client,
    url: String,
}

impl ChainExplorer {
    /// Create with the endpoint template and wallet address.
    ///
    /// The template's `{address}` placeholder is filled with the wallet
    /// address. Every request carries the per-call timeout.
    pub fn new(
        url_template: &str,
        wallet_address: &str,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url_template.replace("{address}", wallet_address),
        })
    }

    /// Fetch the wallet's recent inbound transactions
    async fn recent_transfers(&self) -> Result<Vec<ChainTransaction>, SourceError> {
        let resp = self.client.get(&self.url).send().await?;

        if !resp.status().is_success() {
            return Err(SourceError::Provider(format!(
                "transaction endpoint returned {}",
                resp.status()
            )));
        }

        let page: TransactionPage = resp.json().await?;
        Ok(page.transactions)
    }
}

#[async_trait]
impl PaymentSource for ChainExplorer {
    async fn find_match(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<SourceMatch>, SourceError> {
        let (token, expected) = match criteria {
            MatchCriteria::OnChain { token, expected } => (token.as_str(), *expected),
            MatchCriteria::Invoice { .. } => return Err(SourceError::Unsupported),
        };

        let transfers = self.recent_transfers().await?;
        debug!(
            target: "paydesk::sources",
            candidates = transfers.len(),
            token,
            "scanned wallet transfers"
        );

        Ok(match_transfer(&transfers, token, expected))
    }
}

/// Scan transfers for one whose memo equals `token` exactly and whose
/// value covers the tolerance band of `expected`.
fn match_transfer(
    transfers: &[ChainTransaction],
    token: &str,
    expected: Decimal,
) -> Option<SourceMatch> {
    for tx in transfers {
        let msg = match &tx.in_msg {
            Some(msg) => msg,
            None => continue,
        };

        if msg.message.as_deref() != Some(token) {
            continue;
        }

        let value = base_units_to_coins(msg.value);
        if value >= expected * MEMO_MATCH_TOLERANCE {
            return Some(SourceMatch {
                amount: value,
                observed_at: tx.utime.and_then(|t| DateTime::from_timestamp(t, 0)),
            });
        }
    }

    None
}

// =============================================================================
// Chain API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TransactionPage {
    #[serde(default)]
    transactions: Vec<ChainTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChainTransaction {
    #[serde(default)]
    in_msg: Option<InboundMessage>,
    /// Chain-side unix timestamp of the transaction
    #[serde(default)]
    utime: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct InboundMessage {
    /// Memo comment attached by the payer
    #[serde(default)]
    message: Option<String>,
    /// Transferred value in base units
    #[serde(default)]
    value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> Vec<ChainTransaction> {
        serde_json::from_str::<TransactionPage>(json)
            .unwrap()
            .transactions
    }

    #[test]
    fn test_match_by_memo_and_value() {
        let transfers = page(
            r#"{"transactions": [
                {"in_msg": {"message": "other", "value": 5000000000}, "utime": 1700000000},
                {"in_msg": {"message": "tok_abc", "value": 1500000000}, "utime": 1700000100}
            ]}"#,
        );

        let matched = match_transfer(&transfers, "tok_abc", dec!(1.5)).unwrap();
        assert_eq!(matched.amount, dec!(1.5));
        assert_eq!(
            matched.observed_at,
            DateTime::from_timestamp(1_700_000_100, 0)
        );
    }

    #[test]
    fn test_tolerance_band() {
        let transfers = page(
            r#"{"transactions": [
                {"in_msg": {"message": "tok_abc", "value": 999000000}}
            ]}"#,
        );

        // 0.999 of the requested 1.0 still matches
        assert!(match_transfer(&transfers, "tok_abc", dec!(1)).is_some());

        // 0.9 of the requested amount never does
        let short = page(
            r#"{"transactions": [
                {"in_msg": {"message": "tok_abc", "value": 900000000}}
            ]}"#,
        );
        assert!(match_transfer(&short, "tok_abc", dec!(1)).is_none());
    }

    #[test]
    fn test_memo_must_match_exactly() {
        let transfers = page(
            r#"{"transactions": [
                {"in_msg": {"message": "tok_ab", "value": 2000000000}},
                {"in_msg": {"message": "TOK_ABC", "value": 2000000000}}
            ]}"#,
        );

        assert!(match_transfer(&transfers, "tok_abc", dec!(1)).is_none());
    }

    #[test]
    fn test_skips_malformed_entries() {
        let transfers = page(
            r#"{"transactions": [
                {},
                {"in_msg": {}},
                {"in_msg": {"message": "tok_abc"}},
                {"in_msg": {"message": "tok_abc", "value": 2000000000}}
            ]}"#,
        );

        // Entries with no inbound message or no value fall through;
        // the last one matches.
        let matched = match_transfer(&transfers, "tok_abc", dec!(2)).unwrap();
        assert_eq!(matched.amount, dec!(2));
        assert!(matched.observed_at.is_none());
    }

    #[test]
    fn test_underpaid_then_full_transfer() {
        let transfers = page(
            r#"{"transactions": [
                {"in_msg": {"message": "tok_abc", "value": 100000000}},
                {"in_msg": {"message": "tok_abc", "value": 1000000000}}
            ]}"#,
        );

        // The underpaid transfer with the right memo does not stop the scan
        let matched = match_transfer(&transfers, "tok_abc", dec!(1)).unwrap();
        assert_eq!(matched.amount, dec!(1));
    }

    #[test]
    fn test_empty_page_parses() {
        assert!(page(r#"{}"#).is_empty());
        assert!(match_transfer(&[], "tok", dec!(1)).is_none());
    }
}
