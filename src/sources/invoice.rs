//! Invoice Provider
//!
//! Client for the custodial invoice service: creates hosted invoices and
//! checks whether one has been paid. All calls use the provider's
//! `{ok, result}` envelope and are authenticated with the API token header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{InvoiceIssuer, MatchCriteria, PaymentSource, SourceError, SourceMatch};

/// Header carrying the provider API token
pub const API_TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

/// The only provider status that counts as payment
const PAID_STATUS: &str = "paid";

/// Freshly created provider invoice
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedInvoice {
    /// Provider-assigned id, used as the intent's correlation token
    pub invoice_id: String,
    /// Hosted payment page the payer is sent to
    pub pay_url: String,
}

/// Invoice service client
#[derive(Debug, Clone)]
pub struct InvoiceProvider {
    client: Client,
    base_url: String,
    token: String,
    asset: String,
}

impl InvoiceProvider {
    /// Create with the provider base URL, API token and invoice asset.
    /// Every request carries the per-call timeout.
    pub fn new(
        base_url: &str,
        token: &str,
        asset: &str,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            asset: asset.to_string(),
        })
    }

    /// Fetch one invoice by id
    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<ProviderInvoice>, SourceError> {
        let url = format!("{}/getInvoices", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header(API_TOKEN_HEADER, &self.token)
            .query(&[("invoice_ids", invoice_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Provider(format!(
                "getInvoices returned {}",
                resp.status()
            )));
        }

        let envelope: ApiEnvelope<InvoiceItems> = resp.json().await?;
        let items = envelope.into_result()?.items;

        Ok(items
            .into_iter()
            .find(|item| item.invoice_id.to_string() == invoice_id))
    }
}

#[async_trait]
impl InvoiceIssuer for InvoiceProvider {
    async fn create_invoice(&self, amount: Decimal) -> Result<CreatedInvoice, SourceError> {
        let url = format!("{}/createInvoice", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(API_TOKEN_HEADER, &self.token)
            .json(&serde_json::json!({
                "amount": amount.to_string(),
                "asset": self.asset,
                "description": format!("Balance top-up: {} {}", amount, self.asset),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Provider(format!(
                "createInvoice returned {}",
                resp.status()
            )));
        }

        let envelope: ApiEnvelope<CreatedInvoiceResult> = resp.json().await?;
        let created = envelope.into_result()?;
        debug!(
            target: "paydesk::sources",
            invoice_id = created.invoice_id,
            "created provider invoice"
        );

        Ok(CreatedInvoice {
            invoice_id: created.invoice_id.to_string(),
            pay_url: created.pay_url,
        })
    }
}

#[async_trait]
impl PaymentSource for InvoiceProvider {
    async fn find_match(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<SourceMatch>, SourceError> {
        let invoice_id = match criteria {
            MatchCriteria::Invoice { invoice_id } => invoice_id,
            MatchCriteria::OnChain { .. } => return Err(SourceError::Unsupported),
        };

        let invoice = match self.get_invoice(invoice_id).await? {
            Some(invoice) => invoice,
            None => return Ok(None),
        };

        paid_invoice_to_match(&invoice)
    }
}

/// Turn a provider invoice into a match, or `None` while it is unpaid
fn paid_invoice_to_match(invoice: &ProviderInvoice) -> Result<Option<SourceMatch>, SourceError> {
    if invoice.status != PAID_STATUS {
        return Ok(None);
    }

    let amount = invoice
        .amount
        .as_deref()
        .and_then(|a| a.parse::<Decimal>().ok())
        .ok_or_else(|| {
            SourceError::Malformed(format!(
                "paid invoice {} without a readable amount",
                invoice.invoice_id
            ))
        })?;

    Ok(Some(SourceMatch {
        amount,
        observed_at: invoice.paid_at.as_deref().and_then(parse_provider_time),
    }))
}

fn parse_provider_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// =============================================================================
// Provider API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error: Option<serde_json::Value>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self) -> Result<T, SourceError> {
        if !self.ok {
            let detail = self
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown provider error".to_string());
            return Err(SourceError::Provider(detail));
        }

        self.result
            .ok_or_else(|| SourceError::Malformed("ok response without result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceItems {
    #[serde(default)]
    items: Vec<ProviderInvoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderInvoice {
    invoice_id: i64,
    status: String,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoiceResult {
    invoice_id: i64,
    pay_url: String,
}
