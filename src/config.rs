//! Environment-based Configuration
//!
//! All deployment-specific values come from environment variables, never
//! from hardcoded values. The operator binary loads a `.env` file first,
//! then reads the variables below.
//!
//! # Environment Variables
//!
//! ## Payment Rails
//! - `PAYDESK_WALLET_ADDRESS` - Receiving wallet for on-chain top-ups (required to run)
//! - `PAYDESK_CHAIN_API_URL` - Chain explorer URL template; `{address}` is
//!   replaced with the wallet address
//! - `PAYDESK_INVOICE_API_URL` - Invoice provider API base URL
//! - `PAYDESK_INVOICE_API_TOKEN` - Invoice provider API token (required to run)
//! - `PAYDESK_INVOICE_ASSET` - Asset code for issued invoices (default: "USDT")
//!
//! ## Storage
//! - `PAYDESK_DB_PATH` - SQLite database path (default: "paydesk.db")
//!
//! ## Reconciliation Tuning
//! - `PAYDESK_POLL_INTERVAL_SECS` - Seconds between on-chain polls (default: 30)
//! - `PAYDESK_ONCHAIN_DEADLINE_SECS` - On-chain intent lifetime (default: 1800)
//! - `PAYDESK_HTTP_TIMEOUT_SECS` - Per-request HTTP timeout (default: 10)
//! - `PAYDESK_MIN_ONCHAIN_AMOUNT` - Smallest on-chain top-up (default: 0.1)
//! - `PAYDESK_INVOICE_MIN` - Smallest invoice amount (default: 1)
//! - `PAYDESK_INVOICE_MAX` - Largest invoice amount (default: 1500)
//!
//! ## Logging
//! - `PAYDESK_LOG_LEVEL` - Logging level (default: "info")
//! - `PAYDESK_LOG_JSON` - Set to "1" for JSON log output

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::ReconcilerConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct PaydeskConfig {
    /// Receiving wallet address for on-chain top-ups
    pub wallet_address: String,

    /// Chain explorer URL template with an `{address}` placeholder
    pub chain_api_url: String,

    /// Invoice provider API base URL
    pub invoice_api_url: String,

    /// Invoice provider API token
    pub invoice_api_token: String,

    /// Asset code for issued invoices
    pub invoice_asset: String,

    /// SQLite database path
    pub db_path: String,

    /// Interval between on-chain poll attempts
    pub poll_interval: Duration,

    /// On-chain intent lifetime
    pub onchain_deadline: Duration,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,

    /// Smallest accepted on-chain top-up
    pub min_onchain_amount: Decimal,

    /// Smallest accepted invoice amount
    pub invoice_min: Decimal,

    /// Largest accepted invoice amount
    pub invoice_max: Decimal,

    /// Log level
    pub log_level: String,

    /// Whether logs are emitted as JSON
    pub log_json: bool,
}

impl Default for PaydeskConfig {
    fn default() -> Self {
        Self {
            wallet_address: String::new(),
            chain_api_url:
                "https://tonapi.io/v2/blockchain/accounts/{address}/transactions?limit=50"
                    .to_string(),
            invoice_api_url: "https://pay.crypt.bot/api".to_string(),
            invoice_api_token: String::new(),
            invoice_asset: "USDT".to_string(),
            db_path: "paydesk.db".to_string(),
            poll_interval: Duration::from_secs(30),
            onchain_deadline: Duration::from_secs(1800),
            http_timeout: Duration::from_secs(10),
            min_onchain_amount: Decimal::new(1, 1),
            invoice_min: Decimal::ONE,
            invoice_max: Decimal::new(1500, 0),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl PaydeskConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let wallet_address = env::var("PAYDESK_WALLET_ADDRESS").unwrap_or_default();
        let chain_api_url =
            env::var("PAYDESK_CHAIN_API_URL").unwrap_or(defaults.chain_api_url);
        let invoice_api_url =
            env::var("PAYDESK_INVOICE_API_URL").unwrap_or(defaults.invoice_api_url);
        let invoice_api_token = env::var("PAYDESK_INVOICE_API_TOKEN").unwrap_or_default();
        let invoice_asset = env::var("PAYDESK_INVOICE_ASSET").unwrap_or(defaults.invoice_asset);
        let db_path = env::var("PAYDESK_DB_PATH").unwrap_or(defaults.db_path);

        let poll_interval = secs_var("PAYDESK_POLL_INTERVAL_SECS", defaults.poll_interval)?;
        let onchain_deadline =
            secs_var("PAYDESK_ONCHAIN_DEADLINE_SECS", defaults.onchain_deadline)?;
        let http_timeout = secs_var("PAYDESK_HTTP_TIMEOUT_SECS", defaults.http_timeout)?;

        let min_onchain_amount =
            decimal_var("PAYDESK_MIN_ONCHAIN_AMOUNT", defaults.min_onchain_amount)?;
        let invoice_min = decimal_var("PAYDESK_INVOICE_MIN", defaults.invoice_min)?;
        let invoice_max = decimal_var("PAYDESK_INVOICE_MAX", defaults.invoice_max)?;

        let log_level = env::var("PAYDESK_LOG_LEVEL").unwrap_or(defaults.log_level);
        let log_json = env::var("PAYDESK_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            wallet_address,
            chain_api_url,
            invoice_api_url,
            invoice_api_token,
            invoice_asset,
            db_path,
            poll_interval,
            onchain_deadline,
            http_timeout,
            min_onchain_amount,
            invoice_min,
            invoice_max,
            log_level,
            log_json,
        })
    }

    /// Validate configuration for running the live service
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        if self.wallet_address.is_empty() {
            return Err(ConfigError::MissingEnvVar(
                "PAYDESK_WALLET_ADDRESS".to_string(),
            ));
        }
        if self.invoice_api_token.is_empty() {
            return Err(ConfigError::MissingEnvVar(
                "PAYDESK_INVOICE_API_TOKEN".to_string(),
            ));
        }
        if !self.chain_api_url.contains("{address}") {
            return Err(ConfigError::InvalidValue(
                "PAYDESK_CHAIN_API_URL".to_string(),
                "must contain an {address} placeholder".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYDESK_POLL_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.invoice_min > self.invoice_max {
            return Err(ConfigError::InvalidValue(
                "PAYDESK_INVOICE_MIN".to_string(),
                "minimum exceeds maximum".to_string(),
            ));
        }
        Ok(())
    }

    /// Derive the engine configuration
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: self.poll_interval,
            onchain_deadline: self.onchain_deadline,
            min_onchain_amount: self.min_onchain_amount,
            invoice_min: self.invoice_min,
            invoice_max: self.invoice_max,
            wallet_address: self.wallet_address.clone(),
        }
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== paydesk configuration ===");
        println!("Wallet: {}", mask_tail(&self.wallet_address));
        println!("Chain API: {}", self.chain_api_url);
        println!(
            "Invoice API: {} (token {})",
            self.invoice_api_url,
            if self.invoice_api_token.is_empty() {
                "missing"
            } else {
                "set"
            }
        );
        println!("Invoice asset: {}", self.invoice_asset);
        println!("Database: {}", self.db_path);
        println!(
            "Poll every {}s, deadline {}s, HTTP timeout {}s",
            self.poll_interval.as_secs(),
            self.onchain_deadline.as_secs(),
            self.http_timeout.as_secs()
        );
        println!(
            "Amounts: on-chain min {}, invoice {}..{}",
            self.min_onchain_amount, self.invoice_min, self.invoice_max
        );
        println!("Log level: {} (json: {})", self.log_level, self.log_json);
        println!("=============================");
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_secs(name, env::var(name).ok(), default)
}

fn decimal_var(name: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    parse_decimal(name, env::var(name).ok(), default)
}

fn parse_secs(name: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::InvalidValue(name.to_string(), format!("not a number: {}", value))
            }),
    }
}

fn parse_decimal(
    name: &str,
    raw: Option<String>,
    default: Decimal,
) -> Result<Decimal, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<Decimal>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("not a decimal: {}", value))
        }),
    }
}

fn mask_tail(value: &str) -> String {
    if value.len() <= 8 {
        return value.to_string();
    }
    format!("{}...", &value[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_secs() {
        let d = parse_secs("X", None, Duration::from_secs(30)).unwrap();
        assert_eq!(d, Duration::from_secs(30));

        let d = parse_secs("X", Some("90".to_string()), Duration::from_secs(30)).unwrap();
        assert_eq!(d, Duration::from_secs(90));

        assert!(parse_secs("X", Some("soon".to_string()), Duration::from_secs(30)).is_err());
    }

    #[test]
    fn test_parse_decimal() {
        let v = parse_decimal("X", None, dec!(0.1)).unwrap();
        assert_eq!(v, dec!(0.1));

        let v = parse_decimal("X", Some("2.5".to_string()), dec!(0.1)).unwrap();
        assert_eq!(v, dec!(2.5));

        assert!(parse_decimal("X", Some("lots".to_string()), dec!(0.1)).is_err());
    }

    #[test]
    fn test_validate_for_run() {
        let mut config = PaydeskConfig {
            wallet_address: "UQDesk-wallet".to_string(),
            invoice_api_token: "123:AAtoken".to_string(),
            ..PaydeskConfig::default()
        };
        assert!(config.validate_for_run().is_ok());

        config.wallet_address.clear();
        assert!(matches!(
            config.validate_for_run(),
            Err(ConfigError::MissingEnvVar(ref v)) if v == "PAYDESK_WALLET_ADDRESS"
        ));

        config.wallet_address = "UQDesk-wallet".to_string();
        config.chain_api_url = "https://example.com/txs".to_string();
        assert!(matches!(
            config.validate_for_run(),
            Err(ConfigError::InvalidValue(ref v, _)) if v == "PAYDESK_CHAIN_API_URL"
        ));
    }

    #[test]
    fn test_invoice_bounds_must_be_ordered() {
        let config = PaydeskConfig {
            wallet_address: "UQDesk-wallet".to_string(),
            invoice_api_token: "123:AAtoken".to_string(),
            invoice_min: dec!(100),
            invoice_max: dec!(10),
            ..PaydeskConfig::default()
        };
        assert!(config.validate_for_run().is_err());
    }

    #[test]
    fn test_reconciler_config_derivation() {
        let config = PaydeskConfig {
            wallet_address: "UQDesk-wallet".to_string(),
            poll_interval: Duration::from_secs(5),
            ..PaydeskConfig::default()
        };
        let rc = config.reconciler();
        assert_eq!(rc.poll_interval, Duration::from_secs(5));
        assert_eq!(rc.wallet_address, "UQDesk-wallet");
        assert_eq!(rc.min_onchain_amount, dec!(0.1));
    }
}
