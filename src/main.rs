//! paydesk - Payment Reconciliation Service
//!
//! Matches funding intents against on-chain transfers and provider
//! invoices, and credits user balances exactly once per payment.
//!
//! Run modes:
//!   cargo run                - Show usage
//!   cargo run -- run         - Start the reconciliation service
//!   cargo run -- stats       - Print intent and ledger statistics

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use paydesk::reconcile::{Reconciler, TracingNotifier};
use paydesk::sources::{ChainExplorer, InvoiceProvider};
use paydesk::storage::{IntentStore, Ledger, SqliteIntentStore, SqliteLedger};
use paydesk::{init_from_config, PaydeskConfig};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "run" => run_service(&args[2..]).await,
        "stats" => print_stats(&args[2..]).await,
        "help" | "--help" | "-h" => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("paydesk - Payment Reconciliation Service");
    println!();
    println!("Usage:");
    println!("  paydesk run [--interval <secs>] [--deadline <secs>] [--db <path>]");
    println!("                                   Start the reconciliation service");
    println!("  paydesk stats [--db <path>]      Print intent and ledger statistics");
    println!();
    println!("Environment Variables:");
    println!("  PAYDESK_WALLET_ADDRESS     Receiving wallet for on-chain top-ups");
    println!("  PAYDESK_CHAIN_API_URL      Chain explorer URL template ({{address}} placeholder)");
    println!("  PAYDESK_INVOICE_API_URL    Invoice provider API base URL");
    println!("  PAYDESK_INVOICE_API_TOKEN  Invoice provider API token");
    println!("  PAYDESK_DB_PATH            SQLite database path (default: paydesk.db)");
    println!("  PAYDESK_LOG_LEVEL          Logging level (default: info)");
    println!();
    println!("A .env file in the working directory is loaded first.");
}

async fn run_service(args: &[String]) {
    let mut config = match PaydeskConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Parse arguments
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--interval" if i + 1 < args.len() => {
                if let Ok(secs) = args[i + 1].parse() {
                    config.poll_interval = Duration::from_secs(secs);
                }
                i += 2;
            }
            "--deadline" if i + 1 < args.len() => {
                if let Ok(secs) = args[i + 1].parse() {
                    config.onchain_deadline = Duration::from_secs(secs);
                }
                i += 2;
            }
            "--db" if i + 1 < args.len() => {
                config.db_path = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }

    if let Err(e) = config.validate_for_run() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    config.print_summary();

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match engine.resume().await {
        Ok(0) => {}
        Ok(resumed) => println!("Resumed polling for {} pending on-chain intents", resumed),
        Err(e) => eprintln!("Warning: Failed to resume pending intents: {}", e),
    }

    println!();
    println!("Watching for payments...");
    println!("Press Ctrl+C to stop");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: {}", e);
    }

    println!("Shutting down...");
    engine.shutdown().await;
}

fn build_engine(config: &PaydeskConfig) -> paydesk::Result<Reconciler> {
    let intents = Arc::new(SqliteIntentStore::new(&config.db_path)?);
    let ledger = Arc::new(SqliteLedger::new(&config.db_path)?);

    let chain = Arc::new(ChainExplorer::new(
        &config.chain_api_url,
        &config.wallet_address,
        config.http_timeout,
    )?);
    let provider = Arc::new(InvoiceProvider::new(
        &config.invoice_api_url,
        &config.invoice_api_token,
        &config.invoice_asset,
        config.http_timeout,
    )?);

    // The invoice provider serves as both payment source and issuer
    Ok(Reconciler::new(
        config.reconciler(),
        intents,
        ledger,
        chain,
        provider.clone(),
        provider,
        Arc::new(TracingNotifier),
    ))
}

async fn print_stats(args: &[String]) {
    let mut db_path = env::var("PAYDESK_DB_PATH").unwrap_or_else(|_| "paydesk.db".to_string());

    // Parse arguments
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }

    let intents = match SqliteIntentStore::new(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let ledger = match SqliteLedger::new(&db_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== paydesk statistics ===");
    println!("Database: {}", db_path);
    println!();

    match intents.stats().await {
        Ok(stats) => println!("{}", stats),
        Err(e) => eprintln!("Error reading intent stats: {}", e),
    }
    match ledger.stats(Utc::now()).await {
        Ok(stats) => println!("{}", stats),
        Err(e) => eprintln!("Error reading ledger stats: {}", e),
    }
}
