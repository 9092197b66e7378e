//! Custodia - Deposit Pipeline Services
//!
//! Run modes:
//!   custodia-api api          - REST API server + reconciliation worker
//!   custodia-api reconciler   - Reconciliation worker only

use std::env;
use std::sync::Arc;

use custodia::api::{self, AppState};
use custodia::config::AppConfig;
use custodia::notify::{LogNotifier, Notifier, WebhookNotifier};
use custodia::oracle::BlockchainOracleClient;
use custodia::pipeline::{
    DepositConfirmationCoordinator, DepositIntake, LedgerFinalizer, ReconciliationScheduler,
};
use custodia::storage::{SqliteTicketStore, TicketStore};
use custodia::{logging, Result};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "api" => run_api_server().await,
        "reconciler" => run_reconciler().await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Custodia - Deposit Confirmation & Reconciliation Services");
    println!();
    println!("Usage:");
    println!("  custodia-api api           Start REST API server (runs the reconciler too)");
    println!("  custodia-api reconciler    Start the reconciliation worker only");
    println!();
    println!("Environment Variables:");
    println!("  CUSTODIA_ORACLE_URL           Verification endpoint (unset = degraded mode)");
    println!("  CUSTODIA_ORACLE_SECRET        Shared secret for oracle requests");
    println!("  CUSTODIA_ALLOW_UNVERIFIED     \"1\" lets deposits settle without verification");
    println!("  CUSTODIA_POLL_INTERVAL_SECS   Reconciliation interval (default: 60)");
    println!("  CUSTODIA_RECONCILE_BATCH      Max tickets per tick (default: 50)");
    println!("  CUSTODIA_DB_PATH              SQLite path (default: data/custodia.db)");
    println!("  CUSTODIA_API_PORT             REST API port (default: 3001)");
    println!("  CUSTODIA_NOTIFY_WEBHOOK       Notification webhook URL");
    println!("  CUSTODIA_WALLET_<ASSET>       System deposit address per asset");
}

/// Everything the two run modes share
struct Services {
    store: Arc<dyn TicketStore>,
    intake: DepositIntake,
    coordinator: DepositConfirmationCoordinator,
    scheduler: Arc<ReconciliationScheduler>,
}

async fn build_services(config: &AppConfig) -> Result<Services> {
    let store: Arc<dyn TicketStore> = Arc::new(SqliteTicketStore::new(&config.database_path)?);

    // Seed system wallet addresses from the environment
    for (asset, address) in &config.wallet_addresses {
        store.upsert_wallet(*asset, address, true).await?;
    }

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook {
        Some(endpoint) => Arc::new(WebhookNotifier::new(endpoint.clone())),
        None => Arc::new(LogNotifier),
    };

    let oracle = Arc::new(BlockchainOracleClient::new(config.oracle_config()));
    let finalizer = Arc::new(LedgerFinalizer::new(
        store.clone(),
        notifier.clone(),
        config.allow_unverified_deposits,
    ));

    let intake = DepositIntake::new(store.clone(), notifier);
    let coordinator =
        DepositConfirmationCoordinator::new(store.clone(), oracle.clone(), finalizer.clone());
    let scheduler = Arc::new(ReconciliationScheduler::new(
        store.clone(),
        oracle,
        finalizer,
        config.poll_interval_secs,
        config.reconcile_batch_size,
    ));

    Ok(Services {
        store,
        intake,
        coordinator,
        scheduler,
    })
}

/// Start REST API server plus the background reconciler
async fn run_api_server() -> Result<()> {
    let config = AppConfig::from_env()?;
    logging::init_logging(&config.log_level, config.log_json)?;
    config.log_summary();

    let services = build_services(&config).await?;

    let scheduler = services.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run().await;
    });

    let state = Arc::new(AppState {
        intake: services.intake,
        coordinator: services.coordinator,
        store: services.store,
    });

    api::start_server(state, config.api_port).await
}

/// Start the reconciliation worker only
async fn run_reconciler() -> Result<()> {
    let config = AppConfig::from_env()?;
    logging::init_logging(&config.log_level, config.log_json)?;
    config.log_summary();

    let services = build_services(&config).await?;
    services.scheduler.run().await;
    Ok(())
}
