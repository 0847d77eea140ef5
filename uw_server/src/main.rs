//! User wallet ledger server.
//!
//! Serves the wallet and checkout HTTP API over a PostgreSQL-backed (or
//! in-memory) ledger.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use log::info;
use pico_args::Arguments;
use user_wallet::{Database, LedgerStore, MemoryLedgerStore, PgLedgerStore, WalletLedger};
use uw_server::{
    api,
    config::{ServerConfig, StorageConfig},
    logging, metrics,
    shutdown::Shutdown,
};

const HELP: &str = "\
Run the user wallet ledger server

USAGE:
  uw_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL or postgres://wallet@localhost/user_wallet]

FLAGS:
  --memory                 Keep the ledger in memory (balances are lost on exit)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  LEDGER_STORAGE           postgres | memory
  LEDGER_API_TOKEN         Service bearer token (required, 32+ characters)
  METRICS_BIND             Prometheus exporter address (optional)
  CURRENCY_CODE            Display currency [default: USD]
  CURRENCY_DECIMALS        Minor-unit digits [default: 2]
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory: pargs.contains("--memory"),
    };

    // Catching signals for a graceful exit.
    let shutdown = Shutdown::new();
    shutdown.install()?;

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.memory)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(anyhow::Error::msg)?;
        info!("Prometheus metrics exposed at http://{}/metrics", addr);
    }

    let (store, database): (Arc<dyn LedgerStore>, Option<Database>) = match &config.storage {
        StorageConfig::Memory => {
            log::warn!("Using in-memory ledger; balances will not survive a restart");
            (Arc::new(MemoryLedgerStore::new()), None)
        }
        StorageConfig::Postgres(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            info!("Database connected and migrated");
            (Arc::new(PgLedgerStore::new(db.pool().clone())), Some(db))
        }
    };

    let ledger = Arc::new(WalletLedger::with_config(store, config.ledger.clone()));
    info!(
        "Ledger ready (max commit attempts {}, lock timeout {:?})",
        config.ledger.max_commit_attempts, config.ledger.lock_timeout
    );
    if !config.gateway.enabled {
        log::warn!("Wallet checkout gateway is disabled (GATEWAY_ENABLED=false)");
    }

    let api_state = api::AppState::new(
        ledger,
        config.gateway.clone(),
        config.currency.clone(),
        &config.api_token,
        database.clone(),
    );
    let app = api::create_router(api_state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.wait())
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}
