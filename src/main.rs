//! SignalGrid - Consensus Trading Signal Core
//! Mission: Many disagreeing providers in, one risk-gated signal out
//!
//! Startup order matters: configuration fails fast, the ledger chain is
//! verified before any new entry can be appended, and only then do the
//! per-instrument cycle loops and the query API come up.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signalgrid_backend::{
    account::AccountClient,
    api::{self, ApiState},
    config::AppConfig,
    connectors::build_connectors,
    ledger::LedgerStore,
    risk::RiskGate,
    scheduler::{Pipeline, PipelineCounters},
    sync::client::SyncClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "SignalGrid consensus signal core")]
struct Cli {
    /// Path to the TOML configuration document
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();

    info!("🚀 SignalGrid core starting");

    let config = Arc::new(AppConfig::load(&cli.config)?);
    info!(
        providers = config.providers.len(),
        instruments = config.instruments.tracked.len(),
        "configuration loaded and validated"
    );

    let store = Arc::new(LedgerStore::new(&config.ledger.db_path)?);
    let verified = store
        .verify()
        .context("ledger chain verification failed; refusing to start on a tampered store")?;
    info!(entries = verified, "🔗 ledger chain verified end-to-end");

    let risk = Arc::new(RwLock::new(RiskGate::new(
        config.risk.clone(),
        config.consensus.min_confidence,
        config.ledger.retention_days,
    )));

    let connectors = build_connectors(&config.providers, config.instruments.connector_timeout());
    let account = Arc::new(AccountClient::new(&config.account)?);
    let sync = Arc::new(SyncClient::new(&config.sync)?);
    let counters = Arc::new(PipelineCounters::default());

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        connectors,
        account,
        risk.clone(),
        store.clone(),
        sync,
        counters.clone(),
    ));
    let _cycle_tasks = pipeline.spawn();
    info!(
        interval_secs = config.instruments.poll_interval_secs,
        max_concurrent = config.instruments.max_concurrent_cycles,
        "cycle loops running"
    );

    let app = api::router(ApiState {
        store,
        risk,
        counters,
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 query API listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signalgrid_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
