//! Standalone sync receiver - the downstream end of the two-ledger sync.
//!
//! Runs against its own independently owned database and accepts
//! authenticated, hash-verified signal pushes on POST /signal.

use anyhow::{bail, Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signalgrid_backend::{
    api::health,
    ledger::LedgerStore,
    sync::receiver::{self, ReceiverState},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "SignalGrid sync receiver")]
struct Cli {
    /// Receiver-side ledger database
    #[arg(long, default_value = "./signalgrid_receiver.db")]
    db: String,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:9100")]
    bind: String,

    /// Shared secret for push authentication (env fallback: SYNC_SHARED_SECRET)
    #[arg(long, env = "SYNC_SHARED_SECRET", hide_env_values = true)]
    shared_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_receiver=debug,signalgrid_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let Some(shared_secret) = cli.shared_secret.filter(|s| !s.is_empty()) else {
        bail!("shared secret is not set (--shared-secret or SYNC_SHARED_SECRET)");
    };

    let store = Arc::new(LedgerStore::new(&cli.db)?);
    let verified = store
        .verify()
        .context("receiver ledger chain verification failed")?;
    info!(entries = verified, db = %cli.db, "🔗 receiver ledger verified");

    let state = Arc::new(ReceiverState {
        store,
        shared_secret,
    });

    let app = Router::new()
        .route("/health", get(health))
        .merge(receiver::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("📥 sync receiver listening on {}", cli.bind);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
