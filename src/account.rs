//! Account Collaborator Client
//! Mission: Fresh capital state every cycle, order hand-off on approval
//!
//! The broker/account system is external; this client only reads the
//! snapshot and submits approved signals. Snapshots are never cached:
//! capital checks must reflect the most recent state.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::config::AccountConfig;
use crate::models::{AccountSnapshot, Signal};

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    equity: f64,
    buying_power: f64,
    #[serde(default)]
    blocked: bool,
}

pub struct AccountClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AccountClient {
    pub fn new(config: &AccountConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("signalgrid/1.0")
            .build()
            .context("Failed to build account HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetch the current account snapshot. Called once per cycle, fresh.
    pub async fn snapshot(&self) -> Result<AccountSnapshot> {
        let url = format!("{}/v1/account", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Account snapshot request failed")?
            .error_for_status()
            .context("Account endpoint returned an error status")?;

        let snapshot: SnapshotResponse = response
            .json()
            .await
            .context("Failed to parse account snapshot")?;

        Ok(AccountSnapshot {
            equity: snapshot.equity,
            buying_power: snapshot.buying_power,
            blocked: snapshot.blocked,
        })
    }

    /// Submit an approved, already-ledgered signal as a broker order.
    /// The ledger entry is the source of truth; a submission failure is the
    /// caller's observability event, not a reason to unwind the ledger.
    pub async fn submit_order(&self, signal: &Signal) -> Result<()> {
        let url = format!("{}/v1/orders", self.base_url);

        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(signal)
            .send()
            .await
            .context("Order submission request failed")?
            .error_for_status()
            .context("Broker rejected the order submission")?;

        info!(
            instrument = %signal.instrument,
            action = signal.action.as_str(),
            sequence = signal.sequence_index,
            "order submitted to broker"
        );
        Ok(())
    }
}
