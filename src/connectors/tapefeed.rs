//! Tapefeed Integration
//! Mission: Order-flow imbalance snapshots from the Tapefeed API

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{Direction, Vote};

use super::SourceConnector;

/// Imbalance below this magnitude reads as two-sided tape
const IMBALANCE_FLOOR: f64 = 0.1;

#[derive(Debug, Deserialize)]
struct FlowSummary {
    buy_volume: f64,
    sell_volume: f64,
    last_trade_price: f64,
}

pub struct TapefeedConnector {
    client: Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
}

impl TapefeedConnector {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("signalgrid/1.0")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            provider_id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

/// Signed buy/sell imbalance in [-1, 1]
fn flow_imbalance(buy_volume: f64, sell_volume: f64) -> Option<f64> {
    let total = buy_volume + sell_volume;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some((buy_volume - sell_volume) / total)
}

fn imbalance_to_opinion(imbalance: f64) -> (Direction, f64) {
    let confidence = (50.0 + imbalance.abs() * 50.0).clamp(0.0, 100.0);
    if imbalance > IMBALANCE_FLOOR {
        (Direction::Long, confidence)
    } else if imbalance < -IMBALANCE_FLOOR {
        (Direction::Short, confidence)
    } else {
        (Direction::Neutral, confidence)
    }
}

#[async_trait]
impl SourceConnector for TapefeedConnector {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch(&self, instrument: &str) -> Result<Vote> {
        let url = format!("{}/flow/summary/{}", self.base_url, instrument);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .context("Tapefeed request failed")?
            .error_for_status()
            .context("Tapefeed returned an error status")?;

        let summary: FlowSummary = response
            .json()
            .await
            .context("Failed to parse Tapefeed flow summary")?;

        let Some(imbalance) = flow_imbalance(summary.buy_volume, summary.sell_volume) else {
            bail!("Tapefeed reported an empty tape for {}", instrument);
        };
        let (direction, confidence) = imbalance_to_opinion(imbalance);

        Ok(Vote {
            provider_id: self.provider_id.clone(),
            direction,
            raw_confidence: confidence,
            observed_price: summary.last_trade_price,
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sided_tape_is_directional() {
        let imbalance = flow_imbalance(900.0, 100.0).unwrap();
        let (direction, confidence) = imbalance_to_opinion(imbalance);
        assert_eq!(direction, Direction::Long);
        assert!((confidence - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sell_pressure_is_short() {
        let imbalance = flow_imbalance(100.0, 400.0).unwrap();
        let (direction, _) = imbalance_to_opinion(imbalance);
        assert_eq!(direction, Direction::Short);
    }

    #[test]
    fn balanced_tape_is_neutral() {
        let imbalance = flow_imbalance(505.0, 495.0).unwrap();
        let (direction, _) = imbalance_to_opinion(imbalance);
        assert_eq!(direction, Direction::Neutral);
    }

    #[test]
    fn empty_tape_yields_no_imbalance() {
        assert!(flow_imbalance(0.0, 0.0).is_none());
    }
}
