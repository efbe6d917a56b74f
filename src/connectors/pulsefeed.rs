//! Pulsefeed Integration
//! Mission: Sentiment bias snapshots from the Pulsefeed REST API

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{Direction, Vote};

use super::SourceConnector;

#[derive(Debug, Deserialize)]
struct PulseResponse {
    /// "bullish", "bearish" or "flat"
    bias: String,
    /// Bias strength in [0, 100]
    score: f64,
    last_price: f64,
}

pub struct PulsefeedConnector {
    client: Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
}

impl PulsefeedConnector {
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

fn bias_to_direction(bias: &str) -> Direction {
    match bias {
        "bullish" => Direction::Long,
        "bearish" => Direction::Short,
        _ => Direction::Neutral,
    }
}

#[async_trait]
impl SourceConnector for PulsefeedConnector {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch(&self, instrument: &str) -> Result<Vote> {
        let url = format!("{}/v1/pulse/{}", self.base_url, instrument);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .context("Pulsefeed request failed")?
            .error_for_status()
            .context("Pulsefeed returned an error status")?;

        let pulse: PulseResponse = response
            .json()
            .await
            .context("Failed to parse Pulsefeed response")?;

        Ok(Vote {
            provider_id: self.provider_id.clone(),
            direction: bias_to_direction(&pulse.bias),
            raw_confidence: pulse.score.clamp(0.0, 100.0),
            observed_price: pulse.last_price,
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_maps_to_direction() {
        assert_eq!(bias_to_direction("bullish"), Direction::Long);
        assert_eq!(bias_to_direction("bearish"), Direction::Short);
        assert_eq!(bias_to_direction("flat"), Direction::Neutral);
        assert_eq!(bias_to_direction("garbage"), Direction::Neutral);
    }
}
