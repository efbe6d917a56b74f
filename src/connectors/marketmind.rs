//! Marketmind Integration
//! Mission: Model-based direction forecasts from the Marketmind API

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{Direction, Vote};

use super::SourceConnector;

/// Forecasts closer to a coin flip than this margin are a Neutral opinion
const NEUTRAL_BAND: f64 = 0.05;

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    /// Model probability that price closes higher, in [0, 1]
    probability_up: f64,
    mark_price: f64,
}

pub struct MarketmindConnector {
    client: Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
}

impl MarketmindConnector {
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

/// Map an up-probability to a directional opinion with confidence.
/// Confidence scales with the distance from 0.5: a 0.9 probability is an
/// 80-confidence Long, a 0.5 probability carries no direction at all.
fn probability_to_opinion(probability_up: f64) -> (Direction, f64) {
    let p = probability_up.clamp(0.0, 1.0);
    let edge = p - 0.5;
    if edge.abs() < NEUTRAL_BAND {
        return (Direction::Neutral, (edge.abs() * 200.0).clamp(0.0, 100.0));
    }
    let direction = if edge > 0.0 {
        Direction::Long
    } else {
        Direction::Short
    };
    (direction, (edge.abs() * 200.0).clamp(0.0, 100.0))
}

#[async_trait]
impl SourceConnector for MarketmindConnector {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch(&self, instrument: &str) -> Result<Vote> {
        let url = format!("{}/api/forecast", self.base_url);

        let mut request = self.client.get(&url).query(&[("symbol", instrument)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Marketmind request failed")?
            .error_for_status()
            .context("Marketmind returned an error status")?;

        let forecast: ForecastResponse = response
            .json()
            .await
            .context("Failed to parse Marketmind forecast")?;

        let (direction, confidence) = probability_to_opinion(forecast.probability_up);

        Ok(Vote {
            provider_id: self.provider_id.clone(),
            direction,
            raw_confidence: confidence,
            observed_price: forecast.mark_price,
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_up_probability_is_confident_long() {
        let (direction, confidence) = probability_to_opinion(0.9);
        assert_eq!(direction, Direction::Long);
        assert!((confidence - 80.0).abs() < 1e-9);
    }

    #[test]
    fn strong_down_probability_is_confident_short() {
        let (direction, confidence) = probability_to_opinion(0.1);
        assert_eq!(direction, Direction::Short);
        assert!((confidence - 80.0).abs() < 1e-9);
    }

    #[test]
    fn coin_flip_is_neutral() {
        let (direction, _) = probability_to_opinion(0.52);
        assert_eq!(direction, Direction::Neutral);
    }

    #[test]
    fn out_of_range_probability_is_clamped() {
        let (direction, confidence) = probability_to_opinion(1.7);
        assert_eq!(direction, Direction::Long);
        assert_eq!(confidence, 100.0);
    }
}
