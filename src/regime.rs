//! Regime Classifier
//! Mission: Label market behavior and modulate consensus confidence
//!
//! Deterministic over a fixed lookback window: realized volatility of log
//! returns decides HighVolatility first, then price-vs-SMA deviation decides
//! trend direction, otherwise RangeBound. Exactly one regime per window.

use std::collections::VecDeque;

use statrs::statistics::Statistics;

use crate::config::RegimeConfig;
use crate::models::Regime;

/// Rolling per-instrument price window, owned by that instrument's cycle task
#[derive(Debug)]
pub struct PriceHistory {
    window: VecDeque<f64>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(price);
    }

    pub fn prices(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Classify the prevailing regime from recent prices.
///
/// With fewer than `lookback` observations the window is not yet
/// representative and the classifier reports RangeBound.
pub fn classify(prices: &[f64], config: &RegimeConfig) -> Regime {
    if prices.len() < config.lookback {
        return Regime::RangeBound;
    }

    let window = &prices[prices.len() - config.lookback..];

    let returns: Vec<f64> = window
        .windows(2)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect();
    let volatility = returns.std_dev();
    if volatility > config.volatility_threshold {
        return Regime::HighVolatility;
    }

    let sma = window.mean();
    let last = window[window.len() - 1];
    let deviation = (last - sma) / sma;

    if deviation > config.trend_threshold {
        Regime::TrendingUp
    } else if deviation < -config.trend_threshold {
        Regime::TrendingDown
    } else {
        Regime::RangeBound
    }
}

pub fn multiplier(regime: Regime, config: &RegimeConfig) -> f64 {
    match regime {
        Regime::TrendingUp => config.trending_up_multiplier,
        Regime::TrendingDown => config.trending_down_multiplier,
        Regime::RangeBound => config.range_bound_multiplier,
        Regime::HighVolatility => config.high_volatility_multiplier,
    }
}

/// Apply the regime multiplier to a consensus confidence.
/// The result never leaves [0, 100]; a dampening regime can push a signal
/// below the minimum-confidence threshold and suppress it.
pub fn adjust_confidence(confidence: f64, regime: Regime, config: &RegimeConfig) -> f64 {
    (confidence * multiplier(regime, config)).clamp(0.0, 100.0)
}
