//! Consensus Engine
//! Mission: Reconcile disagreeing provider opinions into one decision
//!
//! Weights are normalized over the providers that actually responded this
//! cycle, so a temporarily-unavailable provider shrinks the voting pool
//! instead of zeroing out the result.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::ConsensusConfig;
use crate::models::{Consensus, Direction, Regime, Vote};

/// Outcome of one combine pass. The non-Combined variants are the quality
/// gate, not errors: the cycle simply produces no signal.
#[derive(Debug, Clone)]
pub enum ConsensusOutcome {
    Combined(Consensus),
    TooFewProviders { responded: usize, required: usize },
    /// Exact tie between direction buckets, or a neutral majority
    NoDirection,
}

/// Combine provider votes into a consensus direction and confidence.
///
/// For each direction bucket the weighted sum is `Σ weight_i * confidence_i`;
/// the winner is the bucket with the highest sum and consensus confidence is
/// `winning_sum / total_weight_of_responding_providers`, clamped to [0, 100].
pub fn combine(
    instrument: &str,
    votes: Vec<Vote>,
    weights: &HashMap<String, f64>,
    config: &ConsensusConfig,
    regime: Regime,
) -> ConsensusOutcome {
    let mut weighted: Vec<(f64, Vote)> = Vec::with_capacity(votes.len());
    for vote in votes {
        match weights.get(&vote.provider_id) {
            Some(&w) => weighted.push((w, vote)),
            None => {
                // Startup validation guarantees a weight per configured
                // provider; an unknown id means a miswired connector.
                warn!(
                    provider = %vote.provider_id,
                    instrument,
                    "vote from provider without a configured weight, skipping"
                );
            }
        }
    }

    if weighted.len() < config.min_providers {
        debug!(
            instrument,
            responded = weighted.len(),
            required = config.min_providers,
            "too few responding providers, no signal this cycle"
        );
        return ConsensusOutcome::TooFewProviders {
            responded: weighted.len(),
            required: config.min_providers,
        };
    }

    let total_weight: f64 = weighted.iter().map(|(w, _)| w).sum();

    let mut long_sum = 0.0;
    let mut short_sum = 0.0;
    let mut neutral_sum = 0.0;
    for (weight, vote) in &weighted {
        let contribution = weight * vote.raw_confidence.clamp(0.0, 100.0);
        match vote.direction {
            Direction::Long => long_sum += contribution,
            Direction::Short => short_sum += contribution,
            Direction::Neutral => neutral_sum += contribution,
        }
    }

    let (direction, winning_sum) = winning_bucket(long_sum, short_sum, neutral_sum);
    if direction == Direction::Neutral {
        debug!(instrument, long_sum, short_sum, "no directional consensus");
        return ConsensusOutcome::NoDirection;
    }

    let confidence = (winning_sum / total_weight).clamp(0.0, 100.0);
    let reference_price = median_price(&weighted);
    let contributing: Vec<Vote> = weighted.into_iter().map(|(_, v)| v).collect();

    ConsensusOutcome::Combined(Consensus {
        instrument: instrument.to_string(),
        direction,
        confidence,
        contributing,
        reference_price,
        regime,
    })
}

/// Highest bucket wins; an exact tie between the top two is treated as
/// Neutral (no signal).
fn winning_bucket(long_sum: f64, short_sum: f64, neutral_sum: f64) -> (Direction, f64) {
    let mut buckets = [
        (Direction::Long, long_sum),
        (Direction::Short, short_sum),
        (Direction::Neutral, neutral_sum),
    ];
    buckets.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if buckets[0].1 == buckets[1].1 {
        return (Direction::Neutral, buckets[0].1);
    }
    buckets[0]
}

fn median_price(weighted: &[(f64, Vote)]) -> f64 {
    let mut prices: Vec<f64> = weighted.iter().map(|(_, v)| v.observed_price).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    }
}
