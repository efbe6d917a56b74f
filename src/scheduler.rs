//! Cycle Scheduler
//! Mission: Drive fetch → consensus → regime → risk → ledger, forever
//!
//! One fixed-interval task per tracked instrument, running concurrently
//! under a shared semaphore. The scheduler owns no business state - it
//! sequences the pipeline stages and surfaces every rejection as an
//! observability event, never as an error that halts the loop. A cycle
//! that overruns its deadline is abandoned and retried next tick.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::account::AccountClient;
use crate::config::AppConfig;
use crate::connectors::{gather_votes, SourceConnector};
use crate::consensus::{combine, ConsensusOutcome};
use crate::ledger::LedgerStore;
use crate::models::{RejectionReason, Vote};
use crate::regime::{adjust_confidence, classify, PriceHistory};
use crate::risk::{RiskGate, Verdict};
use crate::sync::client::SyncClient;

/// Rolling pipeline counters, surfaced on /status
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub cycles: AtomicU64,
    pub signals: AtomicU64,
    pub rejections: AtomicU64,
}

/// What one cycle produced, for logging
#[derive(Debug)]
enum CycleOutcome {
    QualityGate,
    BelowThreshold,
    Rejected(RejectionReason),
    Emitted(i64),
}

pub struct Pipeline {
    config: Arc<AppConfig>,
    connectors: Vec<Arc<dyn SourceConnector>>,
    weights: HashMap<String, f64>,
    account: Arc<AccountClient>,
    risk: Arc<RwLock<RiskGate>>,
    store: Arc<LedgerStore>,
    sync: Arc<SyncClient>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        connectors: Vec<Arc<dyn SourceConnector>>,
        account: Arc<AccountClient>,
        risk: Arc<RwLock<RiskGate>>,
        store: Arc<LedgerStore>,
        sync: Arc<SyncClient>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        let weights = config.weight_table();
        Self {
            config,
            connectors,
            weights,
            account,
            risk,
            store,
            sync,
            counters,
        }
    }

    /// Spawn one driver loop per tracked instrument
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let semaphore = Arc::new(Semaphore::new(self.config.instruments.max_concurrent_cycles));

        self.config
            .instruments
            .tracked
            .iter()
            .map(|instrument| {
                let pipeline = self.clone();
                let semaphore = semaphore.clone();
                let instrument = instrument.clone();
                tokio::spawn(async move {
                    pipeline.instrument_loop(instrument, semaphore).await;
                })
            })
            .collect()
    }

    async fn instrument_loop(self: Arc<Self>, instrument: String, semaphore: Arc<Semaphore>) {
        info!(instrument = %instrument, "⏱️  cycle loop started");

        let mut ticker = interval(self.config.instruments.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = self.config.instruments.cycle_deadline();

        let mut history = PriceHistory::new(self.config.regime.lookback);

        loop {
            ticker.tick().await;

            let Ok(_permit) = semaphore.acquire().await else {
                warn!(instrument = %instrument, "cycle semaphore closed, loop exiting");
                return;
            };

            match tokio::time::timeout(deadline, self.run_cycle(&instrument, &mut history)).await
            {
                Ok(Ok(outcome)) => {
                    self.counters.cycles.fetch_add(1, Ordering::Relaxed);
                    match outcome {
                        CycleOutcome::Emitted(sequence) => {
                            info!(instrument = %instrument, sequence, "📡 signal emitted");
                        }
                        CycleOutcome::Rejected(reason) => {
                            debug!(instrument = %instrument, reason = reason.code(), "risk rejected");
                        }
                        CycleOutcome::QualityGate | CycleOutcome::BelowThreshold => {
                            debug!(instrument = %instrument, ?outcome, "no signal this cycle");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(instrument = %instrument, error = %e, "cycle failed, retrying next tick");
                }
                Err(_) => {
                    warn!(
                        instrument = %instrument,
                        deadline_ms = deadline.as_millis() as u64,
                        "cycle exceeded deadline, abandoned until next tick"
                    );
                }
            }
        }
    }

    /// One full pipeline pass for one instrument.
    ///
    /// All risk mutation plus the ledger append happen in one synchronous
    /// block under the risk write lock, so a deadline cancellation (which
    /// can only land on an await point) never leaves a signal without its
    /// risk-counter update or vice versa.
    async fn run_cycle(&self, instrument: &str, history: &mut PriceHistory) -> Result<CycleOutcome> {
        let now = Utc::now();

        let snapshot = self
            .account
            .snapshot()
            .await
            .context("account snapshot fetch failed")?;

        let votes = gather_votes(
            &self.connectors,
            instrument,
            self.config.instruments.connector_timeout(),
        )
        .await;

        if let Some(price) = median_observed_price(&votes) {
            history.push(price);
        }
        let regime = classify(&history.prices(), &self.config.regime);

        let mut consensus = match combine(
            instrument,
            votes,
            &self.weights,
            &self.config.consensus,
            regime,
        ) {
            ConsensusOutcome::Combined(consensus) => consensus,
            ConsensusOutcome::TooFewProviders { .. } | ConsensusOutcome::NoDirection => {
                self.risk.write().observe(snapshot.equity, now);
                return Ok(CycleOutcome::QualityGate);
            }
        };

        // Minimum-confidence threshold, applied to the regime-adjusted
        // confidence by default; the configurable ordering gates on the raw
        // consensus value instead.
        let raw = consensus.confidence;
        let adjusted = adjust_confidence(raw, regime, &self.config.regime);
        let effective = if self.config.consensus.threshold_before_regime {
            raw
        } else {
            adjusted
        };
        if effective < self.config.consensus.min_confidence {
            debug!(
                instrument,
                raw, adjusted, "confidence below threshold, signal suppressed"
            );
            self.risk.write().observe(snapshot.equity, now);
            return Ok(CycleOutcome::BelowThreshold);
        }
        consensus.confidence = effective;

        let group = self.config.correlation_group(instrument);

        // Authorize, append and record under one lock; no awaits inside.
        let appended = {
            let mut risk = self.risk.write();
            match risk.authorize(&consensus, &snapshot, &group, now) {
                Verdict::Approved(draft) => {
                    let appended = self
                        .store
                        .append(&draft)
                        .context("ledger append failed")?;
                    if !appended.is_duplicate() {
                        risk.record_open(&group);
                    }
                    appended
                }
                Verdict::Rejected(reason) => {
                    drop(risk);
                    self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        instrument,
                        reason = reason.code(),
                        confidence = consensus.confidence,
                        "🛑 risk gate rejected proposed signal"
                    );
                    self.store
                        .record_rejection(
                            instrument,
                            reason,
                            &format!(
                                "confidence {:.1} regime {}",
                                consensus.confidence,
                                regime.as_str()
                            ),
                            now,
                        )
                        .context("failed to record rejection audit row")?;
                    return Ok(CycleOutcome::Rejected(reason));
                }
            }
        };

        let signal = appended.signal().clone();
        self.counters.signals.fetch_add(1, Ordering::Relaxed);

        // External hand-offs happen outside every lock. The ledger entry is
        // already durable; failures here are operator events, not unwinds.
        if let Err(e) = self.sync.push(&signal).await {
            warn!(
                instrument,
                hash = %signal.content_hash,
                error = %e,
                "sync push failed after retries, operator attention required"
            );
        }
        if let Err(e) = self.account.submit_order(&signal).await {
            warn!(
                instrument,
                sequence = signal.sequence_index,
                error = %e,
                "broker order submission failed"
            );
        }

        Ok(CycleOutcome::Emitted(signal.sequence_index))
    }
}

fn median_observed_price(votes: &[Vote]) -> Option<f64> {
    if votes.is_empty() {
        return None;
    }
    let mut prices: Vec<f64> = votes
        .iter()
        .map(|v| v.observed_price)
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        Some((prices[mid - 1] + prices[mid]) / 2.0)
    } else {
        Some(prices[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::Direction;

    fn vote(price: f64) -> Vote {
        Vote {
            provider_id: "p".to_string(),
            direction: Direction::Long,
            raw_confidence: 80.0,
            observed_price: price,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn median_of_odd_count() {
        let votes = vec![vote(101.0), vote(99.0), vote(100.0)];
        assert_eq!(median_observed_price(&votes), Some(100.0));
    }

    #[test]
    fn median_of_even_count() {
        let votes = vec![vote(100.0), vote(102.0)];
        assert_eq!(median_observed_price(&votes), Some(101.0));
    }

    #[test]
    fn garbage_prices_filtered() {
        let votes = vec![vote(f64::NAN), vote(-5.0)];
        assert_eq!(median_observed_price(&votes), None);
    }

    #[test]
    fn no_votes_no_price() {
        assert_eq!(median_observed_price(&[]), None);
    }
}
