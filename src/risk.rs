//! Risk Gate
//! Mission: Institutional-grade guardrails between consensus and the ledger
//!
//! An ordered pipeline of independent checks, short-circuiting on the first
//! failure. Each failure carries its own named reason code. The gate owns
//! the only cross-cycle mutable risk state: peak equity, the daily anchor,
//! correlation-group exposure and the two breaker latches.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::models::{
    AccountSnapshot, Consensus, Direction, Regime, RejectionReason, SignalAction, SignalDraft,
};

const FULL_SIZE_CONFIDENCE: f64 = 90.0;
const REDUCED_SIZE_CONFIDENCE: f64 = 82.0;

/// Decision for one proposed consensus
#[derive(Debug, Clone)]
pub enum Verdict {
    Approved(SignalDraft),
    Rejected(RejectionReason),
}

/// Point-in-time view of the gate's mutable counters, for operators
#[derive(Debug, Clone, Serialize)]
pub struct RiskStateSnapshot {
    pub peak_equity: f64,
    pub daily_start_equity: f64,
    pub paused_daily: bool,
    pub paused_drawdown: bool,
    pub open_positions_by_group: HashMap<String, u32>,
}

pub struct RiskGate {
    config: RiskConfig,
    min_confidence: f64,
    retention_days: i64,
    initialized: bool,
    peak_equity: f64,
    daily_start_equity: f64,
    daily_anchor: NaiveDate,
    open_positions: HashMap<String, u32>,
    paused_daily: bool,
    paused_drawdown: bool,
}

impl RiskGate {
    pub fn new(config: RiskConfig, min_confidence: f64, retention_days: i64) -> Self {
        Self {
            config,
            min_confidence,
            retention_days,
            initialized: false,
            peak_equity: 0.0,
            daily_start_equity: 0.0,
            daily_anchor: NaiveDate::MIN,
            open_positions: HashMap::new(),
            paused_daily: false,
            paused_drawdown: false,
        }
    }

    /// Fold the fresh account snapshot into the rolling state. Runs once per
    /// cycle regardless of approval: peak equity is a monotonic max, the
    /// daily anchor resets at the UTC date boundary, and a recovered
    /// drawdown clears its pause latch.
    pub fn observe(&mut self, equity: f64, now: DateTime<Utc>) {
        let today = now.date_naive();

        if !self.initialized {
            self.initialized = true;
            self.peak_equity = equity;
            self.daily_start_equity = equity;
            self.daily_anchor = today;
            info!(equity, "risk state initialized");
            return;
        }

        if today != self.daily_anchor {
            info!(
                equity,
                previous_start = self.daily_start_equity,
                "daily risk reset"
            );
            self.daily_anchor = today;
            self.daily_start_equity = equity;
            self.paused_daily = false;
            self.open_positions.clear();
        }

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        if self.paused_drawdown && self.drawdown_from_peak(equity) < self.config.max_drawdown {
            info!(equity, peak = self.peak_equity, "drawdown recovered, trading resumes");
            self.paused_drawdown = false;
        }
    }

    /// Run the ordered check pipeline against one proposed consensus.
    /// `consensus.confidence` is the regime-adjusted value.
    pub fn authorize(
        &mut self,
        consensus: &Consensus,
        account: &AccountSnapshot,
        group: &str,
        now: DateTime<Utc>,
    ) -> Verdict {
        self.observe(account.equity, now);

        // 1. Account blocked or trading disabled by a previously latched breaker
        if account.blocked {
            return Verdict::Rejected(RejectionReason::AccountBlocked);
        }
        if self.paused_daily || self.paused_drawdown {
            return Verdict::Rejected(RejectionReason::TradingPaused);
        }

        // 2. Final confidence guard
        if consensus.confidence < self.min_confidence {
            return Verdict::Rejected(RejectionReason::BelowConfidenceFloor);
        }

        // 3. Position sizing against buying power with safety buffer
        let size_fraction = self.position_fraction(consensus.confidence, consensus.regime);
        let notional = account.equity * size_fraction;
        let required = notional * (1.0 + self.config.buying_power_buffer);
        if required > account.buying_power {
            warn!(
                instrument = %consensus.instrument,
                notional,
                required,
                buying_power = account.buying_power,
                "insufficient buying power for proposed position"
            );
            return Verdict::Rejected(RejectionReason::InsufficientBuyingPower);
        }

        // 4. Correlation-group exposure
        let open_in_group = self.open_positions.get(group).copied().unwrap_or(0);
        if open_in_group >= self.config.max_positions_per_group {
            return Verdict::Rejected(RejectionReason::CorrelationLimit);
        }

        // 5. Daily loss circuit breaker
        if self.daily_start_equity > 0.0 {
            let daily_return =
                (account.equity - self.daily_start_equity) / self.daily_start_equity;
            if daily_return <= -self.config.daily_loss_limit {
                error!(
                    daily_return,
                    limit = self.config.daily_loss_limit,
                    "daily loss breaker tripped, trading paused until next daily reset"
                );
                self.paused_daily = true;
                return Verdict::Rejected(RejectionReason::DailyLossBreaker);
            }
        }

        // 6. Max-drawdown-from-peak circuit breaker
        let drawdown = self.drawdown_from_peak(account.equity);
        if drawdown >= self.config.max_drawdown {
            error!(
                drawdown,
                limit = self.config.max_drawdown,
                "drawdown breaker tripped, trading paused until recovery"
            );
            self.paused_drawdown = true;
            return Verdict::Rejected(RejectionReason::DrawdownBreaker);
        }

        Verdict::Approved(self.build_draft(consensus, size_fraction, now))
    }

    /// Record an opened position after the signal was durably ledgered.
    /// Kept separate from `authorize` so a failed append leaves no partial
    /// risk mutation.
    pub fn record_open(&mut self, group: &str) {
        *self.open_positions.entry(group.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> RiskStateSnapshot {
        RiskStateSnapshot {
            peak_equity: self.peak_equity,
            daily_start_equity: self.daily_start_equity,
            paused_daily: self.paused_daily,
            paused_drawdown: self.paused_drawdown,
            open_positions_by_group: self.open_positions.clone(),
        }
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    fn drawdown_from_peak(&self, equity: f64) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity).clamp(0.0, 1.0)
    }

    /// `base_pct * confidence_multiplier * volatility_multiplier`, capped at
    /// the configured maximum fraction of equity
    fn position_fraction(&self, confidence: f64, regime: Regime) -> f64 {
        let confidence_multiplier = match confidence {
            c if c >= FULL_SIZE_CONFIDENCE => 1.0,
            c if c >= REDUCED_SIZE_CONFIDENCE => 0.85,
            _ => 0.7,
        };
        let volatility_multiplier = match regime {
            Regime::TrendingUp | Regime::TrendingDown => 1.0,
            Regime::RangeBound => 0.8,
            Regime::HighVolatility => 0.5,
        };
        (self.config.base_position_pct * confidence_multiplier * volatility_multiplier)
            .min(self.config.max_position_pct)
    }

    fn build_draft(
        &self,
        consensus: &Consensus,
        size_fraction: f64,
        now: DateTime<Utc>,
    ) -> SignalDraft {
        let action = match consensus.direction {
            Direction::Short => SignalAction::Sell,
            // Neutral never reaches the gate; combine() drops it upstream
            _ => SignalAction::Buy,
        };
        let entry = consensus.reference_price;
        let (stop, target) = match action {
            SignalAction::Buy => (
                entry * (1.0 - self.config.stop_pct),
                entry * (1.0 + self.config.target_pct),
            ),
            SignalAction::Sell => (
                entry * (1.0 + self.config.stop_pct),
                entry * (1.0 - self.config.target_pct),
            ),
        };

        let rationale = format!(
            "{} consensus from {} providers at {:.1}% confidence; regime {}; sized {:.2}% of equity",
            consensus.direction.as_str(),
            consensus.contributing.len(),
            consensus.confidence,
            consensus.regime.as_str(),
            size_fraction * 100.0
        );

        SignalDraft {
            id: Uuid::new_v4(),
            instrument: consensus.instrument.clone(),
            action,
            entry_price: entry,
            stop_price: stop,
            target_price: target,
            position_size: size_fraction,
            confidence: consensus.confidence,
            regime: consensus.regime,
            rationale,
            created_at: now,
            retention_expires_at: now + ChronoDuration::days(self.retention_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> RiskConfig {
        RiskConfig {
            base_position_pct: 0.02,
            max_position_pct: 0.05,
            buying_power_buffer: 0.05,
            stop_pct: 0.02,
            target_pct: 0.04,
            max_positions_per_group: 2,
            daily_loss_limit: 0.05,
            max_drawdown: 0.15,
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(config(), 75.0, 90)
    }

    fn consensus(instrument: &str, confidence: f64) -> Consensus {
        Consensus {
            instrument: instrument.to_string(),
            direction: Direction::Long,
            confidence,
            contributing: Vec::new(),
            reference_price: 100.0,
            regime: Regime::TrendingUp,
        }
    }

    fn account(equity: f64, buying_power: f64) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            buying_power,
            blocked: false,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn assert_rejected(verdict: Verdict, reason: RejectionReason) {
        match verdict {
            Verdict::Rejected(r) => assert_eq!(r, reason),
            Verdict::Approved(_) => panic!("expected rejection {:?}", reason),
        }
    }

    #[test]
    fn approves_and_prices_a_long_signal() {
        let mut gate = gate();
        let verdict = gate.authorize(&consensus("BTC-USD", 92.0), &account(100_000.0, 50_000.0), "g", at(1, 9));

        match verdict {
            Verdict::Approved(draft) => {
                assert_eq!(draft.action, SignalAction::Buy);
                assert!((draft.entry_price - 100.0).abs() < 1e-9);
                assert!((draft.stop_price - 98.0).abs() < 1e-9);
                assert!((draft.target_price - 104.0).abs() < 1e-9);
                assert!((draft.position_size - 0.02).abs() < 1e-9);
            }
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn short_consensus_mirrors_stop_and_target() {
        let mut gate = gate();
        let mut proposal = consensus("BTC-USD", 92.0);
        proposal.direction = Direction::Short;

        match gate.authorize(&proposal, &account(100_000.0, 50_000.0), "g", at(1, 9)) {
            Verdict::Approved(draft) => {
                assert_eq!(draft.action, SignalAction::Sell);
                assert!((draft.stop_price - 102.0).abs() < 1e-9);
                assert!((draft.target_price - 96.0).abs() < 1e-9);
            }
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn blocked_account_rejected_first() {
        let mut gate = gate();
        let mut snapshot = account(100_000.0, 50_000.0);
        snapshot.blocked = true;

        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 92.0), &snapshot, "g", at(1, 9)),
            RejectionReason::AccountBlocked,
        );
    }

    #[test]
    fn confidence_floor_is_final_guard() {
        let mut gate = gate();
        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 60.0), &account(100_000.0, 50_000.0), "g", at(1, 9)),
            RejectionReason::BelowConfidenceFloor,
        );
    }

    #[test]
    fn insufficient_buying_power_rejected() {
        let mut gate = gate();
        // 2% of 100k = 2000 notional, 2100 with buffer, only 1500 available
        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 92.0), &account(100_000.0, 1_500.0), "g", at(1, 9)),
            RejectionReason::InsufficientBuyingPower,
        );
    }

    #[test]
    fn correlation_group_limit_enforced() {
        let mut gate = gate();
        gate.record_open("tech");
        gate.record_open("tech");

        assert_rejected(
            gate.authorize(&consensus("NVDA", 92.0), &account(100_000.0, 50_000.0), "tech", at(1, 9)),
            RejectionReason::CorrelationLimit,
        );

        // Another group is unaffected
        match gate.authorize(&consensus("BTC-USD", 92.0), &account(100_000.0, 50_000.0), "crypto", at(1, 9)) {
            Verdict::Approved(_) => {}
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn seven_pct_daily_loss_pauses_the_whole_day() {
        let mut gate = gate();
        // Establish the daily anchor at 100k
        gate.observe(100_000.0, at(1, 9));

        // Intraday drop to 93k = 7% loss against a 5% limit
        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 95.0), &account(93_000.0, 50_000.0), "g", at(1, 12)),
            RejectionReason::DailyLossBreaker,
        );

        // Every subsequent proposal that day is rejected, any instrument
        assert_rejected(
            gate.authorize(&consensus("ETH-USD", 99.0), &account(94_000.0, 50_000.0), "h", at(1, 15)),
            RejectionReason::TradingPaused,
        );

        // Next UTC day resets the anchor and resumes trading
        match gate.authorize(&consensus("BTC-USD", 95.0), &account(94_000.0, 50_000.0), "g", at(2, 9)) {
            Verdict::Approved(_) => {}
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn drawdown_breaker_latches_until_recovery() {
        let mut gate = gate();
        gate.observe(100_000.0, at(1, 9));

        // New day so the daily breaker stays out of the way; 84k is a 16%
        // drawdown from the 100k peak against a 15% limit.
        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 95.0), &account(84_000.0, 50_000.0), "g", at(2, 9)),
            RejectionReason::DrawdownBreaker,
        );
        assert_rejected(
            gate.authorize(&consensus("BTC-USD", 95.0), &account(84_500.0, 50_000.0), "g", at(2, 10)),
            RejectionReason::TradingPaused,
        );

        // Recovery above the threshold clears the latch on a later cycle
        match gate.authorize(&consensus("BTC-USD", 95.0), &account(95_000.0, 50_000.0), "g", at(3, 9)) {
            Verdict::Approved(_) => {}
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn peak_equity_is_monotonic() {
        let mut gate = gate();
        let trajectory = [
            100_000.0, 104_000.0, 99_000.0, 104_000.0, 112_000.0, 90_000.0, 111_999.0,
        ];

        let mut last_peak = 0.0;
        for (i, equity) in trajectory.iter().enumerate() {
            gate.observe(*equity, at(1, 1 + i as u32));
            assert!(gate.peak_equity() >= last_peak);
            last_peak = gate.peak_equity();
        }
        assert_eq!(gate.peak_equity(), 112_000.0);
    }

    #[test]
    fn daily_reset_clears_group_exposure() {
        let mut gate = gate();
        gate.observe(100_000.0, at(1, 9));
        gate.record_open("tech");
        gate.record_open("tech");

        gate.observe(100_500.0, at(2, 9));
        match gate.authorize(&consensus("NVDA", 92.0), &account(100_500.0, 50_000.0), "tech", at(2, 10)) {
            Verdict::Approved(_) => {}
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }

    #[test]
    fn high_volatility_halves_position_size() {
        let mut gate = gate();
        let mut proposal = consensus("BTC-USD", 92.0);
        proposal.regime = Regime::HighVolatility;

        match gate.authorize(&proposal, &account(100_000.0, 50_000.0), "g", at(1, 9)) {
            Verdict::Approved(draft) => assert!((draft.position_size - 0.01).abs() < 1e-9),
            Verdict::Rejected(r) => panic!("unexpected rejection {:?}", r),
        }
    }
}
