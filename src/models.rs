use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directional opinion of a single provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
        }
    }
}

/// One provider's opinion for one instrument at one point in time.
/// Ephemeral - never persisted standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub provider_id: String,
    pub direction: Direction,
    /// Raw confidence in [0, 100]
    pub raw_confidence: f64,
    /// Price the provider observed when forming the opinion
    pub observed_price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Market regime label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    RangeBound,
    HighVolatility,
}

impl Regime {
    pub fn as_str(&self) -> &str {
        match self {
            Regime::TrendingUp => "trending_up",
            Regime::TrendingDown => "trending_down",
            Regime::RangeBound => "range_bound",
            Regime::HighVolatility => "high_volatility",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trending_up" => Some(Regime::TrendingUp),
            "trending_down" => Some(Regime::TrendingDown),
            "range_bound" => Some(Regime::RangeBound),
            "high_volatility" => Some(Regime::HighVolatility),
            _ => None,
        }
    }
}

/// Weighted combination of provider votes for one instrument.
/// Derived fresh each cycle; immutable once computed.
#[derive(Debug, Clone, Serialize)]
pub struct Consensus {
    pub instrument: String,
    pub direction: Direction,
    /// Consensus confidence in [0, 100]
    pub confidence: f64,
    pub contributing: Vec<Vote>,
    /// Median observed price across contributing votes
    pub reference_price: f64,
    pub regime: Regime,
}

/// Tradeable action of an approved signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(SignalAction::Buy),
            "sell" => Some(SignalAction::Sell),
            _ => None,
        }
    }
}

/// A fully-specified signal as emitted by the risk gate, before ledgering.
/// The ledger assigns hash, chain link and sequence on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDraft {
    pub id: Uuid,
    pub instrument: String,
    pub action: SignalAction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    /// Approved position size as a fraction of account equity
    pub position_size: f64,
    /// Regime-adjusted confidence in [0, 100]
    pub confidence: f64,
    pub regime: Regime,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    pub retention_expires_at: DateTime<Utc>,
}

/// A ledgered signal - the durable unit of work. Never updated or deleted;
/// corrections are new signals referencing the old id in rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub instrument: String,
    pub action: SignalAction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub position_size: f64,
    pub confidence: f64,
    pub regime: Regime,
    pub rationale: String,
    pub content_hash: String,
    pub previous_hash: String,
    pub sequence_index: i64,
    pub created_at: DateTime<Utc>,
    pub retention_expires_at: DateTime<Utc>,
}

impl Signal {
    /// Reconstruct the draft view of a ledgered signal (the hashed content)
    pub fn as_draft(&self) -> SignalDraft {
        SignalDraft {
            id: self.id,
            instrument: self.instrument.clone(),
            action: self.action,
            entry_price: self.entry_price,
            stop_price: self.stop_price,
            target_price: self.target_price,
            position_size: self.position_size,
            confidence: self.confidence,
            regime: self.regime,
            rationale: self.rationale.clone(),
            created_at: self.created_at,
            retention_expires_at: self.retention_expires_at,
        }
    }
}

/// Read-only account state fetched from the broker collaborator each cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub buying_power: f64,
    pub blocked: bool,
}

/// Named reason codes for risk gate rejections, one per check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    AccountBlocked,
    TradingPaused,
    BelowConfidenceFloor,
    InsufficientBuyingPower,
    CorrelationLimit,
    DailyLossBreaker,
    DrawdownBreaker,
}

impl RejectionReason {
    pub fn code(&self) -> &str {
        match self {
            RejectionReason::AccountBlocked => "account_blocked",
            RejectionReason::TradingPaused => "trading_paused",
            RejectionReason::BelowConfidenceFloor => "below_confidence_floor",
            RejectionReason::InsufficientBuyingPower => "insufficient_buying_power",
            RejectionReason::CorrelationLimit => "correlation_limit",
            RejectionReason::DailyLossBreaker => "daily_loss_breaker",
            RejectionReason::DrawdownBreaker => "drawdown_breaker",
        }
    }
}
