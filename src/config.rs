//! Application Configuration
//! Mission: One immutable, validated config object constructed at startup
//!
//! Loaded from a TOML document with env-var overrides for secrets.
//! Malformed or missing required fields fail fast here, never per-cycle.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    /// Correlation group -> member instruments
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    pub instruments: InstrumentsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub sync: SyncConfig,
    pub account: AccountConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Overridable via `<ID>_API_KEY` env var
    #[serde(default)]
    pub api_key: Option<String>,
    /// Voting weight; weights need not sum to 1.0 (normalized at combine-time)
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Pulsefeed,
    Marketmind,
    Tapefeed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum providers that must respond for a cycle to produce anything
    #[serde(default = "default_min_providers")]
    pub min_providers: usize,
    /// Minimum confidence threshold in [0, 100]
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Apply the threshold before regime adjustment instead of after
    #[serde(default)]
    pub threshold_before_regime: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_providers: default_min_providers(),
            min_confidence: default_min_confidence(),
            threshold_before_regime: false,
        }
    }
}

fn default_min_providers() -> usize {
    2
}

fn default_min_confidence() -> f64 {
    75.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegimeConfig {
    /// Price observations in the lookback window
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Price-vs-SMA deviation (fraction) that marks a trend
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    /// Realized volatility (std-dev of log returns) that marks high volatility
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
    #[serde(default = "default_trend_multiplier")]
    pub trending_up_multiplier: f64,
    #[serde(default = "default_trend_multiplier")]
    pub trending_down_multiplier: f64,
    #[serde(default = "default_range_multiplier")]
    pub range_bound_multiplier: f64,
    #[serde(default = "default_volatility_multiplier")]
    pub high_volatility_multiplier: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            trend_threshold: default_trend_threshold(),
            volatility_threshold: default_volatility_threshold(),
            trending_up_multiplier: default_trend_multiplier(),
            trending_down_multiplier: default_trend_multiplier(),
            range_bound_multiplier: default_range_multiplier(),
            high_volatility_multiplier: default_volatility_multiplier(),
        }
    }
}

fn default_lookback() -> usize {
    20
}

fn default_trend_threshold() -> f64 {
    0.015
}

fn default_volatility_threshold() -> f64 {
    0.02
}

fn default_trend_multiplier() -> f64 {
    1.1
}

fn default_range_multiplier() -> f64 {
    0.85
}

fn default_volatility_multiplier() -> f64 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Base position size as a fraction of equity
    #[serde(default = "default_base_position_pct")]
    pub base_position_pct: f64,
    /// Hard cap on position size as a fraction of equity
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    /// Safety buffer applied to the buying-power check
    #[serde(default = "default_buying_power_buffer")]
    pub buying_power_buffer: f64,
    /// Stop distance as a fraction of entry
    #[serde(default = "default_stop_pct")]
    pub stop_pct: f64,
    /// Target distance as a fraction of entry
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,
    /// Max open positions per correlation group
    #[serde(default = "default_max_positions_per_group")]
    pub max_positions_per_group: u32,
    /// Daily loss fraction that trips the daily breaker
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,
    /// Drawdown-from-peak fraction that trips the drawdown breaker
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_position_pct: default_base_position_pct(),
            max_position_pct: default_max_position_pct(),
            buying_power_buffer: default_buying_power_buffer(),
            stop_pct: default_stop_pct(),
            target_pct: default_target_pct(),
            max_positions_per_group: default_max_positions_per_group(),
            daily_loss_limit: default_daily_loss_limit(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

fn default_base_position_pct() -> f64 {
    0.02
}

fn default_max_position_pct() -> f64 {
    0.05
}

fn default_buying_power_buffer() -> f64 {
    0.05
}

fn default_stop_pct() -> f64 {
    0.02
}

fn default_target_pct() -> f64 {
    0.04
}

fn default_max_positions_per_group() -> u32 {
    3
}

fn default_daily_loss_limit() -> f64 {
    0.05
}

fn default_max_drawdown() -> f64 {
    0.15
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsConfig {
    pub tracked: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_connector_timeout_secs")]
    pub connector_timeout_secs: u64,
    /// Margin added to the connector timeout to form the cycle deadline
    #[serde(default = "default_cycle_margin_secs")]
    pub cycle_margin_secs: u64,
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_connector_timeout_secs() -> u64 {
    3
}

fn default_cycle_margin_secs() -> u64 {
    2
}

fn default_max_concurrent_cycles() -> usize {
    8
}

impl InstrumentsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_secs(self.connector_timeout_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.connector_timeout_secs + self.cycle_margin_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_db_path() -> String {
    "./signalgrid.db".to_string()
}

fn default_retention_days() -> i64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub receiver_url: String,
    /// Overridable via SYNC_SHARED_SECRET env var
    #[serde(default)]
    pub shared_secret: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub base_url: String,
    /// Overridable via ACCOUNT_API_KEY env var
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_account_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_account_timeout_secs() -> u64 {
    3
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    /// Secrets may come from the environment (.env is honored).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Malformed config file {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = env::var("SYNC_SHARED_SECRET") {
            self.sync.shared_secret = secret;
        }
        if let Ok(key) = env::var("ACCOUNT_API_KEY") {
            self.account.api_key = key;
        }
        for provider in &mut self.providers {
            let var = format!("{}_API_KEY", provider.id.to_uppercase().replace('-', "_"));
            if let Ok(key) = env::var(&var) {
                provider.api_key = Some(key);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            bail!("At least one provider must be configured");
        }
        for provider in &self.providers {
            if provider.weight <= 0.0 || !provider.weight.is_finite() {
                bail!(
                    "Provider '{}' has invalid weight {} (must be finite and > 0)",
                    provider.id,
                    provider.weight
                );
            }
            if provider.base_url.is_empty() {
                bail!("Provider '{}' is missing base_url", provider.id);
            }
        }
        if self.consensus.min_providers == 0 {
            bail!("consensus.min_providers must be at least 1");
        }
        if self.consensus.min_providers > self.providers.len() {
            bail!(
                "consensus.min_providers ({}) exceeds configured provider count ({})",
                self.consensus.min_providers,
                self.providers.len()
            );
        }
        if !(0.0..=100.0).contains(&self.consensus.min_confidence) {
            bail!(
                "consensus.min_confidence {} outside [0, 100]",
                self.consensus.min_confidence
            );
        }
        if self.regime.lookback < 3 {
            bail!("regime.lookback must be at least 3");
        }
        for (name, mult) in [
            ("trending_up", self.regime.trending_up_multiplier),
            ("trending_down", self.regime.trending_down_multiplier),
            ("range_bound", self.regime.range_bound_multiplier),
            ("high_volatility", self.regime.high_volatility_multiplier),
        ] {
            if mult <= 0.0 || !mult.is_finite() {
                bail!("regime.{name}_multiplier {mult} must be finite and > 0");
            }
        }
        if self.risk.base_position_pct <= 0.0 || self.risk.base_position_pct > 1.0 {
            bail!("risk.base_position_pct must lie in (0, 1]");
        }
        if self.risk.max_position_pct <= 0.0 || self.risk.max_position_pct > 1.0 {
            bail!("risk.max_position_pct must lie in (0, 1]");
        }
        if !(0.0..1.0).contains(&self.risk.daily_loss_limit) {
            bail!("risk.daily_loss_limit must lie in [0, 1)");
        }
        if !(0.0..1.0).contains(&self.risk.max_drawdown) {
            bail!("risk.max_drawdown must lie in [0, 1)");
        }
        if self.instruments.tracked.is_empty() {
            bail!("instruments.tracked must not be empty");
        }
        if self.instruments.max_concurrent_cycles == 0 {
            bail!("instruments.max_concurrent_cycles must be at least 1");
        }
        if self.sync.shared_secret.is_empty() {
            bail!("sync.shared_secret is not set (config or SYNC_SHARED_SECRET env)");
        }
        for (group, members) in &self.groups {
            if members.is_empty() {
                bail!("Correlation group '{group}' has no members");
            }
        }
        Ok(())
    }

    /// Correlation group for an instrument. Instruments outside every
    /// configured group get a dedicated single-member bucket.
    pub fn correlation_group(&self, instrument: &str) -> String {
        for (group, members) in &self.groups {
            if members.iter().any(|m| m == instrument) {
                return group.clone();
            }
        }
        format!("ungrouped:{instrument}")
    }

    /// Per-provider weight table keyed by provider id
    pub fn weight_table(&self) -> HashMap<String, f64> {
        self.providers
            .iter()
            .map(|p| (p.id.clone(), p.weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
            [[providers]]
            id = "pulsefeed"
            kind = "pulsefeed"
            base_url = "http://localhost:9001"
            weight = 0.4

            [[providers]]
            id = "marketmind"
            kind = "marketmind"
            base_url = "http://localhost:9002"
            weight = 0.6

            [instruments]
            tracked = ["BTC-USD", "ETH-USD"]

            [groups]
            "majors-crypto" = ["BTC-USD", "ETH-USD"]

            [sync]
            receiver_url = "http://localhost:9100"
            shared_secret = "test-secret"

            [account]
            base_url = "http://localhost:9200"
        "#
        .to_string()
    }

    fn parse(toml_str: &str) -> Result<AppConfig> {
        let mut config: AppConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = parse(&minimal_toml()).expect("valid config");
        assert_eq!(config.consensus.min_confidence, 75.0);
        assert_eq!(config.instruments.poll_interval_secs, 5);
        assert!(!config.consensus.threshold_before_regime);
        assert_eq!(config.risk.buying_power_buffer, 0.05);
    }

    #[test]
    fn zero_weight_provider_rejected() {
        let toml_str = minimal_toml().replace("weight = 0.4", "weight = 0.0");
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn min_providers_above_pool_rejected() {
        let toml_str = format!("{}\n[consensus]\nmin_providers = 5\n", minimal_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn correlation_group_lookup() {
        let config = parse(&minimal_toml()).expect("valid config");
        assert_eq!(config.correlation_group("BTC-USD"), "majors-crypto");
        assert_eq!(config.correlation_group("XAU-USD"), "ungrouped:XAU-USD");
    }

    #[test]
    fn cycle_deadline_covers_connector_timeout() {
        let config = parse(&minimal_toml()).expect("valid config");
        assert!(config.instruments.cycle_deadline() > config.instruments.connector_timeout());
    }
}
