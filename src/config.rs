// =============================================================================
// Runtime configuration
// =============================================================================
//
// Loaded once at startup from a JSON file (path from `--config` / the
// `ARENA_CONFIG` env var), with `serde(default = ...)` on every field so a
// partial or empty file still produces a usable config. Saved back with an
// atomic tmp-write + rename so a crash mid-save never leaves a truncated file.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

fn default_cycle_period_secs() -> u64 {
    300
}
fn default_snapshot_ttl_secs() -> u64 {
    60
}
fn default_missed_tick_grace_secs() -> u64 {
    30
}
fn default_max_open_positions() -> usize {
    5
}
fn default_max_leverage() -> u32 {
    10
}
fn default_min_trade_size_usd() -> Decimal {
    dec!(10)
}
fn default_max_trade_size_usd() -> Decimal {
    dec!(5000)
}
fn default_rejection_sample_rate() -> f64 {
    0.1
}
fn default_starting_balance() -> Decimal {
    dec!(10000)
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_indicator_interval() -> String {
    "1h".to_string()
}
fn default_indicator_lookback() -> u32 {
    200
}
fn default_one_per_symbol() -> bool {
    true
}

/// Per-agent configuration: which model provider backs the agent, and the
/// system prompt used to instruct it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_min_trade_size_usd")]
    pub min_trade_size_usd: Decimal,
    #[serde(default = "default_max_trade_size_usd")]
    pub max_trade_size_usd: Decimal,
    #[serde(default = "default_one_per_symbol")]
    pub one_open_position_per_symbol: bool,
    #[serde(default = "default_sl_pct_min")]
    pub sl_pct_min: Decimal,
    #[serde(default = "default_sl_pct_max")]
    pub sl_pct_max: Decimal,
    #[serde(default = "default_tp_pct_min")]
    pub tp_pct_min: Decimal,
    #[serde(default = "default_tp_pct_max")]
    pub tp_pct_max: Decimal,
}

fn default_sl_pct_min() -> Decimal {
    dec!(0.2)
}
fn default_sl_pct_max() -> Decimal {
    dec!(20)
}
fn default_tp_pct_min() -> Decimal {
    dec!(0.2)
}
fn default_tp_pct_max() -> Decimal {
    dec!(50)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            max_leverage: default_max_leverage(),
            min_trade_size_usd: default_min_trade_size_usd(),
            max_trade_size_usd: default_max_trade_size_usd(),
            one_open_position_per_symbol: default_one_per_symbol(),
            sl_pct_min: default_sl_pct_min(),
            sl_pct_max: default_sl_pct_max(),
            tp_pct_min: default_tp_pct_min(),
            tp_pct_max: default_tp_pct_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Symbols eligible for trading. Env/config is authoritative over any
    /// business-rule derived allow-list.
    pub symbols: Vec<String>,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub risk: RiskLimits,

    #[serde(default = "default_cycle_period_secs")]
    pub cycle_period_secs: u64,

    #[serde(default = "default_missed_tick_grace_secs")]
    pub missed_tick_grace_secs: u64,

    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    #[serde(default = "default_indicator_interval")]
    pub indicator_interval: String,

    #[serde(default = "default_indicator_lookback")]
    pub indicator_lookback: u32,

    #[serde(default = "default_rejection_sample_rate")]
    pub rejection_sample_rate: f64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub demo_mode: bool,

    #[serde(default)]
    pub database_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            agents: Vec::new(),
            risk: RiskLimits::default(),
            cycle_period_secs: default_cycle_period_secs(),
            missed_tick_grace_secs: default_missed_tick_grace_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            indicator_interval: default_indicator_interval(),
            indicator_lookback: default_indicator_lookback(),
            rejection_sample_rate: default_rejection_sample_rate(),
            bind_addr: default_bind_addr(),
            demo_mode: true,
            database_path: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults for any
    /// field the file omits. Returns an error only when the file exists but
    /// cannot be parsed at all, or is missing and no defaults make sense
    /// without at least one agent configured.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        if cfg.agents.is_empty() {
            anyhow::bail!("config must declare at least one agent");
        }
        Ok(cfg)
    }

    /// Persist the config atomically: write to a temp file in the same
    /// directory, then rename over the target path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let serialised =
            serde_json::to_string_pretty(self).context("failed to serialise config")?;
        std::fs::write(&tmp_path, serialised)
            .with_context(|| format!("failed to write temp config file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename temp config into {}", path.display()))?;
        Ok(())
    }
}
