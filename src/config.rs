//! Configuration loading from TOML or environment variables.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. When
//! no file is present, the same values can be supplied through environment
//! variables (optionally from a `.env` file loaded by the binary).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::engine::runner::PhasePlan;
use crate::types::ScovilleError;

/// Default checkpoint file path.
pub const DEFAULT_STATE_FILE: &str = "scoville_progress.json";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mission: MissionConfig,
    pub anchor: BuyPhaseConfig,
    pub gap_fill: BuyPhaseConfig,
    #[serde(default)]
    pub liquidity: LiquidityConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MissionConfig {
    pub target_price: f64,
    pub total_budget: f64,
    pub paper_mode: bool,
    pub enable_liquidity_phase: bool,
}

/// Amount range and settlement delay for a buying phase.
#[derive(Debug, Deserialize, Clone)]
pub struct BuyPhaseConfig {
    pub buy_min: f64,
    pub buy_max: f64,
    /// Pause after each step, in milliseconds. Defaults depend on the phase.
    pub settle_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiquidityConfig {
    #[serde(default = "default_liquidity_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_liquidity_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Capacity of the progress event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_liquidity_delay_ms() -> u64 {
    2000
}

fn default_state_file() -> String {
    DEFAULT_STATE_FILE.to_string()
}

fn default_event_buffer() -> usize {
    10
}

const DEFAULT_ANCHOR_DELAY_MS: u64 = 1500;
const DEFAULT_GAP_FILL_DELAY_MS: u64 = 500;

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Build configuration from environment variables.
    ///
    /// Required: `TARGET_PRICE`, `TOTAL_BUDGET`, `PAPER_MODE`,
    /// `ENABLE_LIQUIDITY_PHASE`, `WHALE_BUY_MIN`, `WHALE_BUY_MAX`,
    /// `RETAIL_BUY_MIN`, `RETAIL_BUY_MAX`.
    /// Optional: `ANCHOR_DELAY_MS`, `GAP_FILL_DELAY_MS`, `LIQUIDITY_DELAY_MS`,
    /// `STATE_FILE`, `EVENT_BUFFER`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mission: MissionConfig {
                target_price: required_env("TARGET_PRICE")?,
                total_budget: required_env("TOTAL_BUDGET")?,
                paper_mode: required_env_bool("PAPER_MODE")?,
                enable_liquidity_phase: required_env_bool("ENABLE_LIQUIDITY_PHASE")?,
            },
            anchor: BuyPhaseConfig {
                buy_min: required_env("WHALE_BUY_MIN")?,
                buy_max: required_env("WHALE_BUY_MAX")?,
                settle_delay_ms: optional_env("ANCHOR_DELAY_MS")?,
            },
            gap_fill: BuyPhaseConfig {
                buy_min: required_env("RETAIL_BUY_MIN")?,
                buy_max: required_env("RETAIL_BUY_MAX")?,
                settle_delay_ms: optional_env("GAP_FILL_DELAY_MS")?,
            },
            liquidity: LiquidityConfig {
                settle_delay_ms: optional_env("LIQUIDITY_DELAY_MS")?
                    .unwrap_or_else(default_liquidity_delay_ms),
            },
            engine: EngineConfig {
                state_file: optional_env("STATE_FILE")?.unwrap_or_else(default_state_file),
                event_buffer: optional_env("EVENT_BUFFER")?.unwrap_or_else(default_event_buffer),
            },
        })
    }

    /// Reject values the engine cannot run with. Configuration errors are
    /// fatal before the engine starts.
    pub fn validate(&self) -> std::result::Result<(), ScovilleError> {
        let m = &self.mission;
        if !m.total_budget.is_finite() || m.total_budget <= 0.0 {
            return Err(ScovilleError::Config(format!(
                "total_budget must be positive, got {}",
                m.total_budget
            )));
        }
        if !m.target_price.is_finite() || m.target_price < 0.0 {
            return Err(ScovilleError::Config(format!(
                "target_price must be non-negative, got {}",
                m.target_price
            )));
        }
        self.anchor.validate("anchor")?;
        self.gap_fill.validate("gap_fill")?;
        if self.engine.event_buffer == 0 {
            return Err(ScovilleError::Config("event_buffer must be at least 1".into()));
        }

        let plan = PhasePlan::from_config(self);
        let worst_case = plan.worst_case_spend(self);
        if worst_case > m.total_budget {
            warn!(
                worst_case = format!("${worst_case:.2}"),
                total_budget = format!("${:.2}", m.total_budget),
                "Configured buy ranges can exceed the total budget"
            );
        }
        Ok(())
    }

    pub fn anchor_delay(&self) -> Duration {
        Duration::from_millis(self.anchor.settle_delay_ms.unwrap_or(DEFAULT_ANCHOR_DELAY_MS))
    }

    pub fn gap_fill_delay(&self) -> Duration {
        Duration::from_millis(
            self.gap_fill
                .settle_delay_ms
                .unwrap_or(DEFAULT_GAP_FILL_DELAY_MS),
        )
    }

    pub fn liquidity_delay(&self) -> Duration {
        Duration::from_millis(self.liquidity.settle_delay_ms)
    }
}

impl BuyPhaseConfig {
    fn validate(&self, name: &str) -> std::result::Result<(), ScovilleError> {
        if !self.buy_min.is_finite() || !self.buy_max.is_finite() {
            return Err(ScovilleError::Config(format!("{name} buy range must be finite")));
        }
        if self.buy_min < 0.0 {
            return Err(ScovilleError::Config(format!(
                "{name}.buy_min must be non-negative, got {}",
                self.buy_min
            )));
        }
        if self.buy_min > self.buy_max {
            return Err(ScovilleError::Config(format!(
                "{name}.buy_min ({}) exceeds buy_max ({})",
                self.buy_min, self.buy_max
            )));
        }
        Ok(())
    }
}

fn required_env<T>(key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key)
        .with_context(|| format!("Missing required environment variable: {key}"))?;
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: {raw}"))
}

/// Boolean flags accept the same spellings as existing `.env` files use:
/// `1`/`0`, `t`/`f` and `true`/`false` in lower, upper or title case.
fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn required_env_bool(key: &str) -> Result<bool> {
    let raw = std::env::var(key)
        .with_context(|| format!("Missing required environment variable: {key}"))?;
    parse_env_bool(&raw).with_context(|| format!("Invalid value for {key}: {raw}"))
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: {raw}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
pub(crate) fn test_config(enable_liquidity: bool) -> AppConfig {
    AppConfig {
        mission: MissionConfig {
            target_price: 0.0042,
            total_budget: 10_000.0,
            paper_mode: true,
            enable_liquidity_phase: enable_liquidity,
        },
        anchor: BuyPhaseConfig {
            buy_min: 1.0,
            buy_max: 2.0,
            settle_delay_ms: Some(0),
        },
        gap_fill: BuyPhaseConfig {
            buy_min: 0.1,
            buy_max: 0.5,
            settle_delay_ms: Some(0),
        },
        liquidity: LiquidityConfig { settle_delay_ms: 0 },
        engine: EngineConfig::default(),
    }
}
