//! Configuration management for the position engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading mode (paper or live)
    #[serde(default)]
    pub mode: TradingMode,
    /// RPC server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Execution engine parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Binance connectivity
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Paper trading settings
    #[serde(default)]
    pub paper: PaperConfig,
    /// SQLite store location
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Trade summary delivery
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Trading mode: live exchange accounts or the simulated paper exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the RPC front listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum number of RPC calls executing at once
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock budget for one convergence loop, in seconds
    #[serde(default = "default_max_trading_duration")]
    pub max_trading_duration_secs: u64,
    /// Pause between price re-checks while the slippage guard is cooling down
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Maximum adverse drift from the start price (0.0005 = 0.05%)
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    /// Relative tolerance used by the diff calculator
    #[serde(default = "default_diff_epsilon_ratio")]
    pub diff_epsilon_ratio: Decimal,
    /// Relative tolerance for multi-leg proportionality
    #[serde(default = "default_leg_tolerance")]
    pub leg_tolerance: Decimal,
    /// Delay between placing an order and re-reading the position
    #[serde(default = "default_requery_delay")]
    pub requery_delay_ms: u64,
    /// Maximum age of a cached tick before falling back to the adapter
    #[serde(default = "default_quote_max_age")]
    pub quote_max_age_secs: u64,
    /// Maximum summed age of both ticks for a basis figure to be reported
    #[serde(default = "default_basis_staleness")]
    pub basis_staleness_secs: u64,
    /// Leverage assumed for instruments without an explicit setting
    #[serde(default = "default_leverage")]
    pub default_leverage: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting wallet balance for every paper account
    #[serde(default = "default_paper_balance")]
    pub initial_balance: Decimal,
    /// Taker fee applied to simulated fills
    #[serde(default = "default_paper_fee_rate")]
    pub fee_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Slack-compatible incoming webhook URL
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Whether summaries are delivered to the webhook
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions
fn default_bind_addr() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_max_trading_duration() -> u64 {
    20
}

fn default_cooldown() -> u64 {
    3
}

fn default_max_slippage() -> Decimal {
    Decimal::new(5, 4) // 0.0005 (0.05%)
}

fn default_diff_epsilon_ratio() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_leg_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_requery_delay() -> u64 {
    500
}

fn default_quote_max_age() -> u64 {
    10
}

fn default_basis_staleness() -> u64 {
    200
}

fn default_leverage() -> u8 {
    5
}

fn default_paper_balance() -> Decimal {
    Decimal::new(10000, 0) // 10k USDT
}

fn default_paper_fee_rate() -> Decimal {
    Decimal::new(4, 4) // 0.04% taker
}

fn default_db_path() -> String {
    "data/position_engine.db".to_string()
}

impl ExecutionConfig {
    pub fn max_trading_duration(&self) -> Duration {
        Duration::from_secs(self.max_trading_duration_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn requery_delay(&self) -> Duration {
        Duration::from_millis(self.requery_delay_ms)
    }

    pub fn quote_max_age(&self) -> Duration {
        Duration::from_secs(self.quote_max_age_secs)
    }

    pub fn basis_staleness(&self) -> Duration {
        Duration::from_secs(self.basis_staleness_secs)
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PTE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.max_concurrent_calls >= 1,
            "max_concurrent_calls must be at least 1"
        );

        anyhow::ensure!(
            self.execution.max_trading_duration_secs > 0,
            "max_trading_duration_secs must be positive"
        );

        anyhow::ensure!(
            self.execution.max_slippage > Decimal::ZERO && self.execution.max_slippage < Decimal::ONE,
            "max_slippage must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.diff_epsilon_ratio >= Decimal::ZERO
                && self.execution.diff_epsilon_ratio < Decimal::ONE,
            "diff_epsilon_ratio must be in [0, 1)"
        );

        anyhow::ensure!(
            self.execution.leg_tolerance >= Decimal::ZERO
                && self.execution.leg_tolerance < Decimal::ONE,
            "leg_tolerance must be in [0, 1)"
        );

        anyhow::ensure!(
            self.execution.default_leverage >= 1,
            "default_leverage must be >= 1"
        );

        anyhow::ensure!(
            self.paper.initial_balance > Decimal::ZERO,
            "paper initial_balance must be positive"
        );

        if self.notifier.enabled {
            anyhow::ensure!(
                self.notifier.webhook_url.is_some(),
                "notifier is enabled but webhook_url is missing"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            server: ServerConfig::default(),
            execution: ExecutionConfig::default(),
            binance: BinanceConfig::default(),
            paper: PaperConfig::default(),
            persistence: PersistenceConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_trading_duration_secs: default_max_trading_duration(),
            cooldown_secs: default_cooldown(),
            max_slippage: default_max_slippage(),
            diff_epsilon_ratio: default_diff_epsilon_ratio(),
            leg_tolerance: default_leg_tolerance(),
            requery_delay_ms: default_requery_delay(),
            quote_max_age_secs: default_quote_max_age(),
            basis_staleness_secs: default_basis_staleness(),
            default_leverage: default_leverage(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_paper_balance(),
            fee_rate: default_paper_fee_rate(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_execution_constants() {
        let exec = ExecutionConfig::default();
        assert_eq!(exec.max_trading_duration(), Duration::from_secs(20));
        assert_eq!(exec.max_slippage, dec!(0.0005));
        assert_eq!(exec.diff_epsilon_ratio, dec!(0.01));
        assert_eq!(exec.basis_staleness(), Duration::from_secs(200));
    }

    #[test]
    fn test_enabled_notifier_requires_url() {
        let mut config = Config::default();
        config.notifier.enabled = true;
        assert!(config.validate().is_err());

        config.notifier.webhook_url = Some("https://hooks.example.com/x".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let raw = r#"
            mode = "live"

            [execution]
            max_trading_duration_secs = 45
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.mode, TradingMode::Live);
        assert_eq!(config.execution.max_trading_duration_secs, 45);
        assert_eq!(config.execution.cooldown_secs, 3);
        assert_eq!(config.server.max_concurrent_calls, 16);
    }
}
