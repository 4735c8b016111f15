//! Application configuration: TOML file plus `MM_*` environment overrides.

use anyhow::{Context, Result};
use common::BitmexEnvironment;
use model::CandleInterval;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use strategy_core::GridSettings;
use strategy_runner::EngineConfig;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub grid: GridSettings,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// `production` or `testnet`. `BITMEX_ENVIRONMENT` takes precedence.
    pub environment: String,
    pub channel_capacity: usize,
    /// Candle stream to forward to engine subscribers. Off when unset.
    pub candle_interval: Option<CandleInterval>,
    /// Candles fetched once at startup. Zero skips the fetch.
    pub warmup_candles: usize,
    pub health_log_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            environment: "testnet".to_string(),
            channel_capacity: 1024,
            candle_interval: None,
            warmup_candles: 0,
            health_log_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from `config.toml` if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                info!("no config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(symbol) = std::env::var("MM_SYMBOL") {
            if !symbol.trim().is_empty() {
                self.engine.symbol = symbol.trim().to_string();
            }
        }
        override_parse("MM_ORDER_PAIRS", &mut self.grid.order_pairs);
        override_parse("MM_START_SIZE", &mut self.grid.start_size);
        override_parse("MM_MIN_SPREAD", &mut self.grid.min_spread);
        override_parse("MM_REBUILD_THRESHOLD_PCT", &mut self.grid.rebuild_threshold_pct);
        override_parse("MM_PERIOD_SECS", &mut self.engine.period_secs);
        override_parse("MM_TRUST_SERVER", &mut self.engine.trust_server_snapshots);
        override_parse("MM_AUTO_START", &mut self.engine.auto_start);
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.validate().context("invalid [grid] section")?;
        self.engine.validate().context("invalid [engine] section")?;
        anyhow::ensure!(
            self.exchange.channel_capacity > 0,
            "exchange.channel_capacity must be positive"
        );
        anyhow::ensure!(
            self.exchange.health_log_secs > 0,
            "exchange.health_log_secs must be positive"
        );
        self.configured_environment()?;
        Ok(())
    }

    fn configured_environment(&self) -> Result<BitmexEnvironment> {
        BitmexEnvironment::from_str(&self.exchange.environment).context("invalid exchange.environment")
    }

    /// `BITMEX_ENVIRONMENT` if set, else the configured value.
    pub fn environment(&self) -> Result<BitmexEnvironment> {
        match BitmexEnvironment::from_env().context("invalid BITMEX_ENVIRONMENT")? {
            Some(environment) => Ok(environment),
            None => self.configured_environment(),
        }
    }

    pub fn health_log_interval(&self) -> Duration {
        Duration::from_secs(self.exchange.health_log_secs)
    }
}

fn override_parse<T: FromStr>(key: &str, target: &mut T) {
    let Ok(value) = std::env::var(key) else {
        return;
    };
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = %value, "ignoring unparsable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_full_file() {
        let config = AppConfig::from_toml(
            r#"
            [exchange]
            environment = "production"
            candle_interval = "5m"

            [grid]
            order_pairs = 5
            start_size = 100
            step_size = 50
            interval = 0.5
            min_spread = 3
            anchor_to_position = true

            [engine]
            symbol = "ETHUSD"
            trust_server_snapshots = true
            initial_balance = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.exchange.environment, "production");
        assert_eq!(config.exchange.candle_interval, Some(CandleInterval::FiveMinutes));
        assert_eq!(config.grid.order_pairs, 5);
        assert_eq!(config.grid.interval, dec!(0.5));
        assert!(config.grid.anchor_to_position);
        assert_eq!(config.grid.max_position, dec!(1000));
        assert_eq!(config.engine.symbol, "ETHUSD");
        assert_eq!(config.engine.initial_balance, Some(dec!(0.25)));
        assert_eq!(config.engine.period_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.engine.symbol, "XBTUSD");
        assert_eq!(config.grid.order_pairs, 3);
        assert_eq!(config.exchange.environment, "testnet");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let config = AppConfig::from_toml(
            r#"
            [grid]
            min_position = 10
            max_position = 5
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let config = AppConfig::from_toml(
            r#"
            [exchange]
            environment = "staging"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_parse_ignores_garbage() {
        let mut pairs = 3usize;
        std::env::set_var("MM_TEST_PAIRS_GARBAGE", "many");
        override_parse("MM_TEST_PAIRS_GARBAGE", &mut pairs);
        assert_eq!(pairs, 3);

        std::env::set_var("MM_TEST_PAIRS_OK", " 7 ");
        override_parse("MM_TEST_PAIRS_OK", &mut pairs);
        assert_eq!(pairs, 7);
    }
}
