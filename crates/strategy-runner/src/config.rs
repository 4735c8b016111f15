//! Engine configuration.

use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings apart from the grid shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Contract traded, e.g. `XBTUSD`.
    pub symbol: String,
    /// Length of the wall-clock period between scheduled rebuilds.
    pub period_secs: u64,
    /// Rebuild on every period boundary. When off, a boundary only rebuilds
    /// if there is no grid yet or the price drifted past the threshold.
    pub rebuild_every_period: bool,
    /// Adopt server position and balance snapshots instead of only logging
    /// disagreements with the local ledger.
    pub trust_server_snapshots: bool,
    /// Unit the contract settles in. Margin snapshots in any other
    /// currency are ignored.
    pub settlement_currency: String,
    /// Settlement balance to start from. Unknown until the first margin
    /// snapshot when unset.
    pub initial_balance: Option<Decimal>,
    /// Start quoting as soon as the engine runs.
    pub auto_start: bool,
    /// Retired orders kept for duplicate detection.
    pub history_limit: usize,
    pub event_capacity: usize,
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "XBTUSD".to_string(),
            period_secs: 60,
            rebuild_every_period: true,
            trust_server_snapshots: false,
            settlement_currency: "XBT".to_string(),
            initial_balance: None,
            auto_start: false,
            history_limit: 1000,
            event_capacity: 1024,
            command_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::InvalidConfig("symbol must not be empty".into()));
        }
        if self.settlement_currency.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "settlement_currency must not be empty".into(),
            ));
        }
        if self.period_secs == 0 {
            return Err(EngineError::InvalidConfig("period_secs must be positive".into()));
        }
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(EngineError::InvalidConfig("channel capacities must be positive".into()));
        }
        Ok(())
    }
}
