//! Engine error types.

use connector_core::GatewayError;
use strategy_core::StrategyError;
use thiserror::Error;

/// Errors reported by engine commands and grid rebuilds.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Grid could not be generated (no price yet, bad settings).
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// Submit or cancel failed. Local order tracking was left untouched.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// The engine task is gone.
    #[error("engine channel closed")]
    ChannelClosed,
}
