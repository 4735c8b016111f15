//! Strategy error types.

use thiserror::Error;

/// Errors that can occur while building a grid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// No price tick has been observed yet.
    #[error("current price is not loaded yet, cannot generate orders")]
    NoPrice,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
