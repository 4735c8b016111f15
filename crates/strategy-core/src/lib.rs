//! Market-making grid.
//!
//! - **`GridSettings`**: grid shape, position limits, rebuild threshold
//! - **`generate_grid`**: sells above and buys below the market, optionally
//!   anchored to the position's entry price
//! - **`tick_round`**: truncation to the half-unit price increment
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_core::Position;
//! use strategy_core::{generate_grid, GridSettings};
//!
//! let grid = generate_grid(Some(dec!(10000)), &GridSettings::default(), &Position::flat())?;
//! let requests: Vec<_> = grid.iter().map(|i| i.to_request()).collect();
//! ```

mod error;
mod grid;

pub use error::StrategyError;
pub use grid::{generate_grid, tick_round, GridOrderIntent, GridSettings};
