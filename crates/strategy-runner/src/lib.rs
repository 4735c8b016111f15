//! Market-making engine runtime.
//!
//! - **MarketMaker**: single-lane event loop owning position, balance and
//!   the open-order registry
//! - **EngineHandle**: operator commands (start, stop, cancel, rebuild,
//!   flatten) and a broadcast feed of `EngineEvent`s
//! - **PeriodTimer**: wall-clock aligned rebuild schedule
//!
//! # Architecture
//!
//! ```text
//!  ticks ─────────┐
//!  user events ───┤     ┌──────────────┐  cancel / submit  ┌─────────────────┐
//!  commands ──────┼────>│ MarketMaker  │──────────────────>│ ExchangeGateway │
//!  period timer ──┘     │ - registry   │                   └─────────────────┘
//!                       │ - ledger     │──> EngineEvent (broadcast)
//!                       └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let (engine, handle) = MarketMaker::new(EngineConfig::default(), grid, gateway)?;
//! let task = tokio::spawn(engine.run(inputs, shutdown_rx));
//!
//! handle.start().await?;
//! ```

mod command;
mod config;
mod engine;
mod error;
mod timer;

pub use command::{EngineCommand, EngineEvent, EngineHandle};
pub use config::EngineConfig;
pub use engine::{EngineInputs, MarketMaker};
pub use error::EngineError;
pub use timer::PeriodTimer;
