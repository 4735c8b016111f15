//! Normalized account events produced by the user stream.

use crate::order::Order;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-reported position for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// Signed size in contracts (`currentQty`).
    pub volume: Decimal,
    /// Average entry price (`avgCostPrice`), absent while flat.
    pub avg_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    /// `currentQty / avgCostPrice` rounded to 8 places.
    ///
    /// Passed through as reported; its financial meaning is unconfirmed.
    pub value: Option<Decimal>,
    pub timestamp_ms: i64,
}

/// Server-reported margin balance, already scaled to whole currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub currency: String,
    pub amount: Decimal,
    pub timestamp_ms: i64,
}

/// Event emitted by the authenticated stream after merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserEvent {
    OrderUpdate(Order),
    PositionUpdate(PositionSnapshot),
    BalanceUpdate(BalanceSnapshot),
}

impl UserEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderUpdate(_) => "order",
            Self::PositionUpdate(_) => "position",
            Self::BalanceUpdate(_) => "balance",
        }
    }
}
