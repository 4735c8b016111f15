//! Position and balance tracking for inverse contracts.
//!
//! Volume is counted in contracts (quote currency), balance in the settlement
//! currency. Realized P&L of a contract is `1/entry - 1/exit` per unit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Net position in the traded contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Net volume (positive = long, negative = short).
    pub volume: Decimal,
    /// Average entry price. `None` while flat.
    pub avg_price: Option<Decimal>,
}

impl Position {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn new(volume: Decimal, avg_price: Decimal) -> Self {
        if volume.is_zero() {
            Self::flat()
        } else {
            Self {
                volume,
                avg_price: Some(avg_price),
            }
        }
    }

    pub fn is_flat(&self) -> bool {
        self.volume.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.volume > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.volume < Decimal::ZERO
    }
}

/// How a fill changed the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    Opened,
    Increased,
    Reduced,
    Flipped,
    /// Zero volume or a non-positive price; nothing was applied.
    Ignored,
}

/// Outcome of applying one fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEffect {
    pub kind: FillKind,
    /// Realized P&L before fees, in settlement currency.
    pub realized: Decimal,
    pub fee: Decimal,
}

/// Position plus settlement balance, mutated only by fills and snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    position: Position,
    /// Unknown until seeded from config or the first server snapshot.
    balance: Option<Decimal>,
}

impl Ledger {
    pub fn new(balance: Option<Decimal>) -> Self {
        Self {
            position: Position::flat(),
            balance,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn balance(&self) -> Option<Decimal> {
        self.balance
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn set_balance(&mut self, balance: Decimal) {
        self.balance = Some(balance);
    }

    /// Apply a fully filled order with signed volume `volume` at average
    /// price `price`, then deduct `fee`.
    ///
    /// Balance changes are only applied once the balance is known; the
    /// returned effect carries the realized amount either way.
    pub fn apply_fill(&mut self, volume: Decimal, price: Decimal, fee: Decimal) -> FillEffect {
        if volume.is_zero() || price <= Decimal::ZERO {
            return FillEffect {
                kind: FillKind::Ignored,
                realized: Decimal::ZERO,
                fee: Decimal::ZERO,
            };
        }

        let old_volume = self.position.volume;
        let entry = self.position.avg_price.filter(|_| !old_volume.is_zero());
        let (kind, realized) = match entry {
            None => {
                self.position = Position::new(volume, price);
                (FillKind::Opened, Decimal::ZERO)
            }
            Some(old_avg) if old_volume.is_sign_positive() == volume.is_sign_positive() => {
                let new_volume = old_volume + volume;
                let avg = new_volume / (volume / price + old_volume / old_avg);
                self.position = Position::new(new_volume, avg);
                (FillKind::Increased, Decimal::ZERO)
            }
            Some(old_avg) if old_volume.abs() >= volume.abs() => {
                let realized = volume * (-(Decimal::ONE / old_avg) + Decimal::ONE / price);
                self.position = Position::new(old_volume + volume, old_avg);
                (FillKind::Reduced, realized)
            }
            Some(old_avg) => {
                let realized = old_volume * (Decimal::ONE / old_avg - Decimal::ONE / price);
                self.position = Position::new(old_volume + volume, price);
                (FillKind::Flipped, realized)
            }
        };

        if let Some(balance) = self.balance.as_mut() {
            *balance += realized;
            *balance -= fee;
        }

        FillEffect {
            kind,
            realized,
            fee,
        }
    }
}
