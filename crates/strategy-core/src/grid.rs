//! Two-sided order grid around the market price.

use crate::error::StrategyError;
use execution_core::{generate_client_order_id, OrderRequest, OrderSide, Position, CLIENT_ORDER_PREFIX};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Grid shape and position limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Orders per side.
    pub order_pairs: usize,
    /// Size of the order closest to the market.
    pub start_size: Decimal,
    /// Size added per step away from the market.
    pub step_size: Decimal,
    /// Price distance between consecutive orders on one side.
    pub interval: Decimal,
    /// Distance between the best sell and the best buy.
    pub min_spread: Decimal,
    /// Rebuild once price moves this many percent from the anchor.
    pub rebuild_threshold_pct: Decimal,
    /// Start the closing side at the position's entry price when that is
    /// tighter than the spread.
    pub anchor_to_position: bool,
    /// Sells are only placed while the position is above this.
    pub min_position: Decimal,
    /// Buys are only placed while the position is below this.
    pub max_position: Decimal,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            order_pairs: 3,
            start_size: Decimal::from(10),
            step_size: Decimal::from(5),
            interval: Decimal::ONE,
            min_spread: Decimal::from(2),
            rebuild_threshold_pct: Decimal::new(5, 1),
            anchor_to_position: false,
            min_position: Decimal::from(-1000),
            max_position: Decimal::from(1000),
        }
    }
}

impl GridSettings {
    pub fn validate(&self) -> Result<(), StrategyError> {
        let invalid = |msg: &str| Err(StrategyError::InvalidConfig(msg.to_string()));

        if self.order_pairs == 0 {
            return invalid("order_pairs must be at least 1");
        }
        if self.interval <= Decimal::ZERO {
            return invalid("interval must be positive");
        }
        if self.min_spread < Decimal::ZERO {
            return invalid("min_spread must not be negative");
        }
        if self.start_size <= Decimal::ZERO {
            return invalid("start_size must be positive");
        }
        if self.step_size < Decimal::ZERO {
            return invalid("step_size must not be negative");
        }
        if self.min_position >= self.max_position {
            return invalid("min_position must be below max_position");
        }
        if self.rebuild_threshold_pct <= Decimal::ZERO {
            return invalid("rebuild_threshold_pct must be positive");
        }
        Ok(())
    }

    /// Size of the order `step` levels away from the market.
    pub fn size_at(&self, step: usize) -> Decimal {
        self.start_size + self.step_size * Decimal::from(step)
    }

    /// Whether the market moved far enough from `anchor` to rebuild.
    pub fn drifted(&self, anchor: Decimal, price: Decimal) -> bool {
        if price <= Decimal::ZERO {
            return false;
        }
        Decimal::ONE_HUNDRED * (anchor - price).abs() / price >= self.rebuild_threshold_pct
    }
}

/// An order the engine wants resting, not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOrderIntent {
    pub side: OrderSide,
    pub price: Decimal,
    /// Magnitude; the side carries the sign.
    pub volume: Decimal,
    pub client_order_id: String,
}

impl GridOrderIntent {
    pub fn signed_volume(&self) -> Decimal {
        self.side.signed(self.volume)
    }

    pub fn to_request(&self) -> OrderRequest {
        OrderRequest::limit(self.client_order_id.clone(), self.signed_volume(), self.price)
    }
}

/// Round down to the nearest half unit.
pub fn tick_round(price: Decimal) -> Decimal {
    (price * Decimal::TWO).floor() / Decimal::TWO
}

/// Build the grid around `price`.
///
/// Sells come first, nearest to the market first, then buys.
pub fn generate_grid(
    price: Option<Decimal>,
    settings: &GridSettings,
    position: &Position,
) -> Result<Vec<GridOrderIntent>, StrategyError> {
    let price = price.ok_or(StrategyError::NoPrice)?;
    let half_spread = settings.min_spread / Decimal::TWO;
    let entry = position.avg_price.filter(|_| settings.anchor_to_position);
    let mut intents = Vec::with_capacity(settings.order_pairs * 2);

    if position.volume > settings.min_position {
        let mut start = price + half_spread;
        if let Some(entry) = entry.filter(|&e| position.is_long() && start < e) {
            start = entry;
        }
        intents.extend((0..settings.order_pairs).map(|k| GridOrderIntent {
            side: OrderSide::Sell,
            price: tick_round(start + settings.interval * Decimal::from(k)),
            volume: settings.size_at(k),
            client_order_id: generate_client_order_id(CLIENT_ORDER_PREFIX),
        }));
    }

    if position.volume < settings.max_position {
        let mut start = price - half_spread;
        if let Some(entry) = entry.filter(|&e| position.is_short() && start > e) {
            start = entry;
        }
        intents.extend((0..settings.order_pairs).map(|k| GridOrderIntent {
            side: OrderSide::Buy,
            price: tick_round(start - settings.interval * Decimal::from(k)),
            volume: settings.size_at(k),
            client_order_id: generate_client_order_id(CLIENT_ORDER_PREFIX),
        }));
    }

    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn settings() -> GridSettings {
        GridSettings {
            order_pairs: 3,
            start_size: dec!(10),
            step_size: dec!(5),
            interval: dec!(1),
            min_spread: dec!(2),
            ..GridSettings::default()
        }
    }

    fn prices(intents: &[GridOrderIntent], side: OrderSide) -> Vec<Decimal> {
        intents.iter().filter(|i| i.side == side).map(|i| i.price).collect()
    }

    fn volumes(intents: &[GridOrderIntent], side: OrderSide) -> Vec<Decimal> {
        intents
            .iter()
            .filter(|i| i.side == side)
            .map(|i| i.signed_volume())
            .collect()
    }

    #[test]
    fn test_tick_round_truncates_to_half() {
        assert_eq!(tick_round(dec!(10023.37)), dec!(10023.0));
        assert_eq!(tick_round(dec!(10023.6)), dec!(10023.5));
        assert_eq!(tick_round(dec!(10023.5)), dec!(10023.5));
        assert_eq!(tick_round(dec!(10023.99)), dec!(10023.5));
    }

    #[test]
    fn test_flat_grid() {
        let grid = generate_grid(Some(dec!(10000)), &settings(), &Position::flat()).unwrap();

        assert_eq!(grid.len(), 6);
        assert_eq!(
            prices(&grid, OrderSide::Sell),
            vec![dec!(10001.0), dec!(10002.0), dec!(10003.0)]
        );
        assert_eq!(
            volumes(&grid, OrderSide::Sell),
            vec![dec!(-10), dec!(-15), dec!(-20)]
        );
        assert_eq!(
            prices(&grid, OrderSide::Buy),
            vec![dec!(9999.0), dec!(9998.0), dec!(9997.0)]
        );
        assert_eq!(volumes(&grid, OrderSide::Buy), vec![dec!(10), dec!(15), dec!(20)]);
    }

    #[test]
    fn test_every_intent_has_fresh_client_id() {
        let grid = generate_grid(Some(dec!(10000)), &settings(), &Position::flat()).unwrap();
        let ids: HashSet<_> = grid.iter().map(|i| i.client_order_id.as_str()).collect();

        assert_eq!(ids.len(), grid.len());
        assert!(grid.iter().all(|i| i.client_order_id.starts_with("mm_")));
    }

    #[test]
    fn test_odd_spread_halves_exactly() {
        let s = GridSettings {
            min_spread: dec!(3),
            ..settings()
        };
        let grid = generate_grid(Some(dec!(10000)), &s, &Position::flat()).unwrap();

        assert_eq!(prices(&grid, OrderSide::Sell)[0], dec!(10001.5));
        assert_eq!(prices(&grid, OrderSide::Buy)[0], dec!(9998.5));
    }

    #[test]
    fn test_no_price_is_an_error() {
        assert_eq!(
            generate_grid(None, &settings(), &Position::flat()),
            Err(StrategyError::NoPrice)
        );
    }

    #[test]
    fn test_position_limits_drop_a_side() {
        let s = GridSettings {
            min_position: dec!(-50),
            max_position: dec!(50),
            ..settings()
        };

        let long = generate_grid(Some(dec!(10000)), &s, &Position::new(dec!(50), dec!(9900))).unwrap();
        assert!(prices(&long, OrderSide::Buy).is_empty());
        assert_eq!(prices(&long, OrderSide::Sell).len(), 3);

        let short = generate_grid(Some(dec!(10000)), &s, &Position::new(dec!(-50), dec!(10100))).unwrap();
        assert!(prices(&short, OrderSide::Sell).is_empty());
        assert_eq!(prices(&short, OrderSide::Buy).len(), 3);
    }

    #[test]
    fn test_long_anchors_sells_at_entry() {
        let s = GridSettings {
            anchor_to_position: true,
            ..settings()
        };
        let grid = generate_grid(Some(dec!(10000)), &s, &Position::new(dec!(100), dec!(10010.3))).unwrap();

        assert_eq!(
            prices(&grid, OrderSide::Sell),
            vec![dec!(10010.0), dec!(10011.0), dec!(10012.0)]
        );
        assert_eq!(prices(&grid, OrderSide::Buy)[0], dec!(9999.0));
    }

    #[test]
    fn test_short_anchors_buys_at_entry() {
        let s = GridSettings {
            anchor_to_position: true,
            ..settings()
        };
        let grid = generate_grid(Some(dec!(10000)), &s, &Position::new(dec!(-100), dec!(9990))).unwrap();

        assert_eq!(
            prices(&grid, OrderSide::Buy),
            vec![dec!(9990.0), dec!(9989.0), dec!(9988.0)]
        );
        assert_eq!(prices(&grid, OrderSide::Sell)[0], dec!(10001.0));
    }

    #[test]
    fn test_anchor_ignored_when_not_tighter() {
        let s = GridSettings {
            anchor_to_position: true,
            ..settings()
        };
        let grid = generate_grid(Some(dec!(10000)), &s, &Position::new(dec!(100), dec!(9950))).unwrap();
        assert_eq!(prices(&grid, OrderSide::Sell)[0], dec!(10001.0));
    }

    #[test]
    fn test_drift_threshold() {
        let s = GridSettings {
            rebuild_threshold_pct: dec!(1),
            ..settings()
        };
        assert!(!s.drifted(dec!(10000), dec!(10050)));
        assert!(s.drifted(dec!(10000), dec!(9900)));
        assert!(s.drifted(dec!(10000), dec!(10102)));
    }

    #[test]
    fn test_validate() {
        assert!(GridSettings::default().validate().is_ok());
        assert!(GridSettings {
            order_pairs: 0,
            ..settings()
        }
        .validate()
        .is_err());
        assert!(GridSettings {
            min_position: dec!(10),
            max_position: dec!(10),
            ..settings()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_intent_to_request() {
        let intent = GridOrderIntent {
            side: OrderSide::Sell,
            price: dec!(10001),
            volume: dec!(10),
            client_order_id: "mm_x".into(),
        };
        let request = intent.to_request();
        assert_eq!(request.volume, dec!(-10));
        assert_eq!(request.price, Some(dec!(10001)));
    }
}
