//! Order types and status enums.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert from the exchange string representation.
    pub fn from_exchange_str(s: &str) -> Option<Self> {
        match s {
            "Buy" => Some(Self::Buy),
            "Sell" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Convert to the exchange string representation.
    pub fn as_exchange_str(&self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }

    /// Side implied by a signed volume. Zero has no side.
    pub fn from_signed(volume: Decimal) -> Option<Self> {
        if volume > Decimal::ZERO {
            Some(Self::Buy)
        } else if volume < Decimal::ZERO {
            Some(Self::Sell)
        } else {
            None
        }
    }

    /// Apply this side's sign to a magnitude.
    pub fn signed(&self, magnitude: Decimal) -> Decimal {
        match self {
            Self::Buy => magnitude.abs(),
            Self::Sell => -magnitude.abs(),
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order acknowledged by exchange.
    New,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order canceled.
    Canceled,
    /// Order rejected by exchange.
    Rejected,
    /// Order expired.
    Expired,
    /// Submitted or cancel requested, awaiting the exchange.
    Pending,
}

impl OrderStatus {
    /// Convert from the exchange `ordStatus` string.
    pub fn from_exchange_str(s: &str) -> Option<Self> {
        match s {
            "New" => Some(Self::New),
            "PartiallyFilled" => Some(Self::PartiallyFilled),
            "Filled" => Some(Self::Filled),
            "Canceled" => Some(Self::Canceled),
            "Rejected" => Some(Self::Rejected),
            "Expired" => Some(Self::Expired),
            "PendingNew" | "PendingCancel" | "PendingReplace" | "Untriggered" => {
                Some(Self::Pending)
            }
            _ => None,
        }
    }

    /// Check if this is a terminal status (order is done).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Check if the order is still active/open.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// An order as known locally, built from submissions and merged stream rows.
///
/// Volumes are signed: positive buys, negative sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order ID (populated after acknowledgment).
    pub order_id: Option<String>,
    /// Client-generated order ID (used for correlation).
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    /// Limit price (None for market orders).
    pub price: Option<Decimal>,
    /// Volume-weighted average fill price (None until the first fill).
    pub avg_fill_price: Option<Decimal>,
    pub fee: Decimal,
    pub fee_asset: Option<String>,
    /// Signed requested volume.
    pub volume: Decimal,
    /// Signed filled volume.
    pub filled_volume: Decimal,
    pub updated_at_ms: i64,
    /// Latest raw exchange payload for this order, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Order {
    /// Create a locally submitted order in `Pending` status.
    pub fn pending(
        client_order_id: String,
        symbol: String,
        volume: Decimal,
        price: Option<Decimal>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            order_id: None,
            client_order_id,
            symbol,
            status: OrderStatus::Pending,
            price,
            avg_fill_price: None,
            fee: Decimal::ZERO,
            fee_asset: None,
            volume,
            filled_volume: Decimal::ZERO,
            updated_at_ms: created_at_ms,
            raw: None,
        }
    }

    pub fn side(&self) -> Option<OrderSide> {
        OrderSide::from_signed(self.volume)
    }

    /// Signed volume still resting on the book.
    pub fn remaining_volume(&self) -> Decimal {
        self.volume - self.filled_volume
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Orders without a client id were placed outside this process.
    pub fn is_manual(&self) -> bool {
        self.client_order_id.is_empty()
    }
}

/// Order to be submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    /// Signed volume: positive buys, negative sells.
    pub volume: Decimal,
    /// Limit price. `None` submits a market order.
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn limit(client_order_id: String, volume: Decimal, price: Decimal) -> Self {
        Self {
            client_order_id,
            volume,
            price: Some(price),
        }
    }

    pub fn market(client_order_id: String, volume: Decimal) -> Self {
        Self {
            client_order_id,
            volume,
            price: None,
        }
    }

    pub fn side(&self) -> Option<OrderSide> {
        OrderSide::from_signed(self.volume)
    }

    pub fn quantity(&self) -> Decimal {
        self.volume.abs()
    }

    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }
}

/// Exchange acknowledgment of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub timestamp_ms: i64,
}

/// Identifier used to cancel a single order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelTarget {
    /// Exchange-assigned order ID.
    ById(String),
    /// Client-assigned order ID.
    ByClientId(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_conversion() {
        assert_eq!(OrderSide::from_exchange_str("Buy"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_exchange_str("Sell"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_exchange_str("BUY"), None);

        assert_eq!(OrderSide::Buy.as_exchange_str(), "Buy");
        assert_eq!(OrderSide::Sell.as_exchange_str(), "Sell");
    }

    #[test]
    fn test_side_from_signed_volume() {
        assert_eq!(OrderSide::from_signed(dec!(10)), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_signed(dec!(-3)), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_signed(dec!(0)), None);
        assert_eq!(OrderSide::Sell.signed(dec!(5)), dec!(-5));
        assert_eq!(OrderSide::Buy.signed(dec!(-5)), dec!(5));
    }

    #[test]
    fn test_order_status_from_exchange() {
        assert_eq!(
            OrderStatus::from_exchange_str("PartiallyFilled"),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(
            OrderStatus::from_exchange_str("PendingCancel"),
            Some(OrderStatus::Pending)
        );
        assert_eq!(OrderStatus::from_exchange_str("Bogus"), None);
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());

        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Pending.is_active());
    }

    #[test]
    fn test_order_remaining_volume() {
        let mut order = Order::pending("mm_a".into(), "XBTUSD".into(), dec!(-30), Some(dec!(10001)), 1000);
        assert_eq!(order.side(), Some(OrderSide::Sell));
        assert_eq!(order.remaining_volume(), dec!(-30));
        assert!(order.avg_fill_price.is_none());

        order.filled_volume = dec!(-10);
        assert_eq!(order.remaining_volume(), dec!(-20));
    }

    #[test]
    fn test_manual_order_has_no_client_id() {
        let order = Order::pending(String::new(), "XBTUSD".into(), dec!(1), None, 0);
        assert!(order.is_manual());
    }

    #[test]
    fn test_order_request_constructors() {
        let limit = OrderRequest::limit("mm_1".into(), dec!(-15), dec!(10002));
        assert_eq!(limit.side(), Some(OrderSide::Sell));
        assert_eq!(limit.quantity(), dec!(15));
        assert!(!limit.is_market());

        let market = OrderRequest::market("mm_2".into(), dec!(50));
        assert!(market.is_market());
    }
}
