//! BitMEX API row types.
//!
//! The same rows arrive from REST responses and as websocket table deltas.
//! Delta rows only carry the fields that changed, so every optional field is
//! an `Option<Option<T>>`: `None` when absent, `Some(None)` when explicitly
//! null, `Some(Some(v))` when set.

use chrono::DateTime;
use execution_core::{BalanceSnapshot, Order, OrderAck, OrderSide, OrderStatus, PositionSnapshot};
use model::{Candle, CandleInterval};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// Keep `null` distinguishable from an absent field.
///
/// Use with `#[serde(default, deserialize_with = "deserialize_some")]` on an
/// `Option<Option<T>>` field.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Parse an exchange ISO-8601 timestamp into unix milliseconds.
pub fn parse_timestamp_ms(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Multiplier converting an exchange currency amount into whole units.
pub fn currency_scale(currency: &str) -> Decimal {
    match currency {
        "XBt" => Decimal::new(1, 8),
        "USDt" => Decimal::new(1, 6),
        _ => Decimal::ONE,
    }
}

/// Unit name for a raw exchange currency, e.g. `XBt` -> `XBT`.
pub fn unit_currency(currency: &str) -> String {
    match currency {
        "XBt" => "XBT".to_string(),
        "USDt" => "USDT".to_string(),
        other => other.to_string(),
    }
}

/// Copy every field that is present in `delta` into `target`.
macro_rules! merge_present {
    ($target:expr, $delta:expr, $($field:ident),+ $(,)?) => {
        $(
            if $delta.$field.is_some() {
                $target.$field = $delta.$field;
            }
        )+
    };
}

/// Flatten a tri-state field.
fn value<T: Clone>(field: &Option<Option<T>>) -> Option<T> {
    field.clone().flatten()
}

/// A row of the `order` table / response of the order endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderRow {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "clOrdID", default, deserialize_with = "deserialize_some")]
    pub cl_ord_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub symbol: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub side: Option<Option<String>>,
    #[serde(rename = "ordStatus", default, deserialize_with = "deserialize_some")]
    pub ord_status: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub price: Option<Option<Decimal>>,
    #[serde(rename = "avgPx", default, deserialize_with = "deserialize_some")]
    pub avg_px: Option<Option<Decimal>>,
    #[serde(rename = "orderQty", default, deserialize_with = "deserialize_some")]
    pub order_qty: Option<Option<Decimal>>,
    #[serde(rename = "cumQty", default, deserialize_with = "deserialize_some")]
    pub cum_qty: Option<Option<Decimal>>,
    #[serde(rename = "leavesQty", default, deserialize_with = "deserialize_some")]
    pub leaves_qty: Option<Option<Decimal>>,
    #[serde(rename = "settlCurrency", default, deserialize_with = "deserialize_some")]
    pub settl_currency: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub text: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub timestamp: Option<Option<String>>,
}

impl OrderRow {
    /// Field-by-field last-write-wins merge of a delta for the same order.
    pub fn merge(&mut self, delta: OrderRow) {
        merge_present!(
            self, delta, cl_ord_id, symbol, side, ord_status, price, avg_px, order_qty,
            cum_qty, leaves_qty, settl_currency, text, timestamp,
        );
    }

    pub fn status(&self) -> Option<OrderStatus> {
        value(&self.ord_status).and_then(|s| OrderStatus::from_exchange_str(&s))
    }

    /// Whether this row explicitly carries the given status.
    pub fn has_status(&self, status: OrderStatus) -> bool {
        self.status() == Some(status)
    }

    pub fn client_order_id(&self) -> String {
        value(&self.cl_ord_id).unwrap_or_default()
    }

    pub fn side(&self) -> Option<OrderSide> {
        value(&self.side).and_then(|s| OrderSide::from_exchange_str(&s))
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        value(&self.timestamp).and_then(|t| parse_timestamp_ms(&t))
    }

    pub fn settlement_currency(&self) -> Option<String> {
        value(&self.settl_currency)
    }

    /// Normalize into an `Order`. Signs volumes by side.
    ///
    /// Returns `None` until the row has both a side and a status.
    pub fn to_order(&self, fee: Decimal, fee_asset: Option<String>) -> Option<Order> {
        let side = self.side()?;
        let status = self.status()?;

        Some(Order {
            order_id: Some(self.order_id.clone()),
            client_order_id: self.client_order_id(),
            symbol: value(&self.symbol).unwrap_or_default(),
            status,
            price: value(&self.price),
            avg_fill_price: value(&self.avg_px),
            fee,
            fee_asset,
            volume: side.signed(value(&self.order_qty).unwrap_or_default()),
            filled_volume: side.signed(value(&self.cum_qty).unwrap_or_default()),
            updated_at_ms: self.timestamp_ms().unwrap_or_default(),
            raw: None,
        })
    }

    pub fn to_ack(&self) -> OrderAck {
        OrderAck {
            order_id: self.order_id.clone(),
            client_order_id: self.client_order_id(),
            status: self.status().unwrap_or(OrderStatus::Pending),
            timestamp_ms: self.timestamp_ms().unwrap_or_default(),
        }
    }
}

/// A row of the `position` table, keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PositionRow {
    pub symbol: String,
    #[serde(rename = "currentQty", default, deserialize_with = "deserialize_some")]
    pub current_qty: Option<Option<Decimal>>,
    #[serde(rename = "avgCostPrice", default, deserialize_with = "deserialize_some")]
    pub avg_cost_price: Option<Option<Decimal>>,
    #[serde(rename = "liquidationPrice", default, deserialize_with = "deserialize_some")]
    pub liquidation_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub currency: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub timestamp: Option<Option<String>>,
}

impl PositionRow {
    pub fn merge(&mut self, delta: PositionRow) {
        merge_present!(
            self, delta, current_qty, avg_cost_price, liquidation_price, currency, timestamp,
        );
    }

    pub fn to_snapshot(&self) -> PositionSnapshot {
        let volume = value(&self.current_qty).unwrap_or_default();
        let avg_price = value(&self.avg_cost_price);
        let notional = avg_price
            .filter(|p| !p.is_zero())
            .map(|p| (volume / p).round_dp(8));

        PositionSnapshot {
            symbol: self.symbol.clone(),
            volume,
            avg_price,
            liquidation_price: value(&self.liquidation_price),
            value: notional,
            timestamp_ms: value(&self.timestamp)
                .and_then(|t| parse_timestamp_ms(&t))
                .unwrap_or_default(),
        }
    }
}

/// A row of the `margin` table. Treated as a single account-wide record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarginRow {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub currency: Option<Option<String>>,
    #[serde(rename = "marginBalance", default, deserialize_with = "deserialize_some")]
    pub margin_balance: Option<Option<Decimal>>,
    #[serde(rename = "walletBalance", default, deserialize_with = "deserialize_some")]
    pub wallet_balance: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub timestamp: Option<Option<String>>,
}

impl MarginRow {
    pub fn merge(&mut self, delta: MarginRow) {
        merge_present!(self, delta, currency, margin_balance, wallet_balance, timestamp);
    }

    /// Margin balance in whole units. `None` until the balance is known.
    pub fn to_snapshot(&self) -> Option<BalanceSnapshot> {
        let raw_currency = value(&self.currency).unwrap_or_else(|| "XBt".to_string());
        let balance = value(&self.margin_balance)?;

        Some(BalanceSnapshot {
            currency: unit_currency(&raw_currency),
            amount: balance * currency_scale(&raw_currency),
            timestamp_ms: value(&self.timestamp)
                .and_then(|t| parse_timestamp_ms(&t))
                .unwrap_or_default(),
        })
    }
}

/// A row of `GET /execution/tradeHistory`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionRow {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
    #[serde(rename = "execComm", default)]
    pub exec_comm: Option<Decimal>,
    #[serde(rename = "settlCurrency", default)]
    pub settl_currency: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Fee paid over `executions`, scaled to whole units of the settlement currency.
pub fn total_fee(executions: &[ExecutionRow]) -> (Decimal, Option<String>) {
    let raw_currency = executions
        .iter()
        .find_map(|e| e.settl_currency.clone().or_else(|| e.currency.clone()));

    let scale = raw_currency
        .as_deref()
        .map(currency_scale)
        .unwrap_or(Decimal::ONE);

    let fee: Decimal = executions
        .iter()
        .filter_map(|e| e.exec_comm)
        .map(|comm| comm * scale)
        .sum();

    (fee, raw_currency.as_deref().map(unit_currency))
}

/// A row of `GET /trade/bucketed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BucketRow {
    pub timestamp: String,
    #[serde(default)]
    pub symbol: String,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    #[serde(default)]
    pub volume: Decimal,
}

impl BucketRow {
    /// Convert to a candle. Buckets without trades (null prices) are skipped.
    pub fn to_candle(&self, symbol: &str, interval: CandleInterval) -> Option<Candle> {
        Some(Candle {
            symbol: if self.symbol.is_empty() {
                symbol.to_string()
            } else {
                self.symbol.clone()
            },
            interval,
            timestamp_ms: parse_timestamp_ms(&self.timestamp)?,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_absent_null_and_value_are_distinct() {
        let absent: OrderRow = serde_json::from_str(r#"{"orderID":"a"}"#).unwrap();
        let null: OrderRow = serde_json::from_str(r#"{"orderID":"a","avgPx":null}"#).unwrap();
        let set: OrderRow = serde_json::from_str(r#"{"orderID":"a","avgPx":10000.5}"#).unwrap();

        assert_eq!(absent.avg_px, None);
        assert_eq!(null.avg_px, Some(None));
        assert_eq!(set.avg_px, Some(Some(dec!(10000.5))));
    }

    #[test]
    fn test_merge_copies_only_present_fields() {
        let mut row: OrderRow = serde_json::from_str(
            r#"{"orderID":"a","clOrdID":"mm_1","side":"Buy","ordStatus":"New","orderQty":10,"price":9999}"#,
        )
        .unwrap();
        let delta: OrderRow =
            serde_json::from_str(r#"{"orderID":"a","cumQty":4,"avgPx":9999}"#).unwrap();

        row.merge(delta);

        assert_eq!(row.status(), Some(OrderStatus::New));
        assert_eq!(row.cum_qty, Some(Some(dec!(4))));
        assert_eq!(row.price, Some(Some(dec!(9999))));
    }

    #[test]
    fn test_to_order_signs_sell_volumes() {
        let row: OrderRow = serde_json::from_str(
            r#"{"orderID":"a","clOrdID":"mm_1","symbol":"XBTUSD","side":"Sell","ordStatus":"PartiallyFilled",
                "orderQty":15,"cumQty":5,"price":10002,"avgPx":10002,"timestamp":"2024-01-02T03:04:05.678Z"}"#,
        )
        .unwrap();

        let order = row.to_order(dec!(0), None).unwrap();
        assert_eq!(order.volume, dec!(-15));
        assert_eq!(order.filled_volume, dec!(-5));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.client_order_id, "mm_1");
        assert_eq!(order.updated_at_ms, 1_704_164_645_678);
    }

    #[test]
    fn test_to_order_needs_side_and_status() {
        let row: OrderRow = serde_json::from_str(r#"{"orderID":"a","ordStatus":"New"}"#).unwrap();
        assert!(row.to_order(dec!(0), None).is_none());
    }

    #[test]
    fn test_null_client_id_is_manual() {
        let row: OrderRow = serde_json::from_str(
            r#"{"orderID":"a","clOrdID":null,"side":"Buy","ordStatus":"New","orderQty":1}"#,
        )
        .unwrap();
        assert!(row.to_order(dec!(0), None).unwrap().is_manual());
    }

    #[test]
    fn test_position_snapshot_value() {
        let row: PositionRow = serde_json::from_str(
            r#"{"symbol":"XBTUSD","currentQty":300,"avgCostPrice":9000,"liquidationPrice":null}"#,
        )
        .unwrap();

        let snapshot = row.to_snapshot();
        assert_eq!(snapshot.volume, dec!(300));
        assert_eq!(snapshot.value, Some(dec!(0.03333333)));
        assert!(snapshot.liquidation_price.is_none());
    }

    #[test]
    fn test_flat_position_has_no_value() {
        let row: PositionRow =
            serde_json::from_str(r#"{"symbol":"XBTUSD","currentQty":0,"avgCostPrice":null}"#).unwrap();
        let snapshot = row.to_snapshot();
        assert!(snapshot.avg_price.is_none());
        assert!(snapshot.value.is_none());
    }

    #[test]
    fn test_margin_balance_scaled() {
        let mut row: MarginRow =
            serde_json::from_str(r#"{"currency":"XBt","walletBalance":100000000}"#).unwrap();
        assert!(row.to_snapshot().is_none());

        row.merge(serde_json::from_str(r#"{"marginBalance":123456789}"#).unwrap());
        let snapshot = row.to_snapshot().unwrap();
        assert_eq!(snapshot.amount, dec!(1.23456789));
        assert_eq!(snapshot.currency, "XBT");
    }

    #[test]
    fn test_total_fee_scales_satoshis() {
        let rows: Vec<ExecutionRow> = serde_json::from_str(
            r#"[{"orderID":"a","execComm":-2500,"settlCurrency":"XBt"},
                {"orderID":"a","execComm":1000,"settlCurrency":"XBt"}]"#,
        )
        .unwrap();

        let (fee, asset) = total_fee(&rows);
        assert_eq!(fee, dec!(-0.000015));
        assert_eq!(asset.as_deref(), Some("XBT"));
    }

    #[test]
    fn test_total_fee_empty() {
        let (fee, asset) = total_fee(&[]);
        assert_eq!(fee, dec!(0));
        assert!(asset.is_none());
    }

    #[test]
    fn test_currency_scale() {
        assert_eq!(currency_scale("XBt"), dec!(0.00000001));
        assert_eq!(currency_scale("USDt"), dec!(0.000001));
        assert_eq!(currency_scale("XBT"), dec!(1));
    }

    #[test]
    fn test_bucket_to_candle() {
        let row: BucketRow = serde_json::from_str(
            r#"{"timestamp":"2024-01-01T00:01:00.000Z","symbol":"XBTUSD","open":42000,"high":42010.5,
                "low":41990,"close":42005,"volume":12345}"#,
        )
        .unwrap();

        let candle = row.to_candle("XBTUSD", CandleInterval::OneMinute).unwrap();
        assert_eq!(candle.timestamp_ms, 1_704_067_260_000);
        assert_eq!(candle.high, dec!(42010.5));
        assert_eq!(candle.volume, dec!(12345));
    }

    #[test]
    fn test_empty_bucket_skipped() {
        let row: BucketRow = serde_json::from_str(
            r#"{"timestamp":"2024-01-01T00:01:00.000Z","open":null,"high":null,"low":null,"close":null,"volume":0}"#,
        )
        .unwrap();
        assert!(row.to_candle("XBTUSD", CandleInterval::OneMinute).is_none());
    }
}
