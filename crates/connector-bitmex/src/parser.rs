//! Realtime API envelope parsing.
//!
//! Every data message carries a `table` and an `action`; control messages
//! carry `info`, `success` or `error` instead. Rows are typed per table here
//! so nothing downstream compares table names.

use bitmex_rest::{BucketRow, MarginRow, OrderRow, PositionRow};
use model::CandleInterval;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// How rows of a table message are to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Initial image after subscribing. Merged like `Insert`.
    Partial,
    Insert,
    Update,
    Delete,
}

/// Rows of one table message.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    pub action: Action,
    pub rows: Vec<T>,
}

/// An order delta together with the JSON it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDelta {
    pub row: OrderRow,
    pub raw: Value,
}

/// A row of the `instrument` table. Only the fields a tick needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentRow {
    pub symbol: String,
    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableMessage {
    Order(Table<OrderDelta>),
    Position(Table<PositionRow>),
    Margin(Table<MarginRow>),
    Instrument(Table<InstrumentRow>),
    TradeBin(CandleInterval, Table<BucketRow>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    Table(TableMessage),
    /// Greeting sent right after the socket opens.
    Welcome(String),
    Subscribed(String),
    Authenticated,
    Error {
        status: Option<u16>,
        message: String,
    },
    /// Valid JSON with no recognized discriminator. Dropped by callers.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    table: Option<String>,
    action: Option<Action>,
    #[serde(default)]
    data: Vec<Value>,
    info: Option<String>,
    success: Option<bool>,
    subscribe: Option<String>,
    status: Option<u16>,
    error: Option<String>,
    request: Option<RawRequest>,
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    op: String,
}

fn rows<T: DeserializeOwned>(data: Vec<Value>) -> Result<Vec<T>, serde_json::Error> {
    data.into_iter().map(serde_json::from_value).collect()
}

fn table<T: DeserializeOwned>(action: Action, data: Vec<Value>) -> Result<Table<T>, serde_json::Error> {
    Ok(Table {
        action,
        rows: rows(data)?,
    })
}

/// Parse one text frame.
///
/// # Errors
/// Returns an error for malformed JSON or rows that do not match their table.
pub fn parse_message(text: &str) -> Result<ParsedMessage, serde_json::Error> {
    let envelope: RawEnvelope = serde_json::from_str(text)?;

    if let Some(message) = envelope.error {
        return Ok(ParsedMessage::Error {
            status: envelope.status,
            message,
        });
    }

    if let (Some(name), Some(action)) = (envelope.table.as_deref(), envelope.action) {
        let data = envelope.data;
        let message = match name {
            "order" => TableMessage::Order(Table {
                action,
                rows: data
                    .into_iter()
                    .map(|raw| {
                        Ok(OrderDelta {
                            row: serde_json::from_value(raw.clone())?,
                            raw,
                        })
                    })
                    .collect::<Result<_, serde_json::Error>>()?,
            }),
            "position" => TableMessage::Position(table(action, data)?),
            "margin" => TableMessage::Margin(table(action, data)?),
            "instrument" => TableMessage::Instrument(table(action, data)?),
            other => match other
                .strip_prefix("tradeBin")
                .and_then(|bin| bin.parse::<CandleInterval>().ok())
            {
                Some(interval) => TableMessage::TradeBin(interval, table(action, data)?),
                None => return Ok(ParsedMessage::Unknown),
            },
        };
        return Ok(ParsedMessage::Table(message));
    }

    if let Some(info) = envelope.info {
        return Ok(ParsedMessage::Welcome(info));
    }

    if envelope.success == Some(true) {
        if let Some(topic) = envelope.subscribe {
            return Ok(ParsedMessage::Subscribed(topic));
        }
        if envelope.request.is_some_and(|r| r.op == "authKeyExpires") {
            return Ok(ParsedMessage::Authenticated);
        }
    }

    Ok(ParsedMessage::Unknown)
}

/// `{"op":"authKeyExpires","args":[key, expires, signature]}`
pub fn auth_request(api_key: &str, expires: i64, signature: &str) -> String {
    serde_json::json!({
        "op": "authKeyExpires",
        "args": [api_key, expires, signature],
    })
    .to_string()
}

/// `{"op":"subscribe","args":[...]}`
pub fn subscribe_request(topics: &[&str]) -> String {
    serde_json::json!({
        "op": "subscribe",
        "args": topics,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_core::OrderStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_order_update_keeps_raw() {
        let text = r#"{"table":"order","action":"update","data":[{"orderID":"a1","ordStatus":"Filled","cumQty":10}]}"#;

        match parse_message(text).unwrap() {
            ParsedMessage::Table(TableMessage::Order(table)) => {
                assert_eq!(table.action, Action::Update);
                assert_eq!(table.rows.len(), 1);
                let delta = &table.rows[0];
                assert_eq!(delta.row.order_id, "a1");
                assert!(delta.row.has_status(OrderStatus::Filled));
                assert_eq!(delta.raw["cumQty"], 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_partial_position() {
        let text = r#"{"table":"position","action":"partial","keys":["account","symbol"],"data":[{"symbol":"XBTUSD","currentQty":100,"avgCostPrice":10000}]}"#;

        match parse_message(text).unwrap() {
            ParsedMessage::Table(TableMessage::Position(table)) => {
                assert_eq!(table.action, Action::Partial);
                assert_eq!(table.rows[0].symbol, "XBTUSD");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_instrument_tick() {
        let text = r#"{"table":"instrument","action":"update","data":[{"symbol":"XBTUSD","lastPrice":10023.5,"timestamp":"2023-11-14T22:13:20.000Z"}]}"#;

        match parse_message(text).unwrap() {
            ParsedMessage::Table(TableMessage::Instrument(table)) => {
                assert_eq!(table.rows[0].last_price, Some(dec!(10023.5)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade_bin_interval() {
        let text = r#"{"table":"tradeBin5m","action":"insert","data":[{"timestamp":"2023-11-14T22:15:00.000Z","symbol":"XBTUSD","open":1,"high":2,"low":0.5,"close":1.5,"volume":30}]}"#;

        match parse_message(text).unwrap() {
            ParsedMessage::Table(TableMessage::TradeBin(interval, table)) => {
                assert_eq!(interval, CandleInterval::FiveMinutes);
                assert_eq!(table.action, Action::Insert);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_control_messages() {
        let welcome = r#"{"info":"Welcome to the BitMEX Realtime API.","version":"2.0"}"#;
        assert!(matches!(parse_message(welcome).unwrap(), ParsedMessage::Welcome(_)));

        let subscribed = r#"{"success":true,"subscribe":"order","request":{"op":"subscribe","args":["order"]}}"#;
        assert_eq!(
            parse_message(subscribed).unwrap(),
            ParsedMessage::Subscribed("order".into())
        );

        let authed = r#"{"success":true,"request":{"op":"authKeyExpires","args":["k",1,"s"]}}"#;
        assert_eq!(parse_message(authed).unwrap(), ParsedMessage::Authenticated);

        let error = r#"{"status":401,"error":"Signature not valid.","meta":{}}"#;
        assert_eq!(
            parse_message(error).unwrap(),
            ParsedMessage::Error {
                status: Some(401),
                message: "Signature not valid.".into()
            }
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        let other_table = r#"{"table":"execution","action":"insert","data":[]}"#;
        assert_eq!(parse_message(other_table).unwrap(), ParsedMessage::Unknown);
        assert_eq!(parse_message(r#"{"foo":1}"#).unwrap(), ParsedMessage::Unknown);
        assert!(parse_message("{not json").is_err());
    }

    #[test]
    fn test_requests_are_compact() {
        assert_eq!(
            auth_request("key", 1700000000, "abc"),
            r#"{"args":["key",1700000000,"abc"],"op":"authKeyExpires"}"#
        );
        assert_eq!(
            subscribe_request(&["order", "position", "margin"]),
            r#"{"args":["order","position","margin"],"op":"subscribe"}"#
        );
    }
}
