//! Request bodies for the order endpoints.
//!
//! Bodies are serialized once to compact JSON; that exact string is both
//! signed and sent.

use crate::error::BitmexRestError;
use execution_core::{CancelTarget, OrderRequest};
use rust_decimal::Decimal;
use serde::Serialize;

/// Post-only instruction for resting grid orders.
pub const POST_ONLY: &str = "ParticipateDoNotInitiate";

#[derive(Debug, Clone, Serialize)]
pub struct NewOrderBody<'a> {
    pub symbol: &'a str,
    pub side: &'static str,
    #[serde(rename = "orderQty", with = "rust_decimal::serde::float")]
    pub order_qty: Decimal,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Decimal>,
    #[serde(rename = "clOrdID", skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<&'a str>,
    #[serde(rename = "ordType")]
    pub ord_type: &'static str,
    #[serde(rename = "execInst", skip_serializing_if = "Option::is_none")]
    pub exec_inst: Option<&'static str>,
}

impl<'a> NewOrderBody<'a> {
    /// Build the body for one order.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for a zero volume or a non-positive price.
    pub fn from_request(symbol: &'a str, request: &'a OrderRequest) -> Result<Self, BitmexRestError> {
        let side = request
            .side()
            .ok_or_else(|| BitmexRestError::InvalidRequest("order volume is zero".into()))?;

        if let Some(price) = request.price {
            if price <= Decimal::ZERO {
                return Err(BitmexRestError::InvalidRequest(format!(
                    "limit price must be positive, got {}",
                    price
                )));
            }
        }

        let (ord_type, exec_inst) = if request.is_market() {
            ("Market", None)
        } else {
            ("Limit", Some(POST_ONLY))
        };

        Ok(Self {
            symbol,
            side: side.as_exchange_str(),
            order_qty: request.quantity(),
            price: request.price,
            cl_ord_id: Some(request.client_order_id.as_str()).filter(|id| !id.is_empty()),
            ord_type,
            exec_inst,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BulkOrderBody<'a> {
    pub orders: Vec<NewOrderBody<'a>>,
}

/// Body for `DELETE /order` addressing one order.
#[derive(Debug, Serialize)]
pub enum CancelBody<'a> {
    #[serde(rename = "orderID")]
    ById(&'a str),
    #[serde(rename = "clOrdID")]
    ByClientId(&'a str),
}

impl<'a> CancelBody<'a> {
    /// # Errors
    /// Returns `InvalidRequest` if the identifier is empty.
    pub fn from_target(target: &'a CancelTarget) -> Result<Self, BitmexRestError> {
        let body = match target {
            CancelTarget::ById(id) => Self::ById(id),
            CancelTarget::ByClientId(id) => Self::ByClientId(id),
        };
        match body {
            Self::ById(id) | Self::ByClientId(id) if id.is_empty() => Err(
                BitmexRestError::InvalidRequest("either orderID or clOrdID is required".into()),
            ),
            body => Ok(body),
        }
    }
}

/// Body for `DELETE /order` addressing many orders by client id.
#[derive(Debug, Serialize)]
pub struct BulkCancelBody<'a> {
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: &'a [String],
}

/// Serialize a body to compact JSON.
pub fn to_compact_json<T: Serialize>(body: &T) -> Result<String, BitmexRestError> {
    serde_json::to_string(body).map_err(|e| BitmexRestError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_body_is_post_only() {
        let request = OrderRequest::limit("mm_1".into(), dec!(-10), dec!(10001));
        let body = NewOrderBody::from_request("XBTUSD", &request).unwrap();

        assert_eq!(
            to_compact_json(&body).unwrap(),
            r#"{"symbol":"XBTUSD","side":"Sell","orderQty":10.0,"price":10001.0,"clOrdID":"mm_1","ordType":"Limit","execInst":"ParticipateDoNotInitiate"}"#
        );
    }

    #[test]
    fn test_market_body_omits_price_and_exec_inst() {
        let request = OrderRequest::market("mm_2".into(), dec!(50));
        let body = NewOrderBody::from_request("XBTUSD", &request).unwrap();

        assert_eq!(
            to_compact_json(&body).unwrap(),
            r#"{"symbol":"XBTUSD","side":"Buy","orderQty":50.0,"clOrdID":"mm_2","ordType":"Market"}"#
        );
    }

    #[test]
    fn test_half_tick_price_kept() {
        let request = OrderRequest::limit("mm_3".into(), dec!(5), dec!(9998.5));
        let body = NewOrderBody::from_request("XBTUSD", &request).unwrap();
        assert!(to_compact_json(&body).unwrap().contains(r#""price":9998.5"#));
    }

    #[test]
    fn test_zero_volume_rejected() {
        let request = OrderRequest::limit("mm_4".into(), dec!(0), dec!(1));
        assert!(matches!(
            NewOrderBody::from_request("XBTUSD", &request),
            Err(BitmexRestError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_cancel_bodies() {
        let by_id = CancelTarget::ById("abc".into());
        let by_client = CancelTarget::ByClientId("mm_1".into());

        assert_eq!(
            to_compact_json(&CancelBody::from_target(&by_id).unwrap()).unwrap(),
            r#"{"orderID":"abc"}"#
        );
        assert_eq!(
            to_compact_json(&CancelBody::from_target(&by_client).unwrap()).unwrap(),
            r#"{"clOrdID":"mm_1"}"#
        );

        let ids = vec!["mm_1".to_string(), "mm_2".to_string()];
        assert_eq!(
            to_compact_json(&BulkCancelBody { cl_ord_id: &ids }).unwrap(),
            r#"{"clOrdID":["mm_1","mm_2"]}"#
        );
    }

    #[test]
    fn test_cancel_without_identifier_rejected() {
        let empty = CancelTarget::ByClientId(String::new());
        assert!(matches!(
            CancelBody::from_target(&empty),
            Err(BitmexRestError::InvalidRequest(_))
        ));
    }
}
