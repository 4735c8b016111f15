//! Exchange capability interface consumed by the market-making engine.

use crate::error::GatewayError;
use crate::{CandleSender, TickSender, UserEventSender};
use async_trait::async_trait;
use execution_core::{CancelTarget, OrderAck, OrderRequest};
use model::{Candle, CandleInterval};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the engine needs from an exchange.
///
/// The `stream_*` methods run until shutdown is signalled or the sink is
/// dropped. Transport failures are recovered internally, so callers may see
/// gaps but never an early return.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Stream last-price ticks for `symbol`.
    async fn stream_price(
        &self,
        symbol: &str,
        sink: TickSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError>;

    /// Stream closed candles for `symbol`.
    async fn stream_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        sink: CandleSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError>;

    /// Stream merged order, position and balance updates for the account.
    async fn stream_user_events(
        &self,
        sink: UserEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError>;

    async fn submit_order(
        &self,
        symbol: &str,
        request: &OrderRequest,
    ) -> Result<OrderAck, GatewayError>;

    /// Submit several orders in one request.
    async fn submit_orders(
        &self,
        symbol: &str,
        requests: &[OrderRequest],
    ) -> Result<Vec<OrderAck>, GatewayError>;

    async fn cancel_order(&self, target: &CancelTarget) -> Result<OrderAck, GatewayError>;

    /// Cancel several orders by client order id in one request.
    async fn cancel_orders(
        &self,
        client_order_ids: &[String],
    ) -> Result<Vec<OrderAck>, GatewayError>;

    /// Fetch the most recent `count` candles, oldest first.
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        count: usize,
    ) -> Result<Vec<Candle>, GatewayError>;
}

/// Shared handle to a gateway implementation.
pub type SharedGateway = Arc<dyn ExchangeGateway>;
