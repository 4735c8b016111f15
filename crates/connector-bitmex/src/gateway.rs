//! `ExchangeGateway` over the BitMEX REST client and realtime streams.

use crate::public::{PublicFeed, PublicSession};
use crate::user_stream::{UserEventProcessor, UserSession};
use async_trait::async_trait;
use auth::ExpiryClock;
use bitmex_rest::{BitmexRestClient, BitmexRestError};
use common::ExponentialBackoff;
use connector_core::{
    run_with_reconnect, CandleSender, ConnectorConfig, ExchangeGateway, GatewayError, Keepalive,
    StreamSession, TickSender, UserEventSender,
};
use execution_core::{CancelTarget, OrderAck, OrderRequest};
use metrics::SharedMetrics;
use model::{Candle, CandleInterval};
use rest_client::RestError;
use std::sync::Arc;
use tokio::sync::watch;

pub struct BitmexGateway {
    rest: Arc<BitmexRestClient>,
    config: ConnectorConfig,
    metrics: SharedMetrics,
    /// Expiries for the user stream handshake, kept apart from REST signing.
    handshake_expiry: Arc<ExpiryClock>,
}

impl BitmexGateway {
    pub fn new(rest: Arc<BitmexRestClient>, config: ConnectorConfig, metrics: SharedMetrics) -> Self {
        Self {
            rest,
            config,
            metrics,
            handshake_expiry: Arc::new(ExpiryClock::new()),
        }
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    async fn run_stream<S: StreamSession>(
        &self,
        mut session: S,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        run_with_reconnect(
            &mut session,
            ExponentialBackoff::default(),
            shutdown_rx,
            &self.metrics,
        )
        .await?;
        Ok(())
    }
}

/// Map a REST failure onto the gateway's error kinds.
fn gateway_error(err: BitmexRestError) -> GatewayError {
    match err {
        BitmexRestError::Rest(RestError::Timeout) => GatewayError::Timeout,
        BitmexRestError::Rest(RestError::RateLimited { .. }) => GatewayError::RateLimited,
        BitmexRestError::Rest(RestError::Connection(msg)) => GatewayError::Transport(msg),
        BitmexRestError::Rest(other) => GatewayError::Transport(other.to_string()),
        BitmexRestError::Overloaded => GatewayError::Rejected("system overloaded".into()),
        BitmexRestError::ApiError { status: 401 | 403, message, .. } => GatewayError::Auth(message),
        BitmexRestError::ApiError { message, .. } => GatewayError::Rejected(message),
        BitmexRestError::Auth(e) => GatewayError::Auth(e.to_string()),
        BitmexRestError::InvalidRequest(msg) => GatewayError::InvalidRequest(msg),
        BitmexRestError::Parse(msg) => GatewayError::Transport(msg),
    }
}

#[async_trait]
impl ExchangeGateway for BitmexGateway {
    async fn stream_price(
        &self,
        symbol: &str,
        sink: TickSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        let session = PublicSession::new(
            self.config.environment.ws_url(),
            symbol,
            PublicFeed::Price(sink),
            self.metrics.clone(),
        );
        self.run_stream(session, shutdown_rx).await
    }

    async fn stream_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        sink: CandleSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        let session = PublicSession::new(
            self.config.environment.ws_url(),
            symbol,
            PublicFeed::Candles { interval, sink },
            self.metrics.clone(),
        );
        self.run_stream(session, shutdown_rx).await
    }

    async fn stream_user_events(
        &self,
        sink: UserEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GatewayError> {
        let processor = UserEventProcessor::new(self.rest.clone(), self.metrics.clone());
        let session = UserSession::new(
            self.config.environment.ws_url(),
            self.rest.credentials().clone(),
            self.handshake_expiry.clone(),
            processor,
            sink,
            Keepalive::default(),
            self.metrics.clone(),
        );
        self.run_stream(session, shutdown_rx).await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        request: &OrderRequest,
    ) -> Result<OrderAck, GatewayError> {
        let row = self
            .rest
            .place_order(symbol, request)
            .await
            .map_err(gateway_error)?;
        Ok(row.to_ack())
    }

    async fn submit_orders(
        &self,
        symbol: &str,
        requests: &[OrderRequest],
    ) -> Result<Vec<OrderAck>, GatewayError> {
        let rows = self
            .rest
            .place_orders(symbol, requests)
            .await
            .map_err(gateway_error)?;
        Ok(rows.iter().map(|r| r.to_ack()).collect())
    }

    async fn cancel_order(&self, target: &CancelTarget) -> Result<OrderAck, GatewayError> {
        let rows = self.rest.cancel(target).await.map_err(gateway_error)?;
        rows.first()
            .map(|r| r.to_ack())
            .ok_or_else(|| GatewayError::Rejected(format!("no order matched {:?}", target)))
    }

    async fn cancel_orders(
        &self,
        client_order_ids: &[String],
    ) -> Result<Vec<OrderAck>, GatewayError> {
        let rows = self
            .rest
            .cancel_by_client_ids(client_order_ids)
            .await
            .map_err(gateway_error)?;
        Ok(rows.iter().map(|r| r.to_ack()).collect())
    }

    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        count: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.rest
            .historical_candles(symbol, interval, count)
            .await
            .map_err(gateway_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_stream::AUTH_LIFETIME;
    use auth::ApiCredentials;
    use common::BitmexEnvironment;
    use metrics::create_metrics;

    #[test]
    fn test_handshake_does_not_stretch_request_expiry() {
        let rest = Arc::new(
            BitmexRestClient::new(
                ApiCredentials::new("key".into(), "secret".into()),
                BitmexEnvironment::Testnet,
            )
            .unwrap(),
        );
        let gateway = BitmexGateway::new(
            rest.clone(),
            ConnectorConfig {
                environment: BitmexEnvironment::Testnet,
                channel_capacity: 16,
            },
            create_metrics(),
        );

        let before = common::now_ms() / 1000;
        let handshake = gateway.handshake_expiry.next(AUTH_LIFETIME);
        let request = rest.request_expiry();
        let after = common::now_ms() / 1000;

        assert!(handshake >= before + 3600);
        assert!(request >= before + 60);
        assert!(request <= after + 60, "request expiry {} stretched past {}", request, after + 60);
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            gateway_error(BitmexRestError::Rest(RestError::Timeout)),
            GatewayError::Timeout
        ));
        assert!(gateway_error(BitmexRestError::Rest(RestError::Connection("reset".into())))
            .is_ambiguous());
        assert!(matches!(
            gateway_error(BitmexRestError::from_api_response(
                400,
                r#"{"error":{"message":"Invalid price","name":"HTTPError"}}"#
            )),
            GatewayError::Rejected(m) if m == "Invalid price"
        ));
        assert!(matches!(
            gateway_error(BitmexRestError::ApiError {
                status: 401,
                name: "HTTPError".into(),
                message: "Signature not valid.".into()
            }),
            GatewayError::Auth(_)
        ));
        assert!(matches!(
            gateway_error(BitmexRestError::InvalidRequest("no id".into())),
            GatewayError::InvalidRequest(_)
        ));
    }
}
