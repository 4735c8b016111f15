//! Authenticated account stream.
//!
//! Sequence per connection: welcome, `authKeyExpires`, subscribe to
//! `order`/`position`/`margin`, then a text `ping` every keepalive period.
//! Table deltas are merged in [`UserTables`] and emitted as normalized
//! [`UserEvent`]s, order updates only after any fee lookup has finished.
//! Fee lookups run on a forwarder task so a slow lookup never holds up
//! frame reads or keepalive pings; events still leave in arrival order.

use crate::parser::{auth_request, parse_message, subscribe_request, ParsedMessage, TableMessage};
use crate::tables::{MergedOrder, UserTables};
use crate::ws::{connect_with_timeout, ConnectResult};
use async_trait::async_trait;
use auth::{ApiCredentials, ExpiryClock, RequestSigner};
use bitmex_rest::{BitmexRestClient, BitmexRestError, OrderRow};
use connector_core::{
    ConnectorError, Keepalive, SessionOutcome, StreamSession, UserEventSender, CONNECTION_TIMEOUT,
};
use execution_core::UserEvent;
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Tables subscribed on the authenticated stream.
pub const USER_TOPICS: [&str; 3] = ["order", "position", "margin"];

/// Merged events waiting for the forwarder.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Lifetime of the handshake signature.
pub(crate) const AUTH_LIFETIME: Duration = Duration::from_secs(3600);

/// Source of per-order fees.
#[async_trait]
pub trait FeeLookup: Send + Sync {
    /// Fee paid for `order_id` in whole settlement units, with its asset.
    async fn order_fee(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<(Decimal, Option<String>), BitmexRestError>;
}

#[async_trait]
impl FeeLookup for BitmexRestClient {
    async fn order_fee(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<(Decimal, Option<String>), BitmexRestError> {
        BitmexRestClient::order_fee(self, symbol, order_id).await
    }
}

/// A merged user event, possibly still waiting for its fee.
#[derive(Debug)]
pub enum PendingEvent {
    Ready(UserEvent),
    AwaitingFee(MergedOrder),
}

/// Completes pending events: looks up fees for fills and builds the
/// normalized order update.
#[derive(Clone)]
pub struct FeeResolver {
    fees: Arc<dyn FeeLookup>,
    metrics: SharedMetrics,
}

impl FeeResolver {
    pub fn new(fees: Arc<dyn FeeLookup>, metrics: SharedMetrics) -> Self {
        Self { fees, metrics }
    }

    pub async fn resolve(&self, pending: PendingEvent) -> Option<UserEvent> {
        match pending {
            PendingEvent::Ready(event) => Some(event),
            PendingEvent::AwaitingFee(merged) => {
                let (fee, fee_asset) = self.lookup_fee(&merged.row).await;
                order_event(merged, fee, fee_asset)
            }
        }
    }

    async fn lookup_fee(&self, row: &OrderRow) -> (Decimal, Option<String>) {
        let symbol = row.symbol.clone().flatten().unwrap_or_default();

        match self.fees.order_fee(&symbol, &row.order_id).await {
            Ok((fee, asset)) => (fee, asset.or_else(|| row.settlement_currency())),
            Err(e) => {
                self.metrics.inc_fee_lookup_failures();
                warn!(
                    order_id = %row.order_id,
                    error = %e,
                    "Fee lookup failed, reporting fill with zero fee"
                );
                (Decimal::ZERO, None)
            }
        }
    }
}

fn order_event(merged: MergedOrder, fee: Decimal, fee_asset: Option<String>) -> Option<UserEvent> {
    match merged.row.to_order(fee, fee_asset) {
        Some(mut order) => {
            order.raw = Some(merged.raw);
            Some(UserEvent::OrderUpdate(order))
        }
        None => {
            debug!(order_id = %merged.row.order_id, "Order row incomplete, not emitting");
            None
        }
    }
}

/// Turns table messages into user events. Owns the merge state, so it
/// survives reconnects.
pub struct UserEventProcessor {
    tables: UserTables,
    resolver: FeeResolver,
}

impl UserEventProcessor {
    pub fn new(fees: Arc<dyn FeeLookup>, metrics: SharedMetrics) -> Self {
        Self {
            tables: UserTables::new(),
            resolver: FeeResolver::new(fees, metrics),
        }
    }

    pub fn tables(&self) -> &UserTables {
        &self.tables
    }

    pub fn resolver(&self) -> FeeResolver {
        self.resolver.clone()
    }

    /// Merge one message. Fills come back as `AwaitingFee`; nothing here
    /// waits on the network.
    pub fn merge(&mut self, message: TableMessage) -> Vec<PendingEvent> {
        match message {
            TableMessage::Order(table) => self
                .tables
                .apply_orders(table)
                .into_iter()
                .filter_map(|merged| {
                    if merged.filled_now {
                        Some(PendingEvent::AwaitingFee(merged))
                    } else {
                        order_event(merged, Decimal::ZERO, None).map(PendingEvent::Ready)
                    }
                })
                .collect(),
            TableMessage::Position(table) => self
                .tables
                .apply_positions(table)
                .into_iter()
                .map(|p| PendingEvent::Ready(UserEvent::PositionUpdate(p)))
                .collect(),
            TableMessage::Margin(table) => self
                .tables
                .apply_margin(table)
                .into_iter()
                .map(|b| PendingEvent::Ready(UserEvent::BalanceUpdate(b)))
                .collect(),
            TableMessage::Instrument(_) | TableMessage::TradeBin(..) => Vec::new(),
        }
    }

    /// Merge and resolve in one go.
    pub async fn process(&mut self, message: TableMessage) -> Vec<UserEvent> {
        let mut events = Vec::new();
        for pending in self.merge(message) {
            events.extend(self.resolver.resolve(pending).await);
        }
        events
    }
}

/// Drain `queue` in order, resolving fees, into `sink`. Ends when the queue
/// closes or the sink's receiver is dropped.
pub async fn forward_events(
    resolver: FeeResolver,
    mut queue: mpsc::Receiver<PendingEvent>,
    sink: UserEventSender,
    metrics: SharedMetrics,
) {
    while let Some(pending) = queue.recv().await {
        let Some(event) = resolver.resolve(pending).await else {
            continue;
        };
        metrics.inc_user_events_received();
        if sink.send(event).await.is_err() {
            info!("Receiver dropped, stopping user event forwarder");
            break;
        }
    }
}

/// Authenticated stream session. Merge tables and the keepalive slot live
/// across reconnects.
pub struct UserSession {
    url: String,
    credentials: ApiCredentials,
    expiry: Arc<ExpiryClock>,
    processor: UserEventProcessor,
    sink: UserEventSender,
    queue: Option<mpsc::Sender<PendingEvent>>,
    keepalive: Keepalive,
    metrics: SharedMetrics,
}

impl UserSession {
    pub fn new(
        ws_url: &str,
        credentials: ApiCredentials,
        expiry: Arc<ExpiryClock>,
        processor: UserEventProcessor,
        sink: UserEventSender,
        keepalive: Keepalive,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            url: ws_url.to_string(),
            credentials,
            expiry,
            processor,
            sink,
            queue: None,
            keepalive,
            metrics,
        }
    }

    pub fn keepalive(&self) -> &Keepalive {
        &self.keepalive
    }

    /// Queue feeding the forwarder task, spawned on first use. The task
    /// outlives reconnects and ends when the session is dropped.
    fn event_queue(&mut self) -> mpsc::Sender<PendingEvent> {
        self.queue
            .get_or_insert_with(|| {
                let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
                tokio::spawn(forward_events(
                    self.processor.resolver(),
                    rx,
                    self.sink.clone(),
                    self.metrics.clone(),
                ));
                tx
            })
            .clone()
    }

    async fn stream(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionOutcome {
        info!(url = %self.url, "Connecting to BitMEX user stream");

        let ws_stream = match connect_with_timeout(&self.url, shutdown_rx).await {
            ConnectResult::Connected(stream) => stream,
            ConnectResult::Shutdown => return SessionOutcome::Shutdown,
            ConnectResult::Error(e) => return SessionOutcome::ConnectFailed(e),
        };
        let (mut write, mut read) = ws_stream.split();

        // Welcome
        match tokio::time::timeout(CONNECTION_TIMEOUT, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match parse_message(&text) {
                Ok(ParsedMessage::Welcome(info)) => info!(info = %info, "BitMEX welcome received"),
                _ => warn!(message = %text, "Unexpected first message on user stream"),
            },
            Ok(Some(Ok(_))) => warn!("Unexpected first frame on user stream"),
            Ok(Some(Err(e))) => {
                return SessionOutcome::ConnectFailed(ConnectorError::WebSocket(e.to_string()))
            }
            Ok(None) => return SessionOutcome::ConnectFailed(ConnectorError::ConnectionClosed),
            Err(_) => {
                return SessionOutcome::ConnectFailed(ConnectorError::WebSocket(
                    "no welcome message".to_string(),
                ))
            }
        }

        let expires = self.expiry.next(AUTH_LIFETIME);
        let (api_key, expires, signature) =
            RequestSigner::new(&self.credentials).websocket_auth(expires);

        for request in [auth_request(&api_key, expires, &signature), subscribe_request(&USER_TOPICS)] {
            if let Err(e) = write.send(Message::Text(request)).await {
                return SessionOutcome::ConnectFailed(ConnectorError::WebSocket(e.to_string()));
            }
        }

        info!("Connected to BitMEX user stream, authenticating");
        let connected_at = Instant::now();
        let ended = |error| SessionOutcome::Ended {
            uptime: connected_at.elapsed(),
            error,
        };

        let queue = self.event_queue();
        let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);
        self.keepalive.restart(ping_tx).await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, closing user stream");
                        let _ = write.close().await;
                        return SessionOutcome::Shutdown;
                    }
                }

                Some(()) = ping_rx.recv() => {
                    if let Err(e) = write.send(Message::Text("ping".to_string())).await {
                        warn!(error = %e, "Failed to send keepalive ping");
                        self.metrics.inc_websocket_errors();
                        return ended(ConnectorError::WebSocket(e.to_string()));
                    }
                    self.metrics.inc_keepalive_pings();
                }

                msg_opt = read.next() => {
                    let msg = match msg_opt {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            error!(error = %e, "User stream WebSocket error");
                            self.metrics.inc_websocket_errors();
                            return ended(ConnectorError::WebSocket(e.to_string()));
                        }
                        None => {
                            info!("User stream ended");
                            return ended(ConnectorError::ConnectionClosed);
                        }
                    };

                    match msg {
                        Message::Text(text) if text == "pong" => {}
                        Message::Text(text) => {
                            self.metrics.inc_messages_received();
                            match parse_message(&text) {
                                Ok(ParsedMessage::Table(table)) => {
                                    for pending in self.processor.merge(table) {
                                        if queue.send(pending).await.is_err() {
                                            info!("Receiver dropped, stopping user stream");
                                            return ended(ConnectorError::ChannelClosed);
                                        }
                                    }
                                }
                                Ok(ParsedMessage::Authenticated) => info!("User stream authenticated"),
                                Ok(ParsedMessage::Subscribed(topic)) => info!(topic = %topic, "Subscribed"),
                                Ok(ParsedMessage::Error { status, message }) => {
                                    if matches!(status, Some(401) | Some(403)) {
                                        error!(status = ?status, message = %message, "User stream authentication rejected");
                                        return ended(ConnectorError::Auth(message));
                                    }
                                    warn!(status = ?status, message = %message, "User stream error message");
                                }
                                Ok(ParsedMessage::Welcome(_)) | Ok(ParsedMessage::Unknown) => {}
                                Err(e) => {
                                    self.metrics.inc_parse_errors();
                                    debug!(error = %e, "Dropping malformed message");
                                }
                            }
                        }
                        Message::Ping(data) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!(error = %e, "Failed to send Pong");
                                self.metrics.inc_websocket_errors();
                                return ended(ConnectorError::WebSocket(e.to_string()));
                            }
                        }
                        Message::Close(_) => {
                            info!("User stream closed by server");
                            return ended(ConnectorError::ConnectionClosed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StreamSession for UserSession {
    fn name(&self) -> &str {
        "user"
    }

    async fn run(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionOutcome {
        let outcome = self.stream(shutdown_rx).await;
        self.keepalive.stop().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_message, ParsedMessage};
    use connector_core::create_user_event_channel;
    use execution_core::OrderStatus;
    use metrics::create_metrics;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    struct FixedFees {
        result: Option<(Decimal, Option<String>)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FeeLookup for FixedFees {
        async fn order_fee(
            &self,
            _symbol: &str,
            order_id: &str,
        ) -> Result<(Decimal, Option<String>), BitmexRestError> {
            self.calls.lock().push(order_id.to_string());
            self.result
                .clone()
                .ok_or_else(|| BitmexRestError::Parse("unavailable".into()))
        }
    }

    fn table(text: &str) -> TableMessage {
        match parse_message(text).unwrap() {
            ParsedMessage::Table(t) => t,
            other => panic!("not a table: {:?}", other),
        }
    }

    fn processor(result: Option<(Decimal, Option<String>)>) -> (UserEventProcessor, Arc<FixedFees>, SharedMetrics) {
        let fees = Arc::new(FixedFees {
            result,
            calls: Mutex::new(Vec::new()),
        });
        let metrics = create_metrics();
        (
            UserEventProcessor::new(fees.clone(), metrics.clone()),
            fees,
            metrics,
        )
    }

    const INSERT: &str = r#"{"table":"order","action":"insert","data":[{"orderID":"o1","clOrdID":"mm_1","symbol":"XBTUSD","side":"Buy","orderQty":10,"price":9999,"ordStatus":"New"}]}"#;
    const FILL: &str = r#"{"table":"order","action":"update","data":[{"orderID":"o1","ordStatus":"Filled","cumQty":10,"avgPx":9999}]}"#;

    #[tokio::test]
    async fn test_fill_carries_looked_up_fee() {
        let (mut processor, fees, _) = processor(Some((dec!(0.0000025), Some("XBT".into()))));

        let events = processor.process(table(INSERT)).await;
        assert!(fees.calls.lock().is_empty());
        assert!(matches!(&events[0], UserEvent::OrderUpdate(o) if o.status == OrderStatus::New));

        let events = processor.process(table(FILL)).await;
        match &events[0] {
            UserEvent::OrderUpdate(order) => {
                assert_eq!(order.status, OrderStatus::Filled);
                assert_eq!(order.fee, dec!(0.0000025));
                assert_eq!(order.fee_asset.as_deref(), Some("XBT"));
                assert_eq!(order.filled_volume, dec!(10));
                assert_eq!(order.raw.as_ref().unwrap()["ordStatus"], "Filled");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*fees.calls.lock(), vec!["o1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_fee_lookup_still_emits() {
        let (mut processor, _, metrics) = processor(None);

        processor.process(table(INSERT)).await;
        let events = processor.process(table(FILL)).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], UserEvent::OrderUpdate(o) if o.fee.is_zero()));
        assert_eq!(metrics.fee_lookup_failures(), 1);
    }

    #[tokio::test]
    async fn test_no_lookup_without_filled_in_delta() {
        let (mut processor, fees, _) = processor(Some((dec!(1), None)));

        processor.process(table(INSERT)).await;
        processor
            .process(table(
                r#"{"table":"order","action":"update","data":[{"orderID":"o1","cumQty":3,"ordStatus":"PartiallyFilled"}]}"#,
            ))
            .await;
        assert!(fees.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_position_and_margin_events() {
        let (mut processor, _, _) = processor(None);

        let positions = processor
            .process(table(
                r#"{"table":"position","action":"partial","data":[{"symbol":"XBTUSD","currentQty":-20,"avgCostPrice":8000}]}"#,
            ))
            .await;
        assert!(matches!(&positions[0], UserEvent::PositionUpdate(p) if p.volume == dec!(-20)));

        let balances = processor
            .process(table(
                r#"{"table":"margin","action":"partial","data":[{"currency":"XBt","marginBalance":100000000}]}"#,
            ))
            .await;
        assert!(matches!(&balances[0], UserEvent::BalanceUpdate(b) if b.amount == dec!(1)));
    }

    #[tokio::test]
    async fn test_replayed_fill_looked_up_once() {
        let (mut processor, fees, _) = processor(Some((dec!(0.0000025), Some("XBT".into()))));
        let partial = r#"{"table":"order","action":"partial","data":[{"orderID":"o1","clOrdID":"mm_1","symbol":"XBTUSD","side":"Buy","orderQty":10,"price":9999,"ordStatus":"Filled","cumQty":10,"avgPx":9999}]}"#;

        let first = processor.process(table(partial)).await;
        let second = processor.process(table(partial)).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(fees.calls.lock().len(), 1);
    }

    /// Fee lookup that blocks until released.
    #[derive(Default)]
    struct GatedFees {
        release: Notify,
    }

    #[async_trait]
    impl FeeLookup for GatedFees {
        async fn order_fee(
            &self,
            _symbol: &str,
            _order_id: &str,
        ) -> Result<(Decimal, Option<String>), BitmexRestError> {
            self.release.notified().await;
            Ok((dec!(0.00001), Some("XBT".into())))
        }
    }

    #[tokio::test]
    async fn test_slow_fee_lookup_does_not_block_merging() {
        let fees = Arc::new(GatedFees::default());
        let metrics = create_metrics();
        let mut processor = UserEventProcessor::new(fees.clone(), metrics.clone());
        let (queue_tx, queue_rx) = mpsc::channel(16);
        let (sink, mut events) = create_user_event_channel(16);
        tokio::spawn(forward_events(processor.resolver(), queue_rx, sink, metrics.clone()));

        let position = r#"{"table":"position","action":"partial","data":[{"symbol":"XBTUSD","currentQty":10,"avgCostPrice":9999}]}"#;
        for message in [INSERT, FILL, position] {
            for pending in processor.merge(table(message)) {
                // Never waits on the lookup.
                queue_tx.try_send(pending).unwrap();
            }
        }

        assert!(matches!(events.recv().await, Some(UserEvent::OrderUpdate(o)) if o.status == OrderStatus::New));
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());

        fees.release.notify_one();
        match events.recv().await {
            Some(UserEvent::OrderUpdate(order)) => {
                assert_eq!(order.status, OrderStatus::Filled);
                assert_eq!(order.fee, dec!(0.00001));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(UserEvent::PositionUpdate(p)) if p.volume == dec!(10)));
        assert_eq!(metrics.user_events_received(), 3);
    }

    #[tokio::test]
    async fn test_incomplete_row_not_emitted() {
        let (mut processor, _, _) = processor(None);
        let events = processor
            .process(table(
                r#"{"table":"order","action":"update","data":[{"orderID":"stray","cumQty":1}]}"#,
            ))
            .await;
        assert!(events.is_empty());
    }
}
