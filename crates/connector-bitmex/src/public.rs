//! Public market data streams: last price and closed candles.

use crate::parser::{parse_message, Action, ParsedMessage, TableMessage};
use crate::ws::{connect_with_timeout, ConnectResult};
use async_trait::async_trait;
use bitmex_rest::responses::parse_timestamp_ms;
use connector_core::{CandleSender, ConnectorError, SessionOutcome, StreamSession, TickSender};
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use model::{CandleInterval, Exchange, PriceTick};
use std::time::Instant;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// What a public session subscribes to and where its output goes.
pub enum PublicFeed {
    Price(TickSender),
    Candles {
        interval: CandleInterval,
        sink: CandleSender,
    },
}

impl PublicFeed {
    fn topic(&self, symbol: &str) -> String {
        match self {
            Self::Price(_) => format!("instrument:{}", symbol),
            Self::Candles { interval, .. } => format!("tradeBin{}:{}", interval, symbol),
        }
    }

    /// Forward the relevant rows of a table message to the sink.
    ///
    /// Returns `ChannelClosed` once the receiving side is gone.
    async fn deliver(
        &self,
        symbol: &str,
        message: TableMessage,
        metrics: &SharedMetrics,
    ) -> Result<(), ConnectorError> {
        match (self, message) {
            (Self::Price(sink), TableMessage::Instrument(table)) => {
                for row in table.rows {
                    let Some(price) = row.last_price else {
                        continue;
                    };
                    let tick = PriceTick {
                        exchange: Exchange::Bitmex,
                        symbol: row.symbol,
                        price,
                        timestamp_ms: row
                            .timestamp
                            .as_deref()
                            .and_then(parse_timestamp_ms)
                            .unwrap_or_else(common::now_ms),
                    };
                    metrics.inc_ticks_received();
                    sink.send(tick).await.map_err(|_| ConnectorError::ChannelClosed)?;
                }
            }
            (Self::Candles { interval, sink }, TableMessage::TradeBin(bin, table))
                if bin == *interval && table.action == Action::Insert =>
            {
                for candle in table.rows.iter().filter_map(|r| r.to_candle(symbol, bin)) {
                    sink.send(candle).await.map_err(|_| ConnectorError::ChannelClosed)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One public websocket subscription with its own reconnect cycle.
pub struct PublicSession {
    name: String,
    url: String,
    symbol: String,
    feed: PublicFeed,
    metrics: SharedMetrics,
}

impl PublicSession {
    pub fn new(ws_url: &str, symbol: &str, feed: PublicFeed, metrics: SharedMetrics) -> Self {
        let topic = feed.topic(symbol);
        Self {
            name: topic.clone(),
            url: subscribe_url(ws_url, &topic),
            symbol: symbol.to_string(),
            feed,
            metrics,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Realtime endpoint with the subscription in the query string.
pub fn subscribe_url(ws_url: &str, topic: &str) -> String {
    format!("{}?subscribe={}", ws_url, topic)
}

#[async_trait]
impl StreamSession for PublicSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionOutcome {
        info!(url = %self.url, "Connecting to BitMEX public stream");

        let ws_stream = match connect_with_timeout(&self.url, shutdown_rx).await {
            ConnectResult::Connected(stream) => stream,
            ConnectResult::Shutdown => return SessionOutcome::Shutdown,
            ConnectResult::Error(e) => return SessionOutcome::ConnectFailed(e),
        };

        info!(stream = %self.name, "Connected to BitMEX public stream");
        let connected_at = Instant::now();
        let (mut write, mut read) = ws_stream.split();

        let ended = |error| SessionOutcome::Ended {
            uptime: connected_at.elapsed(),
            error,
        };

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(stream = %self.name, "Shutdown signal received, closing connection");
                        let _ = write.close().await;
                        return SessionOutcome::Shutdown;
                    }
                }

                msg_opt = read.next() => {
                    let msg = match msg_opt {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            error!(stream = %self.name, error = %e, "WebSocket error");
                            self.metrics.inc_websocket_errors();
                            return ended(ConnectorError::WebSocket(e.to_string()));
                        }
                        None => {
                            info!(stream = %self.name, "WebSocket stream ended");
                            return ended(ConnectorError::ConnectionClosed);
                        }
                    };

                    match msg {
                        Message::Text(text) => {
                            self.metrics.inc_messages_received();
                            match parse_message(&text) {
                                Ok(ParsedMessage::Table(table)) => {
                                    if let Err(e) = self.feed.deliver(&self.symbol, table, &self.metrics).await {
                                        info!(stream = %self.name, "Receiver dropped, stopping stream");
                                        return ended(e);
                                    }
                                }
                                Ok(ParsedMessage::Welcome(info)) => debug!(stream = %self.name, info = %info, "Welcome"),
                                Ok(ParsedMessage::Subscribed(topic)) => info!(topic = %topic, "Subscribed"),
                                Ok(ParsedMessage::Error { status, message }) => {
                                    warn!(stream = %self.name, status = ?status, message = %message, "Stream error message");
                                }
                                Ok(ParsedMessage::Authenticated) | Ok(ParsedMessage::Unknown) => {}
                                Err(e) => {
                                    self.metrics.inc_parse_errors();
                                    debug!(stream = %self.name, error = %e, "Dropping malformed message");
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
                            info!(stream = %self.name, "WebSocket closed by server");
                            return ended(ConnectorError::ConnectionClosed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
