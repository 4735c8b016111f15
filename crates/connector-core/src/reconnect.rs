//! Iterative reconnect loop shared by all streaming channels.

use crate::error::ConnectorError;
use async_trait::async_trait;
use common::ExponentialBackoff;
use metrics::SharedMetrics;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Timeout for WebSocket connection attempts.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How a single session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Shutdown was requested while connecting or streaming.
    Shutdown,
    /// Session connected and later failed.
    Ended {
        uptime: Duration,
        error: ConnectorError,
    },
    /// Failed before the stream was established.
    ConnectFailed(ConnectorError),
}

/// One connect-subscribe-stream cycle of a channel.
///
/// State that must survive reconnects (merge tables, the keepalive slot)
/// lives on the implementor.
#[async_trait]
pub trait StreamSession: Send {
    /// Channel name used in logs.
    fn name(&self) -> &str;

    async fn run(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> SessionOutcome;
}

/// Run `session` until shutdown, reconnecting with backoff after each failure.
///
/// Returns `Ok(())` on shutdown and `Err(ChannelClosed)` once the consumer
/// side of the session's sink has been dropped.
pub async fn run_with_reconnect<S: StreamSession + ?Sized>(
    session: &mut S,
    mut backoff: ExponentialBackoff,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: &SharedMetrics,
) -> Result<(), ConnectorError> {
    loop {
        if *shutdown_rx.borrow() {
            info!(stream = session.name(), "Shutdown requested, exiting stream");
            return Ok(());
        }

        let (error, reason) = match session.run(&mut shutdown_rx).await {
            SessionOutcome::Shutdown => {
                info!(stream = session.name(), "Stream shutdown complete");
                return Ok(());
            }
            SessionOutcome::Ended { uptime, error } => {
                if matches!(error, ConnectorError::ChannelClosed) {
                    info!(stream = session.name(), "Channel closed, exiting stream");
                    return Err(ConnectorError::ChannelClosed);
                }
                if backoff.on_session_ended(uptime) {
                    info!(
                        stream = session.name(),
                        uptime_secs = uptime.as_secs(),
                        "Connection was stable, resetting backoff"
                    );
                }
                (error, "Connection lost, reconnecting")
            }
            SessionOutcome::ConnectFailed(error) => (error, "Connection failed, retrying"),
        };

        metrics.inc_reconnect_attempts();
        let delay = backoff.next_delay();
        warn!(
            stream = session.name(),
            error = %error,
            attempt = backoff.attempt(),
            delay_secs = delay.as_secs_f64(),
            "{}",
            reason
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(stream = session.name(), "Shutdown requested during backoff");
                    return Ok(());
                }
            }
        }
    }
}
