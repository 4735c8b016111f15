use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters shared by the public and user streams.
#[derive(Debug)]
pub struct ConnectorMetrics {
    // Counters
    ticks_received: AtomicU64,
    user_events_received: AtomicU64,
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    websocket_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    keepalive_pings: AtomicU64,
    fee_lookup_failures: AtomicU64,

    // Timestamps
    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_tick_time: Option<Instant>,
    last_user_event_time: Option<Instant>,
    last_error_time: Option<Instant>,
}

impl Default for ConnectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self {
            ticks_received: AtomicU64::new(0),
            user_events_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            websocket_errors: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            keepalive_pings: AtomicU64::new(0),
            fee_lookup_failures: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_tick_time: None,
                last_user_event_time: None,
                last_error_time: None,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_ticks_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_tick_time = Some(Instant::now());
    }

    pub fn inc_user_events_received(&self) {
        self.user_events_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_user_event_time = Some(Instant::now());
    }

    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_keepalive_pings(&self) {
        self.keepalive_pings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fee_lookup_failures(&self) {
        self.fee_lookup_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    // --- Getter methods ---

    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }

    pub fn user_events_received(&self) -> u64 {
        self.user_events_received.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn websocket_errors(&self) -> u64 {
        self.websocket_errors.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn keepalive_pings(&self) -> u64 {
        self.keepalive_pings.load(Ordering::Relaxed)
    }

    pub fn fee_lookup_failures(&self) -> u64 {
        self.fee_lookup_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_tick(&self) -> Option<f64> {
        self.inner
            .read()
            .last_tick_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_user_event(&self) -> Option<f64> {
        self.inner
            .read()
            .last_user_event_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_error(&self) -> Option<f64> {
        self.inner
            .read()
            .last_error_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_received: self.ticks_received(),
            user_events_received: self.user_events_received(),
            messages_received: self.messages_received(),
            parse_errors: self.parse_errors(),
            websocket_errors: self.websocket_errors(),
            reconnect_attempts: self.reconnect_attempts(),
            keepalive_pings: self.keepalive_pings(),
            fee_lookup_failures: self.fee_lookup_failures(),
            uptime_secs: self.uptime_secs(),
            secs_since_last_tick: self.secs_since_last_tick(),
            secs_since_last_user_event: self.secs_since_last_user_event(),
            secs_since_last_error: self.secs_since_last_error(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub ticks_received: u64,
    pub user_events_received: u64,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub websocket_errors: u64,
    pub reconnect_attempts: u64,
    pub keepalive_pings: u64,
    pub fee_lookup_failures: u64,
    pub uptime_secs: f64,
    pub secs_since_last_tick: Option<f64>,
    pub secs_since_last_user_event: Option<f64>,
    pub secs_since_last_error: Option<f64>,
}

/// Health status of the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Price data is flowing.
    Healthy,
    /// Price data is stale.
    Degraded,
    /// No price data for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Threshold in seconds for considering price data stale (degraded).
    const STALE_THRESHOLD_SECS: f64 = 30.0;
    /// Threshold in seconds for considering the connector unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 60.0;

    /// Health is judged on the price stream; the grid cannot be priced without it.
    pub fn health_status(&self) -> HealthStatus {
        let quiet_for = self.secs_since_last_tick.unwrap_or(self.uptime_secs);

        if quiet_for > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else if quiet_for > Self::STALE_THRESHOLD_SECS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.parse_errors + self.websocket_errors + self.fee_lookup_failures
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Connector Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Price ticks:         {}", self.ticks_received)?;
        writeln!(f, "User events:         {}", self.user_events_received)?;
        writeln!(f, "Messages received:   {}", self.messages_received)?;
        writeln!(f, "Parse errors:        {}", self.parse_errors)?;
        writeln!(f, "WebSocket errors:    {}", self.websocket_errors)?;
        writeln!(f, "Fee lookup failures: {}", self.fee_lookup_failures)?;
        writeln!(f, "Reconnect attempts:  {}", self.reconnect_attempts)?;
        writeln!(f, "Keepalive pings:     {}", self.keepalive_pings)?;
        if let Some(secs) = self.secs_since_last_tick {
            writeln!(f, "Since last tick:     {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_since_last_error {
            writeln!(f, "Since last error:    {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<ConnectorMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(ConnectorMetrics::new())
}
