//! Single-slot repeating keepalive timer.
//!
//! The timer does not write to the socket itself. Each tick is delivered on
//! an mpsc channel owned by the current session, which sends the protocol
//! ping. Restarting always stops the previous timer first, so at most one
//! timer is alive per slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Interval between keepalive pings on the authenticated stream.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Decrements the live counter when the timer task is dropped, whether it
/// finished or was aborted.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct Keepalive {
    period: Duration,
    handle: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::new(KEEPALIVE_INTERVAL)
    }
}

impl Keepalive {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            handle: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stop any running timer, then start a new one ticking into `tick_tx`.
    ///
    /// The first tick fires one period after the call.
    pub async fn restart(&mut self, tick_tx: mpsc::Sender<()>) {
        self.stop().await;

        self.live.fetch_add(1, Ordering::AcqRel);
        let guard = LiveGuard(self.live.clone());
        let period = self.period;
        let first_tick = Instant::now() + period;

        self.handle = Some(tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tick_tx.send(()).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel the running timer and wait until it is gone.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of timer tasks currently alive for this slot.
    pub fn live_timers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_period() {
        let mut keepalive = Keepalive::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::channel(4);
        keepalive.restart(tx).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(rx.recv().await.is_some());

        keepalive.stop().await;
    }

    #[tokio::test]
    async fn test_restart_never_duplicates() {
        let mut keepalive = Keepalive::new(Duration::from_secs(10));

        for _ in 0..5 {
            let (tx, _rx) = mpsc::channel(1);
            keepalive.restart(tx).await;
            assert_eq!(keepalive.live_timers(), 1);
        }

        keepalive.stop().await;
        assert_eq!(keepalive.live_timers(), 0);
        assert!(!keepalive.is_running());
    }

    #[tokio::test]
    async fn test_timer_ends_when_session_drops_receiver() {
        let mut keepalive = Keepalive::new(Duration::from_millis(5));
        let (tx, rx) = mpsc::channel(1);
        keepalive.restart(tx).await;
        drop(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(keepalive.live_timers(), 0);
    }
}
