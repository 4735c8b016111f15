//! Exchange-agnostic connector plumbing.
//!
//! - `ExchangeGateway`: the capability set the engine drives
//! - `run_with_reconnect` + `StreamSession`: iterative reconnect with backoff
//! - `Keepalive`: single-slot ping timer that cannot be duplicated on restart

mod error;
mod gateway;
mod keepalive;
mod reconnect;

pub use error::{ConnectorError, GatewayError};
pub use gateway::{ExchangeGateway, SharedGateway};
pub use keepalive::{Keepalive, KEEPALIVE_INTERVAL};
pub use reconnect::{run_with_reconnect, SessionOutcome, StreamSession, CONNECTION_TIMEOUT};

use common::BitmexEnvironment;
use execution_core::UserEvent;
use model::{Candle, PriceTick};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Environment (production or testnet).
    pub environment: BitmexEnvironment,
    /// Channel buffer capacity.
    pub channel_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            environment: BitmexEnvironment::default(),
            channel_capacity: 1024,
        }
    }
}

pub type TickSender = mpsc::Sender<PriceTick>;
pub type TickReceiver = mpsc::Receiver<PriceTick>;
pub type CandleSender = mpsc::Sender<Candle>;
pub type CandleReceiver = mpsc::Receiver<Candle>;
pub type UserEventSender = mpsc::Sender<UserEvent>;
pub type UserEventReceiver = mpsc::Receiver<UserEvent>;

pub fn create_tick_channel(capacity: usize) -> (TickSender, TickReceiver) {
    mpsc::channel(capacity)
}

pub fn create_candle_channel(capacity: usize) -> (CandleSender, CandleReceiver) {
    mpsc::channel(capacity)
}

pub fn create_user_event_channel(capacity: usize) -> (UserEventSender, UserEventReceiver) {
    mpsc::channel(capacity)
}
