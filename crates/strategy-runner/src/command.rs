//! Operator commands in, engine events out.

use crate::error::EngineError;
use execution_core::{BalanceSnapshot, Order, Position, PositionSnapshot};
use model::{Candle, PriceTick};
use rust_decimal::Decimal;
use strategy_core::GridOrderIntent;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Begin scheduled and drift-triggered rebuilds.
    Start,
    /// Stop rebuilding. Resting orders stay on the book.
    Stop,
    /// Cancel one order by client order id.
    CancelOrder(String),
    /// Cancel every tracked open order.
    CancelAll,
    /// Rebuild the grid now, regardless of schedule.
    RebuildGrid,
    /// Close the position with an opposing market order.
    FlattenPosition,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::CancelOrder(_) => "cancel_order",
            Self::CancelAll => "cancel_all",
            Self::RebuildGrid => "rebuild_grid",
            Self::FlattenPosition => "flatten_position",
        }
    }
}

/// Notification for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Tick(PriceTick),
    Candle(Candle),
    OrderUpdate(Order),
    /// Local position after a fill or an adopted snapshot.
    PositionUpdate(Position),
    /// Local balance after a fill or an adopted snapshot.
    BalanceUpdate(Decimal),
    GridRegenerated(Vec<GridOrderIntent>),
    /// Position as the server reports it.
    ServerPosition(PositionSnapshot),
    /// Balance as the server reports it.
    ServerBalance(BalanceSnapshot),
    /// A period boundary passed; carries the grid live at that moment.
    PeriodElapsed {
        boundary_ms: i64,
        grid: Vec<GridOrderIntent>,
    },
    Error(String),
    Started,
    Stopped,
}

pub(crate) type CommandReply = oneshot::Sender<Result<(), EngineError>>;
pub(crate) type CommandReceiver = mpsc::Receiver<(EngineCommand, CommandReply)>;

/// Cloneable handle for driving a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<(EngineCommand, CommandReply)>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<(EngineCommand, CommandReply)>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { commands, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Send a command and wait for the engine to finish it.
    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send((command, reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop).await
    }

    pub async fn cancel_order(&self, client_order_id: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineCommand::CancelOrder(client_order_id.into())).await
    }

    pub async fn cancel_all(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::CancelAll).await
    }

    pub async fn rebuild_grid(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::RebuildGrid).await
    }

    pub async fn flatten_position(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::FlattenPosition).await
    }
}
