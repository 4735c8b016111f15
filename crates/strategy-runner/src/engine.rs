//! Market-making engine.
//!
//! All engine state lives on one task. Ticks, user events, operator commands
//! and period boundaries are drained by a single `select!` loop, so the
//! ledger and the order registry are never touched concurrently.
//!
//! A rebuild cancels every tracked order in one bulk request, submits the
//! new grid in one bulk request, and only then records the new anchor. Any
//! failure aborts the rebuild and leaves the previous anchor in place.

use crate::command::{CommandReceiver, EngineCommand, EngineEvent, EngineHandle};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::timer::PeriodTimer;
use common::now_ms;
use connector_core::{CandleReceiver, GatewayError, SharedGateway, TickReceiver, UserEventReceiver};
use execution_core::{
    generate_client_order_id, BalanceSnapshot, CancelTarget, FillKind, Ledger, Order, OrderAck,
    OrderRegistry, OrderRequest, OrderStatus, Position, PositionSnapshot, RegistryUpdate,
    UserEvent, CLIENT_ORDER_PREFIX,
};
use model::{Candle, PriceTick};
use rust_decimal::Decimal;
use strategy_core::{generate_grid, GridOrderIntent, GridSettings, StrategyError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Streams feeding the engine.
pub struct EngineInputs {
    pub ticks: TickReceiver,
    /// Forwarded to subscribers only.
    pub candles: Option<CandleReceiver>,
    pub user_events: UserEventReceiver,
}

/// The engine task. Build with [`MarketMaker::new`], drive with the
/// returned [`EngineHandle`].
pub struct MarketMaker {
    state: EngineState,
    commands: CommandReceiver,
}

impl MarketMaker {
    pub fn new(
        config: EngineConfig,
        grid: GridSettings,
        gateway: SharedGateway,
    ) -> Result<(Self, EngineHandle), EngineError> {
        config.validate()?;
        grid.validate()?;

        let (command_tx, commands) = mpsc::channel(config.command_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let handle = EngineHandle::new(command_tx, events.clone());
        let state = EngineState::new(config, grid, gateway, events);

        Ok((Self { state, commands }, handle))
    }

    /// Run until shutdown is signalled.
    ///
    /// Resting orders are left on the book when the loop exits.
    pub async fn run(
        self,
        inputs: EngineInputs,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let Self {
            mut state,
            mut commands,
        } = self;
        let EngineInputs {
            mut ticks,
            mut candles,
            mut user_events,
        } = inputs;

        let timer = PeriodTimer::new(state.config.period());
        info!(
            symbol = %state.config.symbol,
            period_secs = state.config.period_secs,
            rebuild_every_period = state.config.rebuild_every_period,
            trust_server_snapshots = state.config.trust_server_snapshots,
            "starting market maker"
        );

        if state.config.auto_start {
            state.start();
        }

        let boundary = tokio::time::sleep(timer.until_next(now_ms()));
        tokio::pin!(boundary);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                }

                Some((command, reply)) = commands.recv() => {
                    let result = state.handle_command(command).await;
                    let _ = reply.send(result);
                }

                // Account updates before prices, so a rebuild sees the latest position
                Some(event) = user_events.recv() => {
                    state.handle_user_event(event);
                }

                () = &mut boundary => {
                    state.on_period_boundary(timer.boundary_at(now_ms())).await;
                    boundary.as_mut().reset(Instant::now() + timer.until_next(now_ms()));
                }

                Some(tick) = ticks.recv() => {
                    state.handle_tick(tick).await;
                }

                candle = recv_candle(&mut candles) => match candle {
                    Some(candle) => state.handle_candle(candle),
                    None => candles = None,
                },
            }
        }

        info!(
            open_orders = state.registry.len(),
            position = %state.ledger.position().volume,
            "market maker stopped"
        );
        Ok(())
    }
}

async fn recv_candle(candles: &mut Option<CandleReceiver>) -> Option<Candle> {
    match candles {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) struct EngineState {
    config: EngineConfig,
    grid_settings: GridSettings,
    gateway: SharedGateway,
    registry: OrderRegistry,
    ledger: Ledger,
    events: broadcast::Sender<EngineEvent>,
    last_price: Option<Decimal>,
    /// Market price the live grid was built at.
    anchor: Option<Decimal>,
    grid: Vec<GridOrderIntent>,
    running: bool,
}

impl EngineState {
    pub(crate) fn new(
        config: EngineConfig,
        grid_settings: GridSettings,
        gateway: SharedGateway,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let ledger = Ledger::new(config.initial_balance);
        Self {
            config,
            grid_settings,
            gateway,
            registry: OrderRegistry::new(),
            ledger,
            events,
            last_price: None,
            anchor: None,
            grid: Vec::new(),
            running: false,
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report(&self, context: &str, err: &EngineError) {
        error!(context, error = %err, "engine operation failed");
        self.emit(EngineEvent::Error(format!("{}: {}", context, err)));
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!("market maker started");
        self.emit(EngineEvent::Started);
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        info!(
            open_orders = self.registry.len(),
            "market maker stopped, resting orders left on the book"
        );
        self.emit(EngineEvent::Stopped);
    }

    pub(crate) async fn handle_command(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        let name = command.name();
        debug!(command = name, "command received");

        let result = match command {
            EngineCommand::Start => {
                self.start();
                Ok(())
            }
            EngineCommand::Stop => {
                self.stop();
                Ok(())
            }
            EngineCommand::CancelOrder(client_order_id) => self.cancel_order(client_order_id).await,
            EngineCommand::CancelAll => self.cancel_all().await,
            EngineCommand::RebuildGrid => self.rebuild("manual").await,
            EngineCommand::FlattenPosition => self.flatten_position().await,
        };

        if let Err(e) = &result {
            self.report(name, e);
        }
        result
    }

    // =========================================================================
    // Market data
    // =========================================================================

    pub(crate) async fn handle_tick(&mut self, tick: PriceTick) {
        if tick.symbol != self.config.symbol {
            debug!(symbol = %tick.symbol, "ignoring tick for another symbol");
            return;
        }

        let price = tick.price;
        self.last_price = Some(price);
        self.emit(EngineEvent::Tick(tick));

        if !self.running {
            return;
        }
        if let Some(anchor) = self.anchor {
            if self.grid_settings.drifted(anchor, price) {
                info!(anchor = %anchor, price = %price, "price drifted from grid anchor");
                if let Err(e) = self.rebuild("drift").await {
                    self.report("rebuild", &e);
                }
            }
        }
    }

    fn handle_candle(&mut self, candle: Candle) {
        self.emit(EngineEvent::Candle(candle));
    }

    pub(crate) async fn on_period_boundary(&mut self, boundary_ms: i64) {
        self.emit(EngineEvent::PeriodElapsed {
            boundary_ms,
            grid: self.grid.clone(),
        });

        if !self.running {
            return;
        }

        let due = self.config.rebuild_every_period
            || self.anchor.is_none()
            || matches!(
                (self.anchor, self.last_price),
                (Some(anchor), Some(price)) if self.grid_settings.drifted(anchor, price)
            );

        if due {
            if let Err(e) = self.rebuild("period").await {
                self.report("rebuild", &e);
            }
        }
    }

    // =========================================================================
    // Grid
    // =========================================================================

    async fn rebuild(&mut self, reason: &str) -> Result<(), EngineError> {
        let price = self.last_price.ok_or(StrategyError::NoPrice)?;
        let intents = generate_grid(Some(price), &self.grid_settings, self.ledger.position())?;

        self.cancel_tracked().await?;

        let requests: Vec<OrderRequest> = intents.iter().map(|i| i.to_request()).collect();
        self.track(&requests);

        match self.gateway.submit_orders(&self.config.symbol, &requests).await {
            Ok(acks) => self.apply_acks(&acks),
            Err(e) => {
                self.forget_failed(&requests, &e);
                return Err(e.into());
            }
        }

        self.anchor = Some(price);
        self.grid = intents.clone();

        info!(
            reason,
            anchor = %price,
            orders = intents.len(),
            position = %self.ledger.position().volume,
            "grid regenerated"
        );
        self.emit(EngineEvent::GridRegenerated(intents));
        Ok(())
    }

    /// Cancel every tracked open order in one request.
    async fn cancel_tracked(&mut self) -> Result<(), EngineError> {
        let ids = self.registry.client_ids();
        if ids.is_empty() {
            return Ok(());
        }

        let acks = self.gateway.cancel_orders(&ids).await?;
        self.retire_acked(&acks);
        debug!(count = ids.len(), "cancelled tracked orders");
        Ok(())
    }

    async fn cancel_order(&mut self, client_order_id: String) -> Result<(), EngineError> {
        let ack = self
            .gateway
            .cancel_order(&CancelTarget::ByClientId(client_order_id.clone()))
            .await?;
        self.retire_acked(std::slice::from_ref(&ack));
        info!(client_order_id = %client_order_id, status = ?ack.status, "order cancelled");
        Ok(())
    }

    async fn cancel_all(&mut self) -> Result<(), EngineError> {
        if self.registry.is_empty() {
            info!("no open orders to cancel");
            return Ok(());
        }

        let count = self.registry.len();
        self.cancel_tracked().await?;
        self.anchor = None;
        self.grid.clear();
        info!(count, "cancelled all open orders");
        Ok(())
    }

    async fn flatten_position(&mut self) -> Result<(), EngineError> {
        let volume = self.ledger.position().volume;
        if volume.is_zero() {
            info!("position already flat, nothing to do");
            return Ok(());
        }

        let request = OrderRequest::market(generate_client_order_id(CLIENT_ORDER_PREFIX), -volume);
        let requests = std::slice::from_ref(&request);
        self.track(requests);

        match self.gateway.submit_order(&self.config.symbol, &request).await {
            Ok(ack) => self.apply_acks(std::slice::from_ref(&ack)),
            Err(e) => {
                self.forget_failed(requests, &e);
                return Err(e.into());
            }
        }

        info!(
            client_order_id = %request.client_order_id,
            volume = %request.volume,
            "flatten order submitted"
        );
        Ok(())
    }

    fn track(&mut self, requests: &[OrderRequest]) {
        let created_at_ms = now_ms();
        for request in requests {
            self.registry.track_submitted(Order::pending(
                request.client_order_id.clone(),
                self.config.symbol.clone(),
                request.volume,
                request.price,
                created_at_ms,
            ));
        }
    }

    fn apply_acks(&mut self, acks: &[OrderAck]) {
        for ack in acks {
            if !self.registry.on_ack(ack) {
                debug!(client_order_id = %ack.client_order_id, "ack for untracked order");
            }
        }
    }

    /// Stop tracking orders the exchange reports as done.
    ///
    /// The stream still delivers the terminal update; a fill is applied then.
    fn retire_acked(&mut self, acks: &[OrderAck]) {
        for ack in acks.iter().filter(|a| a.status.is_terminal()) {
            self.registry.discard(&ack.client_order_id);
        }
    }

    /// Drop orders whose submission failed.
    ///
    /// If the exchange did accept them, the stream re-registers them by
    /// client order id.
    fn forget_failed(&mut self, requests: &[OrderRequest], err: &GatewayError) {
        if err.is_ambiguous() {
            warn!(
                count = requests.len(),
                error = %err,
                "submit outcome unknown, relying on the stream to reconcile"
            );
        }
        for request in requests {
            self.registry.discard(&request.client_order_id);
        }
    }

    // =========================================================================
    // Account
    // =========================================================================

    pub(crate) fn handle_user_event(&mut self, event: UserEvent) {
        match event {
            UserEvent::OrderUpdate(order) => self.handle_order_update(order),
            UserEvent::PositionUpdate(snapshot) => self.handle_server_position(snapshot),
            UserEvent::BalanceUpdate(snapshot) => self.handle_server_balance(snapshot),
        }
    }

    fn handle_order_update(&mut self, order: Order) {
        if order.symbol != self.config.symbol {
            debug!(symbol = %order.symbol, "ignoring order for another symbol");
            return;
        }

        match self.registry.apply_update(order.clone()) {
            RegistryUpdate::Manual => {
                debug!(order_id = ?order.order_id, "ignoring order placed outside the engine");
            }
            RegistryUpdate::Duplicate => {
                debug!(
                    client_order_id = %order.client_order_id,
                    status = ?order.status,
                    "terminal update already applied"
                );
            }
            RegistryUpdate::Active => {}
            RegistryUpdate::Terminal(done) => {
                debug!(client_order_id = %done.client_order_id, status = ?done.status, "order retired");
                if done.status == OrderStatus::Filled {
                    self.apply_fill(&done);
                }
                self.registry.trim_history(self.config.history_limit);
            }
        }

        self.emit(EngineEvent::OrderUpdate(order));
    }

    fn apply_fill(&mut self, order: &Order) {
        let volume = if order.filled_volume.is_zero() {
            order.volume
        } else {
            order.filled_volume
        };
        let Some(price) = order.avg_fill_price.or(order.price) else {
            warn!(
                client_order_id = %order.client_order_id,
                "filled order carries no price, position unchanged"
            );
            return;
        };

        let effect = self.ledger.apply_fill(volume, price, order.fee);
        if effect.kind == FillKind::Ignored {
            warn!(client_order_id = %order.client_order_id, volume = %volume, price = %price, "degenerate fill ignored");
            return;
        }

        info!(
            client_order_id = %order.client_order_id,
            kind = ?effect.kind,
            volume = %volume,
            price = %price,
            realized = %effect.realized,
            fee = %effect.fee,
            position = %self.ledger.position().volume,
            balance = ?self.ledger.balance(),
            "fill applied"
        );

        self.emit(EngineEvent::PositionUpdate(self.ledger.position().clone()));
        if let Some(balance) = self.ledger.balance() {
            self.emit(EngineEvent::BalanceUpdate(balance));
        }
    }

    fn handle_server_position(&mut self, snapshot: PositionSnapshot) {
        if snapshot.symbol != self.config.symbol {
            return;
        }

        let server = match snapshot.avg_price {
            Some(price) => Position::new(snapshot.volume, price),
            None if snapshot.volume.is_zero() => Position::flat(),
            None => {
                debug!(volume = %snapshot.volume, "position snapshot without entry price");
                self.emit(EngineEvent::ServerPosition(snapshot));
                return;
            }
        };
        self.emit(EngineEvent::ServerPosition(snapshot));

        let local = self.ledger.position().clone();
        if server == local {
            return;
        }

        if self.config.trust_server_snapshots {
            info!(
                local_volume = %local.volume,
                server_volume = %server.volume,
                "adopting server position"
            );
            self.ledger.set_position(server);
            self.emit(EngineEvent::PositionUpdate(self.ledger.position().clone()));
        } else {
            warn!(
                local_volume = %local.volume,
                local_price = ?local.avg_price,
                server_volume = %server.volume,
                server_price = ?server.avg_price,
                "server position differs from local"
            );
        }
    }

    fn handle_server_balance(&mut self, snapshot: BalanceSnapshot) {
        if !snapshot
            .currency
            .eq_ignore_ascii_case(&self.config.settlement_currency)
        {
            debug!(
                currency = %snapshot.currency,
                settlement = %self.config.settlement_currency,
                "ignoring margin snapshot in another currency"
            );
            return;
        }
        let amount = snapshot.amount;
        self.emit(EngineEvent::ServerBalance(snapshot));

        match self.ledger.balance() {
            None => {
                info!(balance = %amount, "balance seeded from server");
                self.adopt_balance(amount);
            }
            Some(local) if local == amount => {}
            Some(local) if self.config.trust_server_snapshots => {
                info!(local = %local, server = %amount, "adopting server balance");
                self.adopt_balance(amount);
            }
            Some(local) => {
                warn!(local = %local, server = %amount, "server balance differs from local");
            }
        }
    }

    fn adopt_balance(&mut self, amount: Decimal) {
        self.ledger.set_balance(amount);
        self.emit(EngineEvent::BalanceUpdate(amount));
    }
}
