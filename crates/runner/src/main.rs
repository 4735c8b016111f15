mod config;

use anyhow::{Context, Result};
use auth::ApiCredentials;
use bitmex_rest::BitmexRestClient;
use config::AppConfig;
use connector_bitmex::BitmexGateway;
use connector_core::{
    create_candle_channel, create_tick_channel, create_user_event_channel, ConnectorConfig,
    SharedGateway,
};
use execution_core::OrderSide;
use metrics::{create_metrics, SharedMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strategy_runner::{EngineEvent, EngineInputs, MarketMaker};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    common::init_logging();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    let environment = config.environment()?;
    let symbol = config.engine.symbol.clone();
    let capacity = config.exchange.channel_capacity;

    info!(
        environment = %environment,
        symbol = %symbol,
        order_pairs = config.grid.order_pairs,
        period_secs = config.engine.period_secs,
        "starting market maker"
    );

    let credentials = ApiCredentials::from_env().context("failed to load API credentials")?;
    let rest = Arc::new(
        BitmexRestClient::new(credentials, environment).context("failed to build REST client")?,
    );

    let metrics = create_metrics();
    let connector = ConnectorConfig {
        environment,
        channel_capacity: capacity,
    };
    let gateway: SharedGateway = Arc::new(BitmexGateway::new(rest, connector, metrics.clone()));

    if let Some(interval) = config.exchange.candle_interval {
        if config.exchange.warmup_candles > 0 {
            match gateway
                .fetch_historical_candles(&symbol, interval, config.exchange.warmup_candles)
                .await
            {
                Ok(candles) => info!(
                    count = candles.len(),
                    last_close = ?candles.last().map(|c| c.close),
                    "fetched historical candles"
                ),
                Err(e) => warn!(error = %e, "historical candle fetch failed"),
            }
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (tick_tx, ticks) = create_tick_channel(capacity);
    let (user_tx, user_events) = create_user_event_channel(capacity);

    let mut streams: Vec<JoinHandle<()>> = Vec::new();
    {
        let gateway = gateway.clone();
        let symbol = symbol.clone();
        let shutdown_rx = shutdown_rx.clone();
        streams.push(tokio::spawn(async move {
            if let Err(e) = gateway.stream_price(&symbol, tick_tx, shutdown_rx).await {
                error!(error = %e, "price stream stopped");
            }
        }));
    }
    {
        let gateway = gateway.clone();
        let shutdown_rx = shutdown_rx.clone();
        streams.push(tokio::spawn(async move {
            if let Err(e) = gateway.stream_user_events(user_tx, shutdown_rx).await {
                error!(error = %e, "user stream stopped");
            }
        }));
    }
    let candles = config.exchange.candle_interval.map(|interval| {
        let (candle_tx, candle_rx) = create_candle_channel(capacity);
        let gateway = gateway.clone();
        let symbol = symbol.clone();
        let shutdown_rx = shutdown_rx.clone();
        streams.push(tokio::spawn(async move {
            if let Err(e) = gateway
                .stream_candles(&symbol, interval, candle_tx, shutdown_rx)
                .await
            {
                error!(error = %e, "candle stream stopped");
            }
        }));
        candle_rx
    });

    let (engine, handle) = MarketMaker::new(config.engine.clone(), config.grid.clone(), gateway)
        .context("failed to build engine")?;

    tokio::spawn(log_engine_events(handle.subscribe()));
    if !config.engine.auto_start {
        warn!("engine.auto_start is off, no orders will be placed");
    }

    let engine_task = tokio::spawn(engine.run(
        EngineInputs {
            ticks,
            candles,
            user_events,
        },
        shutdown_rx.clone(),
    ));

    // Spawn ctrl_c handler
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, initiating shutdown");
            let _ = ctrl_c_tx.send(true);
        }
    });

    tokio::spawn(report_health(
        metrics.clone(),
        config.health_log_interval(),
        shutdown_tx.subscribe(),
    ));

    let engine_result = engine_task.await.context("engine task panicked")?;

    // The engine only returns on shutdown; make sure the streams follow.
    let _ = shutdown_tx.send(true);
    for stream in streams {
        let _ = stream.await;
    }

    println!("\n{}", metrics.snapshot());
    engine_result.context("engine failed")?;

    info!("shutdown complete");
    Ok(())
}

/// Surface operator-relevant engine events in the log.
async fn log_engine_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Error(message)) => warn!(message = %message, "engine reported an error"),
            Ok(EngineEvent::GridRegenerated(grid)) => {
                let best = |side| grid.iter().filter(move |i| i.side == side).map(|i| i.price);
                let best_sell = best(OrderSide::Sell).min();
                let best_buy = best(OrderSide::Buy).max();
                info!(orders = grid.len(), best_buy = ?best_buy, best_sell = ?best_sell, "new grid live");
            }
            Ok(EngineEvent::ServerBalance(balance)) => {
                info!(currency = %balance.currency, amount = %balance.amount, "server balance")
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event logger lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn report_health(
    metrics: SharedMetrics,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    status = %snapshot.health_status(),
                    ticks = snapshot.ticks_received,
                    user_events = snapshot.user_events_received,
                    errors = snapshot.total_errors(),
                    reconnects = snapshot.reconnect_attempts,
                    pings = snapshot.keepalive_pings,
                    "health check"
                );
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
