//! PairFlow binary
//!
//! Wires config, storage, the pipeline and the Binance trade feed, then runs
//! until Ctrl-C.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pairflow::config::{AppConfig, LoggingConfig, StoreBackend};
use pairflow::feed::{BinanceTradeFeed, TickSink, TickSource};
use pairflow::pipeline::{Pipeline, PipelineSettings};
use pairflow::store::{BarStore, CsvBarStore, MemoryBarStore};

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},pairflow={}", logging.level, logging.level)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn BarStore>> {
    let store: Arc<dyn BarStore> = match config.store_backend()? {
        StoreBackend::Csv => Arc::new(
            CsvBarStore::new(&config.store.data_dir)
                .with_context(|| format!("failed to open bar store in {}", config.store.data_dir))?,
        ),
        StoreBackend::Memory => Arc::new(MemoryBarStore::new()),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.logging);

    println!("PairFlow {}", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "Configuration loaded");

    let store = open_store(&config)?;
    let settings = PipelineSettings::from_config(&config)?;
    let pipeline = Arc::new(Pipeline::new(settings, store));

    let symbols: BTreeSet<String> = config.symbols().into_iter().collect();
    for symbol in &symbols {
        pipeline.add_symbol(symbol);
    }

    let mut feed = BinanceTradeFeed::new(&config.feed);
    #[cfg_attr(not(feature = "dashboard"), allow(unused_variables))]
    let feed_handle = feed.handle();
    let sink: Arc<dyn TickSink> = pipeline.clone();
    let (feed_stop_tx, feed_shutdown) = watch::channel(false);
    let feed_task = tokio::spawn(async move {
        info!(source = feed.name(), "Starting feed");
        feed.start(symbols, sink, feed_shutdown).await
    });

    #[cfg(feature = "dashboard")]
    let dashboard_task = if config.dashboard.enabled {
        let context = Arc::new(
            pairflow::dashboard::DashboardContext::new(
                pipeline.clone(),
                config.analytics.zscore_threshold,
            )
            .with_feed(feed_handle),
        );
        let host = config.dashboard.host.clone();
        let port = config.dashboard.port;
        let shutdown = pipeline.shutdown_signal();
        Some(tokio::spawn(async move {
            pairflow::dashboard::serve(context, &host, port, shutdown).await
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    // feed first, so the writers' final drain sees every pushed tick
    feed_stop_tx.send_replace(true);
    match feed_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Feed stopped with error"),
        Err(e) => error!(error = %e, "Feed task panicked"),
    }

    pipeline.shutdown().await;

    #[cfg(feature = "dashboard")]
    if let Some(task) = dashboard_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Dashboard stopped with error"),
            Err(e) => error!(error = %e, "Dashboard task panicked"),
        }
    }

    let metrics = pipeline.metrics();
    info!(
        ticks = metrics.ticks_accepted,
        bars = metrics.bars_closed,
        "Goodbye"
    );
    Ok(())
}
