//! Ingestion pipeline
//!
//! Routes ticks from a source to one writer task per symbol and serves reads:
//! bar history from the store, pair analytics, live ticks and buffer
//! snapshots. The feed side never blocks: each symbol has a bounded queue
//! that overwrites its oldest tick when the writer falls behind.

mod dedup;
mod metrics;
mod worker;

pub use dedup::DedupWindow;
pub use metrics::{MetricsSnapshot, PipelineMetrics};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::{analyze_pair, PairAnalysis, DEFAULT_WINDOW};
use crate::buffer::{TickBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::feed::{FeedEvent, TickSink};
use crate::resample::Resampler;
use crate::store::{BarStore, DEFAULT_MAX_BARS};
use crate::types::{normalize_symbol, OhlcvBar, Tick, Timeframe};
use worker::{SymbolWorker, WorkerCommand, WorkerInputs};

const COMMAND_QUEUE: usize = 32;

/// Runtime settings of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub timeframes: Vec<Timeframe>,
    pub buffer_capacity: usize,
    pub queue_capacity: usize,
    pub flush_interval: Duration,
    pub late_grace_buckets: u32,
    pub allowed_lateness_ms: i64,
    pub dedup_window: usize,
    pub max_bars: usize,
    pub default_window: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::Sec1, Timeframe::Min1, Timeframe::Min5],
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            queue_capacity: 4096,
            flush_interval: Duration::from_secs(1),
            late_grace_buckets: 0,
            allowed_lateness_ms: 0,
            dedup_window: 1024,
            max_bars: DEFAULT_MAX_BARS,
            default_window: DEFAULT_WINDOW,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            timeframes: config.timeframes()?,
            buffer_capacity: config.pipeline.buffer_capacity,
            queue_capacity: config.pipeline.queue_capacity,
            flush_interval: Duration::from_millis(config.pipeline.flush_interval_ms),
            late_grace_buckets: config.pipeline.late_grace_buckets,
            allowed_lateness_ms: config.pipeline.allowed_lateness_ms,
            dedup_window: config.pipeline.dedup_window,
            max_bars: config.store.max_bars,
            default_window: config.analytics.default_window,
        })
    }
}

/// Channels into one symbol's writer
struct SymbolHandle {
    ticks: broadcast::Sender<Tick>,
    commands: mpsc::Sender<WorkerCommand>,
    latest: watch::Receiver<Option<Tick>>,
}

pub struct Pipeline {
    settings: PipelineSettings,
    store: Arc<dyn BarStore>,
    metrics: Arc<PipelineMetrics>,
    symbols: RwLock<HashMap<String, SymbolHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, store: Arc<dyn BarStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            store,
            metrics: Arc::new(PipelineMetrics::new()),
            symbols: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.settings.timeframes
    }

    /// Receiver that turns true when [`Pipeline::shutdown`] runs. Sources
    /// should be stopped before that, so no tick arrives after the final drain.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn read_symbols(&self) -> RwLockReadGuard<'_, HashMap<String, SymbolHandle>> {
        match self.symbols.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start tracking a symbol. Returns false if it was already tracked or
    /// the pipeline is shutting down. Must be called inside a Tokio runtime.
    pub fn add_symbol(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() || *self.shutdown_tx.borrow() {
            return false;
        }

        let mut symbols = match self.symbols.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if symbols.contains_key(&symbol) {
            return false;
        }

        let (ticks_tx, ticks_rx) = broadcast::channel(self.settings.queue_capacity.max(1));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (latest_tx, latest_rx) = watch::channel(None);

        let resampler = Resampler::new(&symbol, &self.settings.timeframes)
            .with_late_grace(self.settings.late_grace_buckets)
            .with_allowed_lateness(self.settings.allowed_lateness_ms);
        let worker = SymbolWorker::new(
            &symbol,
            TickBuffer::new(&symbol, self.settings.buffer_capacity),
            resampler,
            DedupWindow::new(self.settings.dedup_window),
            self.store.clone(),
            self.metrics.clone(),
            latest_tx,
            self.settings.max_bars,
        );
        let inputs = WorkerInputs {
            ticks: ticks_rx,
            commands: commands_rx,
            shutdown: self.shutdown_tx.subscribe(),
            flush_every: self.settings.flush_interval,
        };
        let task = tokio::spawn(worker.run(inputs));

        symbols.insert(
            symbol.clone(),
            SymbolHandle {
                ticks: ticks_tx,
                commands: commands_tx,
                latest: latest_rx,
            },
        );
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }

        info!(symbol = %symbol, timeframes = ?self.settings.timeframes, "Tracking symbol");
        true
    }

    /// Tracked symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.read_symbols().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.read_symbols().contains_key(&normalize_symbol(symbol))
    }

    /// Hand a tick to its symbol's writer without blocking
    pub fn ingest(&self, tick: Tick) {
        let symbols = self.read_symbols();
        match symbols.get(&tick.symbol) {
            Some(handle) => {
                if handle.ticks.send(tick).is_err() {
                    // writer already exited
                    self.metrics.record_unrouted();
                }
            }
            None => {
                self.metrics.record_unrouted();
                debug!(symbol = %tick.symbol, "Tick for untracked symbol");
            }
        }
    }

    fn check_timeframe(&self, timeframe: Timeframe) -> Result<(), PipelineError> {
        if self.settings.timeframes.contains(&timeframe) {
            Ok(())
        } else {
            Err(PipelineError::UnknownTimeframe(timeframe))
        }
    }

    fn check_symbol(&self, symbol: &str) -> Result<String, PipelineError> {
        let symbol = normalize_symbol(symbol);
        if self.read_symbols().contains_key(&symbol) {
            Ok(symbol)
        } else {
            Err(PipelineError::UnknownSymbol(symbol))
        }
    }

    /// Closed bars, oldest first, read through to the store
    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
    ) -> Result<Vec<OhlcvBar>, PipelineError> {
        let symbol = self.check_symbol(symbol)?;
        self.check_timeframe(timeframe)?;
        let limit = limit.unwrap_or(self.settings.max_bars);
        Ok(self.store.read_range(&symbol, timeframe, limit).await?)
    }

    /// Pair analytics over the retained closed bars of both symbols
    pub async fn get_pair_analysis(
        &self,
        symbol1: &str,
        symbol2: &str,
        timeframe: Timeframe,
        window: Option<usize>,
    ) -> Result<PairAnalysis, PipelineError> {
        let symbol1 = self.check_symbol(symbol1)?;
        let symbol2 = self.check_symbol(symbol2)?;
        self.check_timeframe(timeframe)?;

        let limit = self.settings.max_bars;
        let bars1 = self.store.read_range(&symbol1, timeframe, limit).await?;
        let bars2 = self.store.read_range(&symbol2, timeframe, limit).await?;
        let window = window.unwrap_or(self.settings.default_window);

        Ok(analyze_pair(
            &symbol1, &symbol2, timeframe, &bars1, &bars2, window,
        )?)
    }

    /// Most recent accepted tick
    pub fn get_live_tick(&self, symbol: &str) -> Result<Option<Tick>, PipelineError> {
        let symbol = normalize_symbol(symbol);
        let symbols = self.read_symbols();
        let handle = symbols
            .get(&symbol)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.clone()))?;
        let latest = handle.latest.borrow().clone();
        Ok(latest)
    }

    async fn request<T>(
        &self,
        symbol: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, PipelineError> {
        let symbol = normalize_symbol(symbol);
        let commands = {
            let symbols = self.read_symbols();
            symbols
                .get(&symbol)
                .map(|h| h.commands.clone())
                .ok_or_else(|| PipelineError::UnknownSymbol(symbol.clone()))?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(make(reply_tx))
            .await
            .map_err(|_| PipelineError::WorkerGone(symbol.clone()))?;
        reply_rx
            .await
            .map_err(|_| PipelineError::WorkerGone(symbol))
    }

    /// Point-in-time copy of the symbol's tick buffer
    pub async fn snapshot_ticks(&self, symbol: &str) -> Result<Vec<Tick>, PipelineError> {
        self.request(symbol, WorkerCommand::Snapshot).await
    }

    /// Last `n` buffered ticks, oldest first
    pub async fn recent_ticks(&self, symbol: &str, n: usize) -> Result<Vec<Tick>, PipelineError> {
        self.request(symbol, |reply| WorkerCommand::Recent(n, reply))
            .await
    }

    /// In-progress bars (`is_closed = false`), one per timeframe with data
    pub async fn open_bars(&self, symbol: &str) -> Result<Vec<OhlcvBar>, PipelineError> {
        self.request(symbol, WorkerCommand::OpenBars).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the writers: each drains its queue, closes open bars, writes what
    /// it can and exits. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Writer task ended abnormally");
            }
        }

        let metrics = self.metrics.snapshot();
        info!(
            ticks = metrics.ticks_accepted,
            duplicates = metrics.duplicates,
            late_drops = metrics.late_drops,
            queue_drops = metrics.queue_drops,
            malformed = metrics.malformed,
            bars_closed = metrics.bars_closed,
            store_failures = metrics.store_failures,
            "Pipeline stopped"
        );
    }
}

impl TickSink for Pipeline {
    fn push(&self, tick: Tick) {
        self.ingest(tick);
    }

    fn on_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Connected { symbols } => {
                info!(symbols = ?symbols, "Feed connected");
            }
            FeedEvent::Disconnected { reason } => {
                self.metrics.record_disconnect();
                warn!(reason = %reason, "Feed disconnected");
            }
            FeedEvent::Malformed(e) => {
                self.metrics.record_malformed();
                warn!(error = %e, "Dropped malformed frame");
            }
            FeedEvent::Error(e) => {
                self.metrics.record_disconnect();
                warn!(error = %e, "Feed transport error");
            }
        }
    }
}
