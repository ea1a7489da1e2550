//! Per-symbol writer task
//!
//! Sole owner of one symbol's tick buffer, resampler, dedup window and
//! pending store writes. Everything reaches it through channels.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::dedup::DedupWindow;
use super::metrics::PipelineMetrics;
use crate::buffer::TickBuffer;
use crate::resample::Resampler;
use crate::store::BarStore;
use crate::types::{now_millis, OhlcvBar, Tick, Timeframe};

/// Read requests answered from the writer's own state
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Snapshot(oneshot::Sender<Vec<Tick>>),
    Recent(usize, oneshot::Sender<Vec<Tick>>),
    OpenBars(oneshot::Sender<Vec<OhlcvBar>>),
}

#[derive(Debug)]
struct PendingWrite {
    bar: OhlcvBar,
    attempts: u32,
}

pub(crate) struct SymbolWorker {
    symbol: String,
    buffer: TickBuffer,
    resampler: Resampler,
    dedup: DedupWindow,
    pending: BTreeMap<(Timeframe, i64), PendingWrite>,
    store: Arc<dyn BarStore>,
    metrics: Arc<PipelineMetrics>,
    latest: watch::Sender<Option<Tick>>,
    max_bars: usize,
}

/// Channels the writer listens on
pub(crate) struct WorkerInputs {
    pub ticks: broadcast::Receiver<Tick>,
    pub commands: mpsc::Receiver<WorkerCommand>,
    pub shutdown: watch::Receiver<bool>,
    pub flush_every: Duration,
}

impl SymbolWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        symbol: &str,
        buffer: TickBuffer,
        resampler: Resampler,
        dedup: DedupWindow,
        store: Arc<dyn BarStore>,
        metrics: Arc<PipelineMetrics>,
        latest: watch::Sender<Option<Tick>>,
        max_bars: usize,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            buffer,
            resampler,
            dedup,
            pending: BTreeMap::new(),
            store,
            metrics,
            latest,
            max_bars,
        }
    }

    pub(crate) async fn run(mut self, inputs: WorkerInputs) {
        let WorkerInputs {
            mut ticks,
            mut commands,
            mut shutdown,
            flush_every,
        } = inputs;

        self.seed_from_store().await;

        let mut cadence = tokio::time::interval(flush_every);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = ticks.recv() => match received {
                    Ok(tick) => self.apply(tick).await,
                    Err(RecvError::Lagged(skipped)) => {
                        self.metrics.record_queue_drops(skipped);
                        warn!(symbol = %self.symbol, skipped, "Tick queue full, dropped oldest ticks");
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(command) = commands.recv() => self.answer(command),
                _ = cadence.tick() => self.on_cadence(now_millis()).await,
            }
        }

        self.finish(&mut ticks).await;
    }

    /// Newest persisted bucket per timeframe becomes the closed boundary
    async fn seed_from_store(&mut self) {
        for timeframe in self.resampler.timeframes() {
            match self.store.latest_bucket(&self.symbol, timeframe).await {
                Ok(Some(bucket)) => {
                    self.resampler.seed_last_closed(timeframe, bucket);
                    debug!(symbol = %self.symbol, timeframe = %timeframe, bucket, "Resuming after stored bar");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol = %self.symbol, timeframe = %timeframe, error = %e, "Could not read last stored bar");
                }
            }
        }
    }

    async fn apply(&mut self, tick: Tick) {
        if !self.dedup.insert(&tick) {
            self.metrics.record_duplicate();
            return;
        }
        self.metrics.record_accepted();

        let outcome = self.resampler.on_tick(&tick);
        self.buffer.append(tick.clone());
        // an older tick never replaces the live price
        self.latest.send_if_modified(|current| match current {
            Some(live) if live.event_time > tick.event_time => false,
            _ => {
                *current = Some(tick);
                true
            }
        });

        if outcome.late_drops > 0 {
            self.metrics.record_late_drops(outcome.late_drops as u64);
            debug!(symbol = %self.symbol, timeframes = outcome.late_drops, "Late tick dropped");
        }
        self.metrics.record_revised(outcome.revised.len() as u64);
        self.metrics.record_closed(outcome.closed.len() as u64);

        let writes = outcome.into_writes();
        if !writes.is_empty() {
            for bar in writes {
                self.enqueue(bar);
            }
            self.write_pending().await;
        }
    }

    async fn on_cadence(&mut self, now: i64) {
        let closed = self.resampler.flush(now);
        self.metrics.record_closed(closed.len() as u64);
        for bar in closed {
            self.enqueue(bar);
        }
        self.write_pending().await;
    }

    fn answer(&self, command: WorkerCommand) {
        match command {
            WorkerCommand::Snapshot(reply) => {
                let _ = reply.send(self.buffer.snapshot());
            }
            WorkerCommand::Recent(n, reply) => {
                let _ = reply.send(self.buffer.recent(n));
            }
            WorkerCommand::OpenBars(reply) => {
                let _ = reply.send(self.resampler.open_bars());
            }
        }
    }

    fn enqueue(&mut self, bar: OhlcvBar) {
        debug!(
            symbol = %self.symbol,
            timeframe = %bar.timeframe,
            bucket_start = bar.bucket_start,
            close = bar.close,
            "Bar closed"
        );
        let timeframe = bar.timeframe;
        let key = (timeframe, bar.bucket_start);
        match self.pending.get_mut(&key) {
            Some(entry) => entry.bar = bar,
            None => {
                self.pending.insert(key, PendingWrite { bar, attempts: 0 });
            }
        }

        // retention would trim anything older than the newest max_bars anyway
        let queued = self
            .pending
            .range((timeframe, i64::MIN)..=(timeframe, i64::MAX))
            .count();
        if queued > self.max_bars.max(1) {
            let oldest = self
                .pending
                .range((timeframe, i64::MIN)..=(timeframe, i64::MAX))
                .next()
                .map(|(key, _)| *key);
            if let Some(oldest) = oldest {
                self.pending.remove(&oldest);
                self.metrics.record_pending_drop();
                warn!(
                    symbol = %self.symbol,
                    timeframe = %timeframe,
                    bucket_start = oldest.1,
                    "Retry queue full, discarded oldest unwritten bar"
                );
            }
        }
    }

    /// Write queued bars oldest first, stopping at the first failure
    async fn write_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut written: BTreeSet<Timeframe> = BTreeSet::new();
        let keys: Vec<(Timeframe, i64)> = self.pending.keys().copied().collect();
        for key in keys {
            let Some(entry) = self.pending.get_mut(&key) else {
                continue;
            };
            if entry.attempts > 0 {
                self.metrics.record_store_retry();
            }
            entry.attempts += 1;

            match self.store.write_closed_bar(&entry.bar).await {
                Ok(()) => {
                    self.pending.remove(&key);
                    written.insert(key.0);
                }
                Err(e) => {
                    self.metrics.record_store_failure();
                    error!(
                        symbol = %self.symbol,
                        timeframe = %key.0,
                        bucket_start = key.1,
                        pending = self.pending.len(),
                        error = %e,
                        "Failed to persist bar, will retry"
                    );
                    break;
                }
            }
        }

        for timeframe in written {
            if let Err(e) = self.store.retain(&self.symbol, timeframe, self.max_bars).await {
                self.metrics.record_store_failure();
                warn!(symbol = %self.symbol, timeframe = %timeframe, error = %e, "Retention trim failed");
            }
        }
    }

    /// Drain queued ticks, force-close open bars, try one last write
    async fn finish(&mut self, ticks: &mut broadcast::Receiver<Tick>) {
        loop {
            match ticks.try_recv() {
                Ok(tick) => self.apply(tick).await,
                Err(TryRecvError::Lagged(skipped)) => self.metrics.record_queue_drops(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let closed = self.resampler.close_all();
        self.metrics.record_closed(closed.len() as u64);
        for bar in closed {
            self.enqueue(bar);
        }
        self.write_pending().await;

        if self.pending.is_empty() {
            info!(symbol = %self.symbol, ticks = self.buffer.len(), "Writer stopped");
        } else {
            error!(
                symbol = %self.symbol,
                unwritten = self.pending.len(),
                "Writer stopped with unpersisted bars"
            );
        }
    }
}
