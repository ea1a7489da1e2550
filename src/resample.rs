//! Resampler - Builds OHLCV bars from the tick stream
//!
//! One builder per configured timeframe. Each keeps a single in-progress bar
//! and the boundary of the last closed bucket. A bar closes when a tick for a
//! later bucket arrives or when the wall clock passes the end of its bucket.

use std::collections::{BTreeMap, VecDeque};

use crate::types::{OhlcvBar, Tick, Timeframe};

/// What a tick or a flush did to the bar series of one symbol
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResampleOutcome {
    /// Bars that became immutable and must be written
    pub closed: Vec<OhlcvBar>,
    /// Already-closed bars amended by a late tick inside the grace window
    pub revised: Vec<OhlcvBar>,
    /// Timeframes for which the tick arrived too late and was discarded
    pub late_drops: u32,
}

impl ResampleOutcome {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.revised.is_empty() && self.late_drops == 0
    }

    /// Closed and revised bars, both of which go to the store as upserts
    pub fn into_writes(self) -> Vec<OhlcvBar> {
        let mut writes = self.closed;
        writes.extend(self.revised);
        writes
    }

    fn absorb(&mut self, other: ResampleOutcome) {
        self.closed.extend(other.closed);
        self.revised.extend(other.revised);
        self.late_drops += other.late_drops;
    }
}

#[derive(Debug, Clone)]
struct BuildingBar {
    bucket_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    trades: u64,
    /// event time of the tick that set `open`
    first_ts: i64,
    /// event time of the tick that set `close`
    last_ts: i64,
}

impl BuildingBar {
    fn new(bucket_start: i64, tick: &Tick) -> Self {
        Self {
            bucket_start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.quantity,
            trades: 1,
            first_ts: tick.event_time,
            last_ts: tick.event_time,
        }
    }

    /// Out-of-order ticks inside the bucket are placed by event time, so a
    /// late arrival never becomes the open or close unless its timestamp says so.
    fn update(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.volume += tick.quantity;
        self.trades += 1;
        if tick.event_time < self.first_ts {
            self.open = tick.price;
            self.first_ts = tick.event_time;
        }
        if tick.event_time >= self.last_ts {
            self.close = tick.price;
            self.last_ts = tick.event_time;
        }
    }

    fn finalize(&self, symbol: &str, timeframe: Timeframe, is_closed: bool) -> OhlcvBar {
        OhlcvBar {
            symbol: symbol.to_string(),
            timeframe,
            bucket_start: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trades: self.trades,
            is_closed,
        }
    }
}

#[derive(Debug, Clone)]
struct BarBuilder {
    timeframe: Timeframe,
    current: Option<BuildingBar>,
    last_closed_bucket: Option<i64>,
    /// Most recent closed bars, newest last, kept for late-tick revisions
    recent_closed: VecDeque<BuildingBar>,
}

impl BarBuilder {
    fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
            last_closed_bucket: None,
            recent_closed: VecDeque::new(),
        }
    }

    /// Oldest bucket a late tick may still revise
    fn grace_floor(&self, grace_buckets: u32) -> Option<i64> {
        let reference = match (&self.current, self.last_closed_bucket) {
            (Some(current), _) => current.bucket_start,
            (None, Some(closed)) => closed + self.timeframe.duration_millis(),
            (None, None) => return None,
        };
        Some(reference - grace_buckets as i64 * self.timeframe.duration_millis())
    }

    fn close_current(&mut self, symbol: &str, grace_buckets: u32) -> Option<OhlcvBar> {
        let current = self.current.take()?;
        let bar = current.finalize(symbol, self.timeframe, true);
        self.last_closed_bucket = Some(bar.bucket_start);
        if grace_buckets > 0 {
            self.recent_closed.push_back(current);
            while self.recent_closed.len() > grace_buckets as usize {
                self.recent_closed.pop_front();
            }
        }
        Some(bar)
    }

    fn on_tick(&mut self, symbol: &str, tick: &Tick, grace_buckets: u32) -> ResampleOutcome {
        let bucket = self.timeframe.bucket_start(tick.event_time);
        let mut outcome = ResampleOutcome::default();

        match self.current.as_ref().map(|current| current.bucket_start) {
            Some(start) if start == bucket => {
                if let Some(current) = self.current.as_mut() {
                    current.update(tick);
                }
                return outcome;
            }
            Some(start) if start < bucket => {
                if let Some(bar) = self.close_current(symbol, grace_buckets) {
                    outcome.closed.push(bar);
                }
            }
            Some(_) => return self.on_late_tick(symbol, tick, bucket, grace_buckets),
            None => {
                if self.last_closed_bucket.is_some_and(|closed| bucket <= closed) {
                    return self.on_late_tick(symbol, tick, bucket, grace_buckets);
                }
            }
        }

        self.current = Some(BuildingBar::new(bucket, tick));
        outcome
    }

    fn on_late_tick(
        &mut self,
        symbol: &str,
        tick: &Tick,
        bucket: i64,
        grace_buckets: u32,
    ) -> ResampleOutcome {
        let mut outcome = ResampleOutcome::default();
        let within_grace = grace_buckets > 0
            && self
                .grace_floor(grace_buckets)
                .is_some_and(|floor| bucket >= floor);

        let timeframe = self.timeframe;
        let revised = if within_grace {
            self.recent_closed
                .iter_mut()
                .find(|bar| bar.bucket_start == bucket)
                .map(|bar| {
                    bar.update(tick);
                    bar.finalize(symbol, timeframe, true)
                })
        } else {
            None
        };

        match revised {
            Some(bar) => outcome.revised.push(bar),
            None => outcome.late_drops += 1,
        }
        outcome
    }

    fn flush(&mut self, symbol: &str, now: i64, lateness_ms: i64, grace: u32) -> Option<OhlcvBar> {
        let due = self.current.as_ref().is_some_and(|current| {
            now >= current.bucket_start + self.timeframe.duration_millis() + lateness_ms
        });
        if due {
            self.close_current(symbol, grace)
        } else {
            None
        }
    }
}

/// Multi-timeframe bar builder for one symbol
#[derive(Debug, Clone)]
pub struct Resampler {
    symbol: String,
    builders: BTreeMap<Timeframe, BarBuilder>,
    late_grace_buckets: u32,
    allowed_lateness_ms: i64,
}

impl Resampler {
    pub fn new(symbol: &str, timeframes: &[Timeframe]) -> Self {
        let builders = timeframes
            .iter()
            .map(|&tf| (tf, BarBuilder::new(tf)))
            .collect();
        Self {
            symbol: symbol.to_string(),
            builders,
            late_grace_buckets: 0,
            allowed_lateness_ms: 0,
        }
    }

    /// Number of closed buckets behind the open one that late ticks may still amend
    pub fn with_late_grace(mut self, buckets: u32) -> Self {
        self.late_grace_buckets = buckets;
        self
    }

    /// Extra wall-clock time past a bucket's end before a quiet bar is closed
    pub fn with_allowed_lateness(mut self, lateness_ms: i64) -> Self {
        self.allowed_lateness_ms = lateness_ms.max(0);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.builders.keys().copied().collect()
    }

    /// Mark `bucket_start` as already closed, e.g. the newest persisted bar
    /// after a restart, so a fresh partial bar can never overwrite it.
    pub fn seed_last_closed(&mut self, timeframe: Timeframe, bucket_start: i64) {
        if let Some(builder) = self.builders.get_mut(&timeframe) {
            if builder.current.is_none() {
                builder.last_closed_bucket = Some(
                    builder
                        .last_closed_bucket
                        .map_or(bucket_start, |b| b.max(bucket_start)),
                );
            }
        }
    }

    /// Apply one tick to every timeframe
    pub fn on_tick(&mut self, tick: &Tick) -> ResampleOutcome {
        let mut outcome = ResampleOutcome::default();
        for builder in self.builders.values_mut() {
            outcome.absorb(builder.on_tick(&self.symbol, tick, self.late_grace_buckets));
        }
        outcome
    }

    /// Close bars whose bucket ended before `now` (epoch millis)
    pub fn flush(&mut self, now: i64) -> Vec<OhlcvBar> {
        self.builders
            .values_mut()
            .filter_map(|builder| {
                builder.flush(
                    &self.symbol,
                    now,
                    self.allowed_lateness_ms,
                    self.late_grace_buckets,
                )
            })
            .collect()
    }

    /// Force-close every open bar (shutdown path)
    pub fn close_all(&mut self) -> Vec<OhlcvBar> {
        self.builders
            .values_mut()
            .filter_map(|builder| builder.close_current(&self.symbol, self.late_grace_buckets))
            .collect()
    }

    /// In-progress bar for a timeframe, `is_closed = false`
    pub fn current(&self, timeframe: Timeframe) -> Option<OhlcvBar> {
        self.builders
            .get(&timeframe)?
            .current
            .as_ref()
            .map(|bar| bar.finalize(&self.symbol, timeframe, false))
    }

    pub fn open_bars(&self) -> Vec<OhlcvBar> {
        self.builders
            .keys()
            .filter_map(|&tf| self.current(tf))
            .collect()
    }

    pub fn last_closed_bucket(&self, timeframe: Timeframe) -> Option<i64> {
        self.builders.get(&timeframe)?.last_closed_bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // an hour boundary in November 2023, aligned to every supported timeframe
    const BASE: i64 = 1_700_000_000_000 - 1_700_000_000_000 % 3_600_000;

    fn tick(ts: i64, price: f64, qty: f64) -> Tick {
        Tick::new("btcusdt", price, qty, ts)
    }

    #[test]
    fn ticks_within_one_second_build_one_bar() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1]);
        for (i, price) in [100.0, 101.0, 99.0, 102.0].into_iter().enumerate() {
            let outcome = resampler.on_tick(&tick(BASE + i as i64 * 100, price, 1.0));
            assert!(outcome.is_empty());
        }

        let bar = resampler.current(Timeframe::Sec1).unwrap();
        assert_eq!(bar.bucket_start, BASE);
        assert_eq!(
            (bar.open, bar.high, bar.low, bar.close, bar.volume),
            (100.0, 102.0, 99.0, 102.0, 4.0)
        );
        assert_eq!(bar.trades, 4);
        assert!(!bar.is_closed);
    }

    #[test]
    fn later_bucket_closes_current_bar() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1]);
        resampler.on_tick(&tick(BASE + 10, 50.0, 2.0));
        resampler.on_tick(&tick(BASE + 900, 51.0, 0.5));

        let outcome = resampler.on_tick(&tick(BASE + 1_000, 52.0, 1.0));
        assert_eq!(outcome.closed.len(), 1);
        let closed = &outcome.closed[0];
        assert!(closed.is_closed);
        assert_eq!(closed.bucket_start, BASE);
        assert_eq!(closed.close, 51.0);
        assert_eq!(closed.volume, 2.5);

        let current = resampler.current(Timeframe::Sec1).unwrap();
        assert_eq!(current.bucket_start, BASE + 1_000);
        assert_eq!(current.open, 52.0);
    }

    #[test]
    fn every_timeframe_is_fed_by_each_tick() {
        let mut resampler =
            Resampler::new("btcusdt", &[Timeframe::Sec1, Timeframe::Min1, Timeframe::Min5]);
        resampler.on_tick(&tick(BASE, 10.0, 1.0));
        let outcome = resampler.on_tick(&tick(BASE + 61_000, 11.0, 1.0));

        let mut closed: Vec<Timeframe> = outcome.closed.iter().map(|b| b.timeframe).collect();
        closed.sort();
        assert_eq!(closed, vec![Timeframe::Sec1, Timeframe::Min1]);
        assert_eq!(resampler.current(Timeframe::Min5).unwrap().volume, 2.0);
    }

    #[test]
    fn out_of_order_tick_inside_bucket_is_placed_by_event_time() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Min1]);
        resampler.on_tick(&tick(BASE + 20_000, 100.0, 1.0));
        resampler.on_tick(&tick(BASE + 40_000, 105.0, 1.0));
        // arrives last but happened first
        resampler.on_tick(&tick(BASE + 5_000, 98.0, 1.0));

        let bar = resampler.current(Timeframe::Min1).unwrap();
        assert_eq!(bar.open, 98.0);
        assert_eq!(bar.close, 105.0);
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.volume, 3.0);
    }

    #[test]
    fn tick_for_closed_bucket_is_dropped_without_grace() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1]);
        resampler.on_tick(&tick(BASE, 10.0, 1.0));
        resampler.on_tick(&tick(BASE + 1_500, 11.0, 1.0));

        let outcome = resampler.on_tick(&tick(BASE + 200, 99.0, 5.0));
        assert_eq!(outcome.late_drops, 1);
        assert!(outcome.closed.is_empty());
        assert!(outcome.revised.is_empty());
        assert_eq!(resampler.current(Timeframe::Sec1).unwrap().volume, 1.0);
    }

    #[test]
    fn late_tick_within_grace_revises_closed_bar() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1]).with_late_grace(1);
        resampler.on_tick(&tick(BASE + 100, 10.0, 1.0));
        resampler.on_tick(&tick(BASE + 1_100, 11.0, 1.0));

        let outcome = resampler.on_tick(&tick(BASE + 50, 8.0, 2.0));
        assert_eq!(outcome.revised.len(), 1);
        let revised = &outcome.revised[0];
        assert_eq!(revised.bucket_start, BASE);
        assert_eq!(revised.open, 8.0);
        assert_eq!(revised.low, 8.0);
        assert_eq!(revised.close, 10.0);
        assert_eq!(revised.volume, 3.0);

        // two buckets back is outside a one-bucket grace window
        resampler.on_tick(&tick(BASE + 2_100, 12.0, 1.0));
        let outcome = resampler.on_tick(&tick(BASE + 60, 7.0, 1.0));
        assert_eq!(outcome.late_drops, 1);
    }

    #[test]
    fn flush_closes_quiet_bar_after_bucket_end() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1, Timeframe::Min1]);
        resampler.on_tick(&tick(BASE + 300, 10.0, 1.0));

        assert!(resampler.flush(BASE + 999).is_empty());
        let closed = resampler.flush(BASE + 1_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].timeframe, Timeframe::Sec1);
        assert!(resampler.current(Timeframe::Sec1).is_none());
        assert!(resampler.current(Timeframe::Min1).is_some());

        // a straggler for the flushed bucket is late, not a new bar
        let outcome = resampler.on_tick(&tick(BASE + 800, 10.5, 1.0));
        assert_eq!(outcome.late_drops, 1);
        assert!(resampler.current(Timeframe::Sec1).is_none());
    }

    #[test]
    fn allowed_lateness_delays_flush() {
        let mut resampler =
            Resampler::new("btcusdt", &[Timeframe::Sec1]).with_allowed_lateness(250);
        resampler.on_tick(&tick(BASE, 10.0, 1.0));
        assert!(resampler.flush(BASE + 1_100).is_empty());
        assert_eq!(resampler.flush(BASE + 1_250).len(), 1);
    }

    #[test]
    fn seeded_boundary_rejects_partial_rewrite() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Min1]);
        resampler.seed_last_closed(Timeframe::Min1, BASE);

        let outcome = resampler.on_tick(&tick(BASE + 30_000, 10.0, 1.0));
        assert_eq!(outcome.late_drops, 1);
        let outcome = resampler.on_tick(&tick(BASE + 60_000, 10.0, 1.0));
        assert!(outcome.is_empty());
        assert_eq!(
            resampler.current(Timeframe::Min1).unwrap().bucket_start,
            BASE + 60_000
        );
    }

    #[test]
    fn close_all_drains_open_bars() {
        let mut resampler = Resampler::new("btcusdt", &[Timeframe::Sec1, Timeframe::Min5]);
        resampler.on_tick(&tick(BASE, 10.0, 1.0));
        let closed = resampler.close_all();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|bar| bar.is_closed && bar.is_consistent()));
        assert!(resampler.open_bars().is_empty());
    }
}
