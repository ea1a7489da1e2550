//! Per-symbol tick buffer
//!
//! Fixed-capacity window of recent ticks ordered by event time. Appends never
//! fail; once full the tick with the smallest event time is evicted.

use std::collections::VecDeque;

use crate::types::Tick;

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct TickBuffer {
    symbol: String,
    ticks: VecDeque<Tick>,
    capacity: usize,
    evicted: u64,
}

impl TickBuffer {
    pub fn new(symbol: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            symbol: symbol.to_string(),
            // Grow lazily: most symbols never fill a 10k buffer.
            ticks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Insert a tick by event time. When full, the oldest tick is evicted, or
    /// the incoming one is dropped if it is older than everything held.
    pub fn append(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            let oldest = self.ticks.front().map(|t| t.event_time);
            if oldest.is_some_and(|oldest| tick.event_time < oldest) {
                self.evicted += 1;
                return;
            }
            self.ticks.pop_front();
            self.evicted += 1;
        }

        // equal timestamps keep arrival order
        let mut at = self.ticks.len();
        while at > 0 && self.ticks[at - 1].event_time > tick.event_time {
            at -= 1;
        }
        self.ticks.insert(at, tick);
    }

    /// Point-in-time copy, oldest event time first
    pub fn snapshot(&self) -> Vec<Tick> {
        self.ticks.iter().cloned().collect()
    }

    /// Last `n` ticks, oldest first
    pub fn recent(&self, n: usize) -> Vec<Tick> {
        let skip = self.ticks.len().saturating_sub(n);
        self.ticks.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ticks evicted or refused by overflow since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
