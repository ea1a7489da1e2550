//! Bounded memory of recently seen ticks
//!
//! Ticks with a vendor trade id are keyed by id; others by their exact
//! (event time, price, quantity). The oldest key is forgotten first.

use std::collections::{HashSet, VecDeque};

use crate::types::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TickKey {
    TradeId(u64),
    Exact { ts: i64, price: u64, quantity: u64 },
}

impl TickKey {
    fn of(tick: &Tick) -> Self {
        match tick.trade_id {
            Some(id) => TickKey::TradeId(id),
            None => TickKey::Exact {
                ts: tick.event_time,
                price: tick.price.to_bits(),
                quantity: tick.quantity.to_bits(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<TickKey>,
    seen: HashSet<TickKey>,
}

impl DedupWindow {
    /// `capacity == 0` disables duplicate suppression
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Record the tick; false if it was already seen
    pub fn insert(&mut self, tick: &Tick) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let key = TickKey::of(tick);
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
