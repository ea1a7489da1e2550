//! In-process tick source that replays a recorded sequence
//!
//! Used to drive the pipeline from tests and offline captures with the same
//! `TickSource` contract as the live feed.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{FeedEvent, TickSink, TickSource};
use crate::error::FeedError;
use crate::types::Tick;

pub struct ReplaySource {
    ticks: Vec<Tick>,
    pace: Option<Duration>,
}

impl ReplaySource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks, pace: None }
    }

    /// Sleep between ticks instead of pushing them back to back
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

#[async_trait]
impl TickSource for ReplaySource {
    fn name(&self) -> &'static str {
        "Replay"
    }

    async fn start(
        &mut self,
        symbols: BTreeSet<String>,
        sink: Arc<dyn TickSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::NoSubscriptions);
        }
        sink.on_event(FeedEvent::Connected {
            symbols: symbols.iter().cloned().collect(),
        });

        for tick in self.ticks.drain(..) {
            if *shutdown.borrow() {
                break;
            }
            if !symbols.contains(&tick.symbol) {
                continue;
            }
            sink.push(tick);
            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
        }

        sink.on_event(FeedEvent::Disconnected {
            reason: "replay finished".to_string(),
        });
        Ok(())
    }
}
