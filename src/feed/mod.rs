//! Tick source adapters
//!
//! A [`TickSource`] owns the transport (connection, subscriptions, reconnect
//! backoff) and pushes validated [`Tick`]s into a [`TickSink`]. Vendor payloads
//! are decoded at this boundary; nothing malformed reaches the pipeline.

mod backoff;
mod binance;
mod decode;
mod replay;

pub use backoff::Backoff;
pub use binance::BinanceTradeFeed;
pub use decode::{decode_frame, Decoded};
pub use replay::ReplaySource;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::{DecodeError, FeedError};
use crate::types::{normalize_symbol, Tick};

/// Receives everything a source produces. Must not block.
pub trait TickSink: Send + Sync {
    fn push(&self, tick: Tick);

    /// Connection lifecycle and rejected frames
    fn on_event(&self, _event: FeedEvent) {}
}

/// Non-tick events from a source
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connected and subscribed to the full symbol set
    Connected { symbols: Vec<String> },
    /// Connection lost; a reconnect follows
    Disconnected { reason: String },
    /// Frame dropped at the decode boundary
    Malformed(DecodeError),
    /// Transport failure (connect or socket error)
    Error(String),
}

/// Trait for tick source clients
#[async_trait]
pub trait TickSource: Send {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Stream ticks for `symbols` into `sink` until `shutdown` turns true.
    ///
    /// Transport failures are retried internally; the call only returns on
    /// shutdown, end of input, or when there is nothing to subscribe to.
    async fn start(
        &mut self,
        symbols: BTreeSet<String>,
        sink: Arc<dyn TickSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), FeedError>;
}

/// Runtime requests to a running source
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Subscribe(String),
}

/// Cloneable handle for adding instruments to a running source
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<FeedCommand>) -> Self {
        Self { tx }
    }

    /// Add an instrument without touching existing subscriptions
    pub fn subscribe(&self, symbol: &str) -> Result<(), FeedError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(FeedError::Subscribe("empty symbol".to_string()));
        }
        self.tx
            .send(FeedCommand::Subscribe(symbol))
            .map_err(|_| FeedError::Subscribe("feed is not running".to_string()))
    }
}
