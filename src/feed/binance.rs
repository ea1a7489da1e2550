//! Binance WebSocket client for real-time trades
//!
//! One combined-stream connection carries every tracked symbol. The stream
//! URL is rebuilt from the full symbol set on each (re)connect, so a
//! reconnect always resubscribes everything at once. Symbols added while
//! connected are subscribed with a `SUBSCRIBE` frame and kept for later
//! reconnects.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::backoff::Backoff;
use super::decode::{decode_frame, Decoded};
use super::{FeedCommand, FeedEvent, FeedHandle, TickSink, TickSource};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::types::normalize_symbol;

const WATCHDOG_TICK_SECS: u64 = 5;

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub struct BinanceTradeFeed {
    url: String,
    backoff: Backoff,
    watchdog_silence: Duration,
    symbols: BTreeSet<String>,
    commands_tx: mpsc::UnboundedSender<FeedCommand>,
    commands_rx: mpsc::UnboundedReceiver<FeedCommand>,
    next_request_id: u64,
    connected: bool,
}

impl BinanceTradeFeed {
    pub fn new(config: &FeedConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            url: config.url.clone(),
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
            watchdog_silence: Duration::from_secs(config.watchdog_silence_secs.max(1)),
            symbols: BTreeSet::new(),
            commands_tx,
            commands_rx,
            next_request_id: 1,
            connected: false,
        }
    }

    /// Handle for subscribing more symbols while the feed runs
    pub fn handle(&self) -> FeedHandle {
        FeedHandle::new(self.commands_tx.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }

    fn stream_name(symbol: &str) -> String {
        format!("{}@trade", symbol)
    }

    /// Combined-stream URL covering every symbol
    pub fn stream_url(base: &str, symbols: &BTreeSet<String>) -> String {
        let streams: Vec<String> = symbols.iter().map(|s| Self::stream_name(s)).collect();
        format!("{}?streams={}", base.trim_end_matches('/'), streams.join("/"))
    }

    fn subscribe_frame(&mut self, symbol: &str) -> Result<String, FeedError> {
        let request = SubscribeRequest {
            method: "SUBSCRIBE",
            params: vec![Self::stream_name(symbol)],
            id: self.next_request_id,
        };
        self.next_request_id += 1;
        serde_json::to_string(&request).map_err(|e| FeedError::Subscribe(e.to_string()))
    }

    /// Add a symbol to the set before its `SUBSCRIBE` frame goes out, so a
    /// reconnect after a failed send still includes it. None if already joined.
    fn join(&mut self, symbol: &str) -> Result<Option<String>, FeedError> {
        if !self.symbols.insert(symbol.to_string()) {
            return Ok(None);
        }
        self.subscribe_frame(symbol).map(Some)
    }

    /// Fold queued subscribe commands into the symbol set
    fn drain_commands(&mut self) {
        while let Ok(FeedCommand::Subscribe(symbol)) = self.commands_rx.try_recv() {
            self.symbols.insert(symbol);
        }
    }

    /// Connect once and pump frames until the socket drops or shutdown.
    async fn session(
        &mut self,
        sink: &Arc<dyn TickSink>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, FeedError> {
        let url = Self::stream_url(&self.url, &self.symbols);
        tracing::info!(
            source = %"Binance",
            url = %self.url,
            symbols = ?self.symbols,
            attempt = self.backoff.attempt(),
            "Connecting to Binance WebSocket..."
        );

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|source| FeedError::Connect {
                url: self.url.clone(),
                source,
            })?;
        let (mut write, mut read) = ws_stream.split();

        self.connected = true;
        self.backoff.reset();
        sink.on_event(FeedEvent::Connected {
            symbols: self.symbols(),
        });
        tracing::info!(source = %"Binance", streams = self.symbols.len(), "Connected to Binance WebSocket");

        let mut watchdog = tokio::time::interval(Duration::from_secs(WATCHDOG_TICK_SECS));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                Some(FeedCommand::Subscribe(symbol)) = self.commands_rx.recv() => {
                    let Some(frame) = self.join(&symbol)? else {
                        continue;
                    };
                    write
                        .send(Message::Text(frame))
                        .await
                        .map_err(|e| FeedError::Subscribe(e.to_string()))?;
                    tracing::info!(source = %"Binance", symbol = %symbol, "Subscribed to additional stream");
                }
                _ = watchdog.tick() => {
                    if last_tick.elapsed() >= self.watchdog_silence {
                        let reason = FeedError::Silent(self.watchdog_silence.as_secs()).to_string();
                        tracing::warn!(source = %"Binance", reason = %reason, "Forcing reconnect");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Lost(reason));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                            Ok(Decoded::Tick(tick)) => {
                                last_tick = Instant::now();
                                sink.push(tick);
                            }
                            Ok(Decoded::Control) => {
                                tracing::debug!(source = %"Binance", frame = %text, "Control frame");
                            }
                            Err(e) => sink.on_event(FeedEvent::Malformed(e)),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!(source = %"Binance", ?frame, "Connection closed by server");
                            return Ok(SessionEnd::Lost("closed by server".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(FeedError::Socket(e)),
                        None => return Ok(SessionEnd::Lost("stream ended".to_string())),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TickSource for BinanceTradeFeed {
    fn name(&self) -> &'static str {
        "Binance"
    }

    async fn start(
        &mut self,
        symbols: BTreeSet<String>,
        sink: Arc<dyn TickSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        self.symbols
            .extend(symbols.iter().map(|s| normalize_symbol(s)).filter(|s| !s.is_empty()));
        self.drain_commands();
        if self.symbols.is_empty() {
            return Err(FeedError::NoSubscriptions);
        }

        let mut first = true;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            if !first {
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    source = %"Binance",
                    attempt = self.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting with exponential backoff + jitter"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            first = false;
            self.drain_commands();

            let outcome = self.session(&sink, &mut shutdown).await;
            self.connected = false;
            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    tracing::info!(source = %"Binance", "Feed stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Lost(reason)) => {
                    sink.on_event(FeedEvent::Disconnected { reason });
                }
                Err(e) => {
                    tracing::error!(source = %"Binance", error = %e, "WebSocket failure");
                    sink.on_event(FeedEvent::Error(e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_config() -> FeedConfig {
        FeedConfig {
            url: "wss://fstream.binance.com/stream/".to_string(),
            symbols: vec!["btcusdt".into()],
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            watchdog_silence_secs: 30,
        }
    }

    #[test]
    fn stream_url_lists_every_symbol() {
        let symbols: BTreeSet<String> = ["ethusdt", "btcusdt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            BinanceTradeFeed::stream_url("wss://fstream.binance.com/stream/", &symbols),
            "wss://fstream.binance.com/stream?streams=btcusdt@trade/ethusdt@trade"
        );
    }

    #[test]
    fn subscribe_frames_use_increasing_ids() {
        let mut feed = BinanceTradeFeed::new(&feed_config());
        let first: serde_json::Value =
            serde_json::from_str(&feed.subscribe_frame("solusdt").unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&feed.subscribe_frame("xrpusdt").unwrap()).unwrap();

        assert_eq!(first["method"], "SUBSCRIBE");
        assert_eq!(first["params"][0], "solusdt@trade");
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
    }

    #[tokio::test]
    async fn handle_subscriptions_join_symbol_set() {
        let mut feed = BinanceTradeFeed::new(&feed_config());
        let handle = feed.handle();
        handle.subscribe("SOLUSDT").unwrap();
        assert!(handle.subscribe("  ").is_err());

        feed.drain_commands();
        assert_eq!(feed.symbols(), vec!["solusdt".to_string()]);
    }

    #[test]
    fn joined_symbol_survives_unsent_subscribe_frame() {
        let mut feed = BinanceTradeFeed::new(&feed_config());
        feed.symbols.insert("btcusdt".to_string());

        // frame built but never delivered: the socket dropped
        let frame = feed.join("solusdt").unwrap();
        assert!(frame.is_some());
        assert!(feed.join("solusdt").unwrap().is_none());

        let url = BinanceTradeFeed::stream_url(&feed.url, &feed.symbols);
        assert!(url.ends_with("streams=btcusdt@trade/solusdt@trade"), "{}", url);
    }

    #[tokio::test]
    async fn start_without_symbols_fails() {
        struct NullSink;
        impl TickSink for NullSink {
            fn push(&self, _tick: crate::types::Tick) {}
        }

        let mut feed = BinanceTradeFeed::new(&feed_config());
        let (_tx, rx) = watch::channel(false);
        let result = feed.start(BTreeSet::new(), Arc::new(NullSink), rx).await;
        assert!(matches!(result, Err(FeedError::NoSubscriptions)));
    }
}
