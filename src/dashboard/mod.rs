//! Dashboard Module
//!
//! HTTP API for inspecting bars, live ticks and pair analytics.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::feed::FeedHandle;
use crate::pipeline::Pipeline;

/// Shared state behind every route
pub struct DashboardContext {
    pub pipeline: Arc<Pipeline>,
    pub zscore_threshold: f64,
    /// Live feed to subscribe newly tracked symbols on
    pub feed: Option<FeedHandle>,
}

impl DashboardContext {
    pub fn new(pipeline: Arc<Pipeline>, zscore_threshold: f64) -> Self {
        Self {
            pipeline,
            zscore_threshold,
            feed: None,
        }
    }

    pub fn with_feed(mut self, feed: FeedHandle) -> Self {
        self.feed = Some(feed);
        self
    }
}

/// Serve the API until `shutdown` turns true
pub async fn serve(
    context: Arc<DashboardContext>,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind dashboard on {addr}"))?;
    info!(addr = %addr, "Dashboard listening");

    axum::serve(listener, create_router(context))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("dashboard server failed")
}
