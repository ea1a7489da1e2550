//! Dashboard HTTP API
//!
//! Read-only JSON endpoints over the pipeline.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use super::DashboardContext;
use crate::error::PipelineError;
use crate::types::{normalize_symbol, now_millis, Timeframe};

type Ctx = State<Arc<DashboardContext>>;

/// Create the API router with all endpoints
pub fn create_router(context: Arc<DashboardContext>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/symbols", get(get_symbols))
        .route("/api/symbols/:symbol", post(add_symbol))
        .route("/api/ohlcv/:symbol/:timeframe", get(get_ohlcv))
        .route("/api/analyze/:symbol1/:symbol2", get(get_analysis))
        .route("/api/ticks/:symbol/latest", get(get_latest_tick))
        .with_state(context)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

fn fail(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(msg))).into_response()
}

fn pipeline_failure(e: PipelineError) -> Response {
    let status = match &e {
        PipelineError::UnknownSymbol(_) | PipelineError::UnknownTimeframe(_) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::Analytics(_) => StatusCode::BAD_REQUEST,
        PipelineError::WorkerGone(_) | PipelineError::Store(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    fail(status, e.to_string())
}

fn parse_timeframe(raw: &str) -> Result<Timeframe, Response> {
    raw.parse::<Timeframe>()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, e.to_string()))
}

/// GET /api/health - Counters and tracked set
async fn get_health(State(ctx): Ctx) -> Response {
    let pipeline = &ctx.pipeline;
    ok(HealthResponse {
        status: "ok",
        symbols: pipeline.symbols().len(),
        timeframes: pipeline.timeframes().to_vec(),
        metrics: pipeline.metrics(),
        timestamp: now_millis(),
    })
}

/// GET /api/symbols
async fn get_symbols(State(ctx): Ctx) -> Response {
    ok(SymbolsResponse {
        symbols: ctx.pipeline.symbols(),
        timeframes: ctx.pipeline.timeframes().to_vec(),
    })
}

/// POST /api/symbols/:symbol - Track a new symbol and subscribe it on the feed
async fn add_symbol(Path(symbol): Path<String>, State(ctx): Ctx) -> Response {
    let symbol = normalize_symbol(&symbol);
    if symbol.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "symbol must not be empty");
    }
    let added = ctx.pipeline.add_symbol(&symbol);
    if added {
        if let Some(feed) = &ctx.feed {
            if let Err(e) = feed.subscribe(&symbol) {
                return fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
            }
        }
    }
    ok(AddSymbolResponse { symbol, added })
}

#[derive(Debug, Deserialize)]
struct OhlcvQuery {
    limit: Option<usize>,
}

/// GET /api/ohlcv/:symbol/:timeframe?limit=100
async fn get_ohlcv(
    Path((symbol, timeframe)): Path<(String, String)>,
    Query(query): Query<OhlcvQuery>,
    State(ctx): Ctx,
) -> Response {
    let timeframe = match parse_timeframe(&timeframe) {
        Ok(tf) => tf,
        Err(response) => return response,
    };
    let bars = match ctx.pipeline.get_ohlcv(&symbol, timeframe, query.limit).await {
        Ok(bars) => bars,
        Err(e) => return pipeline_failure(e),
    };
    let open_bar = ctx
        .pipeline
        .open_bars(&symbol)
        .await
        .ok()
        .and_then(|open| open.into_iter().find(|bar| bar.timeframe == timeframe));

    ok(OhlcvResponse {
        symbol: symbol.to_lowercase(),
        timeframe,
        bars,
        open_bar,
    })
}

#[derive(Debug, Deserialize)]
struct AnalyzeQuery {
    timeframe: Option<String>,
    window: Option<usize>,
}

/// GET /api/analyze/:symbol1/:symbol2?timeframe=1m&window=20
async fn get_analysis(
    Path((symbol1, symbol2)): Path<(String, String)>,
    Query(query): Query<AnalyzeQuery>,
    State(ctx): Ctx,
) -> Response {
    let timeframe = match query.timeframe.as_deref() {
        Some(raw) => match parse_timeframe(raw) {
            Ok(tf) => tf,
            Err(response) => return response,
        },
        None => Timeframe::default(),
    };

    match ctx
        .pipeline
        .get_pair_analysis(&symbol1, &symbol2, timeframe, query.window)
        .await
    {
        Ok(analysis) => ok(AnalysisResponse::new(analysis, ctx.zscore_threshold)),
        Err(e) => pipeline_failure(e),
    }
}

/// GET /api/ticks/:symbol/latest
async fn get_latest_tick(Path(symbol): Path<String>, State(ctx): Ctx) -> Response {
    match ctx.pipeline.get_live_tick(&symbol) {
        Ok(tick) => ok(LatestTickResponse {
            symbol: symbol.to_lowercase(),
            tick,
        }),
        Err(e) => pipeline_failure(e),
    }
}
