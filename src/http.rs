//! The thin HTTP adapter. Handlers only parse query params,
//! call into [`crate::inspect_service::InspectService`] or
//! [`crate::worker_manager::WorkerManagerHandle`], and serialize the
//! result — no business logic lives here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::bots::bot::BotSnapshot;
use crate::bots::state::BotState;
use crate::bots::transport::GcTransport;
use crate::formatter::ItemInfo;
use crate::inspect_service::{parse_query, InspectService, InspectServiceError};
use crate::worker::WorkerStats;
use crate::worker_manager::{AggregateStats, WorkerManagerHandle};

/// Shared application state every handler reaches through `State`.
pub struct AppState<T: GcTransport> {
    pub inspect_service: InspectService<T>,
    pub worker_manager: WorkerManagerHandle,
}

pub fn router<T: GcTransport + 'static>(state: Arc<AppState<T>>) -> Router {
    Router::new()
        .route("/", get(inspect_handler::<T>))
        .route("/inspect", get(inspect_handler::<T>))
        .route("/stats", get(stats_handler::<T>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct InspectParams {
    s: Option<String>,
    m: Option<String>,
    a: Option<String>,
    d: Option<String>,
    url: Option<String>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
struct InspectResponseBody {
    iteminfo: ItemInfo,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn inspect_handler<T: GcTransport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Query(params): Query<InspectParams>,
) -> Response {
    let query = match parse_query(
        params.s.as_deref(),
        params.m.as_deref(),
        params.a.as_deref(),
        params.d.as_deref(),
        params.url.as_deref(),
        params.refresh,
    ) {
        Ok(query) => query,
        Err(err) => return error_response(&err),
    };

    match state.inspect_service.inspect(query).await {
        Ok(iteminfo) => (StatusCode::OK, Json(InspectResponseBody { iteminfo })).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &InspectServiceError) -> Response {
    let status = match err {
        InspectServiceError::MalformedInput(_) => StatusCode::BAD_REQUEST,
        InspectServiceError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        InspectServiceError::QueueTimeout => StatusCode::REQUEST_TIMEOUT,
        InspectServiceError::DispatchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        InspectServiceError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        InspectServiceError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

#[derive(Debug, Serialize)]
struct BotStatsResponse {
    username: String,
    state: &'static str,
    inspects: u64,
    successes: u64,
    failures: u64,
}

#[derive(Debug, Serialize)]
struct WorkerStatsResponse {
    total_bots: usize,
    ready_bots: usize,
    busy_bots: usize,
    cooldown_bots: usize,
    error_bots: usize,
    inspects: u64,
    successes: u64,
    failures: u64,
    bots: Vec<BotStatsResponse>,
}

#[derive(Debug, Serialize)]
struct PercentilesResponse {
    p50: Option<u64>,
    p90: Option<u64>,
    p95: Option<u64>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    workers: Vec<WorkerStatsResponse>,
    percentiles: PercentilesResponse,
    successful: u64,
    failed: u64,
    cached: u64,
    timeouts: u64,
    retried_inspections: u64,
    success_after_retry: u64,
}

fn render_bot(bot: &BotSnapshot) -> BotStatsResponse {
    BotStatsResponse {
        username: bot.username.clone(),
        state: state_str(bot.state),
        inspects: bot.counters.inspects,
        successes: bot.counters.successes,
        failures: bot.counters.failures,
    }
}

fn state_str(state: BotState) -> &'static str {
    state.as_str()
}

fn render_worker(worker: &WorkerStats) -> WorkerStatsResponse {
    WorkerStatsResponse {
        total_bots: worker.total_bots,
        ready_bots: worker.ready_bots,
        busy_bots: worker.busy_bots,
        cooldown_bots: worker.cooldown_bots,
        error_bots: worker.error_bots,
        inspects: worker.inspects,
        successes: worker.successes,
        failures: worker.failures,
        bots: worker.bots.iter().map(render_bot).collect(),
    }
}

fn render_stats(stats: &AggregateStats) -> StatsResponse {
    StatsResponse {
        workers: stats.workers.iter().map(render_worker).collect(),
        percentiles: PercentilesResponse {
            p50: stats.percentiles.p50,
            p90: stats.percentiles.p90,
            p95: stats.percentiles.p95,
        },
        successful: stats.successful,
        failed: stats.failed,
        cached: stats.cached,
        timeouts: stats.timeouts,
        retried_inspections: stats.retried_inspections,
        success_after_retry: stats.success_after_retry,
    }
}

async fn stats_handler<T: GcTransport + 'static>(State(state): State<Arc<AppState<T>>>) -> Response {
    let stats = state.worker_manager.get_stats().await;
    (StatusCode::OK, Json(render_stats(&stats))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::state::BotCounters;

    #[test]
    fn error_maps_to_expected_status() {
        assert_eq!(
            error_response(&InspectServiceError::QueueFull).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            error_response(&InspectServiceError::MalformedInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&InspectServiceError::QueueTimeout).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            error_response(&InspectServiceError::DispatchTimeout(4)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn renders_bot_snapshot() {
        let snapshot = BotSnapshot {
            username: "alice".to_string(),
            state: BotState::Ready,
            counters: BotCounters { inspects: 3, successes: 2, failures: 1, ..Default::default() },
        };
        let rendered = render_bot(&snapshot);
        assert_eq!(rendered.username, "alice");
        assert_eq!(rendered.state, "ready");
        assert_eq!(rendered.inspects, 3);
    }
}
