//! Dashboard stats and chart endpoints.

use super::{AdminState, ApiError};
use crate::stats::memory_rss_bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "24h".to_string()
}

/// Seconds covered, bucket strftime format, and bucket count for a period.
fn period_params(period: &str) -> (i64, &'static str, usize) {
    match period {
        "1h" => (3_600, "%Y-%m-%d %H:%M", 60),
        "7d" => (7 * 86_400, "%Y-%m-%d", 7),
        "30d" => (30 * 86_400, "%Y-%m-%d", 30),
        _ => (86_400, "%Y-%m-%d %H:00", 24),
    }
}

/// GET /api/dashboard/stats
pub async fn stats(State(state): State<AdminState>) -> Result<Json<Value>, ApiError> {
    let (total, active, running) = state.ctx.store.bot_counts().map_err(ApiError::Internal)?;
    let snapshot = state.ctx.stats.snapshot();

    Ok(Json(json!({
        "bots": {"total": total, "active": active, "running": running},
        "requests": snapshot,
        "uptimeSecs": state.ctx.stats.uptime_secs(),
        "memoryBytes": memory_rss_bytes(),
    })))
}

/// GET /api/dashboard/charts/messages?period=…
pub async fn messages_chart(
    State(state): State<AdminState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Value>, ApiError> {
    let (window, format, _) = period_params(&query.period);
    let since = chrono::Utc::now().timestamp() - window;

    let buckets = state
        .ctx
        .store
        .message_buckets(since, format)
        .map_err(ApiError::Internal)?;

    let points: Vec<Value> = buckets
        .into_iter()
        .map(|(label, count)| json!({"label": label, "count": count}))
        .collect();

    Ok(Json(json!({"period": query.period, "points": points})))
}

/// GET /api/dashboard/charts/ai-requests?period=…
///
/// Synthetic series derived from the process counter: no per-call timestamps
/// are persisted, so the total is spread evenly across the period's buckets.
pub async fn ai_requests_chart(
    State(state): State<AdminState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Value>, ApiError> {
    let (_, _, bucket_count) = period_params(&query.period);
    let total = state.ctx.stats.api_calls();

    let base = total / bucket_count as u64;
    let remainder = (total % bucket_count as u64) as usize;

    let points: Vec<Value> = (0..bucket_count)
        .map(|i| {
            let extra = if i >= bucket_count - remainder { 1 } else { 0 };
            json!({"index": i, "count": base + extra})
        })
        .collect();

    Ok(Json(json!({
        "period": query.period,
        "total": total,
        "points": points,
    })))
}

/// GET /api/dashboard/charts/system
pub async fn system_chart(State(state): State<AdminState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "uptimeSecs": state.ctx.stats.uptime_secs(),
        "memoryBytes": memory_rss_bytes(),
        "requests": state.ctx.stats.snapshot(),
        "activeBots": state.sup.active_ids().await,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_params() {
        assert_eq!(period_params("1h").2, 60);
        assert_eq!(period_params("24h").0, 86_400);
        assert_eq!(period_params("7d").1, "%Y-%m-%d");
        assert_eq!(period_params("30d").2, 30);
        // Unknown periods fall back to 24h.
        assert_eq!(period_params("bogus").0, 86_400);
    }
}
