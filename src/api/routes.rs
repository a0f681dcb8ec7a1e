//! HTTP and WebSocket surface: ingestion, query, admin, and live streaming.

use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitLayer};
use crate::models::{Market, Pair, Sample, INGEST_REQUIRED_KEYS};
use crate::ratelimiter::{BucketConfig, RateLimiter};
use crate::stats::{compute_bin_stats, parse_edges, simulate_entry};
use crate::venues::{Leg, VenueAdapter};
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{FromRef, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<crate::config::Config>,
    pub storage: Arc<crate::storage::Storage>,
    pub fanout: Arc<crate::fanout::Fanout>,
    pub rate_limiter: Arc<RateLimiter>,
    pub venues: Arc<HashMap<String, Arc<dyn VenueAdapter>>>,
    /// Per-IP HTTP ingress guard, distinct from the outbound venue
    /// `RateLimiter` above. Lives on `AppState` only so `FromRef` can hand
    /// it to the rate-limit middleware without a second router state type.
    pub http_rate_limit: RateLimitLayer,
}

impl FromRef<AppState> for RateLimitLayer {
    fn from_ref(state: &AppState) -> Self {
        state.http_rate_limit.clone()
    }
}

impl AppState {
    fn pair_config(&self, name: &str) -> Option<Pair> {
        self.config.pairs.iter().find(|p| p.name == name).cloned()
    }

    fn venue(&self, name: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.venues.get(name).cloned()
    }
}

/// Build the full router. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the rate-limit
/// middleware can extract the caller's IP.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/spreads", get(api_spreads))
        .route("/api/pairs", get(api_pairs))
        .route("/api/latest", get(api_latest))
        .route("/api/stats/bins", get(api_stats_bins))
        .route("/api/depth", get(api_depth))
        .route("/api/simulate", get(api_simulate))
        .route("/api/admin/config", get(api_admin_get).post(api_admin_set))
        .route("/api/ingest/spread", post(api_ingest_spread))
        .route("/ws/stream", get(ws_stream))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct SpreadsQuery {
    pub pair: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

async fn api_spreads(
    State(state): State<AppState>,
    Query(q): Query<SpreadsQuery>,
) -> Result<Json<Vec<Sample>>, (StatusCode, String)> {
    if q.pair.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "pair is required".to_string()));
    }
    let limit = q.limit.unwrap_or(500).clamp(1, 5000);
    let mut rows = state
        .storage
        .get_spreads(&q.pair, limit)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    // storage returns newest-first; charts want oldest-first
    rows.reverse();
    Ok(Json(rows))
}

async fn api_pairs(State(state): State<AppState>) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let pairs = state
        .storage
        .pairs_or_configured(&state.config.pairs)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(pairs))
}

async fn api_latest(State(state): State<AppState>) -> Result<Json<Vec<Sample>>, (StatusCode, String)> {
    let rows = state
        .storage
        .get_latest_all()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct BinsQuery {
    pub pair: String,
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_exit_z")]
    pub exit_z: f64,
    #[serde(default = "default_edges")]
    pub edges: String,
}

fn default_days() -> i64 {
    7
}
fn default_exit_z() -> f64 {
    0.5
}
fn default_edges() -> String {
    "1.5,2,2.5,3".to_string()
}

#[derive(Debug, Serialize)]
pub struct BinsResponse {
    pub pair: String,
    pub days: i64,
    pub exit_z: f64,
    pub stats: Vec<crate::stats::BinStat>,
}

async fn api_stats_bins(
    State(state): State<AppState>,
    Query(q): Query<BinsQuery>,
) -> Result<Json<BinsResponse>, (StatusCode, String)> {
    if q.pair.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "pair is required".to_string()));
    }
    let rows = state
        .storage
        .get_spreads(&q.pair, 10_000)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let since_ms = crate::models::now_ms() - q.days * 86_400_000;
    let mut seq: Vec<Sample> = rows.into_iter().filter(|r| r.ts_ms >= since_ms).collect();
    seq.sort_by_key(|r| r.ts_ms);

    let bins = parse_edges(&q.edges);
    let stats = compute_bin_stats(&seq, q.exit_z, &bins);
    Ok(Json(BinsResponse { pair: q.pair, days: q.days, exit_z: q.exit_z, stats }))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub pair: String,
    #[serde(default = "default_depth_levels")]
    pub levels: usize,
}

fn default_depth_levels() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct DepthResponse {
    pub a: crate::venues::OrderBookLevels,
    pub b: crate::venues::OrderBookLevels,
}

async fn api_depth(
    State(state): State<AppState>,
    Query(q): Query<DepthQuery>,
) -> Result<Json<DepthResponse>, (StatusCode, String)> {
    if q.pair.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "pair is required".to_string()));
    }
    let pair = state
        .pair_config(&q.pair)
        .ok_or((StatusCode::NOT_FOUND, "pair not configured".to_string()))?;

    let a = leg_for(&state, &pair.a).await?;
    let b = leg_for(&state, &pair.b).await?;
    let venue_a = state.venue(&pair.a.venue).ok_or((StatusCode::NOT_FOUND, "unknown venue a".to_string()))?;
    let venue_b = state.venue(&pair.b.venue).ok_or((StatusCode::NOT_FOUND, "unknown venue b".to_string()))?;

    let levels_a = venue_a
        .order_book_levels(&a, q.levels)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let levels_b = venue_b
        .order_book_levels(&b, q.levels)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(DepthResponse { a: levels_a, b: levels_b }))
}

/// Resolve a configured `Market` leg into a `Leg`, looking up any still
/// unresolved Lighter `market_id` on demand.
async fn leg_for(state: &AppState, market: &Market) -> Result<Leg, (StatusCode, String)> {
    if let Some(market_id) = market.market_id {
        return Ok(Leg { symbol: market.symbol.clone(), market_id: Some(market_id) });
    }
    let venue = state
        .venue(&market.venue)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown venue {}", market.venue)))?;
    let market_id = venue
        .resolve_market_id(&market.symbol)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    Ok(Leg { symbol: market.symbol.clone(), market_id })
}

#[derive(Debug, Deserialize)]
pub struct SimulateQuery {
    pub pair: String,
    #[serde(default = "default_notional")]
    pub notional_usd: f64,
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_notional() -> f64 {
    1000.0
}
fn default_pattern() -> String {
    "enter_short_A_long_B".to_string()
}

async fn api_simulate(
    State(state): State<AppState>,
    Query(q): Query<SimulateQuery>,
) -> Result<Json<crate::stats::SimulateResult>, (StatusCode, String)> {
    let pair = state
        .pair_config(&q.pair)
        .ok_or((StatusCode::NOT_FOUND, "pair not configured".to_string()))?;

    let leg_a = leg_for(&state, &pair.a).await?;
    let leg_b = leg_for(&state, &pair.b).await?;
    let venue_a = state.venue(&pair.a.venue).ok_or((StatusCode::NOT_FOUND, "unknown venue a".to_string()))?;
    let venue_b = state.venue(&pair.b.venue).ok_or((StatusCode::NOT_FOUND, "unknown venue b".to_string()))?;

    let mid_a = venue_a.mid_price(&leg_a).await.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let mid_b = venue_b.mid_price(&leg_b).await.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let book_a = venue_a
        .order_book_levels(&leg_a, 50)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let book_b = venue_b
        .order_book_levels(&leg_b, 50)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    let fees_a = venue_a.fees(&leg_a).await.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    let fees_b = venue_b.fees(&leg_b).await.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    simulate_entry(
        mid_a,
        mid_b,
        &book_a,
        &book_b,
        q.notional_usd,
        &q.pattern,
        fees_a.taker.unwrap_or(0.0),
        fees_b.taker.unwrap_or(0.0),
    )
    .map(Json)
    .ok_or((StatusCode::BAD_REQUEST, "invalid pattern".to_string()))
}

async fn api_admin_get(State(state): State<AppState>) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let cfg = state
        .storage
        .admin_get_config()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(cfg.unwrap_or_else(default_admin_config)))
}

fn default_admin_config() -> serde_json::Value {
    serde_json::json!({
        "ratelimits": {
            "aster:global": {"capacity": 20.0, "refill_rate": 10.0},
            "lighter:global": {"capacity": 20.0, "refill_rate": 10.0},
        }
    })
}

async fn api_admin_set(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let ratelimits = payload
        .get("ratelimits")
        .ok_or((StatusCode::BAD_REQUEST, "missing ratelimits".to_string()))?;

    let parsed: HashMap<String, BucketConfig> = serde_json::from_value(ratelimits.clone())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid ratelimits: {e}")))?;

    state
        .storage
        .admin_set_config(&payload)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.rate_limiter.update(parsed);

    Ok(Json(serde_json::json!({"status": "ok"})))
}

async fn api_ingest_spread(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    for key in INGEST_REQUIRED_KEYS {
        if payload.get(key).is_none() {
            return Err((StatusCode::BAD_REQUEST, format!("missing field {key}")));
        }
    }
    let sample: Sample = serde_json::from_value(payload.clone())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")))?;

    state
        .storage
        .insert(&sample)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let text = serde_json::to_string(&payload).unwrap_or_default();
    state.fanout.broadcast(&sample.pair, text).await;

    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub pair: String,
}

async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, q.pair))
}

async fn handle_stream(socket: axum::extract::ws::WebSocket, state: AppState, pair: String) {
    let (sink, mut stream) = socket.split();
    let sub = state.fanout.connect(&pair, sink);

    // keepalive: block on inbound frames (pings/text) until the client
    // disconnects, mirroring a passive "receive_text" loop.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    state.fanout.disconnect(&sub);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admin_config_has_both_venues() {
        let cfg = default_admin_config();
        assert!(cfg["ratelimits"]["aster:global"].is_object());
        assert!(cfg["ratelimits"]["lighter:global"].is_object());
    }
}
