//! Cross-venue spread monitor: polls two venues per configured pair, scores
//! the spread with rolling z-score/EMA/AR(1) signals, and publishes enriched
//! samples to SQLite and live WebSocket subscribers.

mod api;
mod config;
mod fanout;
mod middleware;
mod models;
mod poller;
mod ratelimiter;
mod signals;
mod stats;
mod storage;
mod venues;

use anyhow::{Context, Result};
use api::{build_router, AppState};
use config::Config;
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::{RateLimitConfig, RateLimitLayer};
use poller::{PollerConfig, PollerSink};
use ratelimiter::{BucketConfig, RateLimiter};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use venues::{AsterVenue, LighterVenue, VenueAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut config = Config::from_env().context("loading configuration")?;
    info!(pairs = config.pairs.len(), "spread monitor starting");

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("building http client")?;

    let rate_limiter = Arc::new(RateLimiter::new());
    if let Some(admin_url) = config.panel_admin_url.clone() {
        if let Err(e) = prefetch_admin_ratelimits(&http_client, &admin_url, &rate_limiter).await {
            warn!(error = %e, "could not prefetch admin rate limits, using defaults");
        }
    }

    let aster: Arc<dyn VenueAdapter> = Arc::new(AsterVenue::new(
        config.aster_host.clone(),
        http_client.clone(),
        rate_limiter.clone(),
        config.aster_maker_fee,
        config.aster_taker_fee,
    ));
    let lighter: Arc<dyn VenueAdapter> = Arc::new(LighterVenue::new(
        config.lighter_host.clone(),
        http_client.clone(),
        rate_limiter.clone(),
    ));

    let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
    venues.insert("aster".to_string(), aster);
    venues.insert("lighter".to_string(), lighter);
    let venues = Arc::new(venues);

    resolve_lighter_market_ids(&mut config.pairs, &venues).await;

    let storage = Arc::new(storage::Storage::open(&config.db_path).context("opening storage")?);
    let fanout = Arc::new(fanout::Fanout::new());

    if let Ok(Some(admin_cfg)) = storage.admin_get_config() {
        if let Some(ratelimits) = admin_cfg.get("ratelimits") {
            if let Ok(parsed) = serde_json::from_value::<HashMap<String, BucketConfig>>(ratelimits.clone()) {
                rate_limiter.update(parsed);
            }
        }
    }

    let mut funding_cycle_hours = HashMap::new();
    funding_cycle_hours.insert("aster".to_string(), config.funding_cycle_hours_aster);
    funding_cycle_hours.insert("lighter".to_string(), config.funding_cycle_hours_lighter);

    let poller_config = Arc::new(PollerConfig {
        depth_levels: config.depth_levels,
        ema_window: config.ema_window,
        lookback: config.lookback,
        enter_z: config.enter_z,
        exit_z: config.exit_z,
        poll_ms: config.poll_ms,
        stale_ms_threshold: config.stale_ms_threshold,
        skew_ms_threshold: config.skew_ms_threshold,
        funding_cycle_hours,
        funding_notional_usd: config.funding_notional_usd,
    });

    let poller_sink = Arc::new(PollerSink {
        storage: storage.clone(),
        fanout: fanout.clone(),
        http_client: http_client.clone(),
        panel_ingest_url: config.panel_ingest_url.clone(),
    });

    let config = Arc::new(config);

    for pair in &config.pairs {
        let venue_a = venues
            .get(&pair.a.venue)
            .cloned()
            .with_context(|| format!("unknown venue {} for pair {}", pair.a.venue, pair.name))?;
        let venue_b = venues
            .get(&pair.b.venue)
            .cloned()
            .with_context(|| format!("unknown venue {} for pair {}", pair.b.venue, pair.name))?;

        info!(pair = %pair.name, "spawning poller");
        tokio::spawn(poller::run_pair_poller(
            pair.clone(),
            venue_a,
            venue_b,
            rate_limiter.clone(),
            poller_config.clone(),
            poller_sink.clone(),
        ));
    }

    spawn_metrics_server(&config.metrics_addr)?;

    let app_state = AppState {
        config: config.clone(),
        storage,
        fanout,
        rate_limiter,
        venues,
        http_rate_limit: RateLimitLayer::new(RateLimitConfig::default()),
    };

    let app = build_router(app_state);
    let addr: SocketAddr = config.http_addr.parse().context("parsing HTTP_ADDR")?;
    let listener = TcpListener::bind(addr).await.context("binding HTTP_ADDR")?;
    info!(%addr, "http server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}

async fn prefetch_admin_ratelimits(client: &reqwest::Client, admin_url: &str, limiter: &RateLimiter) -> Result<()> {
    let resp = client.get(admin_url).timeout(std::time::Duration::from_secs(5)).send().await?;
    if !resp.status().is_success() {
        return Ok(());
    }
    let body: serde_json::Value = resp.json().await?;
    if let Some(ratelimits) = body.get("ratelimits") {
        let parsed: HashMap<String, BucketConfig> = serde_json::from_value(ratelimits.clone())?;
        limiter.update(parsed);
    }
    Ok(())
}

/// Resolve `market_id` for any Lighter leg missing one, using the symbol
/// map the adapter fetches once and caches internally.
async fn resolve_lighter_market_ids(pairs: &mut [models::Pair], venues: &HashMap<String, Arc<dyn VenueAdapter>>) {
    let Some(lighter) = venues.get("lighter") else { return };
    for pair in pairs.iter_mut() {
        for leg in [&mut pair.a, &mut pair.b] {
            if leg.venue == "lighter" && leg.market_id.is_none() {
                match lighter.resolve_market_id(&leg.symbol).await {
                    Ok(Some(id)) => leg.market_id = Some(id),
                    Ok(None) => warn!(symbol = %leg.symbol, "lighter market_id not resolved"),
                    Err(e) => warn!(symbol = %leg.symbol, error = %e, "lighter market map fetch failed"),
                }
            }
        }
    }
}

fn spawn_metrics_server(metrics_addr: &str) -> Result<()> {
    let addr: SocketAddr = metrics_addr.parse().context("parsing METRICS_ADDR")?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing prometheus exporter")?;
    info!(%addr, "metrics server listening");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spread_monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
