//! Per-pair polling loop: fetch both legs' mid prices, score the spread,
//! enrich with book/fee/funding context, persist, and fan out.

use crate::models::{decide_action, now_ms, Pair, Sample};
use crate::ratelimiter::RateLimiter;
use crate::signals::{estimate_reversion_times, Ema, RollingZScore};
use crate::venues::{Leg, VenueAdapter, VenueError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a poller needs that doesn't change per-tick.
pub struct PollerConfig {
    pub depth_levels: usize,
    pub ema_window: usize,
    pub lookback: usize,
    pub enter_z: f64,
    pub exit_z: f64,
    pub poll_ms: u64,
    pub stale_ms_threshold: i64,
    pub skew_ms_threshold: i64,
    pub funding_cycle_hours: HashMap<String, i64>,
    pub funding_notional_usd: f64,
}

/// Where a produced `Sample` goes once computed. `storage`/`fanout` are
/// always present in the single-process composition root; `panel_ingest_url`
/// additionally forwards the same payload to an external panel process,
/// matching deployments that split the runner and panel across hosts.
pub struct PollerSink {
    pub storage: Arc<crate::storage::Storage>,
    pub fanout: Arc<crate::fanout::Fanout>,
    pub http_client: reqwest::Client,
    pub panel_ingest_url: Option<String>,
}

async fn timed_mid_price(
    venue: &dyn VenueAdapter,
    leg: &Leg,
) -> Result<(f64, i64, i64), VenueError> {
    let t0 = now_ms();
    let price = venue.mid_price(leg).await?;
    let t1 = now_ms();
    Ok((price, t1, t1 - t0))
}

/// Degrade an enrichment call's failure to `None`, logging at the tick
/// boundary: the affected field goes null, the tick still emits.
fn log_enrichment_err<T>(
    pair: &str,
    venue: &str,
    call: &str,
    result: Result<T, VenueError>,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(pair = %pair, venue = %venue, call, error = %e, "enrichment call failed, field set to null");
            None
        }
    }
}

/// Runs forever, polling `pair` at `config.poll_ms` intervals. Errors for a
/// single tick are logged and the loop continues; they never terminate it.
pub async fn run_pair_poller(
    pair: Pair,
    venue_a: Arc<dyn VenueAdapter>,
    venue_b: Arc<dyn VenueAdapter>,
    limiter: Arc<RateLimiter>,
    config: Arc<PollerConfig>,
    sink: Arc<PollerSink>,
) {
    let mut zscore = RollingZScore::new(config.lookback);
    let mut ema = Ema::new(config.ema_window);

    let leg_a = Leg { symbol: pair.a.symbol.clone(), market_id: pair.a.market_id };
    let leg_b = Leg { symbol: pair.b.symbol.clone(), market_id: pair.b.market_id };

    loop {
        let tick_started = std::time::Instant::now();
        let result = poll_once(
            &pair, &leg_a, &leg_b, venue_a.as_ref(), venue_b.as_ref(), &limiter, &config, &sink,
            &mut zscore, &mut ema,
        )
        .await;

        metrics::counter!("spread_monitor_ticks_total", "pair" => pair.name.clone()).increment(1);
        metrics::histogram!("spread_monitor_tick_duration_seconds", "pair" => pair.name.clone())
            .record(tick_started.elapsed().as_secs_f64());

        if let Err(e) = result {
            metrics::counter!("spread_monitor_tick_errors_total", "pair" => pair.name.clone()).increment(1);
            tracing::warn!(pair = %pair.name, error = %e, "poller tick failed");
        }
        tokio::time::sleep(Duration::from_millis(config.poll_ms)).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_once(
    pair: &Pair,
    leg_a: &Leg,
    leg_b: &Leg,
    venue_a: &dyn VenueAdapter,
    venue_b: &dyn VenueAdapter,
    limiter: &Arc<RateLimiter>,
    config: &PollerConfig,
    sink: &PollerSink,
    zscore: &mut RollingZScore,
    ema: &mut Ema,
) -> anyhow::Result<()> {
    let _ = limiter;

    let ((price_a, ts_a, dur_a), (price_b, ts_b, dur_b)) =
        tokio::try_join!(timed_mid_price(venue_a, leg_a), timed_mid_price(venue_b, leg_b))?;

    let spread = price_a - price_b;
    let (z, mean, std) = zscore.update(spread);
    let ema_val = ema.update(spread);
    let center_dev = if std > 1e-12 { (spread - ema_val) / std } else { 0.0 };
    let ts = ts_a.max(ts_b);

    let age_a_ms = ts - ts_a;
    let age_b_ms = ts - ts_b;
    let skew_ms = (ts_a - ts_b).abs();
    let latency_ms = dur_a.max(dur_b);

    let mut action = decide_action(z, config.enter_z, config.exit_z).to_string();
    let stale = age_a_ms > config.stale_ms_threshold
        || age_b_ms > config.stale_ms_threshold
        || skew_ms > config.skew_ms_threshold;
    if stale {
        action = "hold".to_string();
    }

    // Each leg's three enrichment calls are awaited together but degrade
    // independently: one failing (e.g. stats_24h) must not blank out a
    // sibling call that succeeded (e.g. order_book_summary).
    let (ob_a, stats_a, fees_a) = tokio::join!(
        venue_a.order_book_summary(leg_a, config.depth_levels),
        venue_a.stats_24h(leg_a),
        venue_a.fees(leg_a),
    );
    let ob_a = log_enrichment_err(&pair.name, venue_a.name(), "order_book_summary", ob_a);
    let stats_a = log_enrichment_err(&pair.name, venue_a.name(), "stats_24h", stats_a);
    let fees_a = log_enrichment_err(&pair.name, venue_a.name(), "fees", fees_a);

    let (ob_b, stats_b, fees_b) = tokio::join!(
        venue_b.order_book_summary(leg_b, config.depth_levels),
        venue_b.stats_24h(leg_b),
        venue_b.fees(leg_b),
    );
    let ob_b = log_enrichment_err(&pair.name, venue_b.name(), "order_book_summary", ob_b);
    let stats_b = log_enrichment_err(&pair.name, venue_b.name(), "stats_24h", stats_b);
    let fees_b = log_enrichment_err(&pair.name, venue_b.name(), "fees", fees_b);

    let cycle_hours_a = *config.funding_cycle_hours.get(venue_a.name()).unwrap_or(&8);
    let cycle_hours_b = *config.funding_cycle_hours.get(venue_b.name()).unwrap_or(&8);

    let funding_a = venue_a.funding_info(leg_a, cycle_hours_a).await.ok();
    let funding_b = venue_b.funding_info(leg_b, cycle_hours_b).await.ok();

    let fr_a = funding_a.as_ref().and_then(|f| f.rate);
    let fr_b = funding_b.as_ref().and_then(|f| f.rate);
    let next_a = funding_a.as_ref().and_then(|f| f.next_time_ms);
    let next_b = funding_b.as_ref().and_then(|f| f.next_time_ms);

    let fr_countdown_ms = [next_a, next_b]
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
        .map(|next| next - ts as f64);

    let (half_life_s, t_exit_s) =
        estimate_reversion_times(&zscore.window_values(), z, config.exit_z, config.poll_ms)
            .map(|(hl, te)| (Some(hl), Some(te)))
            .unwrap_or((None, None));

    let (advice, net_funding_cycle_usd, expect_funding_next_usd) =
        funding_advisory(&action, fr_a, fr_b, fr_countdown_ms, t_exit_s, config.funding_notional_usd);

    let sample = Sample {
        pair: pair.name.clone(),
        ts_ms: ts,
        price_a,
        price_b,
        spread,
        z,
        mean,
        std,
        ema: Some(ema_val),
        center_dev: Some(center_dev),
        best_bid_a: ob_a.as_ref().map(|o| o.best_bid),
        best_ask_a: ob_a.as_ref().map(|o| o.best_ask),
        best_bid_b: ob_b.as_ref().map(|o| o.best_bid),
        best_ask_b: ob_b.as_ref().map(|o| o.best_ask),
        ob_spread_a: ob_a.as_ref().map(|o| o.spread_abs),
        ob_spread_b: ob_b.as_ref().map(|o| o.spread_abs),
        ob_spread_pct_a: ob_a.as_ref().map(|o| o.spread_pct),
        ob_spread_pct_b: ob_b.as_ref().map(|o| o.spread_pct),
        vol_a: stats_a.as_ref().map(|s| s.quote_volume),
        vol_b: stats_b.as_ref().map(|s| s.quote_volume),
        depth_qty_a: ob_a.as_ref().map(|o| o.depth_qty),
        depth_qty_b: ob_b.as_ref().map(|o| o.depth_qty),
        depth_notional_a: ob_a.as_ref().map(|o| o.depth_notional),
        depth_notional_b: ob_b.as_ref().map(|o| o.depth_notional),
        maker_fee_a: fees_a.as_ref().and_then(|f| f.maker),
        taker_fee_a: fees_a.as_ref().and_then(|f| f.taker),
        maker_fee_b: fees_b.as_ref().and_then(|f| f.maker),
        taker_fee_b: fees_b.as_ref().and_then(|f| f.taker),
        fr_a,
        fr_b,
        fr_countdown_ms,
        half_life_s,
        t_exit_s,
        advice,
        net_funding_cycle_usd,
        expect_funding_next_usd,
        age_a_ms,
        age_b_ms,
        skew_ms,
        latency_ms,
        stale: stale as i32,
        action,
    };

    tracing::info!(
        pair = %sample.pair, ts_ms = sample.ts_ms, price_a = sample.price_a, price_b = sample.price_b,
        spread = sample.spread, z = sample.z, action = %sample.action, "tick"
    );

    sink.storage.insert(&sample)?;

    let payload = serde_json::to_string(&sample)?;
    sink.fanout.broadcast(&sample.pair, payload.clone()).await;

    if let Some(url) = &sink.panel_ingest_url {
        if let Err(e) = sink.http_client.post(url).body(payload).header("content-type", "application/json").send().await {
            tracing::warn!(pair = %pair.name, error = %e, "panel ingest forward failed");
        }
    }

    Ok(())
}

/// Net-funding advisory, evaluated only once a projected exit time and a
/// funding countdown are both known. `net_rate` follows the convention
/// that the leg being shorted receives funding and the leg being longed
/// pays it: entering `enter_short_A_long_B` nets `fr_a - fr_b`, entering
/// `enter_long_A_short_B` nets `fr_b - fr_a`.
fn funding_advisory(
    action: &str,
    fr_a: Option<f64>,
    fr_b: Option<f64>,
    fr_countdown_ms: Option<f64>,
    t_exit_s: Option<f64>,
    notional_usd: f64,
) -> (Option<String>, Option<f64>, Option<f64>) {
    let (Some(countdown_ms), Some(t_exit_s)) = (fr_countdown_ms, t_exit_s) else {
        return (None, None, None);
    };
    if countdown_ms <= 0.0 {
        return (None, None, None);
    }

    let net_rate = match (action, fr_a, fr_b) {
        ("enter_short_A_long_B", Some(a), Some(b)) => Some(a - b),
        ("enter_long_A_short_B", Some(a), Some(b)) => Some(b - a),
        _ => None,
    };
    let Some(net_rate) = net_rate else {
        return (None, None, None);
    };

    let time_to_funding_s = (countdown_ms / 1000.0).max(0.0);
    let advice = if t_exit_s < time_to_funding_s {
        "convergence expected before next funding; funding avoidable".to_string()
    } else {
        "position likely to span next funding; evaluate net funding".to_string()
    };
    let net_funding_cycle_usd = notional_usd * net_rate;
    let expect_funding_next_usd = if t_exit_s >= time_to_funding_s { net_funding_cycle_usd } else { 0.0 };

    (Some(advice), Some(net_funding_cycle_usd), Some(expect_funding_next_usd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::fake::{FakeQuote, FakeVenue};
    use crate::models::Market;

    fn config() -> Arc<PollerConfig> {
        Arc::new(PollerConfig {
            depth_levels: 5,
            ema_window: 10,
            lookback: 20,
            enter_z: 2.0,
            exit_z: 0.5,
            poll_ms: 1000,
            stale_ms_threshold: 3000,
            skew_ms_threshold: 500,
            funding_cycle_hours: HashMap::new(),
            funding_notional_usd: 1000.0,
        })
    }

    fn sink() -> Arc<PollerSink> {
        Arc::new(PollerSink {
            storage: Arc::new(crate::storage::Storage::open_in_memory().unwrap()),
            fanout: Arc::new(crate::fanout::Fanout::new()),
            http_client: reqwest::Client::new(),
            panel_ingest_url: None,
        })
    }

    #[tokio::test]
    async fn poll_once_inserts_a_sample() {
        let venue_a = Arc::new(FakeVenue::new("aster"));
        let venue_b = Arc::new(FakeVenue::new("lighter"));
        venue_a.set_quote("BTCUSDT", FakeQuote { mid: 50_100.0, ..Default::default() });
        venue_b.set_quote("BTC", FakeQuote { mid: 50_000.0, ..Default::default() });

        let pair = Pair {
            name: "BTC-AL".to_string(),
            a: Market { venue: "aster".into(), symbol: "BTCUSDT".into(), market_id: None },
            b: Market { venue: "lighter".into(), symbol: "BTC".into(), market_id: None },
        };
        let leg_a = Leg { symbol: pair.a.symbol.clone(), market_id: None };
        let leg_b = Leg { symbol: pair.b.symbol.clone(), market_id: None };

        let limiter = Arc::new(RateLimiter::new());
        let config = config();
        let sink = sink();
        let mut zscore = RollingZScore::new(config.lookback);
        let mut ema = Ema::new(config.ema_window);

        poll_once(
            &pair, &leg_a, &leg_b, venue_a.as_ref(), venue_b.as_ref(), &limiter, &config, &sink,
            &mut zscore, &mut ema,
        )
        .await
        .unwrap();

        let rows = sink.storage.get_spreads("BTC-AL", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].spread - 100.0).abs() < 0.01);
    }

    #[test]
    fn funding_advisory_picks_convergence_before_funding() {
        let (advice, net, expect) =
            funding_advisory("enter_short_A_long_B", Some(0.0005), Some(0.0001), Some(10_000.0), Some(5.0), 1000.0);
        assert!(advice.unwrap().contains("avoidable"));
        assert!((net.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(expect.unwrap(), 0.0);
    }

    #[test]
    fn funding_advisory_spans_funding_when_exit_is_slower() {
        let (advice, net, expect) =
            funding_advisory("enter_long_A_short_B", Some(0.0001), Some(0.0005), Some(1000.0), Some(5.0), 1000.0);
        assert!(advice.unwrap().contains("evaluate"));
        assert_eq!(expect.unwrap(), net.unwrap());
    }

    #[test]
    fn funding_advisory_none_without_countdown_or_exit_estimate() {
        let (advice, net, expect) = funding_advisory("hold", Some(0.0001), Some(0.0002), None, None, 1000.0);
        assert!(advice.is_none());
        assert!(net.is_none());
        assert!(expect.is_none());
    }
}
