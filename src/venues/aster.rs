//! Aster-style venue: Binance-futures-shaped REST endpoints
//! (`/fapi/v1/ticker/price`, `/fapi/v1/depth`, `/fapi/v1/ticker/24hr`,
//! `/fapi/v1/premiumIndex`). Legs are addressed by symbol.

use super::{
    Fees, FundingInfo, Leg, OrderBookLevels, OrderBookSummary, Stats24h, VenueAdapter, VenueError,
};
use crate::ratelimiter::RateLimiter;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub struct AsterVenue {
    host: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    maker_fee: f64,
    taker_fee: f64,
}

impl AsterVenue {
    pub fn new(host: String, client: reqwest::Client, limiter: Arc<RateLimiter>, maker_fee: f64, taker_fee: f64) -> Self {
        Self { host, client, limiter, maker_fee, taker_fee }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Deserialize)]
struct Ticker24h {
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

#[derive(Deserialize)]
struct PremiumIndex {
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

fn parse_level(raw: &[String; 2]) -> Result<[f64; 2], VenueError> {
    let price: f64 = raw[0].parse().map_err(|_| VenueError::Decode("bad price".into()))?;
    let qty: f64 = raw[1].parse().map_err(|_| VenueError::Decode("bad qty".into()))?;
    Ok([price, qty])
}

#[async_trait]
impl VenueAdapter for AsterVenue {
    fn name(&self) -> &'static str {
        "aster"
    }

    async fn mid_price(&self, leg: &Leg) -> Result<f64, VenueError> {
        self.limiter.acquire("aster", "global", 1.0).await;
        let resp: TickerPrice = self
            .client
            .get(self.url("/fapi/v1/ticker/price"))
            .query(&[("symbol", leg.symbol.as_str())])
            .send()
            .await?
            .json()
            .await?;
        resp.price.parse().map_err(|_| VenueError::Decode("bad price".into()))
    }

    async fn order_book_summary(&self, leg: &Leg, levels: usize) -> Result<OrderBookSummary, VenueError> {
        self.limiter.acquire("aster", "depth", 1.0).await;
        let resp: DepthResponse = self
            .client
            .get(self.url("/fapi/v1/depth"))
            .query(&[("symbol", leg.symbol.as_str()), ("limit", &levels.to_string())])
            .send()
            .await?
            .json()
            .await?;

        if resp.bids.is_empty() && resp.asks.is_empty() {
            return Err(VenueError::MissingBook);
        }

        let best_bid = resp.bids.first().map(parse_level).transpose()?.map(|l| l[0]).unwrap_or(0.0);
        let best_ask = resp.asks.first().map(parse_level).transpose()?.map(|l| l[0]).unwrap_or(0.0);
        let mid = (best_bid + best_ask) / 2.0;
        let spread_abs = best_ask - best_bid;
        let spread_pct = if mid > 0.0 { spread_abs / mid } else { 0.0 };

        let mut depth_qty = 0.0;
        let mut depth_notional = 0.0;
        for raw in resp.bids.iter().take(levels) {
            let [price, qty] = parse_level(raw)?;
            depth_qty += qty;
            depth_notional += price * qty;
        }
        for raw in resp.asks.iter().take(levels) {
            let [price, qty] = parse_level(raw)?;
            depth_qty += qty;
            depth_notional += price * qty;
        }

        Ok(OrderBookSummary {
            best_bid,
            best_ask,
            spread_abs,
            spread_pct,
            depth_qty,
            depth_notional,
        })
    }

    async fn order_book_levels(&self, leg: &Leg, levels: usize) -> Result<OrderBookLevels, VenueError> {
        self.limiter.acquire("aster", "depth", 1.0).await;
        let resp: DepthResponse = self
            .client
            .get(self.url("/fapi/v1/depth"))
            .query(&[("symbol", leg.symbol.as_str()), ("limit", &levels.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let bids = resp.bids.iter().take(levels).map(parse_level).collect::<Result<Vec<_>, _>>()?;
        let asks = resp.asks.iter().take(levels).map(parse_level).collect::<Result<Vec<_>, _>>()?;
        Ok(OrderBookLevels { bids, asks })
    }

    async fn stats_24h(&self, leg: &Leg) -> Result<Stats24h, VenueError> {
        self.limiter.acquire("aster", "global", 1.0).await;
        let resp: Ticker24h = self
            .client
            .get(self.url("/fapi/v1/ticker/24hr"))
            .query(&[("symbol", leg.symbol.as_str())])
            .send()
            .await?
            .json()
            .await?;
        let quote_volume = resp.quote_volume.parse().map_err(|_| VenueError::Decode("bad volume".into()))?;
        Ok(Stats24h { quote_volume })
    }

    async fn fees(&self, _leg: &Leg) -> Result<Fees, VenueError> {
        Ok(Fees {
            maker: Some(self.maker_fee),
            taker: Some(self.taker_fee),
        })
    }

    async fn funding_info(&self, leg: &Leg, _cycle_hours: i64) -> Result<FundingInfo, VenueError> {
        self.limiter.acquire("aster", "global", 1.0).await;
        let resp: PremiumIndex = self
            .client
            .get(self.url("/fapi/v1/premiumIndex"))
            .query(&[("symbol", leg.symbol.as_str())])
            .send()
            .await?
            .json()
            .await?;
        let rate = resp.last_funding_rate.parse().ok();
        Ok(FundingInfo {
            rate,
            next_time_ms: Some(resp.next_funding_time as f64),
        })
    }
}
