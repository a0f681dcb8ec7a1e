//! Lighter-style venue: orderbook-id-shaped REST endpoints
//! (`/api/v1/orderBookOrders`, `/api/v1/orderBooks`,
//! `/api/v1/orderBookDetails`). Legs are addressed by a numeric `market_id`
//! resolved once at startup from a symbol map; funding's next-time is
//! always the epoch-aligned approximation since the venue doesn't expose it.

use super::{
    approximate_next_funding_time_ms, Fees, FundingInfo, Leg, OrderBookLevels, OrderBookSummary,
    Stats24h, VenueAdapter, VenueError,
};
use crate::models::now_ms;
use crate::ratelimiter::RateLimiter;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LighterVenue {
    host: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    books_cache: RwLock<Option<Vec<OrderBookMeta>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrderBookMeta {
    symbol: String,
    market_id: i64,
    #[serde(default)]
    maker_fee: Option<f64>,
    #[serde(default)]
    taker_fee: Option<f64>,
}

#[derive(Deserialize)]
struct OrderBooksResponse {
    order_books: Vec<OrderBookMeta>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawOrder {
    price: String,
    #[serde(default)]
    remaining_base_amount: Option<String>,
    #[serde(default)]
    initial_base_amount: Option<String>,
}

#[derive(Deserialize)]
struct OrderBookOrdersResponse {
    #[serde(default)]
    bids: Vec<RawOrder>,
    #[serde(default)]
    asks: Vec<RawOrder>,
}

#[derive(Deserialize)]
struct OrderBookDetailsResponse {
    #[serde(default)]
    order_book_details: Vec<OrderBookDetail>,
}

#[derive(Deserialize)]
struct OrderBookDetail {
    #[serde(default)]
    daily_base_token_volume: f64,
    #[serde(default)]
    daily_quote_token_volume: f64,
}

#[derive(Deserialize)]
struct FundingRatesResponse {
    #[serde(default)]
    funding_rates: Vec<FundingRateEntry>,
}

#[derive(Deserialize)]
struct FundingRateEntry {
    #[serde(default)]
    exchange: String,
    #[serde(default)]
    symbol: String,
    rate: String,
}

fn qty_of(o: &RawOrder) -> f64 {
    o.remaining_base_amount
        .as_deref()
        .or(o.initial_base_amount.as_deref())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

fn sum_levels(orders: &[RawOrder], levels: usize) -> (f64, f64) {
    let mut qty = 0.0;
    let mut notional = 0.0;
    for o in orders.iter().take(levels) {
        let price: f64 = o.price.parse().unwrap_or(0.0);
        let q = qty_of(o);
        qty += q;
        notional += price * q;
    }
    (qty, notional)
}

impl LighterVenue {
    pub fn new(host: String, client: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self {
            host,
            client,
            limiter,
            books_cache: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), path)
    }

    async fn fetch_market_map(&self) -> Result<HashMap<String, i64>, VenueError> {
        self.limiter.acquire("lighter", "global", 1.0).await;
        let resp: OrderBooksResponse = self
            .client
            .get(self.url("/api/v1/orderBooks"))
            .send()
            .await?
            .json()
            .await?;

        let mapping = resp.order_books.iter().map(|b| (b.symbol.clone(), b.market_id)).collect();
        *self.books_cache.write() = Some(resp.order_books);
        Ok(mapping)
    }

    fn market_id_of(&self, leg: &Leg) -> Result<i64, VenueError> {
        leg.market_id.ok_or_else(|| VenueError::UnresolvedMarket(leg.symbol.clone()))
    }
}

#[async_trait]
impl VenueAdapter for LighterVenue {
    fn name(&self) -> &'static str {
        "lighter"
    }

    async fn resolve_market_id(&self, symbol: &str) -> Result<Option<i64>, VenueError> {
        if self.books_cache.read().is_none() {
            self.fetch_market_map().await?;
        }
        let cache = self.books_cache.read();
        Ok(cache
            .as_ref()
            .and_then(|books| books.iter().find(|b| b.symbol == symbol))
            .map(|b| b.market_id))
    }

    async fn mid_price(&self, leg: &Leg) -> Result<f64, VenueError> {
        let market_id = self.market_id_of(leg)?;
        self.limiter.acquire("lighter", "global", 1.0).await;
        let resp: OrderBookOrdersResponse = self
            .client
            .get(self.url("/api/v1/orderBookOrders"))
            .query(&[("market_id", market_id.to_string()), ("limit", "1".to_string())])
            .send()
            .await?
            .json()
            .await?;

        let best_bid = resp.bids.first().map(|o| o.price.parse::<f64>().unwrap_or(0.0));
        let best_ask = resp.asks.first().map(|o| o.price.parse::<f64>().unwrap_or(0.0));
        match (best_bid, best_ask) {
            (None, None) => Err(VenueError::MissingBook),
            (Some(b), None) => Ok(b),
            (None, Some(a)) => Ok(a),
            (Some(b), Some(a)) => Ok((b + a) / 2.0),
        }
    }

    async fn order_book_summary(&self, leg: &Leg, levels: usize) -> Result<OrderBookSummary, VenueError> {
        let market_id = self.market_id_of(leg)?;
        self.limiter.acquire("lighter", "global", 1.0).await;
        let resp: OrderBookOrdersResponse = self
            .client
            .get(self.url("/api/v1/orderBookOrders"))
            .query(&[("market_id", market_id.to_string()), ("limit", levels.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let best_bid = resp.bids.first().map(|o| o.price.parse::<f64>().unwrap_or(0.0));
        let best_ask = resp.asks.first().map(|o| o.price.parse::<f64>().unwrap_or(0.0));
        if best_bid.is_none() && best_ask.is_none() {
            return Err(VenueError::MissingBook);
        }
        let mid = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        };
        let (spread_abs, spread_pct) = match (best_bid, best_ask, mid) {
            (Some(b), Some(a), Some(m)) if m > 0.0 => (a - b, (a - b) / m),
            _ => (0.0, 0.0),
        };

        let (qty_bids, notional_bids) = sum_levels(&resp.bids, levels);
        let (qty_asks, notional_asks) = sum_levels(&resp.asks, levels);

        Ok(OrderBookSummary {
            best_bid: best_bid.unwrap_or(0.0),
            best_ask: best_ask.unwrap_or(0.0),
            spread_abs,
            spread_pct,
            depth_qty: qty_bids + qty_asks,
            depth_notional: notional_bids + notional_asks,
        })
    }

    async fn order_book_levels(&self, leg: &Leg, levels: usize) -> Result<OrderBookLevels, VenueError> {
        let market_id = self.market_id_of(leg)?;
        self.limiter.acquire("lighter", "depth", 1.0).await;
        let resp: OrderBookOrdersResponse = self
            .client
            .get(self.url("/api/v1/orderBookOrders"))
            .query(&[("market_id", market_id.to_string()), ("limit", levels.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let bids = resp.bids.iter().take(levels).map(|o| [o.price.parse().unwrap_or(0.0), qty_of(o)]).collect();
        let asks = resp.asks.iter().take(levels).map(|o| [o.price.parse().unwrap_or(0.0), qty_of(o)]).collect();
        Ok(OrderBookLevels { bids, asks })
    }

    async fn stats_24h(&self, leg: &Leg) -> Result<Stats24h, VenueError> {
        let market_id = self.market_id_of(leg)?;
        self.limiter.acquire("lighter", "global", 1.0).await;
        let resp: OrderBookDetailsResponse = self
            .client
            .get(self.url("/api/v1/orderBookDetails"))
            .query(&[("market_id", market_id.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let quote_volume = resp.order_book_details.first().map(|d| d.daily_quote_token_volume).unwrap_or(0.0);
        Ok(Stats24h { quote_volume })
    }

    async fn fees(&self, leg: &Leg) -> Result<Fees, VenueError> {
        if self.books_cache.read().is_none() {
            self.fetch_market_map().await?;
        }
        let cache = self.books_cache.read();
        let found = cache.as_ref().and_then(|books| books.iter().find(|b| b.symbol == leg.symbol));
        Ok(Fees {
            maker: found.and_then(|b| b.maker_fee),
            taker: found.and_then(|b| b.taker_fee),
        })
    }

    async fn funding_info(&self, leg: &Leg, cycle_hours: i64) -> Result<FundingInfo, VenueError> {
        self.limiter.acquire("lighter", "global", 1.0).await;
        let resp: FundingRatesResponse = self
            .client
            .get(self.url("/api/v1/fundingRates"))
            .send()
            .await?
            .json()
            .await?;

        let rate = resp
            .funding_rates
            .iter()
            .find(|fr| fr.exchange == "lighter" && fr.symbol == leg.symbol)
            .and_then(|fr| fr.rate.parse().ok());

        let next_time_ms = approximate_next_funding_time_ms(now_ms(), cycle_hours) as f64;
        Ok(FundingInfo { rate, next_time_ms: Some(next_time_ms) })
    }
}
