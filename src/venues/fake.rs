//! Deterministic in-memory venue adapter used by poller and scenario tests.
//! Never wired into `main.rs`; it exists purely to drive the pipeline
//! without making network calls.

use super::{
    FundingInfo, Leg, OrderBookLevels, OrderBookSummary, Stats24h, VenueAdapter, VenueError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FakeQuote {
    pub mid: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bids: Vec<[f64; 2]>,
    pub asks: Vec<[f64; 2]>,
    pub quote_volume: f64,
    pub maker_fee: Option<f64>,
    pub taker_fee: Option<f64>,
    pub funding_rate: Option<f64>,
    pub funding_next_ms: Option<f64>,
}

impl Default for FakeQuote {
    fn default() -> Self {
        Self {
            mid: 100.0,
            best_bid: 99.9,
            best_ask: 100.1,
            bids: vec![[99.9, 10.0], [99.8, 10.0]],
            asks: vec![[100.1, 10.0], [100.2, 10.0]],
            quote_volume: 1_000_000.0,
            maker_fee: Some(0.0002),
            taker_fee: Some(0.0005),
            funding_rate: Some(0.0001),
            funding_next_ms: None,
        }
    }
}

pub struct FakeVenue {
    name: &'static str,
    quotes: Mutex<HashMap<String, FakeQuote>>,
}

impl FakeVenue {
    pub fn new(name: &'static str) -> Self {
        Self { name, quotes: Mutex::new(HashMap::new()) }
    }

    pub fn set_quote(&self, symbol: &str, quote: FakeQuote) {
        self.quotes.lock().insert(symbol.to_string(), quote);
    }

    fn quote_for(&self, leg: &Leg) -> Result<FakeQuote, VenueError> {
        self.quotes
            .lock()
            .get(&leg.symbol)
            .cloned()
            .ok_or(VenueError::MissingBook)
    }
}

#[async_trait]
impl VenueAdapter for FakeVenue {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn mid_price(&self, leg: &Leg) -> Result<f64, VenueError> {
        Ok(self.quote_for(leg)?.mid)
    }

    async fn order_book_summary(&self, leg: &Leg, _levels: usize) -> Result<OrderBookSummary, VenueError> {
        let q = self.quote_for(leg)?;
        let spread_abs = q.best_ask - q.best_bid;
        let mid = (q.best_ask + q.best_bid) / 2.0;
        let spread_pct = if mid > 0.0 { spread_abs / mid } else { 0.0 };
        let depth_qty: f64 = q.bids.iter().chain(q.asks.iter()).map(|l| l[1]).sum();
        let depth_notional: f64 = q.bids.iter().chain(q.asks.iter()).map(|l| l[0] * l[1]).sum();
        Ok(OrderBookSummary {
            best_bid: q.best_bid,
            best_ask: q.best_ask,
            spread_abs,
            spread_pct,
            depth_qty,
            depth_notional,
        })
    }

    async fn order_book_levels(&self, leg: &Leg, _levels: usize) -> Result<OrderBookLevels, VenueError> {
        let q = self.quote_for(leg)?;
        Ok(OrderBookLevels { bids: q.bids, asks: q.asks })
    }

    async fn stats_24h(&self, leg: &Leg) -> Result<Stats24h, VenueError> {
        Ok(Stats24h { quote_volume: self.quote_for(leg)?.quote_volume })
    }

    async fn fees(&self, leg: &Leg) -> Result<super::Fees, VenueError> {
        let q = self.quote_for(leg)?;
        Ok(super::Fees { maker: q.maker_fee, taker: q.taker_fee })
    }

    async fn funding_info(&self, leg: &Leg, cycle_hours: i64) -> Result<FundingInfo, VenueError> {
        let q = self.quote_for(leg)?;
        let next_time_ms = q.funding_next_ms.or_else(|| {
            Some(super::approximate_next_funding_time_ms(crate::models::now_ms(), cycle_hours) as f64)
        });
        Ok(FundingInfo { rate: q.funding_rate, next_time_ms })
    }

    async fn resolve_market_id(&self, _symbol: &str) -> Result<Option<i64>, VenueError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_symbol_errors() {
        let venue = FakeVenue::new("fake");
        let leg = Leg { symbol: "X".to_string(), market_id: None };
        let err = venue.mid_price(&leg).await.unwrap_err();
        assert!(matches!(err, VenueError::MissingBook));
    }

    #[tokio::test]
    async fn quote_roundtrip() {
        let venue = FakeVenue::new("fake");
        venue.set_quote("BTC", FakeQuote { mid: 50_000.0, ..Default::default() });
        let leg = Leg { symbol: "BTC".to_string(), market_id: None };
        assert_eq!(venue.mid_price(&leg).await.unwrap(), 50_000.0);
        let summary = venue.order_book_summary(&leg, 5).await.unwrap();
        assert!(summary.spread_abs > 0.0);
    }
}
