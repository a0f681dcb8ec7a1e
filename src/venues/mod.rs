//! Venue adapter capability interface consumed by the pair poller.

pub mod aster;
#[cfg(test)]
pub mod fake;
pub mod lighter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use aster::AsterVenue;
#[cfg(test)]
pub use fake::FakeVenue;
pub use lighter::LighterVenue;

/// Error surfaced by a venue adapter call. Hand-rolled rather than built on
/// an error-derive crate, matching this codebase's existing wire-error
/// idiom (manual `Display` + `std::error::Error`, no `thiserror`).
#[derive(Debug)]
pub enum VenueError {
    Http(reqwest::Error),
    MissingBook,
    UnresolvedMarket(String),
    Decode(String),
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueError::Http(e) => write!(f, "venue http error: {e}"),
            VenueError::MissingBook => write!(f, "no bids/asks returned for market"),
            VenueError::UnresolvedMarket(symbol) => {
                write!(f, "could not resolve market_id for symbol {symbol}")
            }
            VenueError::Decode(msg) => write!(f, "venue response decode error: {msg}"),
        }
    }
}

impl std::error::Error for VenueError {}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        VenueError::Http(e)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSummary {
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_abs: f64,
    pub spread_pct: f64,
    pub depth_qty: f64,
    pub depth_notional: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookLevels {
    pub bids: Vec<[f64; 2]>,
    pub asks: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats24h {
    pub quote_volume: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fees {
    pub maker: Option<f64>,
    pub taker: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingInfo {
    pub rate: Option<f64>,
    pub next_time_ms: Option<f64>,
}

/// A single leg reference: either a symbol (Aster-style) or a resolved
/// numeric market id (Lighter-style), or both.
#[derive(Debug, Clone)]
pub struct Leg {
    pub symbol: String,
    pub market_id: Option<i64>,
}

/// Capability every venue must expose to the core pipeline. All methods
/// must route through the shared `RateLimiter` before issuing network I/O.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn mid_price(&self, leg: &Leg) -> Result<f64, VenueError>;

    async fn order_book_summary(&self, leg: &Leg, levels: usize) -> Result<OrderBookSummary, VenueError>;

    async fn order_book_levels(&self, leg: &Leg, levels: usize) -> Result<OrderBookLevels, VenueError>;

    async fn stats_24h(&self, leg: &Leg) -> Result<Stats24h, VenueError>;

    async fn fees(&self, leg: &Leg) -> Result<Fees, VenueError>;

    async fn funding_info(&self, leg: &Leg, cycle_hours: i64) -> Result<FundingInfo, VenueError>;

    /// Resolve any legs missing a `market_id` via a symbol map. Adapters
    /// that need no such resolution (e.g. Aster) are a no-op.
    async fn resolve_market_id(&self, _symbol: &str) -> Result<Option<i64>, VenueError> {
        Ok(None)
    }
}

/// Epoch-aligned approximation of the next funding timestamp, used by
/// adapters whose venue does not directly expose it: `next = ((now_ms / P)
/// + 1) * P`, where `P = cycle_hours * 3600_000`.
pub fn approximate_next_funding_time_ms(now_ms: i64, cycle_hours: i64) -> i64 {
    let period_ms = cycle_hours * 3600 * 1000;
    ((now_ms / period_ms) + 1) * period_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_alignment_lands_on_cycle_boundary() {
        let cycle_hours = 8;
        let period_ms = cycle_hours * 3600 * 1000;
        let now_ms = period_ms * 3 + 12_345;
        let next = approximate_next_funding_time_ms(now_ms, cycle_hours);
        assert_eq!(next, period_ms * 4);
        assert!(next % period_ms == 0);
    }
}
