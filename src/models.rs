//! Core data model: markets, pairs, and the enriched per-tick sample.

use serde::{Deserialize, Serialize};

/// One leg of a pair on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: String,
    pub symbol: String,
    #[serde(default)]
    pub market_id: Option<i64>,
}

/// A configured spread pair: two legs on (possibly different) venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub name: String,
    pub a: Market,
    pub b: Market,
}

/// One tick of observation for a pair. All fields past the identity/price
/// block may be null if upstream enrichment was unavailable that tick.
///
/// `#[serde(default)]` on every field (not just the `Option`s) lets the
/// ingestion endpoint deserialize a partial payload straight into a
/// `Sample` after checking only the required-keys subset itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub pair: String,
    #[serde(default)]
    pub ts_ms: i64,
    #[serde(default)]
    pub price_a: f64,
    #[serde(default)]
    pub price_b: f64,
    #[serde(default)]
    pub spread: f64,

    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub std: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ema: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_dev: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_bid_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_ask_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_bid_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_ask_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob_spread_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob_spread_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob_spread_pct_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob_spread_pct_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_qty_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_qty_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_notional_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_notional_b: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker_fee_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_fee_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maker_fee_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_fee_b: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr_countdown_ms: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_life_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_exit_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_funding_cycle_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_funding_next_usd: Option<f64>,

    #[serde(default)]
    pub age_a_ms: i64,
    #[serde(default)]
    pub age_b_ms: i64,
    #[serde(default)]
    pub skew_ms: i64,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default)]
    pub stale: i32,

    #[serde(default)]
    pub action: String,
}

/// Required keys for `POST /api/ingest/spread`, per the ingestion contract.
pub const INGEST_REQUIRED_KEYS: &[&str] =
    &["pair", "ts_ms", "price_a", "price_b", "spread", "z", "mean", "std"];

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decide the action label for the current z-score against thresholds.
pub fn decide_action(z: f64, enter_z: f64, exit_z: f64) -> &'static str {
    if z >= enter_z {
        "enter_short_A_long_B"
    } else if z <= -enter_z {
        "enter_long_A_short_B"
    } else if z.abs() <= exit_z {
        "exit"
    } else {
        "hold"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_thresholds() {
        assert_eq!(decide_action(2.0, 2.0, 0.5), "enter_short_A_long_B");
        assert_eq!(decide_action(-2.0, 2.0, 0.5), "enter_long_A_short_B");
        assert_eq!(decide_action(0.3, 2.0, 0.5), "exit");
        assert_eq!(decide_action(1.0, 2.0, 0.5), "hold");
    }
}
