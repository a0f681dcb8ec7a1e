//! Process configuration: environment variables plus an optional TOML pair list.

use crate::models::{Market, Pair};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub aster_host: String,
    pub lighter_host: String,
    pub depth_levels: usize,
    pub pairs: Vec<Pair>,

    pub lookback: usize,
    pub ema_window: usize,
    pub enter_z: f64,
    pub exit_z: f64,
    pub poll_ms: u64,
    pub stale_ms_threshold: i64,
    pub skew_ms_threshold: i64,

    pub aster_maker_fee: f64,
    pub aster_taker_fee: f64,
    pub lighter_maker_fee: f64,
    pub lighter_taker_fee: f64,

    pub funding_cycle_hours_aster: i64,
    pub funding_cycle_hours_lighter: i64,
    pub funding_notional_usd: f64,

    pub panel_ingest_url: Option<String>,
    pub panel_admin_url: Option<String>,

    pub db_path: String,
    pub http_addr: String,
    pub metrics_addr: String,
}

/// Shape of the optional TOML pair-list file (`PAIRS_CONFIG_PATH`).
#[derive(Debug, Deserialize)]
struct PairsFile {
    #[serde(rename = "pair")]
    pairs: Vec<Pair>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let aster_host = env_or("ASTER_HOST", "https://fapi.asterdex.com");
        let lighter_host = env_or("LIGHTER_HOST", "https://mainnet.zklighter.elliot.ai");
        let depth_levels = env_parse("DEPTH_LEVELS", 5usize);

        let pairs = load_pairs()?;

        Ok(Self {
            aster_host,
            lighter_host,
            depth_levels,
            pairs,
            lookback: env_parse("LOOKBACK", 60usize),
            ema_window: env_parse("EMA_WINDOW", 30usize),
            enter_z: env_parse("ENTER_Z", 2.0f64),
            exit_z: env_parse("EXIT_Z", 0.5f64),
            poll_ms: env_parse("POLL_MS", 1000u64),
            stale_ms_threshold: env_parse("STALE_MS_THRESHOLD", 3000i64),
            skew_ms_threshold: env_parse("SKEW_MS_THRESHOLD", 500i64),
            aster_maker_fee: env_parse("ASTER_MAKER_FEE", 0.0002f64),
            aster_taker_fee: env_parse("ASTER_TAKER_FEE", 0.0005f64),
            lighter_maker_fee: env_parse("LIGHTER_MAKER_FEE", 0.0002f64),
            lighter_taker_fee: env_parse("LIGHTER_TAKER_FEE", 0.0005f64),
            funding_cycle_hours_aster: env_parse("FUNDING_CYCLE_HOURS_ASTER", 8i64),
            funding_cycle_hours_lighter: env_parse("FUNDING_CYCLE_HOURS_LIGHTER", 8i64),
            funding_notional_usd: env_parse("FUNDING_NOTIONAL_USD", 1000.0f64),
            panel_ingest_url: std::env::var("PANEL_INGEST_URL").ok().filter(|s| !s.trim().is_empty()),
            panel_admin_url: std::env::var("PANEL_ADMIN_URL").ok().filter(|s| !s.trim().is_empty()),
            db_path: env_or("DB_PATH", "spread_monitor.db"),
            http_addr: env_or("HTTP_ADDR", "0.0.0.0:8080"),
            metrics_addr: env_or("METRICS_ADDR", "0.0.0.0:9102"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn load_pairs() -> Result<Vec<Pair>> {
    let Some(path) = std::env::var("PAIRS_CONFIG_PATH").ok().filter(|s| !s.trim().is_empty()) else {
        return Ok(vec![default_demo_pair()]);
    };

    let path = PathBuf::from(path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading pairs config at {}", path.display()))?;
    let parsed: PairsFile = toml::from_str(&raw)
        .with_context(|| format!("parsing pairs config at {}", path.display()))?;
    Ok(parsed.pairs)
}

fn default_demo_pair() -> Pair {
    Pair {
        name: "BTC-AsterLighter".to_string(),
        a: Market {
            venue: "aster".to_string(),
            symbol: "BTCUSDT".to_string(),
            market_id: None,
        },
        b: Market {
            venue: "lighter".to_string(),
            symbol: "BTC".to_string(),
            market_id: None,
        },
    }
}
