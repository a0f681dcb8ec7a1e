//! Durable storage for spread samples: a self-migrating SQLite table plus
//! a single-row admin config blob.
//!
//! The schema started life with a fixed column list; new fields get added
//! over time via `ensure_schema`, which diffs `PRAGMA table_info` against
//! the column set this build expects and runs `ALTER TABLE ADD COLUMN` for
//! anything missing. Columns are never dropped or renamed, so old rows
//! stay readable.

use crate::models::{Pair, Sample};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Column name, SQL type pairs in insertion order. `id` is implicit
/// (`INTEGER PRIMARY KEY AUTOINCREMENT`) and excluded here.
const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("pair", "TEXT NOT NULL"),
    ("ts_ms", "INTEGER NOT NULL"),
    ("price_a", "REAL NOT NULL"),
    ("price_b", "REAL NOT NULL"),
    ("spread", "REAL NOT NULL"),
    ("z", "REAL NOT NULL"),
    ("mean", "REAL NOT NULL"),
    ("std", "REAL NOT NULL"),
    ("ema", "REAL"),
    ("center_dev", "REAL"),
    ("best_bid_a", "REAL"),
    ("best_ask_a", "REAL"),
    ("best_bid_b", "REAL"),
    ("best_ask_b", "REAL"),
    ("ob_spread_a", "REAL"),
    ("ob_spread_b", "REAL"),
    ("ob_spread_pct_a", "REAL"),
    ("ob_spread_pct_b", "REAL"),
    ("vol_a", "REAL"),
    ("vol_b", "REAL"),
    ("depth_qty_a", "REAL"),
    ("depth_qty_b", "REAL"),
    ("depth_notional_a", "REAL"),
    ("depth_notional_b", "REAL"),
    ("maker_fee_a", "REAL"),
    ("taker_fee_a", "REAL"),
    ("maker_fee_b", "REAL"),
    ("taker_fee_b", "REAL"),
    ("fr_a", "REAL"),
    ("fr_b", "REAL"),
    ("fr_countdown_ms", "REAL"),
    ("half_life_s", "REAL"),
    ("t_exit_s", "REAL"),
    ("advice", "TEXT"),
    ("net_funding_cycle_usd", "REAL"),
    ("expect_funding_next_usd", "REAL"),
    ("age_a_ms", "REAL"),
    ("age_b_ms", "REAL"),
    ("skew_ms", "REAL"),
    ("latency_ms", "REAL"),
    ("stale", "REAL"),
    ("action", "TEXT"),
];

/// Rows come back newest-first from `spreads` except where noted.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory for db at {path}"))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("opening sqlite db at {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS spreads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                price_a REAL NOT NULL,
                price_b REAL NOT NULL,
                spread REAL NOT NULL,
                z REAL NOT NULL,
                mean REAL NOT NULL,
                std REAL NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_spreads_pair_ts ON spreads(pair, ts_ms)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admin_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                json TEXT NOT NULL
            )",
            [],
        )?;

        let storage = Self { conn: Mutex::new(conn) };
        storage.ensure_schema()?;
        Ok(storage)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spreads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                price_a REAL NOT NULL,
                price_b REAL NOT NULL,
                spread REAL NOT NULL,
                z REAL NOT NULL,
                mean REAL NOT NULL,
                std REAL NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admin_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                json TEXT NOT NULL
            )",
            [],
        )?;
        let storage = Self { conn: Mutex::new(conn) };
        storage.ensure_schema()?;
        Ok(storage)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        let mut existing = std::collections::HashSet::new();
        {
            let mut stmt = conn.prepare("PRAGMA table_info(spreads)")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                existing.insert(name);
            }
        }
        for (col, ty) in EXPECTED_COLUMNS {
            if !existing.contains(*col) {
                conn.execute(&format!("ALTER TABLE spreads ADD COLUMN {col} {ty}"), [])?;
                tracing::info!(column = col, "migrated spreads table: added column");
            }
        }
        Ok(())
    }

    pub fn insert(&self, s: &Sample) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO spreads (
                pair, ts_ms, price_a, price_b, spread, z, mean, std, ema, center_dev,
                best_bid_a, best_ask_a, best_bid_b, best_ask_b,
                ob_spread_a, ob_spread_b, ob_spread_pct_a, ob_spread_pct_b,
                vol_a, vol_b, depth_qty_a, depth_qty_b, depth_notional_a, depth_notional_b,
                maker_fee_a, taker_fee_a, maker_fee_b, taker_fee_b,
                fr_a, fr_b, fr_countdown_ms, half_life_s, t_exit_s, advice,
                net_funding_cycle_usd, expect_funding_next_usd,
                age_a_ms, age_b_ms, skew_ms, latency_ms, stale, action
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23, ?24,
                ?25, ?26, ?27, ?28,
                ?29, ?30, ?31, ?32, ?33, ?34,
                ?35, ?36,
                ?37, ?38, ?39, ?40, ?41, ?42
            )",
            params![
                s.pair,
                s.ts_ms,
                s.price_a,
                s.price_b,
                s.spread,
                s.z,
                s.mean,
                s.std,
                s.ema,
                s.center_dev,
                s.best_bid_a,
                s.best_ask_a,
                s.best_bid_b,
                s.best_ask_b,
                s.ob_spread_a,
                s.ob_spread_b,
                s.ob_spread_pct_a,
                s.ob_spread_pct_b,
                s.vol_a,
                s.vol_b,
                s.depth_qty_a,
                s.depth_qty_b,
                s.depth_notional_a,
                s.depth_notional_b,
                s.maker_fee_a,
                s.taker_fee_a,
                s.maker_fee_b,
                s.taker_fee_b,
                s.fr_a,
                s.fr_b,
                s.fr_countdown_ms,
                s.half_life_s,
                s.t_exit_s,
                s.advice,
                s.net_funding_cycle_usd,
                s.expect_funding_next_usd,
                s.age_a_ms,
                s.age_b_ms,
                s.skew_ms,
                s.latency_ms,
                s.stale,
                s.action,
            ],
        )?;
        Ok(())
    }

    /// Newest-first, capped at `limit`.
    pub fn get_spreads(&self, pair: &str, limit: i64) -> Result<Vec<Sample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT pair, ts_ms, price_a, price_b, spread, z, mean, std, ema, center_dev,
                    best_bid_a, best_ask_a, best_bid_b, best_ask_b,
                    ob_spread_a, ob_spread_b, ob_spread_pct_a, ob_spread_pct_b,
                    vol_a, vol_b, depth_qty_a, depth_qty_b, depth_notional_a, depth_notional_b,
                    maker_fee_a, taker_fee_a, maker_fee_b, taker_fee_b,
                    fr_a, fr_b, fr_countdown_ms, half_life_s, t_exit_s, advice,
                    net_funding_cycle_usd, expect_funding_next_usd,
                    age_a_ms, age_b_ms, skew_ms, latency_ms, stale, action
             FROM spreads WHERE pair = ?1 ORDER BY ts_ms DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![pair, limit], row_to_sample)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_pairs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT pair FROM spreads ORDER BY pair")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Most recent sample per pair that has ever been ingested.
    pub fn get_latest_all(&self) -> Result<Vec<Sample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.pair, t.ts_ms, t.price_a, t.price_b, t.spread, t.z, t.mean, t.std, t.ema, t.center_dev,
                    t.best_bid_a, t.best_ask_a, t.best_bid_b, t.best_ask_b,
                    t.ob_spread_a, t.ob_spread_b, t.ob_spread_pct_a, t.ob_spread_pct_b,
                    t.vol_a, t.vol_b, t.depth_qty_a, t.depth_qty_b, t.depth_notional_a, t.depth_notional_b,
                    t.maker_fee_a, t.taker_fee_a, t.maker_fee_b, t.taker_fee_b,
                    t.fr_a, t.fr_b, t.fr_countdown_ms, t.half_life_s, t.t_exit_s, t.advice,
                    t.net_funding_cycle_usd, t.expect_funding_next_usd,
                    t.age_a_ms, t.age_b_ms, t.skew_ms, t.latency_ms, t.stale, t.action
             FROM spreads t
             JOIN (SELECT pair, MAX(ts_ms) ts FROM spreads GROUP BY pair) m
               ON t.pair = m.pair AND t.ts_ms = m.ts",
        )?;
        let rows = stmt.query_map([], row_to_sample)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn admin_get_config(&self) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT json FROM admin_config WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(match json {
            Some(s) => serde_json::from_str(&s).ok(),
            None => None,
        })
    }

    pub fn admin_set_config(&self, cfg: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        let s = serde_json::to_string(cfg)?;
        conn.execute(
            "INSERT INTO admin_config (id, json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            params![s],
        )?;
        Ok(())
    }

    /// Distinct pair names, falling back to the configured pair list when
    /// nothing has been ingested yet.
    pub fn pairs_or_configured(&self, configured: &[Pair]) -> Result<Vec<String>> {
        let stored = self.get_pairs()?;
        if !stored.is_empty() {
            return Ok(stored);
        }
        Ok(configured.iter().map(|p| p.name.clone()).collect())
    }
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        pair: row.get(0)?,
        ts_ms: row.get(1)?,
        price_a: row.get(2)?,
        price_b: row.get(3)?,
        spread: row.get(4)?,
        z: row.get(5)?,
        mean: row.get(6)?,
        std: row.get(7)?,
        ema: row.get(8)?,
        center_dev: row.get(9)?,
        best_bid_a: row.get(10)?,
        best_ask_a: row.get(11)?,
        best_bid_b: row.get(12)?,
        best_ask_b: row.get(13)?,
        ob_spread_a: row.get(14)?,
        ob_spread_b: row.get(15)?,
        ob_spread_pct_a: row.get(16)?,
        ob_spread_pct_b: row.get(17)?,
        vol_a: row.get(18)?,
        vol_b: row.get(19)?,
        depth_qty_a: row.get(20)?,
        depth_qty_b: row.get(21)?,
        depth_notional_a: row.get(22)?,
        depth_notional_b: row.get(23)?,
        maker_fee_a: row.get(24)?,
        taker_fee_a: row.get(25)?,
        maker_fee_b: row.get(26)?,
        taker_fee_b: row.get(27)?,
        fr_a: row.get(28)?,
        fr_b: row.get(29)?,
        fr_countdown_ms: row.get(30)?,
        half_life_s: row.get(31)?,
        t_exit_s: row.get(32)?,
        advice: row.get(33)?,
        net_funding_cycle_usd: row.get(34)?,
        expect_funding_next_usd: row.get(35)?,
        age_a_ms: row.get::<_, Option<i64>>(36)?.unwrap_or_default(),
        age_b_ms: row.get::<_, Option<i64>>(37)?.unwrap_or_default(),
        skew_ms: row.get::<_, Option<i64>>(38)?.unwrap_or_default(),
        latency_ms: row.get::<_, Option<i64>>(39)?.unwrap_or_default(),
        stale: row.get::<_, Option<i32>>(40)?.unwrap_or_default(),
        action: row.get::<_, Option<String>>(41)?.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pair: &str, ts_ms: i64, z: f64) -> Sample {
        Sample {
            pair: pair.to_string(),
            ts_ms,
            price_a: 100.0,
            price_b: 99.5,
            spread: 0.5,
            z,
            mean: 0.4,
            std: 0.1,
            action: "hold".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_read_back_newest_first() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert(&sample("BTC-AL", 1000, 1.0)).unwrap();
        storage.insert(&sample("BTC-AL", 2000, 2.0)).unwrap();
        let rows = storage.get_spreads("BTC-AL", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts_ms, 2000);
        assert_eq!(rows[1].ts_ms, 1000);
    }

    #[test]
    fn get_pairs_and_latest_all() {
        let storage = Storage::open_in_memory().unwrap();
        storage.insert(&sample("A", 1000, 1.0)).unwrap();
        storage.insert(&sample("A", 2000, 1.5)).unwrap();
        storage.insert(&sample("B", 1500, 0.2)).unwrap();

        let pairs = storage.get_pairs().unwrap();
        assert_eq!(pairs, vec!["A".to_string(), "B".to_string()]);

        let latest = storage.get_latest_all().unwrap();
        assert_eq!(latest.len(), 2);
        let a = latest.iter().find(|s| s.pair == "A").unwrap();
        assert_eq!(a.ts_ms, 2000);
    }

    #[test]
    fn admin_config_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.admin_get_config().unwrap().is_none());
        let cfg = serde_json::json!({"ratelimits": {"aster:global": {"capacity": 10.0}}});
        storage.admin_set_config(&cfg).unwrap();
        let got = storage.admin_get_config().unwrap().unwrap();
        assert_eq!(got, cfg);

        let cfg2 = serde_json::json!({"ratelimits": {}});
        storage.admin_set_config(&cfg2).unwrap();
        let got2 = storage.admin_get_config().unwrap().unwrap();
        assert_eq!(got2, cfg2);
    }

    #[test]
    fn pairs_or_configured_falls_back_when_empty() {
        let storage = Storage::open_in_memory().unwrap();
        let configured = vec![Pair {
            name: "X-Y".to_string(),
            a: crate::models::Market { venue: "aster".into(), symbol: "X".into(), market_id: None },
            b: crate::models::Market { venue: "lighter".into(), symbol: "Y".into(), market_id: None },
        }];
        let pairs = storage.pairs_or_configured(&configured).unwrap();
        assert_eq!(pairs, vec!["X-Y".to_string()]);
    }
}
