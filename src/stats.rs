//! Pure, storage-agnostic statistics over historical samples: excursion
//! bin statistics (`/api/stats/bins`) and a greedy order-book execution
//! simulator (`/api/simulate`).

use crate::models::Sample;
use crate::venues::OrderBookLevels;
use serde::{Deserialize, Serialize};

/// A half-open `|z|` bin: `[lo, hi)`, or `[lo, inf)` when `hi` is `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZBin {
    pub lo: f64,
    pub hi: Option<f64>,
}

/// Parse a comma-separated list of edges into adjacent bins, e.g.
/// `"1.5,2,2.5,3"` -> `[1.5,2), [2,2.5), [2.5,3), [3,inf)`. Falls back to a
/// fixed default set if the list is empty or fails to parse.
pub fn parse_edges(edges: &str) -> Vec<ZBin> {
    let mut parts: Vec<f64> = edges
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .unwrap_or_default();

    if parts.is_empty() {
        return vec![
            ZBin { lo: 1.5, hi: Some(2.0) },
            ZBin { lo: 2.0, hi: Some(2.5) },
            ZBin { lo: 2.5, hi: Some(3.0) },
            ZBin { lo: 3.0, hi: None },
        ];
    }

    parts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    parts
        .iter()
        .enumerate()
        .map(|(i, &lo)| ZBin { lo, hi: parts.get(i + 1).copied() })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinStat {
    pub bin: ZBin,
    pub samples: usize,
    pub p25_s: Option<f64>,
    pub median_s: Option<f64>,
    pub p75_s: Option<f64>,
    pub p90_s: Option<f64>,
    pub prob_exit_before_funding: Option<f64>,
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let cnt = sorted.len();
    if cnt == 0 {
        return None;
    }
    let idx = (p * (cnt - 1) as f64).round();
    let idx = idx.clamp(0.0, (cnt - 1) as f64) as usize;
    Some(sorted[idx])
}

/// For each bin, scan `samples` (ascending by `ts_ms`) for excursions that
/// enter the bin from below and measure time-to-exit (first point with
/// `|z| <= exit_z`). `prob_exit_before_funding` compares that dwell time
/// against the funding countdown observed at entry, when available.
pub fn compute_bin_stats(samples: &[Sample], exit_z: f64, bins: &[ZBin]) -> Vec<BinStat> {
    let absz: Vec<f64> = samples.iter().map(|s| s.z.abs()).collect();
    let tms: Vec<i64> = samples.iter().map(|s| s.ts_ms).collect();
    let countdown: Vec<Option<f64>> = samples.iter().map(|s| s.fr_countdown_ms).collect();
    let n = samples.len();

    bins.iter()
        .map(|bin| {
            let mut dwell_times = Vec::new();
            let mut prob_before_funding = Vec::new();
            let mut i = 1usize;
            while i < n {
                let prev = absz[i - 1];
                let cur = absz[i];
                let entered = prev < bin.lo && cur >= bin.lo && bin.hi.map_or(true, |hi| cur < hi);
                if entered {
                    let start_t = tms[i];
                    let mut j = i;
                    let mut reached = false;
                    while j < n {
                        if absz[j] <= exit_z {
                            reached = true;
                            break;
                        }
                        j += 1;
                    }
                    if reached {
                        let dt_ms = tms[j] - start_t;
                        dwell_times.push(dt_ms as f64 / 1000.0);
                        if let Some(c) = countdown[i] {
                            prob_before_funding.push(if (dt_ms as f64) <= c { 1.0 } else { 0.0 });
                        }
                    }
                    i = if reached { j } else { i + 1 };
                } else {
                    i += 1;
                }
            }
            dwell_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let prob = if prob_before_funding.is_empty() {
                None
            } else {
                Some(prob_before_funding.iter().sum::<f64>() / prob_before_funding.len() as f64)
            };
            BinStat {
                bin: *bin,
                samples: dwell_times.len(),
                p25_s: percentile(&dwell_times, 0.25),
                median_s: percentile(&dwell_times, 0.5),
                p75_s: percentile(&dwell_times, 0.75),
                p90_s: percentile(&dwell_times, 0.90),
                prob_exit_before_funding: prob,
            }
        })
        .collect()
}

/// Which side of the book each leg trades against for a given entry
/// pattern. Returns `None` for an unrecognized pattern.
pub fn sides_for_pattern(pattern: &str) -> Option<(&'static str, &'static str)> {
    match pattern {
        "enter_short_A_long_B" => Some(("sell", "buy")),
        "enter_long_A_short_B" => Some(("buy", "sell")),
        _ => None,
    }
}

/// Greedily walk order book levels, consuming liquidity until `base_qty`
/// is filled or the book runs out. Returns `(avg_exec_price, filled_qty)`.
pub fn avg_exec_price(levels: &[[f64; 2]], base_qty: f64) -> (f64, f64) {
    let mut remaining = base_qty;
    let mut total_quote = 0.0;
    let mut filled = 0.0;
    for &[price, qty] in levels {
        if remaining <= 0.0 {
            break;
        }
        let take = remaining.min(qty);
        total_quote += take * price;
        remaining -= take;
        filled += take;
    }
    let avg = if filled > 0.0 { total_quote / filled } else { 0.0 };
    (avg, filled)
}

/// Levels for a leg's side, per `sides_for_pattern`: `buy` consumes asks,
/// `sell` consumes bids.
pub fn levels_for_side<'a>(book: &'a OrderBookLevels, side: &str) -> &'a [[f64; 2]] {
    if side == "buy" {
        &book.asks
    } else {
        &book.bids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateResult {
    pub mid_a: f64,
    pub mid_b: f64,
    pub avg_a: f64,
    pub avg_b: f64,
    pub slip_a_pct: f64,
    pub slip_b_pct: f64,
    pub slip_a_usd: f64,
    pub slip_b_usd: f64,
    pub fee_a_usd: f64,
    pub fee_b_usd: f64,
    pub total_cost_usd: f64,
    pub filled_base_a: f64,
    pub filled_base_b: f64,
}

/// Full notional-to-cost pipeline for a prospective entry.
#[allow(clippy::too_many_arguments)]
pub fn simulate_entry(
    mid_a: f64,
    mid_b: f64,
    book_a: &OrderBookLevels,
    book_b: &OrderBookLevels,
    notional_usd: f64,
    pattern: &str,
    taker_fee_a: f64,
    taker_fee_b: f64,
) -> Option<SimulateResult> {
    let (side_a, side_b) = sides_for_pattern(pattern)?;
    let base_qty_a = notional_usd / mid_a;
    let base_qty_b = notional_usd / mid_b;

    let (avg_a, filled_a) = avg_exec_price(levels_for_side(book_a, side_a), base_qty_a);
    let (avg_b, filled_b) = avg_exec_price(levels_for_side(book_b, side_b), base_qty_b);

    let slip_a_pct = if avg_a > 0.0 { (avg_a - mid_a).abs() / mid_a } else { 0.0 };
    let slip_b_pct = if avg_b > 0.0 { (avg_b - mid_b).abs() / mid_b } else { 0.0 };
    let slip_a_usd = slip_a_pct * notional_usd;
    let slip_b_usd = slip_b_pct * notional_usd;

    let fee_a_usd = taker_fee_a * notional_usd;
    let fee_b_usd = taker_fee_b * notional_usd;

    Some(SimulateResult {
        mid_a,
        mid_b,
        avg_a,
        avg_b,
        slip_a_pct,
        slip_b_pct,
        slip_a_usd,
        slip_b_usd,
        fee_a_usd,
        fee_b_usd,
        total_cost_usd: slip_a_usd + slip_b_usd + fee_a_usd + fee_b_usd,
        filled_base_a: filled_a,
        filled_base_b: filled_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_edges_builds_adjacent_bins() {
        let bins = parse_edges("1.5,2,2.5,3");
        assert_eq!(bins.len(), 4);
        assert_eq!(bins[0].lo, 1.5);
        assert_eq!(bins[0].hi, Some(2.0));
        assert_eq!(bins[3].hi, None);
    }

    #[test]
    fn parse_edges_falls_back_on_garbage() {
        let bins = parse_edges("not,numbers");
        assert_eq!(bins.len(), 4);
        assert_eq!(bins[0].lo, 1.5);
    }

    fn sample(ts_ms: i64, z: f64, countdown: Option<f64>) -> Sample {
        Sample { ts_ms, z, fr_countdown_ms: countdown, ..Default::default() }
    }

    #[test]
    fn bin_stats_measure_dwell_time_to_exit() {
        let samples = vec![
            sample(0, 0.5, None),
            sample(1000, 2.2, Some(5000.0)),
            sample(2000, 1.8, None),
            sample(3000, 0.4, None),
        ];
        let bins = vec![ZBin { lo: 2.0, hi: Some(2.5) }];
        let stats = compute_bin_stats(&samples, 0.5, &bins);
        assert_eq!(stats[0].samples, 1);
        assert_eq!(stats[0].median_s, Some(2.0));
        assert_eq!(stats[0].prob_exit_before_funding, Some(1.0));
    }

    #[test]
    fn avg_exec_price_walks_levels_and_tracks_partial_fill() {
        let levels = vec![[100.0, 1.0], [101.0, 1.0]];
        let (avg, filled) = avg_exec_price(&levels, 1.5);
        assert_eq!(filled, 1.5);
        assert!((avg - 100.333).abs() < 0.01);
    }

    #[test]
    fn avg_exec_price_empty_book_returns_zero() {
        let (avg, filled) = avg_exec_price(&[], 10.0);
        assert_eq!(avg, 0.0);
        assert_eq!(filled, 0.0);
    }

    #[test]
    fn simulate_entry_rejects_bad_pattern() {
        let book = OrderBookLevels { bids: vec![[99.0, 1.0]], asks: vec![[101.0, 1.0]] };
        let result = simulate_entry(100.0, 100.0, &book, &book, 1000.0, "bogus", 0.0005, 0.0005);
        assert!(result.is_none());
    }

    #[test]
    fn simulate_entry_computes_total_cost() {
        let book = OrderBookLevels {
            bids: vec![[99.0, 100.0]],
            asks: vec![[101.0, 100.0]],
        };
        let result = simulate_entry(100.0, 100.0, &book, &book, 1000.0, "enter_short_A_long_B", 0.0005, 0.0005)
            .unwrap();
        assert!(result.total_cost_usd > 0.0);
        assert_eq!(result.filled_base_a, 10.0);
    }
}
