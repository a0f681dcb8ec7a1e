//! Rolling statistical signals used to score a pair's spread each tick.

pub mod zscore;

pub use zscore::{estimate_reversion_times, Ema, RollingZScore};
