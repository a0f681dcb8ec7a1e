//! Rolling statistical signals: z-score, EMA, and an AR(1) mean-reversion
//! estimator derived from the same rolling window.
//!
//! Hand-rolled rather than built on a stats crate: every formula here is
//! closed-form single-pass arithmetic, and callers pin exact floating-point
//! results in tests, so a general-purpose reduction would risk a different
//! summation order for no benefit.

use std::collections::VecDeque;

/// Fixed-capacity rolling z-score over a window of width `window`.
pub struct RollingZScore {
    window: usize,
    buf: VecDeque<f64>,
}

impl RollingZScore {
    pub fn new(window: usize) -> Self {
        assert!(window > 1, "RollingZScore window must be > 1");
        Self {
            window,
            buf: VecDeque::with_capacity(window),
        }
    }

    /// Push a new observation and return (z, mean, std) for the updated window.
    pub fn update(&mut self, value: f64) -> (f64, f64, f64) {
        if self.buf.len() == self.window {
            self.buf.pop_front();
        }
        self.buf.push_back(value);

        let n = self.buf.len();
        let mean = self.buf.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let var = self.buf.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        let z = if std > 0.0 { (value - mean) / std } else { 0.0 };
        (z, mean, std)
    }

    /// Snapshot of the current window, oldest first.
    pub fn window_values(&self) -> Vec<f64> {
        self.buf.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Exponential moving average. Undefined until the first `update`.
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "EMA window must be > 0");
        Self {
            alpha: 2.0 / (window as f64 + 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let v = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(v);
        v
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// AR(1) reversion timing estimate: (half_life_s, t_exit_s).
///
/// Returns `None` when the window is too short, the OLS fit is degenerate,
/// or the estimated persistence is outside the mean-reverting range.
pub fn estimate_reversion_times(
    window: &[f64],
    current_z: f64,
    exit_z: f64,
    poll_ms: u64,
) -> Option<(f64, f64)> {
    let n = window.len();
    if n < 10 {
        return None;
    }

    let xs = &window[..n - 1];
    let ys = &window[1..];

    let mean_x = xs.iter().sum::<f64>() / xs.len() as f64;
    let mean_y = ys.iter().sum::<f64>() / ys.len() as f64;

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }

    if den == 0.0 {
        return None;
    }
    let phi = num / den;
    if phi <= 0.0 || phi >= 0.9999 {
        return None;
    }

    let half_life_samples = std::f64::consts::LN_2 / (-phi.ln());
    let half_life_s = half_life_samples * (poll_ms as f64 / 1000.0);

    let t_exit_s = if exit_z <= 0.0 || current_z.abs() <= exit_z {
        0.0
    } else {
        let k = std::f64::consts::LN_2 / half_life_s;
        (current_z.abs() / exit_z).ln() / k
    };

    Some((half_life_s, t_exit_s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_is_zero_on_constant_series() {
        let mut z = RollingZScore::new(5);
        for _ in 0..5 {
            let (zv, _, std) = z.update(3.0);
            assert_eq!(std, 0.0);
            assert_eq!(zv, 0.0);
        }
    }

    #[test]
    fn zscore_evicts_oldest_beyond_window() {
        let mut z = RollingZScore::new(3);
        z.update(1.0);
        z.update(2.0);
        z.update(3.0);
        z.update(4.0);
        assert_eq!(z.window_values(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn ema_first_update_sets_value() {
        let mut e = Ema::new(10);
        assert_eq!(e.update(5.0), 5.0);
        assert!(e.value().is_some());
    }

    #[test]
    fn reversion_requires_min_window() {
        let window = vec![0.0; 9];
        assert!(estimate_reversion_times(&window, 1.0, 0.5, 1000).is_none());
    }

    #[test]
    fn reversion_rejects_nonstationary_phi() {
        // A monotonically increasing series regresses to phi >= 1.
        let window: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(estimate_reversion_times(&window, 1.0, 0.5, 1000).is_none());
    }

    #[test]
    fn reversion_zero_texit_when_already_within_exit_band() {
        // Mean-reverting synthetic AR(1) series with phi ~ 0.5.
        let mut window = vec![1.0];
        for _ in 0..15 {
            let prev = *window.last().unwrap();
            window.push(prev * 0.5);
        }
        let (half_life, t_exit) = estimate_reversion_times(&window, 0.1, 0.5, 1000).unwrap();
        assert!(half_life > 0.0);
        assert_eq!(t_exit, 0.0);
    }
}
