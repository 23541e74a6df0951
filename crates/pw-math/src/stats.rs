//! Numerically stable running statistics.
//!
//! [`RunningStats`] uses Welford's incremental update, so the variance stays
//! accurate over arbitrarily long streams where a sum-of-squares accumulator
//! would cancel catastrophically. An optional window caps the effective
//! sample count; past the cap each new sample is folded in with weight
//! `1/window`, which turns the estimator into an exponentially weighted one
//! with bounded memory of old traffic.

use serde::{Deserialize, Serialize};

/// Running count, mean, variance and extremes over a stream of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    /// Sum of squared deviations from the mean (Welford's M2).
    m2: f64,
    min: f64,
    max: f64,
    /// Effective sample cap. `None` means unbounded.
    window: Option<u64>,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    /// Unbounded statistics.
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            window: None,
        }
    }

    /// Statistics whose effective sample count stops growing at `window`.
    ///
    /// Windows smaller than 2 are raised to 2 so the variance stays defined.
    pub fn with_window(window: u64) -> Self {
        Self {
            window: Some(window.max(2)),
            ..Self::new()
        }
    }

    /// Fold one sample in. Non-finite samples are ignored.
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.min = self.min.min(x);
        self.max = self.max.max(x);

        match self.window {
            Some(w) if self.count >= w => {
                let alpha = 1.0 / w as f64;
                let delta = x - self.mean;
                let var = (1.0 - alpha) * (self.variance() + alpha * delta * delta);
                self.mean += alpha * delta;
                self.m2 = var * (w - 1) as f64;
                self.count = self.count.saturating_add(1);
            }
            _ => {
                self.count += 1;
                let delta = x - self.mean;
                self.mean += delta / self.count as f64;
                let delta2 = x - self.mean;
                self.m2 += delta * delta2;
            }
        }
    }

    /// Total samples observed, including those past the window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample count the estimates are based on.
    pub fn effective_count(&self) -> u64 {
        match self.window {
            Some(w) => self.count.min(w),
            None => self.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance. Zero with fewer than two samples.
    pub fn variance(&self) -> f64 {
        let n = self.effective_count();
        if n < 2 {
            return 0.0;
        }
        (self.m2 / (n - 1) as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest sample, `None` before the first sample.
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest sample, `None` before the first sample.
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn window(&self) -> Option<u64> {
        self.window
    }
}
