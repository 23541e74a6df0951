//! Alert threshold policies.
//!
//! Scores for the first `fm_grace + ad_grace` units are produced while the
//! engine is still training and are never evaluated. After that:
//!
//! - `Adaptive`: each score is compared with `mean + k * std` of the
//!   post-grace scores seen *before* it, then folded into the statistics.
//!   Evaluation starts once `min_samples` post-grace scores exist.
//! - `Static`: each score is compared with a fixed cutoff.

use pw_math::RunningStats;
use serde::{Deserialize, Serialize};

/// Floor for the standard deviation when computing deviation.
pub const STD_EPSILON: f64 = 1e-9;

/// Selectable alert policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    Static {
        threshold: f64,
    },
    Adaptive {
        /// Standard deviations above the mean (k).
        multiplier: f64,
        /// Post-grace samples required before the first evaluation.
        min_samples: u64,
        /// Optional cap on the effective sample count.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<u64>,
    },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Adaptive {
            multiplier: Self::DEFAULT_MULTIPLIER,
            min_samples: Self::DEFAULT_MIN_SAMPLES,
            window: None,
        }
    }
}

impl ThresholdPolicy {
    /// Fixed cutoff used by the appliance before adaptive thresholds.
    pub const DEFAULT_STATIC_CUTOFF: f64 = 0.1;
    pub const DEFAULT_MULTIPLIER: f64 = 3.0;
    pub const DEFAULT_MIN_SAMPLES: u64 = 30;

    pub fn kind(&self) -> PolicyKind {
        match self {
            ThresholdPolicy::Static { .. } => PolicyKind::Static,
            ThresholdPolicy::Adaptive { .. } => PolicyKind::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Static,
    Adaptive,
}

/// Outcome of evaluating one score.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub threshold: f64,
    /// Distance from the mean in standard deviations; adaptive only.
    pub deviation: Option<f64>,
    pub anomalous: bool,
    pub policy: PolicyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Inside the grace period; ignored.
    Grace,
    /// Post-grace but too few samples to evaluate; folded into statistics.
    WarmingUp,
    Evaluated(Evaluation),
}

/// Applies a [`ThresholdPolicy`] to a stream of sequenced scores.
#[derive(Debug, Clone)]
pub struct ThresholdTracker {
    policy: ThresholdPolicy,
    grace_units: u64,
    stats: RunningStats,
}

impl ThresholdTracker {
    pub fn new(policy: ThresholdPolicy, grace_units: u64) -> Self {
        let stats = match &policy {
            ThresholdPolicy::Adaptive {
                window: Some(w), ..
            } => RunningStats::with_window(*w),
            _ => RunningStats::new(),
        };
        Self {
            policy,
            grace_units,
            stats,
        }
    }

    /// Evaluate the score of unit number `sequence` (1-based, cumulative).
    pub fn observe(&mut self, sequence: u64, score: f64) -> Verdict {
        if sequence <= self.grace_units {
            return Verdict::Grace;
        }
        match self.policy {
            ThresholdPolicy::Static { threshold } => Verdict::Evaluated(Evaluation {
                score,
                threshold,
                deviation: None,
                anomalous: score > threshold,
                policy: PolicyKind::Static,
            }),
            ThresholdPolicy::Adaptive {
                multiplier,
                min_samples,
                ..
            } => {
                if self.stats.count() < min_samples.max(2) {
                    self.stats.push(score);
                    return Verdict::WarmingUp;
                }
                let mean = self.stats.mean();
                let std = self.stats.std_dev();
                let threshold = mean + multiplier * std;
                let deviation = (score - mean) / std.max(STD_EPSILON);
                self.stats.push(score);
                Verdict::Evaluated(Evaluation {
                    score,
                    threshold,
                    deviation: Some(deviation),
                    anomalous: score > threshold,
                    policy: PolicyKind::Adaptive,
                })
            }
        }
    }

    /// Threshold the next post-grace score would be compared with.
    pub fn current_threshold(&self) -> Option<f64> {
        match self.policy {
            ThresholdPolicy::Static { threshold } => Some(threshold),
            ThresholdPolicy::Adaptive {
                multiplier,
                min_samples,
                ..
            } => (self.stats.count() >= min_samples.max(2))
                .then(|| self.stats.mean() + multiplier * self.stats.std_dev()),
        }
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    pub fn grace_units(&self) -> u64 {
        self.grace_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive(min_samples: u64) -> ThresholdPolicy {
        ThresholdPolicy::Adaptive {
            multiplier: 3.0,
            min_samples,
            window: None,
        }
    }

    #[test]
    fn test_grace_scores_are_ignored() {
        let mut tracker = ThresholdTracker::new(adaptive(2), 10);
        for seq in 1..=10 {
            assert_eq!(tracker.observe(seq, 1_000.0), Verdict::Grace);
        }
        assert_eq!(tracker.stats().count(), 0);
        assert_eq!(tracker.observe(11, 0.1), Verdict::WarmingUp);
        assert_eq!(tracker.stats().count(), 1);
    }

    #[test]
    fn test_grace_applies_to_static_policy() {
        let mut tracker = ThresholdTracker::new(ThresholdPolicy::Static { threshold: 0.1 }, 5);
        assert_eq!(tracker.observe(5, 9.0), Verdict::Grace);
        match tracker.observe(6, 9.0) {
            Verdict::Evaluated(eval) => {
                assert!(eval.anomalous);
                assert_eq!(eval.threshold, 0.1);
                assert_eq!(eval.deviation, None);
                assert_eq!(eval.policy, PolicyKind::Static);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_threshold_uses_prior_scores_only() {
        let mut tracker = ThresholdTracker::new(adaptive(3), 0);
        for (i, s) in [1.0, 2.0, 3.0].iter().enumerate() {
            tracker.observe(i as u64 + 1, *s);
        }
        // Prior mean 2, sample std 1: threshold 5 regardless of the new score.
        let expected = tracker.current_threshold().unwrap();
        assert!((expected - 5.0).abs() < 1e-12);
        match tracker.observe(4, 100.0) {
            Verdict::Evaluated(eval) => {
                assert!((eval.threshold - 5.0).abs() < 1e-12);
                assert!((eval.deviation.unwrap() - 98.0).abs() < 1e-9);
                assert!(eval.anomalous);
            }
            other => panic!("unexpected {:?}", other),
        }
        // The anomalous score was folded in afterwards.
        assert_eq!(tracker.stats().count(), 4);
    }

    #[test]
    fn test_score_at_threshold_is_not_anomalous() {
        let mut tracker = ThresholdTracker::new(adaptive(3), 0);
        for (i, s) in [1.0, 2.0, 3.0].iter().enumerate() {
            tracker.observe(i as u64 + 1, *s);
        }
        match tracker.observe(4, 5.0) {
            Verdict::Evaluated(eval) => assert!(!eval.anomalous),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_constant_scores_use_epsilon() {
        let mut tracker = ThresholdTracker::new(adaptive(2), 0);
        tracker.observe(1, 0.5);
        tracker.observe(2, 0.5);
        match tracker.observe(3, 0.5 + 1e-6) {
            Verdict::Evaluated(eval) => {
                assert_eq!(eval.threshold, 0.5);
                assert!(eval.anomalous);
                let dev = eval.deviation.unwrap();
                assert!(dev.is_finite());
                assert!(dev > 100.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_warmup_needs_min_samples() {
        let mut tracker = ThresholdTracker::new(adaptive(30), 0);
        for seq in 1..=30 {
            assert_eq!(tracker.observe(seq, 0.1), Verdict::WarmingUp);
        }
        assert!(matches!(tracker.observe(31, 0.1), Verdict::Evaluated(_)));
    }

    #[test]
    fn test_windowed_policy_caps_stats() {
        let policy = ThresholdPolicy::Adaptive {
            multiplier: 3.0,
            min_samples: 2,
            window: Some(10),
        };
        let mut tracker = ThresholdTracker::new(policy, 0);
        for seq in 1..=100 {
            tracker.observe(seq, 0.1);
        }
        assert_eq!(tracker.stats().window(), Some(10));
        assert!(tracker.stats().effective_count() <= 10);
    }

    #[test]
    fn test_policy_serde_shape() {
        let json = serde_json::to_string(&ThresholdPolicy::default()).unwrap();
        assert_eq!(
            json,
            r#"{"policy":"adaptive","multiplier":3.0,"min_samples":30}"#
        );
        let parsed: ThresholdPolicy =
            serde_json::from_str(r#"{"policy":"static","threshold":0.1}"#).unwrap();
        assert_eq!(parsed, ThresholdPolicy::Static { threshold: 0.1 });
    }
}
