//! Rolling statistical summaries used by `baseline` conditions to detect
//! anomalies (spec §4.3, §4.1).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::schema::BaselineComparison;

const DEFAULT_MIN_SAMPLES: usize = 5;
const MAX_SAMPLES_PER_METRIC: usize = 1000;

#[derive(Default, Clone)]
struct MetricStats {
    samples: Vec<f64>,
}

impl MetricStats {
    fn mean(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    fn stddev(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = (p / 100.0) * (sorted.len() as f64 - 1.0);
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        if lower == upper {
            sorted[lower]
        } else {
            let frac = rank - lower as f64;
            sorted[lower] * (1.0 - frac) + sorted[upper] * frac
        }
    }
}

/// Maintains rolling statistics for anomaly-based conditions, keyed by
/// metric name.
pub struct BaselineStore {
    metrics: RwLock<HashMap<String, MetricStats>>,
    min_samples: usize,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn with_min_samples(min_samples: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            min_samples,
        }
    }

    pub fn record(&self, metric: &str, value: f64) {
        let mut metrics = self.metrics.write().unwrap();
        let stats = metrics.entry(metric.to_string()).or_default();
        stats.samples.push(value);
        if stats.samples.len() > MAX_SAMPLES_PER_METRIC {
            stats.samples.remove(0);
        }
    }

    /// `above`/`below` compare against `mean ± sensitivity * stddev`;
    /// `outside` treats `sensitivity` as a percentile half-width around the
    /// median. Returns `false` when fewer than `min_samples` have been
    /// recorded.
    pub fn evaluate(&self, metric: &str, value: f64, comparison: BaselineComparison, sensitivity: f64) -> bool {
        let metrics = self.metrics.read().unwrap();
        let Some(stats) = metrics.get(metric) else {
            return false;
        };
        if stats.samples.len() < self.min_samples {
            return false;
        }

        let mean = stats.mean();
        let stddev = stats.stddev();
        match comparison {
            BaselineComparison::Above => value > mean + sensitivity * stddev,
            BaselineComparison::Below => value < mean - sensitivity * stddev,
            BaselineComparison::Outside => {
                let lower = stats.percentile(sensitivity);
                let upper = stats.percentile(100.0 - sensitivity);
                value < lower || value > upper
            }
        }
    }
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_samples_returns_false() {
        let store = BaselineStore::new();
        store.record("m", 1.0);
        assert!(!store.evaluate("m", 100.0, BaselineComparison::Above, 1.0));
    }

    #[test]
    fn above_detects_zscore_outlier() {
        let store = BaselineStore::with_min_samples(3);
        for v in [10.0, 10.0, 10.0, 10.0, 10.0] {
            store.record("m", v);
        }
        assert!(store.evaluate("m", 1000.0, BaselineComparison::Above, 1.0));
        assert!(!store.evaluate("m", 10.0, BaselineComparison::Above, 1.0));
    }
}
