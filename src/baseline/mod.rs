// Baseline statistics per metric over a historical window
//
// A Baseline is computed once per (metric, window, algorithm version) and never
// edited. Samples are folded in ascending value order so the mean and variance
// are bit-identical for any permutation of the same sample multiset, which is
// what replay relies on.

mod percentile;
mod welford;

pub use percentile::{percentile_sorted, sorted};
pub use welford::StreamingStats;

use crate::config::AlgorithmConfig;
use crate::error::BaselineError;
use crate::model::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One historical observation of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Summary statistics for a metric over a historical window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub metric_name: String,
    pub window: TimeWindow,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub percentiles: BTreeMap<u8, f64>,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
    pub algorithm_version: String,
}

impl Baseline {
    pub fn percentile(&self, p: u8) -> Option<f64> {
        self.percentiles.get(&p).copied()
    }

    /// z-score of `value`, bounded to `[-cap, cap]`
    ///
    /// With zero variance any nonzero deviation is maximally anomalous and
    /// maps to `±cap`; an exact match is 0.
    pub fn z_score(&self, value: f64, cap: f64) -> f64 {
        let delta = value - self.mean;
        let z = if self.std_dev == 0.0 {
            if delta == 0.0 {
                0.0
            } else {
                cap.copysign(delta)
            }
        } else {
            delta / self.std_dev
        };
        z.clamp(-cap, cap)
    }

    /// std_dev / |mean|, `None` when the mean is zero
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        (self.mean != 0.0).then(|| self.std_dev / self.mean.abs())
    }
}

/// Computes baselines from historical samples
#[derive(Debug, Clone)]
pub struct BaselineCalculator {
    min_samples: usize,
    percentiles: Vec<u8>,
    algorithm_version: String,
}

impl BaselineCalculator {
    pub fn new(min_samples: usize, percentiles: Vec<u8>, algorithm_version: impl Into<String>) -> Self {
        let mut percentiles = percentiles;
        percentiles.sort_unstable();
        percentiles.dedup();
        Self {
            min_samples,
            percentiles,
            algorithm_version: algorithm_version.into(),
        }
    }

    pub fn from_config(config: &AlgorithmConfig) -> Self {
        Self::new(
            config.min_samples,
            config.percentiles.clone(),
            config.algorithm_version.clone(),
        )
    }

    /// Baseline for `metric_name` from the samples inside `window`
    ///
    /// # Errors
    /// `InsufficientData` when fewer than `min_samples` samples qualify.
    pub fn compute(
        &self,
        metric_name: &str,
        window: &TimeWindow,
        samples: &[Sample],
    ) -> Result<Baseline, BaselineError> {
        let values: Vec<f64> = samples
            .iter()
            .filter(|s| s.metric_name == metric_name && window.contains(s.timestamp))
            .map(|s| s.value)
            .filter(|v| v.is_finite())
            .collect();

        if values.len() < self.min_samples || values.is_empty() {
            return Err(BaselineError::InsufficientData {
                metric_name: metric_name.to_string(),
                window: *window,
                required: self.min_samples.max(1),
                actual: values.len(),
            });
        }

        let ordered = sorted(&values);
        let stats: StreamingStats = ordered.iter().copied().collect();

        let percentiles = self
            .percentiles
            .iter()
            .filter_map(|&p| percentile_sorted(&ordered, p).map(|v| (p, v)))
            .collect();

        Ok(Baseline {
            metric_name: metric_name.to_string(),
            window: *window,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
            percentiles,
            min: ordered[0],
            max: ordered[ordered.len() - 1],
            sample_count: stats.count(),
            algorithm_version: self.algorithm_version.clone(),
        })
    }

    /// One result per distinct metric name present in `samples`
    pub fn compute_all(
        &self,
        window: &TimeWindow,
        samples: &[Sample],
    ) -> BTreeMap<String, Result<Baseline, BaselineError>> {
        let mut names: Vec<&str> = samples.iter().map(|s| s.metric_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .map(|name| (name.to_string(), self.compute(name, window, samples)))
            .collect()
    }
}
