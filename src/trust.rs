//! Trust signal aggregation over stored anomalies
//!
//! The composite score is a pure function of the records in a window:
//! each record contributes `type_weight * confidence * 0.5^(age / half_life)`
//! where age is measured back from the window end, and the total mass `m`
//! maps to `m / (m + saturation)` in [0, 1). 0 means fully trusted.
//! Signals are derived on demand and never persisted.

use crate::config::{AlgorithmConfig, TrustConfig};
use crate::error::StoreError;
use crate::filter::AnomalyFilter;
use crate::model::{store_order, AnomalyRecord, AnomalyType, TimeWindow};
use crate::store::AnomalyStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    High,
    Medium,
    Low,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::High => write!(f, "high"),
            TrustLevel::Medium => write!(f, "medium"),
            TrustLevel::Low => write!(f, "low"),
        }
    }
}

/// Anomaly counts per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyCounts {
    pub cost: usize,
    pub quality: usize,
    pub latency: usize,
    pub policy: usize,
}

impl AnomalyCounts {
    pub fn get(&self, anomaly_type: AnomalyType) -> usize {
        match anomaly_type {
            AnomalyType::Cost => self.cost,
            AnomalyType::Quality => self.quality,
            AnomalyType::Latency => self.latency,
            AnomalyType::Policy => self.policy,
        }
    }

    fn increment(&mut self, anomaly_type: AnomalyType) {
        match anomaly_type {
            AnomalyType::Cost => self.cost += 1,
            AnomalyType::Quality => self.quality += 1,
            AnomalyType::Latency => self.latency += 1,
            AnomalyType::Policy => self.policy += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.cost + self.quality + self.latency + self.policy
    }
}

/// Windowed composite trust score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSignal {
    pub window: TimeWindow,
    /// 0 = fully trusted, approaching 1 = maximally anomalous
    pub composite_score: f64,
    pub contributing_counts: AnomalyCounts,
    /// Decayed, weighted anomaly mass behind the composite score
    pub weighted_mass: f64,
    pub trust_level: TrustLevel,
    /// Version whose trust parameters produced this signal
    pub algorithm_version: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrustAggregator {
    config: TrustConfig,
    algorithm_version: String,
}

impl TrustAggregator {
    pub fn new(config: TrustConfig, algorithm_version: impl Into<String>) -> Self {
        Self {
            config,
            algorithm_version: algorithm_version.into(),
        }
    }

    pub fn from_config(config: &AlgorithmConfig) -> Self {
        Self::new(config.trust.clone(), config.algorithm_version.clone())
    }

    fn decay(&self, window: &TimeWindow, timestamp: DateTime<Utc>) -> f64 {
        let age_hours = (window.end() - timestamp).num_milliseconds().max(0) as f64 / 3_600_000.0;
        0.5_f64.powf(age_hours / self.config.half_life_hours)
    }

    fn level(&self, score: f64) -> TrustLevel {
        if score <= self.config.high_max {
            TrustLevel::High
        } else if score <= self.config.medium_max {
            TrustLevel::Medium
        } else {
            TrustLevel::Low
        }
    }

    /// Signal for the records of `records` that fall inside `window`
    pub fn aggregate(
        &self,
        window: &TimeWindow,
        records: &[AnomalyRecord],
        computed_at: DateTime<Utc>,
    ) -> TrustSignal {
        let mut in_window: Vec<&AnomalyRecord> = records
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .collect();
        // Summation order fixed for bit-identical results
        in_window.sort_by(|a, b| store_order(a, b));

        let mut counts = AnomalyCounts::default();
        let mut mass = 0.0;
        for record in in_window {
            counts.increment(record.anomaly_type);
            mass += self.config.weights.weight(record.anomaly_type)
                * record.confidence
                * self.decay(window, record.timestamp);
        }

        let composite_score = mass / (mass + self.config.saturation);

        TrustSignal {
            window: *window,
            composite_score,
            contributing_counts: counts,
            weighted_mass: mass,
            trust_level: self.level(composite_score),
            algorithm_version: self.algorithm_version.clone(),
            computed_at,
        }
    }

    /// Signal from the store's records in `window`
    pub fn compute<S: AnomalyStore + ?Sized>(
        &self,
        store: &S,
        window: &TimeWindow,
        computed_at: DateTime<Utc>,
    ) -> Result<TrustSignal, StoreError> {
        let records = store.query(&AnomalyFilter::all().within(*window))?;
        let signal = self.aggregate(window, &records, computed_at);
        tracing::debug!(
            window = %window,
            score = signal.composite_score,
            level = %signal.trust_level,
            "computed trust signal"
        );
        Ok(signal)
    }
}
