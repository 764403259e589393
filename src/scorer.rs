//! Deviation scorer: turns detector candidates into persisted records
//!
//! Applies the minimum-confidence filter before anything reaches the store.

use crate::config::AlgorithmConfig;
use crate::detector::AnomalyCandidate;
use crate::model::{AnomalyRecord, InputRecord, TimeWindow};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeviationScorer {
    algorithm_version: String,
    min_confidence: f64,
}

impl DeviationScorer {
    pub fn new(algorithm_version: impl Into<String>, min_confidence: f64) -> Self {
        Self {
            algorithm_version: algorithm_version.into(),
            min_confidence,
        }
    }

    pub fn from_config(config: &AlgorithmConfig) -> Self {
        Self::new(config.algorithm_version.clone(), config.min_confidence)
    }

    /// Canonical record for `candidate`, or `None` if below minimum confidence
    ///
    /// The record is stamped with a fresh random id, the algorithm version and
    /// the observation timestamp of `input`.
    pub fn score(
        &self,
        input: &InputRecord,
        candidate: &AnomalyCandidate,
        evaluation_window: &TimeWindow,
    ) -> Option<AnomalyRecord> {
        let confidence = candidate.confidence.clamp(0.0, 1.0);
        if confidence < self.min_confidence || !candidate.deviation_score.is_finite() {
            tracing::trace!(
                source_id = %input.source_id,
                metric = %input.metric_name,
                confidence,
                "candidate below minimum confidence"
            );
            return None;
        }

        Some(AnomalyRecord {
            record_id: Uuid::new_v4(),
            anomaly_type: candidate.anomaly_type,
            observed_value: candidate.observed,
            expected_value: candidate.expected,
            deviation_score: candidate.deviation_score,
            confidence,
            algorithm_version: self.algorithm_version.clone(),
            time_window: *evaluation_window,
            timestamp: input.timestamp,
            metric_name: input.metric_name.clone(),
            source_id: input.source_id.clone(),
        })
    }
}
