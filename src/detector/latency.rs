use super::{
    numeric_inputs, required_percentile, statistical_confidence, AnomalyCandidate, ScoringParams,
};
use crate::baseline::Baseline;
use crate::config::{LatencyConfig, MetricBinding};
use crate::error::DetectorError;
use crate::model::{AnomalyType, InputRecord};

/// Union of two upper-tail triggers: `z >= threshold` or
/// `observed > p{high_percentile} * p99_multiplier`
///
/// Faster-than-usual responses are never flagged.
#[derive(Debug, Clone)]
pub struct LatencyDetector {
    config: LatencyConfig,
    params: ScoringParams,
}

impl LatencyDetector {
    pub fn new(config: LatencyConfig, params: ScoringParams) -> Self {
        Self { config, params }
    }

    pub fn evaluate(
        &self,
        record: &InputRecord,
        binding: &MetricBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<AnomalyCandidate>, DetectorError> {
        let (observed, baseline) =
            numeric_inputs(AnomalyType::Latency, record, binding, baseline)?;
        let ceiling = required_percentile(AnomalyType::Latency, baseline, self.config.high_percentile)?
            * self.config.p99_multiplier;

        let z = baseline.z_score(observed, self.params.deviation_cap);
        let significant = z >= self.config.z_threshold;
        let exceeds_ceiling = observed > ceiling;

        if !significant && !exceeds_ceiling {
            return Ok(None);
        }

        let z_abs = z.max(0.0);
        let mut confidence = statistical_confidence(z_abs, baseline.sample_count, &self.params);
        if exceeds_ceiling {
            confidence = (confidence + self.config.exceeds_percentile_boost).min(1.0);
        }

        Ok(Some(AnomalyCandidate {
            anomaly_type: AnomalyType::Latency,
            deviation_score: z_abs,
            confidence,
            observed,
            expected: baseline.mean,
        }))
    }
}
