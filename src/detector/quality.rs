use super::{
    numeric_inputs, required_percentile, statistical_confidence, AnomalyCandidate, ScoringParams,
};
use crate::baseline::Baseline;
use crate::config::{MetricBinding, QualityConfig};
use crate::error::DetectorError;
use crate::model::{AnomalyType, InputRecord};

/// z-score test combined with a low-percentile floor
///
/// Flags when |z| reaches the threshold or the observation falls below
/// `p{low_percentile}`. The percentile trigger adds a fixed confidence boost.
#[derive(Debug, Clone)]
pub struct QualityDetector {
    config: QualityConfig,
    params: ScoringParams,
}

impl QualityDetector {
    pub fn new(config: QualityConfig, params: ScoringParams) -> Self {
        Self { config, params }
    }

    pub fn evaluate(
        &self,
        record: &InputRecord,
        binding: &MetricBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<AnomalyCandidate>, DetectorError> {
        let (observed, baseline) =
            numeric_inputs(AnomalyType::Quality, record, binding, baseline)?;
        let floor = required_percentile(AnomalyType::Quality, baseline, self.config.low_percentile)?;

        let z_abs = baseline.z_score(observed, self.params.deviation_cap).abs();
        let significant = z_abs >= self.config.z_threshold;
        let below_floor = observed < floor;

        if !significant && !below_floor {
            return Ok(None);
        }

        let mut confidence = statistical_confidence(z_abs, baseline.sample_count, &self.params);
        if below_floor {
            confidence = (confidence + self.config.below_percentile_boost).min(1.0);
        }

        Ok(Some(AnomalyCandidate {
            anomaly_type: AnomalyType::Quality,
            deviation_score: z_abs,
            confidence,
            observed,
            expected: baseline.mean,
        }))
    }
}
