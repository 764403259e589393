use super::{numeric_inputs, statistical_confidence, AnomalyCandidate, ScoringParams};
use crate::baseline::Baseline;
use crate::config::{CostConfig, MetricBinding};
use crate::error::DetectorError;
use crate::model::{AnomalyType, InputRecord};

/// Two-tailed z-score test against the baseline mean
#[derive(Debug, Clone)]
pub struct CostDetector {
    config: CostConfig,
    params: ScoringParams,
}

impl CostDetector {
    pub fn new(config: CostConfig, params: ScoringParams) -> Self {
        Self { config, params }
    }

    pub fn evaluate(
        &self,
        record: &InputRecord,
        binding: &MetricBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<AnomalyCandidate>, DetectorError> {
        let (observed, baseline) = numeric_inputs(AnomalyType::Cost, record, binding, baseline)?;
        let z_abs = baseline.z_score(observed, self.params.deviation_cap).abs();

        if z_abs < self.config.z_threshold {
            return Ok(None);
        }

        Ok(Some(AnomalyCandidate {
            anomaly_type: AnomalyType::Cost,
            deviation_score: z_abs,
            confidence: statistical_confidence(z_abs, baseline.sample_count, &self.params),
            observed,
            expected: baseline.mean,
        }))
    }
}
