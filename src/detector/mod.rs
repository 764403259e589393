// Detector registry: the closed set of cost, quality, latency and policy detectors
//
// Each detector is a pure function of (InputRecord, Baseline, config). The
// registry runs every enabled detector for a record; a failing detector is
// reported and never stops the others.

mod cost;
mod latency;
mod policy;
mod quality;

pub use cost::CostDetector;
pub use latency::LatencyDetector;
pub use policy::PolicyDetector;
pub use quality::QualityDetector;

use crate::baseline::Baseline;
use crate::config::{AlgorithmConfig, MetricBinding};
use crate::error::DetectorError;
use crate::model::{AnomalyType, InputRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Parameters of the statistical confidence model shared by numeric detectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    pub full_confidence_samples: usize,
    pub saturation_z: f64,
    pub deviation_cap: f64,
}

impl ScoringParams {
    pub fn from_config(config: &AlgorithmConfig) -> Self {
        Self {
            full_confidence_samples: config.full_confidence_samples,
            saturation_z: config.saturation_z,
            deviation_cap: config.deviation_cap,
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from_config(&AlgorithmConfig::default())
    }
}

/// Confidence from sample size and deviation magnitude, in [0, 1]
///
/// `0.5 * min(1, n / full) + 0.5 * min(1, |z| / saturation_z)`
pub fn statistical_confidence(z_abs: f64, sample_count: usize, params: &ScoringParams) -> f64 {
    let full = params.full_confidence_samples.max(1) as f64;
    let sample_factor = (sample_count as f64 / full).min(1.0);
    let deviation_factor = (z_abs / params.saturation_z).min(1.0);
    (0.5 * sample_factor + 0.5 * deviation_factor).clamp(0.0, 1.0)
}

/// Raw detector output before scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyCandidate {
    pub anomaly_type: AnomalyType,
    pub deviation_score: f64,
    pub confidence: f64,
    pub observed: f64,
    pub expected: f64,
}

/// Numeric signal and baseline for a numeric detector, or the reason there is none
fn numeric_inputs<'a>(
    detector: AnomalyType,
    record: &InputRecord,
    binding: &MetricBinding,
    baseline: Option<&'a Baseline>,
) -> Result<(f64, &'a Baseline), DetectorError> {
    let observed = record
        .signal(binding.basis)
        .ok_or_else(|| DetectorError::NonNumeric {
            detector,
            metric_name: record.metric_name.clone(),
        })?;
    let baseline = baseline.ok_or_else(|| DetectorError::MissingBaseline {
        detector,
        metric_name: record.metric_name.clone(),
    })?;
    Ok((observed, baseline))
}

fn required_percentile(
    detector: AnomalyType,
    baseline: &Baseline,
    percentile: u8,
) -> Result<f64, DetectorError> {
    baseline
        .percentile(percentile)
        .ok_or_else(|| DetectorError::MissingPercentile {
            detector,
            metric_name: baseline.metric_name.clone(),
            percentile,
        })
}

/// The four detector variants
#[derive(Debug, Clone)]
pub enum Detector {
    Cost(CostDetector),
    Quality(QualityDetector),
    Latency(LatencyDetector),
    Policy(PolicyDetector),
}

impl Detector {
    pub fn anomaly_type(&self) -> AnomalyType {
        match self {
            Detector::Cost(_) => AnomalyType::Cost,
            Detector::Quality(_) => AnomalyType::Quality,
            Detector::Latency(_) => AnomalyType::Latency,
            Detector::Policy(_) => AnomalyType::Policy,
        }
    }

    /// Evaluate one record; `Ok(None)` when the metric is bound elsewhere
    /// or the observation is within expectations
    pub fn evaluate(
        &self,
        record: &InputRecord,
        binding: &MetricBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<AnomalyCandidate>, DetectorError> {
        if binding.anomaly_type != self.anomaly_type() {
            return Ok(None);
        }
        match self {
            Detector::Cost(d) => d.evaluate(record, binding, baseline),
            Detector::Quality(d) => d.evaluate(record, binding, baseline),
            Detector::Latency(d) => d.evaluate(record, binding, baseline),
            Detector::Policy(d) => d.evaluate(record),
        }
    }
}

/// Outcome of running every detector on one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub candidates: Vec<AnomalyCandidate>,
    pub failures: Vec<DetectorError>,
}

/// The detectors enabled by one algorithm version
#[derive(Debug, Clone)]
pub struct DetectorRegistry {
    algorithm_version: String,
    detectors: Vec<Detector>,
    bindings: BTreeMap<String, MetricBinding>,
}

impl DetectorRegistry {
    pub fn from_config(config: &AlgorithmConfig) -> Self {
        let params = ScoringParams::from_config(config);
        let detectors = AnomalyType::ALL
            .into_iter()
            .filter(|t| config.is_enabled(*t))
            .map(|t| match t {
                AnomalyType::Cost => Detector::Cost(CostDetector::new(config.cost.clone(), params)),
                AnomalyType::Quality => {
                    Detector::Quality(QualityDetector::new(config.quality.clone(), params))
                }
                AnomalyType::Latency => {
                    Detector::Latency(LatencyDetector::new(config.latency.clone(), params))
                }
                AnomalyType::Policy => Detector::Policy(PolicyDetector::new(config.policy.clone())),
            })
            .collect();

        Self {
            algorithm_version: config.algorithm_version.clone(),
            detectors,
            bindings: config.metrics.clone(),
        }
    }

    pub fn algorithm_version(&self) -> &str {
        &self.algorithm_version
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub fn binding(&self, metric_name: &str) -> Option<&MetricBinding> {
        self.bindings.get(metric_name)
    }

    /// Run every detector on `record`; unbound metrics yield an empty evaluation
    pub fn evaluate(&self, record: &InputRecord, baseline: Option<&Baseline>) -> Evaluation {
        let mut evaluation = Evaluation::default();
        let Some(binding) = self.binding(&record.metric_name) else {
            return evaluation;
        };

        for detector in &self.detectors {
            match detector.evaluate(record, binding, baseline) {
                Ok(Some(candidate)) => evaluation.candidates.push(candidate),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        source_id = %record.source_id,
                        detector = %detector.anomaly_type(),
                        "detector failed: {}",
                        err
                    );
                    evaluation.failures.push(err);
                }
            }
        }
        evaluation
    }
}
