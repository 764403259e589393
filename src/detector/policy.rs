use super::AnomalyCandidate;
use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::model::{AnomalyType, InputRecord, MetricValue};

const PASS_LABELS: &[&str] = &[
    "approved", "approve", "allow", "allowed", "pass", "passed", "permit", "permitted", "granted",
];
const FAIL_LABELS: &[&str] = &[
    "denied", "deny", "rejected", "reject", "blocked", "block", "fail", "failed", "forbidden",
];

/// Pass (`true`) / fail (`false`) reading of a categorical outcome, if known
fn polarity(value: &MetricValue) -> Option<bool> {
    match value {
        MetricValue::Flag(b) => Some(*b),
        MetricValue::Label(label) => {
            let label = label.trim().to_ascii_lowercase();
            if PASS_LABELS.contains(&label.as_str()) {
                Some(true)
            } else if FAIL_LABELS.contains(&label.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        MetricValue::Number(_) => None,
    }
}

fn encode(pass: bool) -> f64 {
    if pass {
        1.0
    } else {
        0.0
    }
}

/// Binary mismatch between the predicted and observed policy outcome
///
/// Confidence is fixed by configuration. An expected pass observed as a
/// failure scores `unexpected_failure_weight`; any other mismatch scores 1.0.
#[derive(Debug, Clone)]
pub struct PolicyDetector {
    config: PolicyConfig,
}

impl PolicyDetector {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, record: &InputRecord) -> Result<Option<AnomalyCandidate>, DetectorError> {
        let observed = &record.actual_value;
        let expected = &record.predicted_value;

        let (observed_code, expected_code, matches) = match (observed, expected) {
            (MetricValue::Number(o), MetricValue::Number(e)) => (*o, *e, o.to_bits() == e.to_bits()),
            (MetricValue::Flag(o), MetricValue::Flag(e)) => (encode(*o), encode(*e), o == e),
            (MetricValue::Label(o), MetricValue::Label(e)) => {
                match (polarity(observed), polarity(expected)) {
                    (Some(op), Some(ep)) => (encode(op), encode(ep), op == ep),
                    _ => (0.0, 1.0, o == e),
                }
            }
            _ => {
                return Err(DetectorError::IncomparableOutcomes {
                    metric_name: record.metric_name.clone(),
                    observed: observed.clone(),
                    expected: expected.clone(),
                })
            }
        };

        if matches {
            return Ok(None);
        }

        let unexpected_failure = polarity(expected) == Some(true) && polarity(observed) == Some(false);
        let deviation_score = if unexpected_failure {
            self.config.unexpected_failure_weight
        } else {
            1.0
        };

        Ok(Some(AnomalyCandidate {
            anomaly_type: AnomalyType::Policy,
            deviation_score,
            confidence: self.config.confidence,
            observed: observed_code,
            expected: expected_code,
        }))
    }
}
