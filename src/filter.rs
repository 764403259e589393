//! Anomaly query filters and `key=value;...` filter expressions
//!
//! Supports:
//! - Anomaly types: `type=cost,latency`
//! - Confidence floor: `min_confidence=0.8`
//! - Observation time range: `window=2024-01-01T00:00:00Z..2024-01-02T00:00:00Z`
//! - Exact matches: `source=svc-a`, `metric=latency_ms`, `version=1.0.0`
//! - Result cap: `limit=50`

use crate::model::{AnomalyRecord, AnomalyType, TimeWindow};
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;

/// Conjunction of optional predicates over stored anomaly records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyFilter {
    /// Accepted anomaly types (None = all types)
    pub anomaly_types: Option<BTreeSet<AnomalyType>>,
    /// Inclusive confidence floor
    pub min_confidence: Option<f64>,
    /// Half-open range over the record timestamp
    pub time_range: Option<TimeWindow>,
    pub source_id: Option<String>,
    pub metric_name: Option<String>,
    pub algorithm_version: Option<String>,
    /// Exact evaluation window the record was produced for
    pub evaluation_window: Option<TimeWindow>,
    /// Keep at most this many records, earliest first
    pub limit: Option<usize>,
}

impl AnomalyFilter {
    /// Create a filter that matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, anomaly_type: AnomalyType) -> Self {
        self.anomaly_types
            .get_or_insert_with(BTreeSet::new)
            .insert(anomaly_type);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn within(mut self, window: TimeWindow) -> Self {
        self.time_range = Some(window);
        self
    }

    pub fn for_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn for_metric(mut self, metric_name: impl Into<String>) -> Self {
        self.metric_name = Some(metric_name.into());
        self
    }

    pub fn for_version(mut self, version: impl Into<String>) -> Self {
        self.algorithm_version = Some(version.into());
        self
    }

    pub fn for_evaluation_window(mut self, window: TimeWindow) -> Self {
        self.evaluation_window = Some(window);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parse a filter expression like "type=cost;min_confidence=0.8"
    pub fn from_expr(expr: &str) -> Result<Self> {
        let mut filter = Self::all();

        for clause in expr.split(';') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }

            let Some((key, value)) = clause.split_once('=') else {
                bail!(
                    "Invalid filter clause: {}. Expected format: KEY=VALUE",
                    clause
                );
            };
            let value = value.trim();

            match key.trim() {
                "type" => {
                    for part in value.split(',') {
                        let anomaly_type = part
                            .parse::<AnomalyType>()
                            .map_err(anyhow::Error::msg)?;
                        filter = filter.with_type(anomaly_type);
                    }
                }
                "min_confidence" => {
                    let min: f64 = value
                        .parse()
                        .with_context(|| format!("Invalid min_confidence: {}", value))?;
                    if !(0.0..=1.0).contains(&min) {
                        bail!("min_confidence must be in [0, 1], got {}", min);
                    }
                    filter = filter.with_min_confidence(min);
                }
                "window" => {
                    let Some((start, end)) = value.split_once("..") else {
                        bail!("Invalid window: {}. Expected format: START..END", value);
                    };
                    let window = TimeWindow::parse(start, end)
                        .with_context(|| format!("Invalid window: {}", value))?;
                    filter = filter.within(window);
                }
                "source" => filter = filter.for_source(value),
                "metric" => filter = filter.for_metric(value),
                "version" => filter = filter.for_version(value),
                "limit" => {
                    let limit: usize = value
                        .parse()
                        .with_context(|| format!("Invalid limit: {}", value))?;
                    filter = filter.with_limit(limit);
                }
                other => bail!(
                    "Unknown filter key: {}. Expected one of type, min_confidence, window, source, metric, version, limit",
                    other
                ),
            }
        }

        Ok(filter)
    }

    /// Check every predicate except `limit`
    pub fn matches(&self, record: &AnomalyRecord) -> bool {
        if let Some(types) = &self.anomaly_types {
            if !types.contains(&record.anomaly_type) {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if record.confidence < min {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(record.timestamp) {
                return false;
            }
        }
        if let Some(window) = &self.evaluation_window {
            if record.time_window != *window {
                return false;
            }
        }
        self.source_id
            .as_ref()
            .map_or(true, |s| *s == record.source_id)
            && self
                .metric_name
                .as_ref()
                .map_or(true, |m| *m == record.metric_name)
            && self
                .algorithm_version
                .as_ref()
                .map_or(true, |v| *v == record.algorithm_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;
    use uuid::Uuid;

    fn record(anomaly_type: AnomalyType, confidence: f64, ts: &str) -> AnomalyRecord {
        AnomalyRecord {
            record_id: Uuid::new_v4(),
            anomaly_type,
            observed_value: 2.0,
            expected_value: 1.0,
            deviation_score: 3.0,
            confidence,
            algorithm_version: "1.0.0".to_string(),
            time_window: TimeWindow::parse("2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z")
                .unwrap(),
            timestamp: parse_timestamp(ts).unwrap(),
            metric_name: "estimated_cost_usd".to_string(),
            source_id: "svc-a".to_string(),
        }
    }

    #[test]
    fn test_filter_all() {
        let filter = AnomalyFilter::all();
        assert!(filter.matches(&record(AnomalyType::Policy, 0.0, "2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_type_and_confidence() {
        let filter = AnomalyFilter::all()
            .with_type(AnomalyType::Cost)
            .with_min_confidence(0.8);
        assert!(filter.matches(&record(AnomalyType::Cost, 0.8, "2024-01-01T01:00:00Z")));
        assert!(!filter.matches(&record(AnomalyType::Cost, 0.79, "2024-01-01T01:00:00Z")));
        assert!(!filter.matches(&record(AnomalyType::Latency, 0.99, "2024-01-01T01:00:00Z")));
    }

    #[test]
    fn test_time_range_is_half_open() {
        let filter = AnomalyFilter::all().within(
            TimeWindow::parse("2024-01-01T00:00:00Z", "2024-01-01T12:00:00Z").unwrap(),
        );
        assert!(filter.matches(&record(AnomalyType::Cost, 0.9, "2024-01-01T00:00:00Z")));
        assert!(!filter.matches(&record(AnomalyType::Cost, 0.9, "2024-01-01T12:00:00Z")));
    }

    #[test]
    fn test_from_expr() {
        let filter = AnomalyFilter::from_expr(
            "type=cost,latency; min_confidence=0.8; source=svc-a; limit=5",
        )
        .unwrap();
        assert_eq!(
            filter.anomaly_types,
            Some([AnomalyType::Cost, AnomalyType::Latency].into_iter().collect())
        );
        assert_eq!(filter.min_confidence, Some(0.8));
        assert_eq!(filter.source_id.as_deref(), Some("svc-a"));
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn test_from_expr_window() {
        let filter =
            AnomalyFilter::from_expr("window=2024-01-01T00:00:00Z..2024-01-01T06:00:00Z").unwrap();
        assert!(filter.matches(&record(AnomalyType::Quality, 0.5, "2024-01-01T05:59:59Z")));
        assert!(!filter.matches(&record(AnomalyType::Quality, 0.5, "2024-01-01T06:00:00Z")));
    }

    #[test]
    fn test_from_expr_empty_is_all() {
        assert_eq!(AnomalyFilter::from_expr("").unwrap(), AnomalyFilter::all());
        assert_eq!(AnomalyFilter::from_expr(" ; ").unwrap(), AnomalyFilter::all());
    }

    #[test]
    fn test_from_expr_rejects_bad_input() {
        assert!(AnomalyFilter::from_expr("type=throughput").is_err());
        assert!(AnomalyFilter::from_expr("min_confidence=1.2").is_err());
        assert!(AnomalyFilter::from_expr("min_confidence=high").is_err());
        assert!(AnomalyFilter::from_expr("window=2024-01-02T00:00:00Z").is_err());
        assert!(AnomalyFilter::from_expr("color=red").is_err());
        assert!(AnomalyFilter::from_expr("cost").is_err());
    }

    #[test]
    fn test_exact_match_predicates() {
        let rec = record(AnomalyType::Cost, 0.9, "2024-01-01T01:00:00Z");
        assert!(AnomalyFilter::all().for_metric("estimated_cost_usd").matches(&rec));
        assert!(!AnomalyFilter::all().for_source("svc-b").matches(&rec));
        assert!(!AnomalyFilter::all().for_version("2.0.0").matches(&rec));
        assert!(AnomalyFilter::all()
            .for_evaluation_window(rec.time_window)
            .matches(&rec));
    }
}
