//! Core data model shared by every pipeline stage
//!
//! `TimeWindow` is half-open (`end` exclusive). `AnomalyRecord` is the
//! persisted compatibility shape: its serde field names are the wire format of
//! the durable store and must not change.

use crate::error::InputDataError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The closed set of anomaly kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    /// Cost of an operation deviates from its baseline
    Cost,
    /// Quality score deviates or falls below the historical low percentile
    Quality,
    /// Latency exceeds the high percentile or deviates upward
    Latency,
    /// Categorical policy outcome differs from the expected outcome
    Policy,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 4] = [
        AnomalyType::Cost,
        AnomalyType::Quality,
        AnomalyType::Latency,
        AnomalyType::Policy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Cost => "cost",
            AnomalyType::Quality => "quality",
            AnomalyType::Latency => "latency",
            AnomalyType::Policy => "policy",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cost" => Ok(AnomalyType::Cost),
            "quality" => Ok(AnomalyType::Quality),
            "latency" => Ok(AnomalyType::Latency),
            "policy" => Ok(AnomalyType::Policy),
            other => Err(format!(
                "unknown anomaly type '{}' (expected cost, quality, latency or policy)",
                other
            )),
        }
    }
}

#[derive(Deserialize)]
struct WindowRepr {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<WindowRepr> for TimeWindow {
    type Error = InputDataError;

    fn try_from(repr: WindowRepr) -> Result<Self, Self::Error> {
        TimeWindow::new(repr.start, repr.end)
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InputDataError> {
        if start >= end {
            return Err(InputDataError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two ISO-8601 / RFC 3339 timestamps
    pub fn parse(start: &str, end: &str) -> Result<Self, InputDataError> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    /// The window of `hours` hours ending (exclusively) at `end`
    pub fn ending_at(end: DateTime<Utc>, hours: i64) -> Result<Self, InputDataError> {
        let span = checked_hours(hours)?;
        let start = end
            .checked_sub_signed(span)
            .ok_or(InputDataError::OutOfRange {
                quantity: "hours",
                amount: hours,
            })?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The lookback window immediately before this one, used for baselines
    pub fn preceding(&self, lookback: Duration) -> Result<Self, InputDataError> {
        let start = self
            .start
            .checked_sub_signed(lookback)
            .ok_or(InputDataError::OutOfRange {
                quantity: "seconds",
                amount: lookback.num_seconds(),
            })?;
        Self::new(start, self.start)
    }

    /// Epoch-aligned bucket of `bucket_secs` seconds containing `ts`
    pub fn bucket_of(ts: DateTime<Utc>, bucket_secs: i64) -> Result<Self, InputDataError> {
        let out_of_range = InputDataError::OutOfRange {
            quantity: "seconds",
            amount: bucket_secs,
        };
        if bucket_secs <= 0 {
            return Err(out_of_range);
        }
        let width = Duration::try_seconds(bucket_secs).ok_or_else(|| out_of_range.clone())?;
        let secs = ts.timestamp().div_euclid(bucket_secs) * bucket_secs;
        let start = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| InputDataError::InvalidTimestamp(ts.to_rfc3339()))?;
        let end = start.checked_add_signed(width).ok_or(out_of_range)?;
        Self::new(start, end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// `hours` as a `Duration`, or `OutOfRange` if it does not fit
pub fn checked_hours(hours: i64) -> Result<Duration, InputDataError> {
    Duration::try_hours(hours).ok_or(InputDataError::OutOfRange {
        quantity: "hours",
        amount: hours,
    })
}

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, InputDataError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| InputDataError::InvalidTimestamp(s.to_string()))
}

/// How a numeric metric is turned into the signal the detectors examine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalBasis {
    /// The observed actual value
    #[default]
    Actual,
    /// Prediction error: actual minus predicted
    Residual,
}

impl fmt::Display for SignalBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalBasis::Actual => write!(f, "actual"),
            SignalBasis::Residual => write!(f, "residual"),
        }
    }
}

/// A predicted or observed value: numeric, boolean or categorical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
    Label(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            MetricValue::Number(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(v) => write!(f, "{}", v),
            MetricValue::Flag(b) => write!(f, "{}", b),
            MetricValue::Label(s) => write!(f, "{}", s),
        }
    }
}

/// A correlated predicted/actual pair for one source, metric and bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub source_id: String,
    pub metric_name: String,
    pub predicted_value: MetricValue,
    pub actual_value: MetricValue,
    /// Timestamp of the actual observation
    pub timestamp: DateTime<Utc>,
    /// Correlation bucket the pair was matched in
    pub time_window: TimeWindow,
}

impl InputRecord {
    /// Numeric signal under `basis`, or `None` for non-numeric values
    pub fn signal(&self, basis: SignalBasis) -> Option<f64> {
        let actual = self.actual_value.as_number()?;
        match basis {
            SignalBasis::Actual => Some(actual),
            SignalBasis::Residual => Some(actual - self.predicted_value.as_number()?),
        }
    }
}

/// Whether a result set came from live detection or from replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionMode {
    Live,
    Replay,
}

impl fmt::Display for EmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmissionMode::Live => write!(f, "live"),
            EmissionMode::Replay => write!(f, "replay"),
        }
    }
}

/// An emitted anomaly. Never updated or deleted once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub record_id: Uuid,
    pub anomaly_type: AnomalyType,
    pub observed_value: f64,
    pub expected_value: f64,
    pub deviation_score: f64,
    pub confidence: f64,
    pub algorithm_version: String,
    /// Evaluation window the record was produced for
    pub time_window: TimeWindow,
    /// Timestamp of the observation that produced the record
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub source_id: String,
}

impl AnomalyRecord {
    /// Percentage deviation of observed from expected
    pub fn deviation_percentage(&self) -> f64 {
        if self.expected_value == 0.0 {
            return if self.observed_value == 0.0 {
                0.0
            } else {
                f64::INFINITY
            };
        }
        (self.observed_value - self.expected_value).abs() / self.expected_value.abs() * 100.0
    }

    pub fn is_positive_deviation(&self) -> bool {
        self.observed_value > self.expected_value
    }

    /// Reject records that cannot be stored as-is
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} is outside [0, 1]", self.confidence));
        }
        for (name, value) in [
            ("observed_value", self.observed_value),
            ("expected_value", self.expected_value),
            ("deviation_score", self.deviation_score),
        ] {
            if !value.is_finite() {
                return Err(format!("{} is not finite", name));
            }
        }
        if self.deviation_score < 0.0 {
            return Err(format!(
                "deviation_score {} is negative",
                self.deviation_score
            ));
        }
        if self.algorithm_version.trim().is_empty() {
            return Err("algorithm_version is empty".to_string());
        }
        Ok(())
    }

    /// Everything except `record_id`, with floats compared bit-for-bit
    pub fn detection_key(&self) -> DetectionKey {
        DetectionKey {
            timestamp: self.timestamp,
            source_id: self.source_id.clone(),
            metric_name: self.metric_name.clone(),
            anomaly_type: self.anomaly_type,
            algorithm_version: self.algorithm_version.clone(),
            time_window: self.time_window,
            observed_bits: self.observed_value.to_bits(),
            expected_bits: self.expected_value.to_bits(),
            deviation_bits: self.deviation_score.to_bits(),
            confidence_bits: self.confidence.to_bits(),
        }
    }

    /// True if both records describe the same detection (ignoring `record_id`)
    pub fn same_detection(&self, other: &AnomalyRecord) -> bool {
        self.detection_key() == other.detection_key()
    }
}

/// Total order over the semantic content of a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DetectionKey {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub metric_name: String,
    pub anomaly_type: AnomalyType,
    pub algorithm_version: String,
    pub time_window: TimeWindow,
    observed_bits: u64,
    expected_bits: u64,
    deviation_bits: u64,
    confidence_bits: u64,
}

/// Deterministic emission order: independent of `record_id`
pub fn detection_order(a: &AnomalyRecord, b: &AnomalyRecord) -> Ordering {
    a.detection_key().cmp(&b.detection_key())
}

/// Store order: timestamp ascending, ties broken by `record_id`
pub fn store_order(a: &AnomalyRecord, b: &AnomalyRecord) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.record_id.cmp(&b.record_id))
}
