//! Error taxonomy for the detection core
//!
//! Per-record problems (`InputDataError`, `BaselineError::InsufficientData`,
//! `DetectorError`) are recoverable: the pipeline records them as diagnostics
//! and moves on to the next record. Store, source and configuration failures
//! abort the operation in progress without touching committed state.

use crate::model::{AnomalyType, MetricValue, TimeWindow};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Which upstream stream a raw record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSide {
    Predicted,
    Actual,
}

impl fmt::Display for RecordSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSide::Predicted => write!(f, "predicted"),
            RecordSide::Actual => write!(f, "actual"),
        }
    }
}

/// Malformed or unmatched predicted/actual input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputDataError {
    #[error("invalid time window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid timestamp '{0}': expected ISO-8601 / RFC 3339")]
    InvalidTimestamp(String),

    #[error("unmatched {side} record for {source_id}/{metric_name} at {timestamp}")]
    Unmatched {
        side: RecordSide,
        source_id: String,
        metric_name: String,
        timestamp: DateTime<Utc>,
    },

    #[error("duplicate {side} record for {source_id}/{metric_name} in bucket {bucket}")]
    Duplicate {
        side: RecordSide,
        source_id: String,
        metric_name: String,
        bucket: TimeWindow,
    },

    #[error("non-finite {side} value for {source_id}/{metric_name} at {timestamp}")]
    NonFinite {
        side: RecordSide,
        source_id: String,
        metric_name: String,
        timestamp: DateTime<Utc>,
    },

    #[error("metric '{0}' is not bound to any detector")]
    UnboundMetric(String),

    #[error("{amount} {quantity} is outside the representable time range")]
    OutOfRange { quantity: &'static str, amount: i64 },

    #[error("malformed {side} record in {} at line {line}: {reason}", path.display())]
    Malformed {
        side: RecordSide,
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Baseline computation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BaselineError {
    #[error(
        "insufficient baseline data for '{metric_name}' in {window}: need at least {required} samples, got {actual}"
    )]
    InsufficientData {
        metric_name: String,
        window: TimeWindow,
        required: usize,
        actual: usize,
    },
}

/// Isolated failure of a single detector variant
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("{detector} detector requires a baseline for '{metric_name}'")]
    MissingBaseline {
        detector: AnomalyType,
        metric_name: String,
    },

    #[error("{detector} detector: baseline for '{metric_name}' has no p{percentile}")]
    MissingPercentile {
        detector: AnomalyType,
        metric_name: String,
        percentile: u8,
    },

    #[error("{detector} detector requires a numeric value for '{metric_name}'")]
    NonNumeric {
        detector: AnomalyType,
        metric_name: String,
    },

    #[error("policy detector cannot compare observed {observed:?} with expected {expected:?} for '{metric_name}'")]
    IncomparableOutcomes {
        metric_name: String,
        observed: MetricValue,
        expected: MetricValue,
    },
}

/// Append-only store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record {0} already exists")]
    DuplicateRecordId(Uuid),

    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("invalid record {record_id}: {reason}")]
    InvalidRecord { record_id: Uuid, reason: String },

    #[error("window {window} was already processed under algorithm {algorithm_version}")]
    WindowAlreadyProcessed {
        window: TimeWindow,
        algorithm_version: String,
    },

    #[error("corrupt store file {} at line {line}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the read-only ingestion collaborator
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Algorithm catalog and settings failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration for algorithm {version}: {reason}")]
    Invalid { version: String, reason: String },

    #[error("unknown algorithm version '{0}'")]
    UnknownVersion(String),

    #[error("duplicate algorithm version '{0}'")]
    DuplicateVersion(String),

    #[error("catalog contains no algorithm versions")]
    EmptyCatalog,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures that abort a whole pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Window(#[from] InputDataError),

    #[error("run cancelled after {processed} records")]
    Cancelled { processed: usize },

    #[error("run exceeded its deadline after {processed} records")]
    TimedOut { processed: usize },

    #[error("detection worker panicked")]
    WorkerPanicked,

    #[error("failed to encode inputs for digest: {0}")]
    Digest(#[source] serde_json::Error),
}

/// Replay failures (divergence is reported separately as a diagnostic)
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] InputDataError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;
