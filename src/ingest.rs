//! Read-only access to historical predicted/actual records
//!
//! The detection core never writes upstream. A `HistoricalSource` returns the
//! raw records whose timestamps fall inside a window. Unreadable records are
//! returned alongside the good ones so the pipeline can report and skip them;
//! only I/O failures propagate to the caller.

use crate::correlator::{ActualRecord, PredictedRecord};
use crate::error::{InputDataError, RecordSide, SourceError};
use crate::model::{parse_timestamp, TimeWindow};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const PREDICTED_FILE: &str = "predicted.jsonl";
pub const ACTUAL_FILE: &str = "actual.jsonl";

/// Raw, uncorrelated records for one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub predicted: Vec<PredictedRecord>,
    pub actual: Vec<ActualRecord>,
    /// Lines that could not be decoded, in file order
    pub rejected: Vec<InputDataError>,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.predicted.len() + self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicted.is_empty() && self.actual.is_empty()
    }
}

/// Read-only ingestion collaborator
pub trait HistoricalSource: Send + Sync {
    /// Every record with a timestamp inside `window`
    fn fetch(&self, window: &TimeWindow) -> Result<RawBatch, SourceError>;

    /// Human-readable origin, used in logs
    fn describe(&self) -> String;
}

/// In-memory source for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    batch: RawBatch,
}

impl MemorySource {
    pub fn new(predicted: Vec<PredictedRecord>, actual: Vec<ActualRecord>) -> Self {
        Self {
            batch: RawBatch {
                predicted,
                actual,
                rejected: Vec::new(),
            },
        }
    }
}

impl HistoricalSource for MemorySource {
    fn fetch(&self, window: &TimeWindow) -> Result<RawBatch, SourceError> {
        Ok(RawBatch {
            predicted: self
                .batch
                .predicted
                .iter()
                .filter(|r| window.contains(r.timestamp))
                .cloned()
                .collect(),
            actual: self
                .batch
                .actual
                .iter()
                .filter(|r| window.contains(r.timestamp))
                .cloned()
                .collect(),
            rejected: Vec::new(),
        })
    }

    fn describe(&self) -> String {
        format!("memory ({} records)", self.batch.len())
    }
}

/// Directory holding `predicted.jsonl` and `actual.jsonl`
///
/// A missing file is an empty stream. A line that fails to decode is reported
/// in `RawBatch::rejected` unless its timestamp places it outside the window.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    dir: PathBuf,
}

impl JsonlSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T, F>(
        &self,
        name: &str,
        side: RecordSide,
        window: &TimeWindow,
        timestamp: F,
    ) -> Result<(Vec<T>, Vec<InputDataError>), SourceError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> DateTime<Utc>,
    {
        let path = self.dir.join(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "input file absent, treating as empty");
                return Ok((Vec::new(), Vec::new()));
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: String| InputDataError::Malformed {
                side,
                path: path.clone(),
                line: idx + 1,
                reason,
            };

            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    rejected.push(malformed(e.to_string()));
                    continue;
                }
            };
            // A readable timestamp outside the window means the line is not ours to report
            let stamped = value
                .get("timestamp")
                .and_then(serde_json::Value::as_str)
                .and_then(|ts| parse_timestamp(ts).ok());
            if stamped.is_some_and(|ts| !window.contains(ts)) {
                continue;
            }
            match serde_json::from_value::<T>(value) {
                Ok(record) if window.contains(timestamp(&record)) => records.push(record),
                Ok(_) => {}
                Err(e) => rejected.push(malformed(e.to_string())),
            }
        }
        Ok((records, rejected))
    }
}

impl HistoricalSource for JsonlSource {
    fn fetch(&self, window: &TimeWindow) -> Result<RawBatch, SourceError> {
        let (predicted, mut rejected) = self.read(
            PREDICTED_FILE,
            RecordSide::Predicted,
            window,
            |r: &PredictedRecord| r.timestamp,
        )?;
        let (actual, actual_rejected) =
            self.read(ACTUAL_FILE, RecordSide::Actual, window, |r: &ActualRecord| {
                r.timestamp
            })?;
        rejected.extend(actual_rejected);
        tracing::debug!(
            dir = %self.dir.display(),
            predicted = predicted.len(),
            actual = actual.len(),
            rejected = rejected.len(),
            "fetched raw records"
        );
        Ok(RawBatch {
            predicted,
            actual,
            rejected,
        })
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_timestamp, MetricValue};
    use std::fs;
    use tempfile::TempDir;

    fn window() -> TimeWindow {
        TimeWindow::parse("2024-05-01T00:00:00Z", "2024-05-02T00:00:00Z").unwrap()
    }

    #[test]
    fn test_jsonl_source_filters_by_window() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PREDICTED_FILE),
            concat!(
                r#"{"source_id":"a","metric_name":"latency_ms","value":100.0,"timestamp":"2024-05-01T01:00:00Z"}"#,
                "\n",
                r#"{"source_id":"a","metric_name":"latency_ms","value":100.0,"timestamp":"2024-04-30T01:00:00Z"}"#,
                "\n\n",
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join(ACTUAL_FILE),
            concat!(
                r#"{"source_id":"a","metric_name":"policy_outcome","value":"denied","timestamp":"2024-05-01T01:00:00Z"}"#,
                "\n"
            ),
        )
        .unwrap();

        let source = JsonlSource::new(dir.path());
        let batch = source.fetch(&window()).unwrap();
        assert_eq!(batch.predicted.len(), 1);
        assert_eq!(batch.actual.len(), 1);
        assert_eq!(batch.actual[0].value, MetricValue::Label("denied".to_string()));
    }

    #[test]
    fn test_jsonl_source_missing_files_are_empty() {
        let dir = TempDir::new().unwrap();
        let batch = JsonlSource::new(dir.path()).fetch(&window()).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_jsonl_source_reports_malformed_lines_and_keeps_the_rest() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(ACTUAL_FILE),
            concat!(
                "{not json}\n",
                r#"{"source_id":"a","metric_name":"latency_ms","value":100.0,"timestamp":"not-a-time"}"#,
                "\n",
                r#"{"source_id":"a","metric_name":"latency_ms","value":120.0,"timestamp":"2024-05-01T02:00:00Z"}"#,
                "\n",
            ),
        )
        .unwrap();

        let batch = JsonlSource::new(dir.path()).fetch(&window()).unwrap();
        assert_eq!(batch.actual.len(), 1);
        assert_eq!(batch.rejected.len(), 2);
        assert!(matches!(
            &batch.rejected[0],
            InputDataError::Malformed { side: RecordSide::Actual, line: 1, .. }
        ));
        assert!(matches!(
            &batch.rejected[1],
            InputDataError::Malformed { line: 2, reason, .. } if reason.contains("not-a-time")
        ));
    }

    #[test]
    fn test_jsonl_source_ignores_bad_lines_dated_outside_the_window() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PREDICTED_FILE),
            concat!(
                r#"{"metric_name":"latency_ms","value":1.0,"timestamp":"2024-04-01T00:00:00Z"}"#,
                "\n"
            ),
        )
        .unwrap();
        let batch = JsonlSource::new(dir.path()).fetch(&window()).unwrap();
        assert!(batch.is_empty());
        assert!(batch.rejected.is_empty());
    }

    #[test]
    fn test_memory_source_filters_by_window() {
        let ts = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        let late = parse_timestamp("2024-05-03T12:00:00Z").unwrap();
        let source = MemorySource::new(
            vec![
                PredictedRecord {
                    source_id: "a".into(),
                    metric_name: "cost".into(),
                    value: MetricValue::Number(1.0),
                    timestamp: ts,
                },
                PredictedRecord {
                    source_id: "a".into(),
                    metric_name: "cost".into(),
                    value: MetricValue::Number(1.0),
                    timestamp: late,
                },
            ],
            Vec::new(),
        );
        let batch = source.fetch(&window()).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(source.describe().contains("2 records"));
    }
}
