// Shared fixtures for integration tests
//
// Builds predicted/actual streams with a known history so detection outcomes
// are predictable, and writes them as JSONL input directories.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use driftwatch::correlator::{ActualRecord, PredictedRecord};
use driftwatch::ingest::{MemorySource, ACTUAL_FILE, PREDICTED_FILE};
use driftwatch::model::{MetricValue, TimeWindow};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const WINDOW_START: &str = "2024-06-10T00:00:00Z";
pub const WINDOW_END: &str = "2024-06-11T00:00:00Z";

pub fn window() -> TimeWindow {
    TimeWindow::parse(WINDOW_START, WINDOW_END).unwrap()
}

pub fn next_window() -> TimeWindow {
    TimeWindow::parse(WINDOW_END, "2024-06-12T00:00:00Z").unwrap()
}

/// Predicted/actual streams under construction
#[derive(Debug, Clone, Default)]
pub struct Streams {
    pub predicted: Vec<PredictedRecord>,
    pub actual: Vec<ActualRecord>,
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a matched pair observed at `ts`
    pub fn pair(
        mut self,
        source: &str,
        metric: &str,
        predicted: MetricValue,
        actual: MetricValue,
        ts: DateTime<Utc>,
    ) -> Self {
        self.predicted.push(PredictedRecord {
            source_id: source.to_string(),
            metric_name: metric.to_string(),
            value: predicted,
            timestamp: ts,
        });
        self.actual.push(ActualRecord {
            source_id: source.to_string(),
            metric_name: metric.to_string(),
            value: actual,
            timestamp: ts,
        });
        self
    }

    pub fn numeric(self, source: &str, metric: &str, predicted: f64, actual: f64, ts: DateTime<Utc>) -> Self {
        self.pair(
            source,
            metric,
            MetricValue::Number(predicted),
            MetricValue::Number(actual),
            ts,
        )
    }

    /// A predicted record with no actual counterpart
    pub fn orphan_prediction(mut self, source: &str, metric: &str, value: f64, ts: DateTime<Utc>) -> Self {
        self.predicted.push(PredictedRecord {
            source_id: source.to_string(),
            metric_name: metric.to_string(),
            value: MetricValue::Number(value),
            timestamp: ts,
        });
        self
    }

    /// `count` hourly samples ending one hour before `before`, alternating `low`/`high`
    pub fn alternating_history(
        mut self,
        source: &str,
        metric: &str,
        low: f64,
        high: f64,
        count: i64,
        before: DateTime<Utc>,
    ) -> Self {
        let mid = (low + high) / 2.0;
        for i in 0..count {
            let ts = before - Duration::hours(count - i);
            let value = if i % 2 == 0 { low } else { high };
            self = self.numeric(source, metric, mid, value, ts);
        }
        self
    }

    pub fn source(&self) -> MemorySource {
        MemorySource::new(self.predicted.clone(), self.actual.clone())
    }

    /// Write `predicted.jsonl` and `actual.jsonl` into `dir`
    pub fn write_jsonl(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut predicted = fs::File::create(dir.join(PREDICTED_FILE))?;
        for record in &self.predicted {
            writeln!(predicted, "{}", serde_json::to_string(record)?)?;
        }
        let mut actual = fs::File::create(dir.join(ACTUAL_FILE))?;
        for record in &self.actual {
            writeln!(actual, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }
}

/// History plus one cost spike and one policy mismatch inside `window()`
///
/// Cost history: 30 samples alternating 90/110 (mean 100, std dev 10), so the
/// spike to 200 has z = 10 and confidence 0.65. The policy mismatch has the
/// fixed policy confidence 0.9.
pub fn standard_streams() -> Streams {
    let w = window();
    Streams::new()
        .alternating_history("svc-a", "estimated_cost_usd", 90.0, 110.0, 30, w.start())
        .numeric("svc-a", "estimated_cost_usd", 100.0, 200.0, w.start() + Duration::hours(2))
        .numeric("svc-a", "estimated_cost_usd", 100.0, 101.0, w.start() + Duration::hours(3))
        .pair(
            "svc-b",
            "policy_outcome",
            MetricValue::Label("approved".to_string()),
            MetricValue::Label("denied".to_string()),
            w.start() + Duration::hours(5),
        )
}

/// Records in the next window, for concurrent live processing
pub fn next_window_streams() -> Streams {
    let w = next_window();
    Streams::new().pair(
        "svc-c",
        "policy_outcome",
        MetricValue::Flag(true),
        MetricValue::Flag(false),
        w.start() + Duration::hours(1),
    )
}
