//! Detection pipeline: correlation, baselines, detection and scoring
//!
//! One run evaluates a single window under a single immutable
//! `AlgorithmConfig`. History for baselines is the lookback window that ends
//! where the evaluation window starts. Metrics are evaluated in parallel on
//! scoped worker threads; results are merged and sorted so the output does not
//! depend on scheduling. The pipeline never writes anywhere.

use crate::baseline::{Baseline, BaselineCalculator, Sample};
use crate::config::AlgorithmConfig;
use crate::correlator::{Correlation, Correlator};
use crate::detector::DetectorRegistry;
use crate::error::{BaselineError, DetectorError, InputDataError, PipelineError};
use crate::ingest::HistoricalSource;
use crate::model::{checked_hours, detection_order, AnomalyRecord, InputRecord, TimeWindow};
use crate::scorer::DeviationScorer;
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation flag shared with a running pipeline
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation and deadline for one run
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunControl {
    /// No cancellation, no deadline
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self, processed: usize) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { processed });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PipelineError::TimedOut { processed });
        }
        Ok(())
    }
}

/// A per-record or per-metric problem that was skipped, not fatal
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Input(InputDataError),
    InsufficientBaseline(BaselineError),
    Detector {
        source_id: String,
        timestamp: DateTime<Utc>,
        error: DetectorError,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Input(err) => write!(f, "input: {}", err),
            Diagnostic::InsufficientBaseline(err) => write!(f, "baseline: {}", err),
            Diagnostic::Detector {
                source_id,
                timestamp,
                error,
            } => write!(
                f,
                "detector: {} (source {} at {})",
                error,
                source_id,
                timestamp.to_rfc3339()
            ),
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub window: TimeWindow,
    pub algorithm_version: String,
    /// Emitted records in detection order
    pub records: Vec<AnomalyRecord>,
    pub diagnostics: Vec<Diagnostic>,
    /// Baselines the detectors ran against, by metric
    pub baselines: BTreeMap<String, Baseline>,
    /// SHA-256 (hex) of the correlated history and evaluation inputs
    pub input_digest: String,
    /// Correlated records in the evaluation window
    pub evaluated: usize,
    /// Baseline samples drawn from history
    pub history_samples: usize,
}

struct MetricJob<'a> {
    records: &'a [InputRecord],
    baseline: Option<&'a Baseline>,
}

#[derive(Default)]
struct MetricOutcome {
    records: Vec<AnomalyRecord>,
    diagnostics: Vec<Diagnostic>,
}

/// The live/replay detection path for one algorithm version
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
    config: Arc<AlgorithmConfig>,
    correlator: Correlator,
    calculator: BaselineCalculator,
    registry: DetectorRegistry,
    scorer: DeviationScorer,
    workers: usize,
}

impl DetectionPipeline {
    pub fn new(config: Arc<AlgorithmConfig>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8);
        Self {
            correlator: Correlator::from_config(&config),
            calculator: BaselineCalculator::from_config(&config),
            registry: DetectorRegistry::from_config(&config),
            scorer: DeviationScorer::from_config(&config),
            workers,
            config,
        }
    }

    /// Override the number of detection threads (minimum 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    pub fn history_window(&self, window: &TimeWindow) -> Result<TimeWindow, InputDataError> {
        window.preceding(checked_hours(self.config.baseline_lookback_hours)?)
    }

    /// Evaluate `window` against inputs read from `source`
    ///
    /// # Errors
    /// Source failures, cancellation and deadline expiry abort the run.
    /// Everything else is reported in `PipelineReport::diagnostics`.
    pub fn run(
        &self,
        window: &TimeWindow,
        source: &dyn HistoricalSource,
        control: &RunControl,
    ) -> Result<PipelineReport, PipelineError> {
        control.check(0)?;
        let history_window = self.history_window(window)?;

        let history_raw = source.fetch(&history_window)?;
        let eval_raw = source.fetch(window)?;
        control.check(0)?;

        let history = self
            .correlator
            .correlate(&history_window, &history_raw.predicted, &history_raw.actual);
        let current = self
            .correlator
            .correlate(window, &eval_raw.predicted, &eval_raw.actual);
        if !history.rejected.is_empty() || !history_raw.rejected.is_empty() {
            tracing::debug!(
                rejected = history.rejected.len() + history_raw.rejected.len(),
                "skipped unusable history records"
            );
        }

        let input_digest = input_digest(window, &history_window, &history, &current)?;
        let samples = self.samples(&history.records);

        // Unreadable lines first, in file order, then correlation rejects
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        for err in eval_raw.rejected.iter().chain(&current.rejected) {
            tracing::warn!("skipping input record: {}", err);
        }
        diagnostics.extend(eval_raw.rejected.into_iter().map(Diagnostic::Input));
        diagnostics.extend(current.rejected.iter().cloned().map(Diagnostic::Input));

        let mut by_metric: BTreeMap<&str, Vec<InputRecord>> = BTreeMap::new();
        for record in &current.records {
            by_metric
                .entry(record.metric_name.as_str())
                .or_default()
                .push(record.clone());
        }

        let mut baselines = BTreeMap::new();
        let mut runnable: Vec<&str> = Vec::new();
        for metric in by_metric.keys().copied() {
            let Some(binding) = self.config.binding(metric) else {
                tracing::warn!(metric, "metric is not bound to a detector");
                diagnostics.push(Diagnostic::Input(InputDataError::UnboundMetric(
                    metric.to_string(),
                )));
                continue;
            };
            if !binding.needs_baseline() {
                runnable.push(metric);
                continue;
            }
            match self.calculator.compute(metric, &history_window, &samples) {
                Ok(baseline) => {
                    baselines.insert(metric.to_string(), baseline);
                    runnable.push(metric);
                }
                Err(err) => {
                    tracing::warn!("skipping detectors: {}", err);
                    diagnostics.push(Diagnostic::InsufficientBaseline(err));
                }
            }
        }

        let jobs: Vec<MetricJob<'_>> = runnable
            .iter()
            .map(|metric| MetricJob {
                records: by_metric.get(metric).map(Vec::as_slice).unwrap_or(&[]),
                baseline: baselines.get(*metric),
            })
            .collect();

        let processed = AtomicUsize::new(0);
        let outcomes = self.evaluate_jobs(window, &jobs, control, &processed)?;
        control.check(processed.load(Ordering::SeqCst))?;

        let mut records = Vec::new();
        for outcome in outcomes {
            records.extend(outcome.records);
            diagnostics.extend(outcome.diagnostics);
        }
        records.sort_by(detection_order);

        tracing::info!(
            window = %window,
            version = %self.config.algorithm_version,
            evaluated = current.records.len(),
            anomalies = records.len(),
            diagnostics = diagnostics.len(),
            "window evaluated"
        );

        Ok(PipelineReport {
            window: *window,
            algorithm_version: self.config.algorithm_version.clone(),
            records,
            diagnostics,
            baselines,
            input_digest,
            evaluated: current.records.len(),
            history_samples: samples.len(),
        })
    }

    fn samples(&self, history: &[InputRecord]) -> Vec<Sample> {
        history
            .iter()
            .filter_map(|record| {
                let binding = self.config.binding(&record.metric_name)?;
                if !binding.needs_baseline() {
                    return None;
                }
                Some(Sample {
                    metric_name: record.metric_name.clone(),
                    value: record.signal(binding.basis)?,
                    timestamp: record.timestamp,
                })
            })
            .collect()
    }

    /// Run detection for every job on scoped workers; outcomes are in job order
    fn evaluate_jobs(
        &self,
        window: &TimeWindow,
        jobs: &[MetricJob<'_>],
        control: &RunControl,
        processed: &AtomicUsize,
    ) -> Result<Vec<MetricOutcome>, PipelineError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let queue = ArrayQueue::new(jobs.len());
        for idx in 0..jobs.len() {
            // Capacity equals job count
            let _ = queue.push(idx);
        }
        let workers = self.workers.min(jobs.len());

        let collected = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let queue = &queue;
                    scope.spawn(move |_| {
                        let mut done = Vec::new();
                        while let Some(idx) = queue.pop() {
                            if control.interrupted() {
                                break;
                            }
                            let outcome = self.evaluate_metric(window, &jobs[idx], control, processed);
                            done.push((idx, outcome));
                        }
                        done
                    })
                })
                .collect();

            let mut all = Vec::with_capacity(jobs.len());
            for handle in handles {
                match handle.join() {
                    Ok(done) => all.extend(done),
                    Err(_) => return Err(PipelineError::WorkerPanicked),
                }
            }
            Ok(all)
        })
        .map_err(|_| PipelineError::WorkerPanicked)??;

        let mut collected = collected;
        collected.sort_by_key(|(idx, _)| *idx);
        Ok(collected.into_iter().map(|(_, outcome)| outcome).collect())
    }

    fn evaluate_metric(
        &self,
        window: &TimeWindow,
        job: &MetricJob<'_>,
        control: &RunControl,
        processed: &AtomicUsize,
    ) -> MetricOutcome {
        let mut outcome = MetricOutcome::default();
        for input in job.records {
            if control.interrupted() {
                break;
            }
            let evaluation = self.registry.evaluate(input, job.baseline);
            for error in evaluation.failures {
                outcome.diagnostics.push(Diagnostic::Detector {
                    source_id: input.source_id.clone(),
                    timestamp: input.timestamp,
                    error,
                });
            }
            outcome.records.extend(
                evaluation
                    .candidates
                    .iter()
                    .filter_map(|candidate| self.scorer.score(input, candidate, window)),
            );
            processed.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }
}

/// SHA-256 over the canonical JSON of both windows and their correlated inputs
fn input_digest(
    window: &TimeWindow,
    history_window: &TimeWindow,
    history: &Correlation,
    current: &Correlation,
) -> Result<String, PipelineError> {
    let mut hasher = Sha256::new();
    for (w, correlation) in [(history_window, history), (window, current)] {
        hasher.update(serde_json::to_vec(w).map_err(PipelineError::Digest)?);
        for record in &correlation.records {
            hasher.update(serde_json::to_vec(record).map_err(PipelineError::Digest)?);
            hasher.update(b"\n");
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::correlator::{ActualRecord, PredictedRecord};
    use crate::ingest::MemorySource;
    use crate::model::{AnomalyType, MetricValue};

    fn window() -> TimeWindow {
        TimeWindow::parse("2024-09-08T00:00:00Z", "2024-09-09T00:00:00Z").unwrap()
    }

    fn pair(
        source: &str,
        metric: &str,
        predicted: MetricValue,
        actual: MetricValue,
        ts: DateTime<Utc>,
    ) -> (PredictedRecord, ActualRecord) {
        (
            PredictedRecord {
                source_id: source.to_string(),
                metric_name: metric.to_string(),
                value: predicted,
                timestamp: ts,
            },
            ActualRecord {
                source_id: source.to_string(),
                metric_name: metric.to_string(),
                value: actual,
                timestamp: ts,
            },
        )
    }

    /// 48 hourly cost samples alternating 90/110, then one spike in the window
    fn source_with_spike(spike: f64) -> MemorySource {
        let mut predicted = Vec::new();
        let mut actual = Vec::new();
        for h in 1..=48 {
            let ts = window().start() - Duration::hours(h);
            let v = if h % 2 == 0 { 90.0 } else { 110.0 };
            let (p, a) = pair(
                "svc",
                "estimated_cost_usd",
                MetricValue::Number(100.0),
                MetricValue::Number(v),
                ts,
            );
            predicted.push(p);
            actual.push(a);
        }
        let (p, a) = pair(
            "svc",
            "estimated_cost_usd",
            MetricValue::Number(100.0),
            MetricValue::Number(spike),
            window().start() + Duration::hours(3),
        );
        predicted.push(p);
        actual.push(a);
        MemorySource::new(predicted, actual)
    }

    fn pipeline() -> DetectionPipeline {
        DetectionPipeline::new(Arc::new(AlgorithmConfig::default()))
    }

    #[test]
    fn test_spike_is_detected() {
        let report = pipeline()
            .run(&window(), &source_with_spike(150.0), &RunControl::unbounded())
            .unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.history_samples, 48);
        assert_eq!(report.records.len(), 1);

        let record = &report.records[0];
        assert_eq!(record.anomaly_type, AnomalyType::Cost);
        // mean 100, population std 10
        assert!((record.expected_value - 100.0).abs() < 1e-9);
        assert!((record.deviation_score - 5.0).abs() < 1e-9);
        assert_eq!(record.time_window, window());
        assert_eq!(record.algorithm_version, "1.0.0");
        assert!(report.baselines.contains_key("estimated_cost_usd"));
    }

    #[test]
    fn test_normal_value_is_quiet() {
        let report = pipeline()
            .run(&window(), &source_with_spike(105.0), &RunControl::unbounded())
            .unwrap();
        assert!(report.records.is_empty());
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_insufficient_history_is_reported() {
        let (p, a) = pair(
            "svc",
            "latency_ms",
            MetricValue::Number(100.0),
            MetricValue::Number(9000.0),
            window().start() + Duration::hours(1),
        );
        let report = pipeline()
            .run(&window(), &MemorySource::new(vec![p], vec![a]), &RunControl::unbounded())
            .unwrap();
        assert!(report.records.is_empty());
        assert!(matches!(
            report.diagnostics.as_slice(),
            [Diagnostic::InsufficientBaseline(BaselineError::InsufficientData { .. })]
        ));
    }

    #[test]
    fn test_policy_needs_no_history() {
        let (p, a) = pair(
            "gate",
            "policy_outcome",
            MetricValue::Label("approved".to_string()),
            MetricValue::Label("denied".to_string()),
            window().start() + Duration::hours(1),
        );
        let report = pipeline()
            .run(&window(), &MemorySource::new(vec![p], vec![a]), &RunControl::unbounded())
            .unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].anomaly_type, AnomalyType::Policy);
        assert_eq!(report.records[0].confidence, 0.9);
    }

    #[test]
    fn test_unbound_metric_and_unmatched_input_are_diagnostics() {
        let ts = window().start() + Duration::hours(2);
        let (p, a) = pair(
            "svc",
            "tokens_per_second",
            MetricValue::Number(1.0),
            MetricValue::Number(2.0),
            ts,
        );
        let (orphan, _) = pair(
            "svc",
            "latency_ms",
            MetricValue::Number(1.0),
            MetricValue::Number(1.0),
            ts,
        );
        let report = pipeline()
            .run(
                &window(),
                &MemorySource::new(vec![p, orphan], vec![a]),
                &RunControl::unbounded(),
            )
            .unwrap();
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::Input(InputDataError::UnboundMetric(m)) if m == "tokens_per_second"
        )));
        assert!(report
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Input(InputDataError::Unmatched { .. }))));
    }

    #[test]
    fn test_runs_are_deterministic_across_worker_counts() {
        let source = source_with_spike(170.0);
        let single = pipeline()
            .with_workers(1)
            .run(&window(), &source, &RunControl::unbounded())
            .unwrap();
        let many = pipeline()
            .with_workers(8)
            .run(&window(), &source, &RunControl::unbounded())
            .unwrap();

        assert_eq!(single.input_digest, many.input_digest);
        assert_eq!(single.records.len(), many.records.len());
        for (a, b) in single.records.iter().zip(&many.records) {
            assert!(a.same_detection(b));
        }
    }

    #[test]
    fn test_digest_changes_with_inputs() {
        let a = pipeline()
            .run(&window(), &source_with_spike(150.0), &RunControl::unbounded())
            .unwrap();
        let b = pipeline()
            .run(&window(), &source_with_spike(151.0), &RunControl::unbounded())
            .unwrap();
        assert_eq!(a.input_digest.len(), 64);
        assert_ne!(a.input_digest, b.input_digest);
    }

    #[test]
    fn test_input_digest_covers_every_correlated_record() {
        let history_window = window().preceding(Duration::hours(24)).unwrap();
        let ts = window().start() + Duration::hours(1);
        let record = |actual: f64| InputRecord {
            source_id: "svc".to_string(),
            metric_name: "latency_ms".to_string(),
            predicted_value: MetricValue::Number(100.0),
            actual_value: MetricValue::Number(actual),
            timestamp: ts,
            time_window: TimeWindow::bucket_of(ts, 3600).unwrap(),
        };
        let correlation = |records: Vec<InputRecord>| Correlation {
            records,
            rejected: Vec::new(),
        };
        let history = correlation(Vec::new());

        let both = input_digest(
            &window(),
            &history_window,
            &history,
            &correlation(vec![record(1.0), record(2.0)]),
        )
        .unwrap();
        let again = input_digest(
            &window(),
            &history_window,
            &history,
            &correlation(vec![record(1.0), record(2.0)]),
        )
        .unwrap();
        let one = input_digest(
            &window(),
            &history_window,
            &history,
            &correlation(vec![record(1.0)]),
        )
        .unwrap();

        assert_eq!(both, again);
        assert_ne!(both, one);
    }

    #[test]
    fn test_history_lookback_out_of_range_is_an_error() {
        let config = AlgorithmConfig {
            baseline_lookback_hours: i64::MAX,
            ..AlgorithmConfig::default()
        };
        let err = DetectionPipeline::new(Arc::new(config))
            .run(&window(), &source_with_spike(150.0), &RunControl::unbounded())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Window(InputDataError::OutOfRange { quantity: "hours", .. })
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let control = RunControl::unbounded().with_cancellation(token);
        let err = pipeline()
            .run(&window(), &source_with_spike(150.0), &control)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { processed: 0 }));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let control = RunControl::unbounded().with_timeout(std::time::Duration::ZERO);
        let err = pipeline()
            .run(&window(), &source_with_spike(150.0), &control)
            .unwrap_err();
        assert!(matches!(err, PipelineError::TimedOut { .. }));
    }
}
