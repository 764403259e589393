//! Text and JSON rendering for the command-line surface

use crate::cli::OutputFormat;
use crate::model::{AnomalyRecord, EmissionMode, TimeWindow};
use crate::pipeline::{Diagnostic, PipelineReport};
use crate::replay::{ReplayOutcome, ReplayVerification};
use crate::store::StoreStats;
use crate::trust::TrustSignal;
use serde::Serialize;
use std::fmt::Write as _;

/// A list of stored anomalies
#[derive(Debug, Serialize)]
pub struct JsonAnomalyList<'a> {
    pub count: usize,
    pub records: &'a [AnomalyRecord],
}

/// Result of live processing or replay
#[derive(Debug, Serialize)]
pub struct JsonDetection<'a> {
    pub mode: EmissionMode,
    pub window: TimeWindow,
    pub algorithm_version: &'a str,
    pub input_digest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<JsonVerification>,
    pub records: &'a [AnomalyRecord],
    pub diagnostics: Vec<String>,
}

/// Replay verification against the live run
#[derive(Debug, Serialize)]
pub struct JsonVerification {
    /// not_previously_processed, version_differs, inputs_changed, reproduced or diverged
    pub status: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<AnomalyRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected: Option<Vec<AnomalyRecord>>,
}

impl JsonVerification {
    fn from_verification(verification: &ReplayVerification) -> Self {
        let (status, missing, unexpected) = match verification {
            ReplayVerification::NotPreviouslyProcessed => ("not_previously_processed", None, None),
            ReplayVerification::VersionDiffers { .. } => ("version_differs", None, None),
            ReplayVerification::InputsChanged { .. } => ("inputs_changed", None, None),
            ReplayVerification::Reproduced { .. } => ("reproduced", None, None),
            ReplayVerification::Diverged(d) => (
                "diverged",
                Some(d.missing.clone()),
                Some(d.unexpected.clone()),
            ),
        };
        Self {
            status,
            detail: describe_verification(verification),
            missing,
            unexpected,
        }
    }
}

pub fn describe_verification(verification: &ReplayVerification) -> String {
    match verification {
        ReplayVerification::NotPreviouslyProcessed => {
            "window was not processed live; nothing to compare".to_string()
        }
        ReplayVerification::VersionDiffers { live_versions } => format!(
            "window was processed live under {} only",
            live_versions.join(", ")
        ),
        ReplayVerification::InputsChanged {
            live_digest,
            replay_digest,
        } => format!(
            "historical inputs changed since the live run (live {}, now {})",
            short_digest(live_digest),
            short_digest(replay_digest)
        ),
        ReplayVerification::Reproduced { compared } => {
            format!("reproduced the live run ({} records)", compared)
        }
        ReplayVerification::Diverged(divergence) => divergence.to_string(),
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn format_record(out: &mut String, record: &AnomalyRecord) {
    let _ = writeln!(
        out,
        "{}  {:<8} {}/{}  observed={:.4} expected={:.4} deviation={:.3} confidence={:.2}  [{}] {}",
        record.timestamp.to_rfc3339(),
        record.anomaly_type,
        record.source_id,
        record.metric_name,
        record.observed_value,
        record.expected_value,
        record.deviation_score,
        record.confidence,
        record.algorithm_version,
        record.record_id
    );
}

fn format_diagnostics(out: &mut String, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    let _ = writeln!(out, "Diagnostics ({}):", diagnostics.len());
    for diagnostic in diagnostics {
        let _ = writeln!(out, "  {}", diagnostic);
    }
}

pub fn render_records(records: &[AnomalyRecord], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&JsonAnomalyList {
            count: records.len(),
            records,
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            if records.is_empty() {
                out.push_str("No anomalies found\n");
            }
            for record in records {
                format_record(&mut out, record);
            }
            Ok(out)
        }
    }
}

pub fn render_record(record: &AnomalyRecord, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(record),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "record_id:         {}", record.record_id);
            let _ = writeln!(out, "anomaly_type:      {}", record.anomaly_type);
            let _ = writeln!(out, "source_id:         {}", record.source_id);
            let _ = writeln!(out, "metric_name:       {}", record.metric_name);
            let _ = writeln!(out, "timestamp:         {}", record.timestamp.to_rfc3339());
            let _ = writeln!(out, "time_window:       {}", record.time_window);
            let _ = writeln!(out, "observed_value:    {}", record.observed_value);
            let _ = writeln!(out, "expected_value:    {}", record.expected_value);
            let _ = writeln!(
                out,
                "deviation_score:   {} ({:.1}% from expected)",
                record.deviation_score,
                record.deviation_percentage()
            );
            let _ = writeln!(out, "confidence:        {}", record.confidence);
            let _ = writeln!(out, "algorithm_version: {}", record.algorithm_version);
            Ok(out)
        }
    }
}

pub fn render_report(report: &PipelineReport, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&JsonDetection {
            mode: EmissionMode::Live,
            window: report.window,
            algorithm_version: &report.algorithm_version,
            input_digest: &report.input_digest,
            evaluated: Some(report.evaluated),
            verification: None,
            records: &report.records,
            diagnostics: report.diagnostics.iter().map(ToString::to_string).collect(),
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Processed {} under {}: {} records evaluated, {} anomalies stored",
                report.window,
                report.algorithm_version,
                report.evaluated,
                report.records.len()
            );
            for record in &report.records {
                format_record(&mut out, record);
            }
            format_diagnostics(&mut out, &report.diagnostics);
            Ok(out)
        }
    }
}

pub fn render_replay(outcome: &ReplayOutcome, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&JsonDetection {
            mode: outcome.mode,
            window: outcome.window,
            algorithm_version: &outcome.algorithm_version,
            input_digest: &outcome.input_digest,
            evaluated: None,
            verification: Some(JsonVerification::from_verification(&outcome.verification)),
            records: &outcome.records,
            diagnostics: outcome.diagnostics.iter().map(ToString::to_string).collect(),
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Replay of {} under {} ({} output, not stored): {} anomalies",
                outcome.window,
                outcome.algorithm_version,
                outcome.mode,
                outcome.records.len()
            );
            let _ = writeln!(out, "Verification: {}", describe_verification(&outcome.verification));
            for record in &outcome.records {
                format_record(&mut out, record);
            }
            format_diagnostics(&mut out, &outcome.diagnostics);
            Ok(out)
        }
    }
}

/// One JSON record per line, for replay output files
pub fn replay_jsonl(outcome: &ReplayOutcome) -> serde_json::Result<String> {
    let mut out = String::new();
    for record in &outcome.records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn render_trust(signal: &TrustSignal, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(signal),
        OutputFormat::Text => {
            let counts = &signal.contributing_counts;
            let mut out = String::new();
            let _ = writeln!(out, "Trust signal for {}", signal.window);
            let _ = writeln!(
                out,
                "  composite_score: {:.4} ({} trust)",
                signal.composite_score, signal.trust_level
            );
            let _ = writeln!(out, "  weighted_mass:   {:.4}", signal.weighted_mass);
            let _ = writeln!(
                out,
                "  anomalies:       {} (cost {}, quality {}, latency {}, policy {})",
                counts.total(),
                counts.cost,
                counts.quality,
                counts.latency,
                counts.policy
            );
            let _ = writeln!(out, "  computed_at:     {}", signal.computed_at.to_rfc3339());
            Ok(out)
        }
    }
}

pub fn render_stats(stats: &StoreStats, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(stats),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Store: {} ({})",
                stats.backend,
                if stats.persistent { "durable" } else { "ephemeral" }
            );
            let _ = writeln!(out, "Total anomalies: {}", stats.count);
            for (anomaly_type, count) in &stats.counts_by_type {
                let _ = writeln!(out, "  {:<8} {}", anomaly_type, count);
            }
            match (stats.earliest, stats.latest) {
                (Some(earliest), Some(latest)) => {
                    let _ = writeln!(
                        out,
                        "Time range: {} .. {}",
                        earliest.to_rfc3339(),
                        latest.to_rfc3339()
                    );
                }
                _ => out.push_str("Time range: (empty)\n"),
            }
            let _ = writeln!(out, "Processed runs: {}", stats.runs);
            Ok(out)
        }
    }
}
