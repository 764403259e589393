//! CLI argument parsing for driftwatch

use crate::filter::AnomalyFilter;
use crate::model::{AnomalyType, TimeWindow};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "driftwatch")]
#[command(version)]
#[command(about = "Advisory anomaly detection over predicted vs. actual behavior", long_about = None)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Anomaly store directory (overrides settings)
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Directory holding predicted.jsonl and actual.jsonl (overrides settings)
    #[arg(long, global = true, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Algorithm catalog (TOML, overrides settings)
    #[arg(long, global = true, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect and store anomalies for a window under the active algorithm version
    Detect(WindowArgs),
    /// List stored anomalies
    List(ListArgs),
    /// Show one stored anomaly
    Get {
        /// Record identifier (UUID)
        record_id: Uuid,
    },
    /// Re-run detection over a past window without touching the store
    Replay(ReplayArgs),
    /// Composite trust signal over a window
    Trust(TrustArgs),
    /// Store statistics
    Stats,
    /// Algorithm versions in the catalog
    Versions,
}

/// An ISO-8601 window, end exclusive
#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// Window start (inclusive)
    #[arg(long, value_name = "TIMESTAMP")]
    pub start: String,

    /// Window end (exclusive)
    #[arg(long, value_name = "TIMESTAMP")]
    pub end: String,
}

impl WindowArgs {
    pub fn window(&self) -> Result<TimeWindow> {
        TimeWindow::parse(&self.start, &self.end).context("invalid --start/--end window")
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Anomaly types to include (comma-separated)
    #[arg(long = "type", value_name = "TYPE", value_delimiter = ',')]
    pub types: Vec<AnomalyType>,

    /// Minimum confidence (inclusive)
    #[arg(long, value_name = "CONFIDENCE")]
    pub min_confidence: Option<f64>,

    /// Range start (inclusive)
    #[arg(long, value_name = "TIMESTAMP", requires = "end")]
    pub start: Option<String>,

    /// Range end (exclusive)
    #[arg(long, value_name = "TIMESTAMP", requires = "start")]
    pub end: Option<String>,

    #[arg(long, value_name = "ID")]
    pub source: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub metric: Option<String>,

    /// Only records stamped with this algorithm version
    #[arg(long = "algorithm-version", value_name = "VERSION")]
    pub algorithm_version: Option<String>,

    /// Return at most N records
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Filter expression, e.g. "type=cost,latency;min_confidence=0.8"
    #[arg(short = 'e', long = "filter", value_name = "EXPR")]
    pub filter: Option<String>,
}

impl ListArgs {
    /// Expression first, then the individual flags on top
    pub fn to_filter(&self) -> Result<AnomalyFilter> {
        let mut filter = match &self.filter {
            Some(expr) => AnomalyFilter::from_expr(expr)?,
            None => AnomalyFilter::all(),
        };
        for anomaly_type in &self.types {
            filter = filter.with_type(*anomaly_type);
        }
        if let Some(min_confidence) = self.min_confidence {
            if !(0.0..=1.0).contains(&min_confidence) {
                bail!(
                    "Invalid value for --min-confidence: {} (must be within [0, 1])",
                    min_confidence
                );
            }
            filter = filter.with_min_confidence(min_confidence);
        }
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            let window = TimeWindow::parse(start, end).context("invalid --start/--end range")?;
            filter = filter.within(window);
        }
        if let Some(source) = &self.source {
            filter = filter.for_source(source.as_str());
        }
        if let Some(metric) = &self.metric {
            filter = filter.for_metric(metric.as_str());
        }
        if let Some(version) = &self.algorithm_version {
            filter = filter.for_version(version.as_str());
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        Ok(filter)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    /// Algorithm version to replay under (default: the live run's version)
    #[arg(long = "algorithm-version", value_name = "VERSION")]
    pub algorithm_version: Option<String>,

    /// Also write replayed records to this JSONL file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Abort the replay after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct TrustArgs {
    /// Window start (inclusive)
    #[arg(long, value_name = "TIMESTAMP", requires = "end", conflicts_with = "hours")]
    pub start: Option<String>,

    /// Window end (exclusive)
    #[arg(long, value_name = "TIMESTAMP", requires = "start")]
    pub end: Option<String>,

    /// Trailing window ending now, in hours (default from settings)
    #[arg(long, value_name = "HOURS")]
    pub hours: Option<i64>,
}

impl TrustArgs {
    /// Explicit window, if one was given
    pub fn window(&self) -> Result<Option<TimeWindow>> {
        match (&self.start, &self.end, self.hours) {
            (Some(start), Some(end), _) => Ok(Some(
                TimeWindow::parse(start, end).context("invalid --start/--end window")?,
            )),
            (_, _, Some(hours)) if hours <= 0 => {
                bail!("Invalid value for --hours: {} (must be > 0)", hours)
            }
            _ => Ok(None),
        }
    }
}
