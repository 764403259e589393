//! Deterministic replay of historical windows
//!
//! Replay re-runs the live pipeline over a past window with a pinned algorithm
//! version and returns the result as a separate set tagged
//! `EmissionMode::Replay`. It only reads from the store: the run ledger
//! selects the default version and supplies the live records to verify
//! against. Nothing is appended, so aborting a replay is always safe.

use crate::config::AlgorithmCatalog;
use crate::error::ReplayError;
use crate::ingest::HistoricalSource;
use crate::model::{detection_order, AnomalyRecord, EmissionMode, TimeWindow};
use crate::pipeline::{DetectionPipeline, Diagnostic, PipelineReport, RunControl};
use crate::store::AnomalyStore;
use std::cmp::Ordering;
use thiserror::Error;

/// A replay under the live version with unchanged inputs that did not
/// reproduce the live records
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "replay of {window} under {algorithm_version} diverged from the live run: {} live records not reproduced, {} unexpected records",
    missing.len(),
    unexpected.len()
)]
pub struct ReplayDivergence {
    pub window: TimeWindow,
    pub algorithm_version: String,
    /// Live records with no replayed counterpart
    pub missing: Vec<AnomalyRecord>,
    /// Replayed records with no live counterpart
    pub unexpected: Vec<AnomalyRecord>,
}

/// How a replay relates to the live run of the same window
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayVerification {
    /// The window was never live-processed
    NotPreviouslyProcessed,
    /// The window was live-processed under a different version only
    VersionDiffers { live_versions: Vec<String> },
    /// Historical inputs differ from those the live run saw
    InputsChanged {
        live_digest: String,
        replay_digest: String,
    },
    /// Same version, same inputs, same records (ignoring record ids)
    Reproduced { compared: usize },
    /// Same version, same inputs, different records
    Diverged(ReplayDivergence),
}

/// Result of one replay; never part of the live store
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub mode: EmissionMode,
    pub window: TimeWindow,
    pub algorithm_version: String,
    pub records: Vec<AnomalyRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub input_digest: String,
    pub verification: ReplayVerification,
}

impl ReplayOutcome {
    pub fn divergence(&self) -> Option<&ReplayDivergence> {
        match &self.verification {
            ReplayVerification::Diverged(divergence) => Some(divergence),
            _ => None,
        }
    }
}

pub struct ReplayEngine<'a, S: AnomalyStore + ?Sized> {
    catalog: &'a AlgorithmCatalog,
    source: &'a dyn HistoricalSource,
    store: &'a S,
}

impl<'a, S: AnomalyStore + ?Sized> ReplayEngine<'a, S> {
    pub fn new(catalog: &'a AlgorithmCatalog, source: &'a dyn HistoricalSource, store: &'a S) -> Self {
        Self {
            catalog,
            source,
            store,
        }
    }

    /// Re-derive the anomalies of `window`
    ///
    /// Without an explicit `version`, the version of the window's most recent
    /// live run is used, falling back to the active version.
    pub fn replay(
        &self,
        window: &TimeWindow,
        version: Option<&str>,
        control: &RunControl,
    ) -> Result<ReplayOutcome, ReplayError> {
        let config = match version {
            Some(v) => self.catalog.get(v)?,
            None => match self.store.latest_run(window)? {
                Some(run) => self.catalog.get(&run.algorithm_version)?,
                None => self.catalog.active(),
            },
        };

        tracing::info!(
            window = %window,
            version = %config.algorithm_version,
            source = %self.source.describe(),
            "replaying window"
        );

        let report = DetectionPipeline::new(config).run(window, self.source, control)?;
        let verification = self.verify(&report)?;

        if let ReplayVerification::Diverged(divergence) = &verification {
            tracing::warn!("{}", divergence);
        }

        Ok(ReplayOutcome {
            mode: EmissionMode::Replay,
            window: report.window,
            algorithm_version: report.algorithm_version,
            records: report.records,
            diagnostics: report.diagnostics,
            input_digest: report.input_digest,
            verification,
        })
    }

    fn verify(&self, report: &PipelineReport) -> Result<ReplayVerification, ReplayError> {
        let Some(run) = self
            .store
            .find_run(&report.window, &report.algorithm_version)?
        else {
            let live_versions: Vec<String> = self
                .store
                .runs()?
                .into_iter()
                .filter(|run| run.window == report.window)
                .map(|run| run.algorithm_version)
                .collect();
            return Ok(if live_versions.is_empty() {
                ReplayVerification::NotPreviouslyProcessed
            } else {
                ReplayVerification::VersionDiffers { live_versions }
            });
        };

        if run.input_digest != report.input_digest {
            return Ok(ReplayVerification::InputsChanged {
                live_digest: run.input_digest,
                replay_digest: report.input_digest.clone(),
            });
        }

        let live = run
            .record_ids
            .iter()
            .map(|id| self.store.get(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let (missing, unexpected) = diff_records(live, report.records.clone());

        if missing.is_empty() && unexpected.is_empty() {
            Ok(ReplayVerification::Reproduced {
                compared: report.records.len(),
            })
        } else {
            Ok(ReplayVerification::Diverged(ReplayDivergence {
                window: report.window,
                algorithm_version: report.algorithm_version.clone(),
                missing,
                unexpected,
            }))
        }
    }
}

/// Multiset difference on detection content, ignoring record ids
fn diff_records(
    mut live: Vec<AnomalyRecord>,
    mut replayed: Vec<AnomalyRecord>,
) -> (Vec<AnomalyRecord>, Vec<AnomalyRecord>) {
    live.sort_by(detection_order);
    replayed.sort_by(detection_order);

    let mut missing = Vec::new();
    let mut unexpected = Vec::new();
    let mut live = live.into_iter().peekable();
    let mut replayed = replayed.into_iter().peekable();

    loop {
        let order = match (live.peek(), replayed.peek()) {
            (Some(l), Some(r)) => detection_order(l, r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                live.next();
                replayed.next();
            }
            Ordering::Less => missing.extend(live.next()),
            Ordering::Greater => unexpected.extend(replayed.next()),
        }
    }
    (missing, unexpected)
}
