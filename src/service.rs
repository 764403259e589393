//! Query, replay and processing surface over one store
//!
//! `AnomalyService` exposes list/get/replay/trust/stats plus live window
//! processing. Live processing is serialized per service; replay and queries
//! only read and can run alongside it.

use crate::config::{AlgorithmCatalog, Settings};
use crate::error::{Result, StoreError};
use crate::filter::AnomalyFilter;
use crate::ingest::{HistoricalSource, JsonlSource};
use crate::model::{AnomalyRecord, TimeWindow};
use crate::pipeline::{DetectionPipeline, PipelineReport, RunControl};
use crate::replay::{ReplayEngine, ReplayOutcome};
use crate::store::{AnomalyStore, FileStore, RunManifest, StoreStats};
use crate::trust::{TrustAggregator, TrustSignal};
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

pub struct AnomalyService<S: AnomalyStore> {
    catalog: AlgorithmCatalog,
    source: Box<dyn HistoricalSource>,
    store: S,
    trust_window_hours: i64,
    live: Mutex<()>,
}

impl AnomalyService<FileStore> {
    /// Durable service from process settings
    pub fn open(settings: &Settings) -> Result<Self> {
        let catalog = settings.load_catalog()?;
        let store = FileStore::open(&settings.store_path)?;
        let source = JsonlSource::new(&settings.input_dir);
        Ok(Self::new(catalog, Box::new(source), store)
            .with_trust_window_hours(settings.trust_window_hours))
    }
}

impl<S: AnomalyStore> AnomalyService<S> {
    pub fn new(catalog: AlgorithmCatalog, source: Box<dyn HistoricalSource>, store: S) -> Self {
        Self {
            catalog,
            source,
            store,
            trust_window_hours: Settings::default().trust_window_hours,
            live: Mutex::new(()),
        }
    }

    pub fn with_trust_window_hours(mut self, hours: i64) -> Self {
        self.trust_window_hours = hours.max(1);
        self
    }

    pub fn catalog(&self) -> &AlgorithmCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Detect anomalies in `window` under the active version and persist them
    ///
    /// The records and the run ledger entry are written only after the whole
    /// window was evaluated. A window is processed at most once per version.
    pub fn process_window(&self, window: &TimeWindow, control: &RunControl) -> Result<PipelineReport> {
        let _live = self.live.lock();
        let config = self.catalog.active();
        let version = config.algorithm_version.clone();

        let already = self.store.find_run(window, &version)?.is_some()
            || self.store.count(
                &AnomalyFilter::all()
                    .for_evaluation_window(*window)
                    .for_version(version.as_str()),
            )? > 0;
        if already {
            return Err(StoreError::WindowAlreadyProcessed {
                window: *window,
                algorithm_version: version,
            }
            .into());
        }

        let report = DetectionPipeline::new(config).run(window, self.source.as_ref(), control)?;
        let record_ids = self.store.append_batch(report.records.clone())?;
        self.store.record_run(RunManifest {
            window: report.window,
            algorithm_version: report.algorithm_version.clone(),
            input_digest: report.input_digest.clone(),
            record_ids,
            evaluated: report.evaluated,
            completed_at: Utc::now(),
        })?;

        tracing::info!(
            window = %window,
            version = %version,
            stored = report.records.len(),
            "window processed"
        );
        Ok(report)
    }

    /// Stored anomalies matching `filter`, timestamp ascending
    pub fn list(&self, filter: &AnomalyFilter) -> Result<Vec<AnomalyRecord>> {
        Ok(self.store.query(filter)?)
    }

    pub fn get(&self, record_id: Uuid) -> Result<AnomalyRecord> {
        Ok(self.store.get(record_id)?)
    }

    /// Replay `window`, by default under the version it was processed with
    pub fn replay(
        &self,
        window: &TimeWindow,
        algorithm_version: Option<&str>,
        control: &RunControl,
    ) -> Result<ReplayOutcome> {
        let engine = ReplayEngine::new(&self.catalog, self.source.as_ref(), &self.store);
        Ok(engine.replay(window, algorithm_version, control)?)
    }

    /// Trust signal for `window`, or for the trailing default window ending now
    pub fn trust_signal(&self, window: Option<TimeWindow>) -> Result<TrustSignal> {
        let now = Utc::now();
        let window = match window {
            Some(window) => window,
            None => TimeWindow::ending_at(now, self.trust_window_hours)?,
        };
        let aggregator = TrustAggregator::from_config(&self.catalog.active());
        Ok(aggregator.compute(&self.store, &window, now)?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }
}
