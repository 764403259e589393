// Append-only anomaly store
//
// Two interchangeable backends share one contract: `MemoryStore` for tests and
// ephemeral use, `FileStore` for durable JSONL persistence. Records are never
// updated or deleted. Writers are serialized; readers take a snapshot under a
// read lock and never observe a partially appended record or batch.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::filter::AnomalyFilter;
use crate::model::{AnomalyRecord, AnomalyType, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Summary of store contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub count: usize,
    /// Every anomaly type, zero included
    pub counts_by_type: BTreeMap<AnomalyType, usize>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub backend: String,
    pub persistent: bool,
    pub runs: usize,
}

/// Ledger entry for one live-processed (window, algorithm version)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub window: TimeWindow,
    pub algorithm_version: String,
    /// SHA-256 of the correlated inputs the run saw
    pub input_digest: String,
    pub record_ids: Vec<Uuid>,
    /// Correlated records evaluated in the window
    pub evaluated: usize,
    pub completed_at: DateTime<Utc>,
}

/// The append-only store contract
pub trait AnomalyStore: Send + Sync {
    /// Persist one record; never overwrites an existing `record_id`
    fn append(&self, record: AnomalyRecord) -> Result<Uuid, StoreError>;

    /// Persist every record or none of them
    fn append_batch(&self, records: Vec<AnomalyRecord>) -> Result<Vec<Uuid>, StoreError>;

    fn get(&self, record_id: Uuid) -> Result<AnomalyRecord, StoreError>;

    /// Matching records ordered by timestamp, ties broken by `record_id`
    fn query(&self, filter: &AnomalyFilter) -> Result<Vec<AnomalyRecord>, StoreError>;

    /// Number of matching records, ignoring `limit`
    fn count(&self, filter: &AnomalyFilter) -> Result<usize, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Add a run to the ledger; a (window, version) pair is recorded once
    fn record_run(&self, manifest: RunManifest) -> Result<(), StoreError>;

    fn find_run(
        &self,
        window: &TimeWindow,
        algorithm_version: &str,
    ) -> Result<Option<RunManifest>, StoreError>;

    /// Every ledger entry in recording order
    fn runs(&self) -> Result<Vec<RunManifest>, StoreError>;

    /// Most recently completed run for `window`, under any version
    fn latest_run(&self, window: &TimeWindow) -> Result<Option<RunManifest>, StoreError> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|run| run.window == *window)
            .max_by_key(|run| run.completed_at))
    }
}

/// In-memory index shared by both backends
#[derive(Debug, Default)]
pub(crate) struct RecordIndex {
    ordered: BTreeMap<(DateTime<Utc>, Uuid), AnomalyRecord>,
    timestamps: HashMap<Uuid, DateTime<Utc>>,
    runs: Vec<RunManifest>,
    run_keys: HashSet<(TimeWindow, String)>,
}

impl RecordIndex {
    /// Validate a batch against itself and the current contents
    pub(crate) fn check_batch(&self, records: &[AnomalyRecord]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            record
                .validate()
                .map_err(|reason| StoreError::InvalidRecord {
                    record_id: record.record_id,
                    reason,
                })?;
            if self.timestamps.contains_key(&record.record_id) || !seen.insert(record.record_id) {
                return Err(StoreError::DuplicateRecordId(record.record_id));
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, record: AnomalyRecord) {
        self.timestamps.insert(record.record_id, record.timestamp);
        self.ordered
            .insert((record.timestamp, record.record_id), record);
    }

    pub(crate) fn get(&self, record_id: Uuid) -> Result<AnomalyRecord, StoreError> {
        self.timestamps
            .get(&record_id)
            .and_then(|ts| self.ordered.get(&(*ts, record_id)))
            .cloned()
            .ok_or(StoreError::NotFound(record_id))
    }

    pub(crate) fn query(&self, filter: &AnomalyFilter) -> Vec<AnomalyRecord> {
        let matching = self.ordered.values().filter(|r| filter.matches(r));
        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    pub(crate) fn count(&self, filter: &AnomalyFilter) -> usize {
        self.ordered.values().filter(|r| filter.matches(r)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.ordered.len()
    }

    pub(crate) fn stats(&self, backend: &str, persistent: bool) -> StoreStats {
        let mut counts_by_type: BTreeMap<AnomalyType, usize> =
            AnomalyType::ALL.into_iter().map(|t| (t, 0)).collect();
        for record in self.ordered.values() {
            *counts_by_type.entry(record.anomaly_type).or_insert(0) += 1;
        }
        StoreStats {
            count: self.ordered.len(),
            counts_by_type,
            earliest: self.ordered.keys().next().map(|(ts, _)| *ts),
            latest: self.ordered.keys().next_back().map(|(ts, _)| *ts),
            backend: backend.to_string(),
            persistent,
            runs: self.runs.len(),
        }
    }

    pub(crate) fn check_run(&self, manifest: &RunManifest) -> Result<(), StoreError> {
        let key = (manifest.window, manifest.algorithm_version.clone());
        if self.run_keys.contains(&key) {
            return Err(StoreError::WindowAlreadyProcessed {
                window: manifest.window,
                algorithm_version: manifest.algorithm_version.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert_run(&mut self, manifest: RunManifest) {
        self.run_keys
            .insert((manifest.window, manifest.algorithm_version.clone()));
        self.runs.push(manifest);
    }

    pub(crate) fn find_run(&self, window: &TimeWindow, algorithm_version: &str) -> Option<RunManifest> {
        self.runs
            .iter()
            .find(|run| run.window == *window && run.algorithm_version == algorithm_version)
            .cloned()
    }

    pub(crate) fn runs(&self) -> Vec<RunManifest> {
        self.runs.clone()
    }
}
