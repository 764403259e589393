use super::{AnomalyStore, RecordIndex, RunManifest, StoreStats};
use crate::error::StoreError;
use crate::filter::AnomalyFilter;
use crate::model::{AnomalyRecord, TimeWindow};
use parking_lot::RwLock;
use uuid::Uuid;

/// Ephemeral store; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<RecordIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnomalyStore for MemoryStore {
    fn append(&self, record: AnomalyRecord) -> Result<Uuid, StoreError> {
        let mut index = self.index.write();
        index.check_batch(std::slice::from_ref(&record))?;
        let id = record.record_id;
        index.insert(record);
        Ok(id)
    }

    fn append_batch(&self, records: Vec<AnomalyRecord>) -> Result<Vec<Uuid>, StoreError> {
        let mut index = self.index.write();
        index.check_batch(&records)?;
        let ids = records.iter().map(|r| r.record_id).collect();
        for record in records {
            index.insert(record);
        }
        Ok(ids)
    }

    fn get(&self, record_id: Uuid) -> Result<AnomalyRecord, StoreError> {
        self.index.read().get(record_id)
    }

    fn query(&self, filter: &AnomalyFilter) -> Result<Vec<AnomalyRecord>, StoreError> {
        Ok(self.index.read().query(filter))
    }

    fn count(&self, filter: &AnomalyFilter) -> Result<usize, StoreError> {
        Ok(self.index.read().count(filter))
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.index.read().stats("memory", false))
    }

    fn record_run(&self, manifest: RunManifest) -> Result<(), StoreError> {
        let mut index = self.index.write();
        index.check_run(&manifest)?;
        index.insert_run(manifest);
        Ok(())
    }

    fn find_run(
        &self,
        window: &TimeWindow,
        algorithm_version: &str,
    ) -> Result<Option<RunManifest>, StoreError> {
        Ok(self.index.read().find_run(window, algorithm_version))
    }

    fn runs(&self) -> Result<Vec<RunManifest>, StoreError> {
        Ok(self.index.read().runs())
    }
}
