// Durable JSONL backend
//
// Layout: `{dir}/anomalies.jsonl` (one AnomalyRecord per line) and
// `{dir}/runs.jsonl` (one RunManifest per line). An append is acknowledged
// only after the lines are written and `sync_data` returns; the in-memory
// index is updated afterwards, so readers never see an unsynced record.
// A failed write truncates the file back to its previous length.

use super::{AnomalyStore, RecordIndex, RunManifest, StoreStats};
use crate::error::StoreError;
use crate::filter::AnomalyFilter;
use crate::model::{AnomalyRecord, TimeWindow};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const RECORDS_FILE: &str = "anomalies.jsonl";
pub const RUNS_FILE: &str = "runs.jsonl";

/// An append-only JSONL file and its acknowledged length
#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl LogFile {
    /// Open `path`, returning every complete entry already in it
    ///
    /// A trailing line without a newline is an append that never completed
    /// and is cut off. A malformed complete line is corruption.
    fn open<T: DeserializeOwned>(path: PathBuf) -> Result<(Self, Vec<T>), StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let bytes = fs::read(&path)?;

        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => 0,
        };
        if complete < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                bytes = bytes.len() - complete,
                "discarding incomplete trailing entry"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }

        let mut entries = Vec::new();
        for (idx, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry = serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }

        Ok((
            Self {
                path,
                file,
                len: complete as u64,
            },
            entries,
        ))
    }

    /// Write all entries as one durable append
    fn append<T: Serialize>(&mut self, entries: &[T]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = written {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                tracing::warn!(
                    path = %self.path.display(),
                    "failed to roll back partial append: {}",
                    truncate_err
                );
            }
            return Err(err.into());
        }

        self.len += buf.len() as u64;
        Ok(())
    }
}

#[derive(Debug)]
struct Writers {
    records: LogFile,
    runs: LogFile,
}

/// Durable store that survives process restart
///
/// A single `FileStore` per directory is assumed; concurrent processes
/// writing the same directory are not coordinated.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    index: RwLock<RecordIndex>,
    writers: Mutex<Writers>,
}

impl FileStore {
    /// Open (or create) the store in `dir` and load its contents
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let (records_log, records) = LogFile::open::<AnomalyRecord>(dir.join(RECORDS_FILE))?;
        let (runs_log, runs) = LogFile::open::<RunManifest>(dir.join(RUNS_FILE))?;

        let mut index = RecordIndex::default();
        for (idx, record) in records.into_iter().enumerate() {
            index
                .check_batch(std::slice::from_ref(&record))
                .map_err(|e| StoreError::Corrupt {
                    path: records_log.path.clone(),
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            index.insert(record);
        }
        for run in runs {
            // A later duplicate entry for the same key is ignored
            if index.check_run(&run).is_ok() {
                index.insert_run(run);
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            records = index.len(),
            "opened file store"
        );

        Ok(Self {
            dir,
            index: RwLock::new(index),
            writers: Mutex::new(Writers {
                records: records_log,
                runs: runs_log,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AnomalyStore for FileStore {
    fn append(&self, record: AnomalyRecord) -> Result<Uuid, StoreError> {
        let id = record.record_id;
        self.append_batch(vec![record])?;
        Ok(id)
    }

    fn append_batch(&self, records: Vec<AnomalyRecord>) -> Result<Vec<Uuid>, StoreError> {
        let mut writers = self.writers.lock();
        self.index.read().check_batch(&records)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        writers.records.append(&records)?;

        let ids = records.iter().map(|r| r.record_id).collect();
        let mut index = self.index.write();
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
        Ok(self.index.read().stats("file", true))
    }

    fn record_run(&self, manifest: RunManifest) -> Result<(), StoreError> {
        let mut writers = self.writers.lock();
        self.index.read().check_run(&manifest)?;
        writers.runs.append(std::slice::from_ref(&manifest))?;
        self.index.write().insert_run(manifest);
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
