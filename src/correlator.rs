//! Input correlation: pairs predicted records with actual records
//!
//! Records are paired on (source_id, metric_name, bucket) where the bucket is
//! the epoch-aligned `correlation_bucket_secs` interval containing the
//! timestamp. Unmatched, duplicate and non-finite records are skipped and
//! reported; they never abort the batch.

use crate::config::AlgorithmConfig;
use crate::error::{InputDataError, RecordSide};
use crate::model::{InputRecord, MetricValue, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A predicted value as delivered by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedRecord {
    pub source_id: String,
    pub metric_name: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

/// An observed value as delivered by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualRecord {
    pub source_id: String,
    pub metric_name: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

/// Output of one correlation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// Matched pairs ordered by (timestamp, source_id, metric_name)
    pub records: Vec<InputRecord>,
    /// Records that could not be paired
    pub rejected: Vec<InputDataError>,
}

type PairKey = (String, String, TimeWindow);

struct Side<'a> {
    value: &'a MetricValue,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    bucket_secs: i64,
}

impl Correlator {
    pub fn new(bucket_secs: i64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1),
        }
    }

    pub fn from_config(config: &AlgorithmConfig) -> Self {
        Self::new(config.correlation_bucket_secs)
    }

    /// Pair every predicted/actual record whose timestamp falls in `window`
    ///
    /// Records outside `window` are ignored. When a side has more than one
    /// record for the same key, the earliest is kept and the rest rejected.
    pub fn correlate(
        &self,
        window: &TimeWindow,
        predicted: &[PredictedRecord],
        actual: &[ActualRecord],
    ) -> Correlation {
        let mut rejected = Vec::new();

        let predicted_side = self.index(
            window,
            RecordSide::Predicted,
            predicted
                .iter()
                .map(|r| (&r.source_id, &r.metric_name, &r.value, r.timestamp)),
            &mut rejected,
        );
        let mut actual_side = self.index(
            window,
            RecordSide::Actual,
            actual
                .iter()
                .map(|r| (&r.source_id, &r.metric_name, &r.value, r.timestamp)),
            &mut rejected,
        );

        let mut records = Vec::new();
        for (key, pred) in predicted_side {
            match actual_side.remove(&key) {
                Some(act) => {
                    let (source_id, metric_name, bucket) = key;
                    records.push(InputRecord {
                        source_id,
                        metric_name,
                        predicted_value: pred.value.clone(),
                        actual_value: act.value.clone(),
                        timestamp: act.timestamp,
                        time_window: bucket,
                    });
                }
                None => rejected.push(InputDataError::Unmatched {
                    side: RecordSide::Predicted,
                    source_id: key.0,
                    metric_name: key.1,
                    timestamp: pred.timestamp,
                }),
            }
        }
        for (key, act) in actual_side {
            rejected.push(InputDataError::Unmatched {
                side: RecordSide::Actual,
                source_id: key.0,
                metric_name: key.1,
                timestamp: act.timestamp,
            });
        }

        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.metric_name.cmp(&b.metric_name))
        });

        tracing::debug!(
            window = %window,
            matched = records.len(),
            rejected = rejected.len(),
            "correlated inputs"
        );

        Correlation { records, rejected }
    }

    fn index<'a>(
        &self,
        window: &TimeWindow,
        side: RecordSide,
        items: impl Iterator<Item = (&'a String, &'a String, &'a MetricValue, DateTime<Utc>)>,
        rejected: &mut Vec<InputDataError>,
    ) -> BTreeMap<PairKey, Side<'a>> {
        let mut in_window: Vec<_> = items.filter(|item| window.contains(item.3)).collect();
        // Stable: ties keep delivery order
        in_window.sort_by(|a, b| (a.0, a.1, a.3).cmp(&(b.0, b.1, b.3)));

        let mut indexed = BTreeMap::new();
        for (source_id, metric_name, value, timestamp) in in_window {
            if !value.is_finite() {
                rejected.push(InputDataError::NonFinite {
                    side,
                    source_id: source_id.clone(),
                    metric_name: metric_name.clone(),
                    timestamp,
                });
                continue;
            }

            let bucket = match TimeWindow::bucket_of(timestamp, self.bucket_secs) {
                Ok(bucket) => bucket,
                Err(err) => {
                    rejected.push(err);
                    continue;
                }
            };

            let key = (source_id.clone(), metric_name.clone(), bucket);
            if indexed.contains_key(&key) {
                rejected.push(InputDataError::Duplicate {
                    side,
                    source_id: key.0,
                    metric_name: key.1,
                    bucket,
                });
                continue;
            }
            indexed.insert(key, Side { value, timestamp });
        }
        indexed
    }
}
