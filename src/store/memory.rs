use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::image_range::ImageRange;
use crate::ports::{FileRepository, SeriesStore, StoreError, UpsertOutcome};
use crate::series::{SeriesPatch, SeriesRecord};

/// In-process file repository
#[derive(Debug, Default)]
pub struct MemoryFileRepository {
    series: RwLock<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileRepository for MemoryFileRepository {
    async fn images(&self, series_uid: &str) -> Result<ImageRange, StoreError> {
        let series = self.series.read().await;
        let instances = series
            .get(series_uid)
            .ok_or_else(|| StoreError::SeriesNotFound(series_uid.to_string()))?;
        Ok(instances.keys().copied().collect())
    }

    async fn load(&self, series_uid: &str, instance: u32) -> Result<Vec<u8>, StoreError> {
        let series = self.series.read().await;
        series
            .get(series_uid)
            .and_then(|instances| instances.get(&instance))
            .cloned()
            .ok_or_else(|| StoreError::InstanceNotFound {
                series_uid: series_uid.to_string(),
                instance,
            })
    }

    async fn save(
        &self,
        series_uid: &str,
        instance: u32,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut series = self.series.write().await;
        series
            .entry(series_uid.to_string())
            .or_default()
            .insert(instance, bytes);
        Ok(())
    }
}

/// In-process series store
///
/// A single lock guards all records, which makes `upsert_instance` atomic.
#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    records: Mutex<HashMap<String, SeriesRecord>>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, ordered by series UID
    pub async fn records(&self) -> Vec<SeriesRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.series_uid.cmp(&b.series_uid));
        all
    }
}

#[async_trait]
impl SeriesStore for MemorySeriesStore {
    async fn find_by_id(&self, series_uid: &str) -> Result<Option<SeriesRecord>, StoreError> {
        Ok(self.records.lock().await.get(series_uid).cloned())
    }

    async fn insert(&self, record: SeriesRecord) -> Result<(), StoreError> {
        record.validate().map_err(StoreError::Validation)?;
        let mut records = self.records.lock().await;
        if records.contains_key(&record.series_uid) {
            return Err(StoreError::AlreadyExists(record.series_uid));
        }
        records.insert(record.series_uid.clone(), record);
        Ok(())
    }

    async fn modify_one(
        &self,
        series_uid: &str,
        patch: SeriesPatch,
    ) -> Result<SeriesRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(series_uid)
            .ok_or_else(|| StoreError::SeriesNotFound(series_uid.to_string()))?;

        let previous = record.clone();
        record.apply(patch);
        if let Err(reason) = record.validate() {
            *record = previous;
            return Err(StoreError::Validation(reason));
        }
        Ok(record.clone())
    }

    async fn upsert_instance(
        &self,
        candidate: SeriesRecord,
        instance: u32,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&candidate.series_uid) {
            Some(record) => {
                let added = record.images.insert(instance);
                Ok(UpsertOutcome::Merged {
                    record: record.clone(),
                    added,
                })
            }
            None => {
                candidate.validate().map_err(StoreError::Validation)?;
                records.insert(candidate.series_uid.clone(), candidate.clone());
                Ok(UpsertOutcome::Inserted(candidate))
            }
        }
    }
}
