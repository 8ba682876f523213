use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::parser::{self, ParseError, ParseOptions};
use crate::pool::{Compressor, PoolError};
use crate::ports::{FileRepository, SeriesStore, StoreError, UpsertOutcome};
use crate::series::SeriesRecord;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Instance of series {series_uid} has no instance number")]
    MissingInstanceNumber { series_uid: String },

    #[error("Compression failed: {0}")]
    Compression(#[from] PoolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// First instance of a new series
    Created { series_uid: String, instance: u32 },
    /// Instance merged into an existing series; `added` is `false` for re-imports
    Merged {
        series_uid: String,
        instance: u32,
        added: bool,
    },
}

/// Merges uploaded instances into series records
///
/// Each import writes the series record before the instance bytes, and only
/// after parsing and compression have succeeded. A failed blob write can be
/// retried by importing the same bytes again: the record merge is idempotent.
pub struct SeriesIngestor {
    files: Arc<dyn FileRepository>,
    series: Arc<dyn SeriesStore>,
    compressor: Option<Arc<dyn Compressor>>,
    parse_options: ParseOptions,
}

impl SeriesIngestor {
    pub fn new(
        files: Arc<dyn FileRepository>,
        series: Arc<dyn SeriesStore>,
        parse_options: ParseOptions,
    ) -> Self {
        Self {
            files,
            series,
            compressor: None,
            parse_options,
        }
    }

    /// Routes every instance through `compressor` before it is stored
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Imports one instance into `domain`
    ///
    /// # Errors
    ///
    /// Fails without touching the series store if the instance cannot be
    /// parsed, has no instance number, or cannot be compressed.
    pub async fn import_dicom(
        &self,
        bytes: Vec<u8>,
        domain: &str,
    ) -> Result<ImportOutcome, IngestError> {
        let tags = parser::parse_with(&bytes, &self.parse_options)?;
        let instance = tags
            .instance_number
            .ok_or_else(|| IngestError::MissingInstanceNumber {
                series_uid: tags.series_uid.clone(),
            })?;

        let bytes = match &self.compressor {
            Some(compressor) => {
                let compressed = compressor.compress(&bytes).await?;
                debug!(
                    series_uid = %tags.series_uid,
                    instance,
                    original = bytes.len(),
                    compressed = compressed.len(),
                    "compressed instance"
                );
                compressed
            }
            None => bytes,
        };

        let candidate = SeriesRecord::from_tags(&tags, instance, domain);
        let outcome = match self.series.upsert_instance(candidate, instance).await? {
            UpsertOutcome::Inserted(record) => {
                info!(series_uid = %record.series_uid, instance, domain, "created series");
                ImportOutcome::Created {
                    series_uid: record.series_uid,
                    instance,
                }
            }
            UpsertOutcome::Merged { record, added } => {
                info!(
                    series_uid = %record.series_uid,
                    instance,
                    images = %record.images,
                    added,
                    "merged instance into series"
                );
                ImportOutcome::Merged {
                    series_uid: record.series_uid,
                    instance,
                    added,
                }
            }
        };

        self.files.save(&tags.series_uid, instance, bytes).await?;
        Ok(outcome)
    }

    /// Unions every instance already held by the file repository into the
    /// series record
    ///
    /// Used when the series store was rebuilt over an existing repository.
    /// Each instance goes through [`SeriesStore::upsert_instance`], so
    /// imports running at the same time lose nothing.
    pub async fn sync_images(&self, series_uid: &str) -> Result<SeriesRecord, IngestError> {
        let mut record = self
            .series
            .find_by_id(series_uid)
            .await?
            .ok_or_else(|| StoreError::SeriesNotFound(series_uid.to_string()))?;
        let stored = self.files.images(series_uid).await?;

        let missing: Vec<u32> = stored.iter().filter(|&n| !record.images.contains(n)).collect();
        for &instance in &missing {
            let outcome = self.series.upsert_instance(record.clone(), instance).await?;
            record = outcome.record().clone();
        }
        if !missing.is_empty() {
            info!(
                series_uid,
                added = missing.len(),
                images = %record.images,
                "synced series with stored instances"
            );
        }
        Ok(record)
    }
}
