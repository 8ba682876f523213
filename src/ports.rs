//! Storage boundaries of the ingestion pipeline
//!
//! The pipeline never touches a database or blob store directly. It talks to
//! a [`FileRepository`] for raw instance bytes and to a [`SeriesStore`] for
//! series records; adapters live in [`crate::store`].

use async_trait::async_trait;
use thiserror::Error;

use crate::image_range::ImageRange;
use crate::series::{SeriesPatch, SeriesRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    #[error("Instance {instance} of series {series_uid} not found")]
    InstanceNotFound { series_uid: String, instance: u32 },

    #[error("Series already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of adding one instance to the series store
#[derive(Clone, Debug, PartialEq)]
pub enum UpsertOutcome {
    /// No record existed; the candidate was inserted
    Inserted(SeriesRecord),
    /// The instance was unioned into an existing record
    Merged {
        record: SeriesRecord,
        /// `false` if the instance was already recorded
        added: bool,
    },
}

impl UpsertOutcome {
    pub fn record(&self) -> &SeriesRecord {
        match self {
            UpsertOutcome::Inserted(record) => record,
            UpsertOutcome::Merged { record, .. } => record,
        }
    }
}

/// Raw instance bytes, keyed by series UID and instance number
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Instance numbers stored for a series
    async fn images(&self, series_uid: &str) -> Result<ImageRange, StoreError>;

    async fn load(&self, series_uid: &str, instance: u32) -> Result<Vec<u8>, StoreError>;

    /// Stores an instance, replacing any previous bytes
    async fn save(&self, series_uid: &str, instance: u32, bytes: Vec<u8>) -> Result<(), StoreError>;
}

/// Persistence of [`SeriesRecord`]s
#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn find_by_id(&self, series_uid: &str) -> Result<Option<SeriesRecord>, StoreError>;

    /// Fails with `AlreadyExists` if the series is already stored
    async fn insert(&self, record: SeriesRecord) -> Result<(), StoreError>;

    /// Applies a patch and validates the result; the previous value is
    /// restored if validation fails
    async fn modify_one(
        &self,
        series_uid: &str,
        patch: SeriesPatch,
    ) -> Result<SeriesRecord, StoreError>;

    /// Atomically unions `instance` into the stored record, or inserts
    /// `candidate` if the series is unknown
    ///
    /// Implementations must make this a single step so that concurrent
    /// imports of the same series cannot lose an instance.
    async fn upsert_instance(
        &self,
        candidate: SeriesRecord,
        instance: u32,
    ) -> Result<UpsertOutcome, StoreError>;
}
