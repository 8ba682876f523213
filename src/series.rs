use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image_range::ImageRange;
use crate::tag_set::DicomTagSet;

/// Persisted aggregate for one series
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_uid: String,
    pub study_uid: String,
    /// Instance numbers stored so far
    pub images: ImageRange,
    pub domain: String,
    /// Series date, falling back to the study date
    pub series_date: Option<DateTime<Utc>>,
    /// Tags of the first instance seen for this series
    pub metadata: DicomTagSet,
    /// Key of the series in the file repository
    pub storage: String,
}

impl SeriesRecord {
    /// Builds the record for the first instance of a series
    pub fn from_tags(tags: &DicomTagSet, instance: u32, domain: &str) -> Self {
        Self {
            series_uid: tags.series_uid.clone(),
            study_uid: tags.study_uid.clone(),
            images: ImageRange::single(instance),
            domain: domain.to_string(),
            series_date: tags.series_date.or(tags.study_date),
            metadata: tags.clone(),
            storage: tags.series_uid.clone(),
        }
    }

    /// Checks the invariants every stored record must satisfy
    pub fn validate(&self) -> Result<(), String> {
        if self.series_uid.trim().is_empty() {
            return Err("series UID must not be empty".to_string());
        }
        if self.study_uid.trim().is_empty() {
            return Err("study UID must not be empty".to_string());
        }
        if self.domain.trim().is_empty() {
            return Err("domain must not be empty".to_string());
        }
        if self.images.is_empty() {
            return Err("image range must not be empty".to_string());
        }
        if self.storage.trim().is_empty() {
            return Err("storage key must not be empty".to_string());
        }
        Ok(())
    }

    pub fn apply(&mut self, patch: SeriesPatch) {
        if let Some(images) = patch.images {
            self.images = images;
        }
        if let Some(domain) = patch.domain {
            self.domain = domain;
        }
        if let Some(storage) = patch.storage {
            self.storage = storage;
        }
    }
}

/// Partial update of a [`SeriesRecord`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesPatch {
    pub images: Option<ImageRange>,
    pub domain: Option<String>,
    pub storage: Option<String>,
}
