use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::image_range::ImageRange;
use crate::ports::{FileRepository, StoreError};

const EXTENSION: &str = "dcm";

/// File repository laid out as `<root>/<series uid>/<instance>.dcm`
#[derive(Clone, Debug)]
pub struct DirectoryFileRepository {
    root: PathBuf,
}

impl DirectoryFileRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn series_dir(&self, series_uid: &str) -> Result<PathBuf, StoreError> {
        // UIDs are digits separated by dots; anything else could escape the root
        let valid = !series_uid.is_empty()
            && !series_uid.starts_with('.')
            && series_uid.chars().all(|c| c.is_ascii_digit() || c == '.');
        if !valid {
            return Err(StoreError::Validation(format!(
                "{series_uid:?} is not a valid series UID"
            )));
        }
        Ok(self.root.join(series_uid))
    }

    fn instance_path(&self, series_uid: &str, instance: u32) -> Result<PathBuf, StoreError> {
        Ok(self
            .series_dir(series_uid)?
            .join(format!("{instance}.{EXTENSION}")))
    }
}

#[async_trait]
impl FileRepository for DirectoryFileRepository {
    async fn images(&self, series_uid: &str) -> Result<ImageRange, StoreError> {
        let dir = self.series_dir(series_uid)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::SeriesNotFound(series_uid.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut images = ImageRange::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_instance = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION));
            if let Some(instance) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse().ok())
                .filter(|_| is_instance)
            {
                images.insert(instance);
            }
        }
        Ok(images)
    }

    async fn load(&self, series_uid: &str, instance: u32) -> Result<Vec<u8>, StoreError> {
        let path = self.instance_path(series_uid, instance)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::InstanceNotFound {
                series_uid: series_uid.to_string(),
                instance,
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(
        &self,
        series_uid: &str,
        instance: u32,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let path = self.instance_path(series_uid, instance)?;
        let dir = self.series_dir(series_uid)?;
        fs::create_dir_all(&dir).await?;

        // write then rename so readers never observe a partial instance
        let partial = path.with_extension("partial");
        fs::write(&partial, &bytes).await?;
        fs::rename(&partial, &path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored instance");
        Ok(())
    }
}
