use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::enums::Delta;
use crate::parser::{self, ParseError, ParseOptions};
use crate::ports::{FileRepository, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Cannot load instance {instance} of series {series_uid}: {source}")]
    NoSuchImage {
        series_uid: String,
        instance: u32,
        #[source]
        source: StoreError,
    },

    #[error("Instance {instance} has no Image Position (Patient)")]
    MissingPositionTag { instance: u32 },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Which instances to use for a volume and in which order to walk them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialVolumeDescriptor {
    pub start: u32,
    pub end: u32,
    pub delta: Delta,
}

/// Decides the slice traversal direction of a series or part of one
///
/// Volumes are built head first: traversal starts at the boundary instance
/// with the larger z coordinate.
pub struct OrientationResolver {
    files: Arc<dyn FileRepository>,
    parse_options: ParseOptions,
}

impl OrientationResolver {
    pub fn new(files: Arc<dyn FileRepository>, parse_options: ParseOptions) -> Self {
        Self {
            files,
            parse_options,
        }
    }

    /// Resolves the traversal of instances `start..=end` (in either order)
    ///
    /// A series holding a single image always resolves to that image.
    pub async fn resolve(
        &self,
        series_uid: &str,
        start: u32,
        end: u32,
    ) -> Result<PartialVolumeDescriptor, ResolveError> {
        let images = self.files.images(series_uid).await?;
        if images.len() == 1 {
            let only = images.first().unwrap_or(start);
            return Ok(PartialVolumeDescriptor {
                start: only,
                end: only,
                delta: Delta::Forward,
            });
        }

        let (low, high) = (start.min(end), start.max(end));
        let (z_low, z_high) = futures::future::try_join(
            self.z_position(series_uid, low),
            self.z_position(series_uid, high),
        )
        .await?;
        debug!(series_uid, low, high, z_low, z_high, "compared boundary positions");

        Ok(if z_low >= z_high {
            PartialVolumeDescriptor {
                start: low,
                end: high,
                delta: Delta::Forward,
            }
        } else {
            PartialVolumeDescriptor {
                start: high,
                end: low,
                delta: Delta::Backward,
            }
        })
    }

    async fn z_position(&self, series_uid: &str, instance: u32) -> Result<f64, ResolveError> {
        let bytes = self
            .files
            .load(series_uid, instance)
            .await
            .map_err(|source| ResolveError::NoSuchImage {
                series_uid: series_uid.to_string(),
                instance,
                source,
            })?;
        let tags = parser::parse_with(&bytes, &self.parse_options)?;
        tags.z_position()
            .ok_or(ResolveError::MissingPositionTag { instance })
    }
}
