//! # DICOM-ingest library
//!
//! This crate takes uploaded DICOM instances and turns them into series
//! ready to be viewed as volumes.
//!
//! It is built on top of the dicom-rs ecosystem, whose dictionary and
//! character set codecs are used to decode the header of each instance.
//! The pipeline consists of four parts:
//!  - [`parser`]: decodes the header of an instance into a [`DicomTagSet`]
//!    without touching the pixel data. Unrelated instances can be parsed
//!    in parallel using rayon.
//!  - [`CompressionPool`]: a bounded pool of external processes that
//!    losslessly re-encode instances before they are stored
//!  - [`SeriesIngestor`]: merges instances into series records, keeping
//!    track of the instance numbers each series holds
//!  - [`OrientationResolver`]: decides in which order the slices of a
//!    series are walked so volumes are always built head first
//!
//! Storage is reached through the [`FileRepository`] and [`SeriesStore`]
//! traits. In-memory and directory backed implementations live in
//! [`store`].
//!
//! # Examples
//!
//! ## Importing instances and resolving a volume
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use dicom_ingest::{OrientationResolver, ParseOptions, SeriesIngestor};
//! # use dicom_ingest::store::{DirectoryFileRepository, MemorySeriesStore};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let files = Arc::new(DirectoryFileRepository::new("dicom"));
//! let series = Arc::new(MemorySeriesStore::new());
//! let ingestor = SeriesIngestor::new(files.clone(), series, ParseOptions::default());
//!
//! let bytes = std::fs::read("upload/IM0001.dcm")?;
//! let outcome = ingestor.import_dicom(bytes, "radiology").await?;
//! println!("{outcome:?}");
//!
//! let resolver = OrientationResolver::new(files, ParseOptions::default());
//! let volume = resolver.resolve("1.2.840.113619.2.55.3", 1, 120).await?;
//! println!("walk from {} to {} ({:?})", volume.start, volume.end, volume.delta);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod enums;
pub mod image_range;
pub mod ingestor;
pub mod orientation;
pub mod parser;
pub mod pool;
pub mod ports;
pub mod series;
pub mod store;
pub mod tag_set;

pub use config::{Config, ConfigError};
pub use enums::Delta;
pub use image_range::ImageRange;
pub use ingestor::{ImportOutcome, IngestError, SeriesIngestor};
pub use orientation::{OrientationResolver, PartialVolumeDescriptor, ResolveError};
pub use parser::{ParseError, ParseOptions};
pub use pool::{CompressionPool, Compressor, PoolConfig, PoolError, PoolStats};
pub use ports::{FileRepository, SeriesStore, StoreError};
pub use series::SeriesRecord;
pub use tag_set::DicomTagSet;
