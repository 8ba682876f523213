mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dicom_dictionary_std::tags;

use common::{SERIES_UID, STUDY_UID, ct_slice, ct_slice_writer};
use dicom_ingest::series::SeriesPatch;
use dicom_ingest::store::{MemoryFileRepository, MemorySeriesStore};
use dicom_ingest::{
    Compressor, FileRepository, ImageRange, ImportOutcome, IngestError, ParseError, ParseOptions,
    PoolError, SeriesIngestor, SeriesStore, StoreError,
};

struct Fixture {
    files: Arc<MemoryFileRepository>,
    series: Arc<MemorySeriesStore>,
    ingestor: SeriesIngestor,
}

fn fixture() -> Fixture {
    let files = Arc::new(MemoryFileRepository::new());
    let series = Arc::new(MemorySeriesStore::new());
    let ingestor = SeriesIngestor::new(files.clone(), series.clone(), ParseOptions::default());
    Fixture {
        files,
        series,
        ingestor,
    }
}

/// Prefixes every payload so tests can tell stored bytes were compressed
struct TaggingCompressor {
    calls: AtomicUsize,
}

#[async_trait]
impl Compressor for TaggingCompressor {
    async fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PoolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = b"Z:".to_vec();
        out.extend_from_slice(bytes);
        Ok(out)
    }
}

struct FailingCompressor;

#[async_trait]
impl Compressor for FailingCompressor {
    async fn compress(&self, _bytes: &[u8]) -> Result<Vec<u8>, PoolError> {
        Err(PoolError::Remote("unsupported photometric interpretation".to_string()))
    }
}

#[tokio::test]
async fn test_first_instance_creates_series() {
    let fx = fixture();
    let bytes = ct_slice(SERIES_UID, 4, 10.0);

    let outcome = fx.ingestor.import_dicom(bytes.clone(), "radiology").await.unwrap();
    assert_eq!(
        outcome,
        ImportOutcome::Created {
            series_uid: SERIES_UID.to_string(),
            instance: 4,
        }
    );

    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.study_uid, STUDY_UID);
    assert_eq!(record.images, ImageRange::single(4));
    assert_eq!(record.domain, "radiology");
    assert_eq!(record.storage, SERIES_UID);
    assert_eq!(record.metadata.modality.as_deref(), Some("CT"));
    assert_eq!(fx.files.load(SERIES_UID, 4).await.unwrap(), bytes);
}

#[tokio::test]
async fn test_instances_are_unioned_in_any_order() {
    let fx = fixture();
    for instance in [5, 1, 3, 2, 4, 9] {
        fx.ingestor
            .import_dicom(ct_slice(SERIES_UID, instance, f64::from(instance)), "radiology")
            .await
            .unwrap();
    }

    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.images.to_string(), "1-5,9");
    assert_eq!(fx.files.images(SERIES_UID).await.unwrap(), record.images);
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let fx = fixture();
    let bytes = ct_slice(SERIES_UID, 2, 0.0);
    fx.ingestor.import_dicom(bytes.clone(), "radiology").await.unwrap();
    let before = fx.series.find_by_id(SERIES_UID).await.unwrap();

    let outcome = fx.ingestor.import_dicom(bytes, "radiology").await.unwrap();
    assert_eq!(
        outcome,
        ImportOutcome::Merged {
            series_uid: SERIES_UID.to_string(),
            instance: 2,
            added: false,
        }
    );
    assert_eq!(fx.series.find_by_id(SERIES_UID).await.unwrap(), before);
}

#[tokio::test]
async fn test_merge_keeps_first_metadata_and_domain() {
    let fx = fixture();
    fx.ingestor
        .import_dicom(ct_slice(SERIES_UID, 1, 0.0), "radiology")
        .await
        .unwrap();
    let second = ct_slice_writer(SERIES_UID, 2, 1.0)
        .str(tags::MODALITY, b"CS", "MR")
        .build();

    let outcome = fx.ingestor.import_dicom(second, "cardiology").await.unwrap();
    assert!(matches!(outcome, ImportOutcome::Merged { added: true, .. }));

    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.domain, "radiology");
    assert_eq!(record.metadata.modality.as_deref(), Some("CT"));
    assert_eq!(record.images.to_string(), "1-2");
}

#[tokio::test]
async fn test_concurrent_imports_lose_no_instance() {
    let fx = fixture();
    let imports = (1..=12).map(|instance| {
        fx.ingestor
            .import_dicom(ct_slice(SERIES_UID, instance, f64::from(instance)), "radiology")
    });

    let results = futures::future::join_all(imports).await;
    assert!(results.iter().all(Result::is_ok));
    let created = results
        .iter()
        .filter(|result| matches!(result, Ok(ImportOutcome::Created { .. })))
        .count();
    assert_eq!(created, 1);

    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.images.to_string(), "1-12");
}

#[tokio::test]
async fn test_missing_instance_number_stores_nothing() {
    let fx = fixture();
    let bytes = ct_slice_writer(SERIES_UID, 1, 0.0)
        .without(tags::INSTANCE_NUMBER)
        .build();

    let err = fx.ingestor.import_dicom(bytes, "radiology").await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::MissingInstanceNumber { series_uid } if series_uid == SERIES_UID
    ));
    assert!(fx.series.records().await.is_empty());
    assert!(matches!(
        fx.files.images(SERIES_UID).await,
        Err(StoreError::SeriesNotFound(_))
    ));
}

#[tokio::test]
async fn test_zero_instance_number_is_missing() {
    let fx = fixture();
    let bytes = ct_slice(SERIES_UID, 0, 0.0);

    let err = fx.ingestor.import_dicom(bytes, "radiology").await.unwrap_err();
    assert!(matches!(err, IngestError::MissingInstanceNumber { .. }));
}

#[tokio::test]
async fn test_malformed_file_stores_nothing() {
    let fx = fixture();

    let err = fx
        .ingestor
        .import_dicom(b"definitely not a DICOM file".to_vec(), "radiology")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(ParseError::MalformedHeader(_))));
    assert!(fx.series.records().await.is_empty());
}

#[tokio::test]
async fn test_compressed_bytes_are_stored() {
    let fx = fixture();
    let compressor = Arc::new(TaggingCompressor {
        calls: AtomicUsize::new(0),
    });
    let ingestor = SeriesIngestor::new(fx.files.clone(), fx.series.clone(), ParseOptions::default())
        .with_compressor(compressor.clone());
    let bytes = ct_slice(SERIES_UID, 1, 0.0);

    ingestor.import_dicom(bytes.clone(), "radiology").await.unwrap();

    let stored = fx.files.load(SERIES_UID, 1).await.unwrap();
    assert_eq!(&stored[..2], b"Z:");
    assert_eq!(&stored[2..], bytes.as_slice());
    assert_eq!(compressor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_compression_failure_stores_nothing() {
    let fx = fixture();
    let ingestor = SeriesIngestor::new(fx.files.clone(), fx.series.clone(), ParseOptions::default())
        .with_compressor(Arc::new(FailingCompressor));

    let err = ingestor
        .import_dicom(ct_slice(SERIES_UID, 1, 0.0), "radiology")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Compression(PoolError::Remote(_))));
    assert!(fx.series.find_by_id(SERIES_UID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_series_date_falls_back_to_study_date() {
    let fx = fixture();
    fx.ingestor
        .import_dicom(ct_slice(SERIES_UID, 1, 0.0), "radiology")
        .await
        .unwrap();
    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(
        record.series_date,
        Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    );

    let other = "1.2.826.0.1.3680043.2.1125.1.3";
    let bytes = ct_slice_writer(other, 1, 0.0)
        .str(tags::SERIES_DATE, b"DA", "20240116")
        .str(tags::SERIES_TIME, b"TM", "120000")
        .build();
    fx.ingestor.import_dicom(bytes, "radiology").await.unwrap();
    let record = fx.series.find_by_id(other).await.unwrap().unwrap();
    assert_eq!(
        record.series_date,
        Some(Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_empty_domain_is_rejected_by_store() {
    let fx = fixture();

    let err = fx
        .ingestor
        .import_dicom(ct_slice(SERIES_UID, 1, 0.0), " ")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Storage(StoreError::Validation(_))));
    assert!(fx.series.records().await.is_empty());
}

#[tokio::test]
async fn test_store_modify_one_rolls_back_invalid_patch() {
    let fx = fixture();
    fx.ingestor
        .import_dicom(ct_slice(SERIES_UID, 1, 0.0), "radiology")
        .await
        .unwrap();

    let patch = SeriesPatch {
        domain: Some(String::new()),
        ..SeriesPatch::default()
    };
    let err = fx.series.modify_one(SERIES_UID, patch).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.domain, "radiology");

    let patch = SeriesPatch {
        images: Some(ImageRange::parse("1-3").unwrap()),
        ..SeriesPatch::default()
    };
    let record = fx.series.modify_one(SERIES_UID, patch).await.unwrap();
    assert_eq!(record.images.len(), 3);

    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert!(matches!(
        fx.series.insert(record).await,
        Err(StoreError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_sync_images_adds_previously_stored_instances() {
    let fx = fixture();
    for instance in 1..=3 {
        fx.files
            .save(SERIES_UID, instance, ct_slice(SERIES_UID, instance, 0.0))
            .await
            .unwrap();
    }
    fx.ingestor
        .import_dicom(ct_slice(SERIES_UID, 5, 0.0), "radiology")
        .await
        .unwrap();
    let record = fx.series.find_by_id(SERIES_UID).await.unwrap().unwrap();
    assert_eq!(record.images.to_string(), "5");

    let record = fx.ingestor.sync_images(SERIES_UID).await.unwrap();
    assert_eq!(record.images.to_string(), "1-3,5");
    assert_eq!(record.domain, "radiology");
    assert_eq!(fx.series.find_by_id(SERIES_UID).await.unwrap(), Some(record));
}

#[tokio::test]
async fn test_sync_images_of_unknown_series() {
    let fx = fixture();

    let err = fx.ingestor.sync_images(SERIES_UID).await.unwrap_err();
    assert!(matches!(err, IngestError::Storage(StoreError::SeriesNotFound(_))));
}
