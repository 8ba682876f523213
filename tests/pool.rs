#![cfg(unix)]

use std::time::Duration;

use dicom_ingest::pool::WorkerCommand;
use dicom_ingest::{CompressionPool, PoolConfig, PoolError};

/// Answers every request with its own payload
const ECHO: &str = r#"echo Ready
while IFS= read -r command; do
  IFS= read -r payload || exit 0
  echo OK
  printf '%s\n' "$payload"
done"#;

/// Like `ECHO`, but slow enough for requests to overlap
const SLOW_ECHO: &str = r#"echo Ready
while IFS= read -r command; do
  IFS= read -r payload || exit 0
  sleep 0.1
  echo OK
  printf '%s\n' "$payload"
done"#;

/// Serves a single request, then exits
const ONE_SHOT: &str = r#"echo Ready
IFS= read -r command
IFS= read -r payload
echo OK
printf '%s\n' "$payload""#;

const REJECTS: &str = r#"echo Ready
while IFS= read -r command; do
  IFS= read -r payload || exit 0
  echo 'unsupported transfer syntax' >&2
done"#;

const SILENT: &str = r#"echo Ready
while IFS= read -r command; do
  IFS= read -r payload || exit 0
  sleep 5
done"#;

fn config(script: &str, max_concurrency: usize) -> PoolConfig {
    PoolConfig {
        max_concurrency,
        command: WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        },
        acquire_timeout: Duration::from_secs(10),
        create_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(60),
        create_retry_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn test_round_trip() {
    let pool = CompressionPool::new(config(ECHO, 2));
    let payload = b"DICM\x00\x01\x02 arbitrary bytes \xFF".to_vec();

    assert_eq!(pool.compress(&payload).await.unwrap(), payload);
    pool.dispose().await;
}

#[tokio::test]
async fn test_workers_are_reused() {
    let pool = CompressionPool::new(config(ECHO, 2));
    for i in 0..3u8 {
        assert_eq!(pool.compress(&[i; 16]).await.unwrap(), vec![i; 16]);
    }

    let stats = pool.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.alive, 1);
    assert_eq!(stats.idle, 1);
    pool.dispose().await;
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let pool = CompressionPool::new(config(SLOW_ECHO, 2));
    let payloads: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; 32]).collect();

    let results =
        futures::future::join_all(payloads.iter().map(|payload| pool.compress(payload))).await;
    for (payload, result) in payloads.iter().zip(results) {
        assert_eq!(&result.unwrap(), payload);
    }

    let stats = pool.stats();
    assert!(stats.peak_alive <= 2, "peak was {}", stats.peak_alive);
    assert!(stats.created <= 2);
    pool.dispose().await;
    assert_eq!(pool.stats().alive, 0);
}

#[tokio::test]
async fn test_worker_error_stream_fails_request() {
    let pool = CompressionPool::new(config(REJECTS, 1));

    let err = pool.compress(b"payload").await.unwrap_err();
    assert!(matches!(err, PoolError::Remote(message) if message == "unsupported transfer syntax"));
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().discarded, 1);
    pool.dispose().await;
}

#[tokio::test]
async fn test_bad_handshake() {
    let pool = CompressionPool::new(config("echo Nope", 1));

    let err = pool.compress(b"payload").await.unwrap_err();
    assert!(matches!(err, PoolError::Handshake(_)));
    assert_eq!(pool.stats().alive, 0);
}

#[tokio::test]
async fn test_missing_program() {
    let mut config = config(ECHO, 1);
    config.command.program = "/nonexistent/dicom-compress".to_string();
    let pool = CompressionPool::new(config);

    let err = pool.compress(b"payload").await.unwrap_err();
    assert!(matches!(err, PoolError::Spawn { source: Some(_), .. }));
    assert!(!err.is_transient());
    assert_eq!(pool.stats().alive, 0);
}

#[tokio::test]
async fn test_dead_worker_is_replaced() {
    let pool = CompressionPool::new(config(ONE_SHOT, 1));

    assert_eq!(pool.compress(b"first").await.unwrap(), b"first");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.compress(b"second").await.unwrap(), b"second");

    let stats = pool.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.discarded, 1);
    pool.dispose().await;
}

#[tokio::test]
async fn test_request_timeout_discards_worker() {
    let mut config = config(SILENT, 1);
    config.request_timeout = Duration::from_millis(200);
    let pool = CompressionPool::new(config);

    let err = pool.compress(b"payload").await.unwrap_err();
    assert!(matches!(err, PoolError::RequestTimeout(_)));
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().discarded, 1);
}

#[tokio::test]
async fn test_timed_out_worker_is_reaped_before_its_slot_is_reused() {
    let mut config = config(SILENT, 1);
    config.request_timeout = Duration::from_millis(200);
    let pool = CompressionPool::new(config);

    for _ in 0..2 {
        let err = pool.compress(b"payload").await.unwrap_err();
        assert!(matches!(err, PoolError::RequestTimeout(_)));
        assert_eq!(pool.stats().alive, 0);
    }
    let stats = pool.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.peak_alive, 1);
}

#[tokio::test]
async fn test_acquire_timeout() {
    let mut config = config(SILENT, 1);
    config.acquire_timeout = Duration::from_millis(200);
    config.request_timeout = Duration::from_secs(2);
    let pool = CompressionPool::new(config);

    let (busy, waiting) = tokio::join!(pool.compress(b"first"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.compress(b"second").await
    });
    assert!(matches!(waiting, Err(PoolError::AcquireTimeout(_))));
    assert!(matches!(busy, Err(PoolError::RequestTimeout(_))));
}

#[tokio::test]
async fn test_closed_after_dispose() {
    let pool = CompressionPool::new(config(ECHO, 2));
    pool.compress(b"warm up").await.unwrap();

    pool.dispose().await;
    assert_eq!(pool.stats().alive, 0);
    assert!(matches!(pool.compress(b"late").await, Err(PoolError::Closed)));
}

#[test]
fn test_zero_concurrency_is_clamped() {
    let pool = CompressionPool::new(config(ECHO, 0));
    assert_eq!(pool.config().max_concurrency, 1);
}
