//! Bounded pool of external lossless-compression processes
//!
//! Workers are started lazily, at most `max_concurrency` at a time, and
//! reused across requests. A caller borrows one worker per request through
//! an RAII guard, so a worker is never shared by two requests and its slot
//! is released on every path, including errors and cancellation.
//!
//! Dead workers are discarded when they are next taken from the pool and a
//! replacement is started transparently.

mod protocol;
mod worker;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use worker::WorkerState;
use worker::{LiveToken, Worker};

/// How long a worker may take to exit once its input has been closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to spawn worker: {reason}")]
    Spawn {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Worker handshake failed: {0}")]
    Handshake(String),

    #[error("Worker protocol violation: {0}")]
    Protocol(String),

    #[error("Worker reported failure: {0}")]
    Remote(String),

    #[error("No worker available within {0:?}")]
    AcquireTimeout(Duration),

    #[error("Worker not ready within {0:?}")]
    CreateTimeout(Duration),

    #[error("Worker did not answer within {0:?}")]
    RequestTimeout(Duration),

    #[error("Compression pool is closed")]
    Closed,
}

impl PoolError {
    /// Whether starting a worker again may succeed
    ///
    /// A missing or non-executable program is permanent; running out of
    /// processes or file descriptors is not.
    pub fn is_transient(&self) -> bool {
        match self {
            PoolError::CreateTimeout(_) => true,
            PoolError::Spawn {
                source: Some(err), ..
            } => !matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// Program and arguments used to start a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Upper bound on simultaneously running workers
    pub max_concurrency: usize,
    pub command: WorkerCommand,
    pub acquire_timeout: Duration,
    pub create_timeout: Duration,
    /// Idle workers older than this are retired instead of reused
    pub idle_timeout: Duration,
    pub create_retry_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            command: WorkerCommand {
                program: "dicom-compress".to_string(),
                args: vec!["--interactive".to_string()],
            },
            acquire_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            create_retry_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Worker processes not yet reaped, including ones still starting
    pub alive: usize,
    pub idle: usize,
    /// Highest value `alive` has reached
    pub peak_alive: usize,
    pub created: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    alive: AtomicUsize,
    peak_alive: AtomicUsize,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl PoolCounters {
    fn worker_started(&self) {
        let alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_alive.fetch_max(alive, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn worker_stopped(&self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }

    fn worker_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

/// Anything that can losslessly re-encode an instance
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PoolError>;
}

pub struct CompressionPool {
    config: PoolConfig,
    slots: Semaphore,
    idle: Mutex<VecDeque<Worker>>,
    counters: Arc<PoolCounters>,
    next_id: AtomicU64,
}

/// A worker on loan to one caller; returned to the pool on drop
struct PooledWorker<'a> {
    worker: Option<Worker>,
    pool: &'a CompressionPool,
    _permit: SemaphorePermit<'a>,
}

impl PooledWorker<'_> {
    async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, PoolError> {
        match self.worker.as_mut() {
            Some(worker) => worker.request(payload).await,
            None => Err(PoolError::Closed),
        }
    }

    fn mark_dead(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.mark_dead();
        }
    }

    /// Kills a failed worker before its slot is released
    async fn discard(mut self) {
        if let Some(worker) = self.worker.take() {
            debug!(worker = worker.id(), "discarding failed worker");
            self.pool.counters.worker_discarded();
            worker.terminate().await;
        }
    }
}

impl Drop for PooledWorker<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

impl CompressionPool {
    pub fn new(mut config: PoolConfig) -> Self {
        if config.max_concurrency == 0 {
            warn!("max_concurrency of 0 would block every request, using 1");
            config.max_concurrency = 1;
        }
        Self {
            slots: Semaphore::new(config.max_concurrency),
            config,
            idle: Mutex::new(VecDeque::new()),
            counters: Arc::new(PoolCounters::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            alive: self.counters.alive.load(Ordering::SeqCst),
            idle: self.lock_idle().len(),
            peak_alive: self.counters.peak_alive.load(Ordering::SeqCst),
            created: self.counters.created.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
        }
    }

    /// Compresses one instance on a pooled worker
    ///
    /// # Errors
    ///
    /// - `AcquireTimeout` if no worker slot frees up in time
    /// - `Spawn`, `Handshake` or `CreateTimeout` if a new worker cannot be started
    /// - `Remote` if the worker rejects the input
    /// - `Protocol` or `RequestTimeout` if the worker misbehaves
    /// - `Closed` after [`CompressionPool::dispose`]
    pub async fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PoolError> {
        let mut worker = self.acquire().await?;
        let answer = tokio::time::timeout(self.config.request_timeout, worker.request(bytes)).await;
        let result = answer.unwrap_or_else(|_| {
            worker.mark_dead();
            Err(PoolError::RequestTimeout(self.config.request_timeout))
        });
        // a failed request always leaves the worker dead
        if result.is_err() {
            worker.discard().await;
        }
        result
    }

    /// Waits for in-flight requests, then closes every worker's input
    ///
    /// Later calls to [`CompressionPool::compress`] fail with `Closed`.
    pub async fn dispose(&self) {
        let permits = u32::try_from(self.config.max_concurrency).unwrap_or(u32::MAX);
        // holding every slot means no request is in flight
        let drained = self.slots.acquire_many(permits).await;
        self.slots.close();

        let workers: Vec<Worker> = self.lock_idle().drain(..).collect();
        info!(workers = workers.len(), "disposing compression pool");
        futures::future::join_all(workers.into_iter().map(|worker| worker.shutdown(SHUTDOWN_GRACE)))
            .await;
        drop(drained);
    }

    async fn acquire(&self) -> Result<PooledWorker<'_>, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let permit = match tokio::time::timeout_at(deadline, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(PoolError::AcquireTimeout(self.config.acquire_timeout)),
        };

        let worker = match self.take_idle() {
            Some(worker) => worker,
            None => self.create(deadline).await?,
        };
        debug!(worker = worker.id(), "worker acquired");
        Ok(PooledWorker {
            worker: Some(worker),
            pool: self,
            _permit: permit,
        })
    }

    /// Pops a reusable idle worker, discarding dead and expired ones
    fn take_idle(&self) -> Option<Worker> {
        let mut idle = self.lock_idle();
        while let Some(mut worker) = idle.pop_back() {
            if !worker.is_usable() {
                warn!(worker = worker.id(), "discarding dead worker");
                self.counters.worker_discarded();
                continue;
            }
            if worker.idle_for() > self.config.idle_timeout {
                debug!(worker = worker.id(), "retiring idle worker");
                self.counters.worker_discarded();
                continue;
            }
            return Some(worker);
        }
        None
    }

    /// Starts a worker, retrying transient failures until the acquire deadline
    async fn create(&self, deadline: Instant) -> Result<Worker, PoolError> {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let live = LiveToken::new(Arc::clone(&self.counters));
            match Worker::spawn(id, &self.config.command, live, self.config.create_timeout).await {
                Ok(worker) => {
                    debug!(worker = id, "worker ready");
                    return Ok(worker);
                }
                Err(err)
                    if err.is_transient()
                        && Instant::now() + self.config.create_retry_interval < deadline =>
                {
                    warn!(worker = id, error = %err, "cannot start worker, retrying");
                    tokio::time::sleep(self.config.create_retry_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn release(&self, worker: Worker) {
        if worker.state() == WorkerState::Idle {
            debug!(worker = worker.id(), "worker released");
            self.lock_idle().push_back(worker);
        } else {
            debug!(worker = worker.id(), state = ?worker.state(), "dropping unusable worker");
            self.counters.worker_discarded();
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<Worker>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Compressor for CompressionPool {
    async fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PoolError> {
        CompressionPool::compress(self, bytes).await
    }
}
