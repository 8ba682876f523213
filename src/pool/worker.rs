//! A single external compression process
//!
//! Each worker is a small state machine,
//! `Spawning -> AwaitingReady -> Idle <-> Busy -> Dead`, driven by lines read
//! from the process's output and error streams. [`transition`] holds the
//! rules; [`Worker`] feeds it events.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::protocol::{self, OK, READY};
use super::{PoolCounters, PoolError, WorkerCommand};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    AwaitingReady,
    Idle,
    Busy,
    Dead,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Stdout(String),
    Stderr(String),
    /// The output stream closed, i.e. the process is exiting
    Exited,
}

/// What the worker is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Awaiting {
    Ready,
    Status,
    Payload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Ready,
    AwaitPayload,
    Payload(String),
}

/// Applies one event to a worker waiting on `awaiting`
pub(crate) fn transition(awaiting: Awaiting, event: WorkerEvent) -> Result<Progress, PoolError> {
    match (awaiting, event) {
        (Awaiting::Ready, WorkerEvent::Stdout(line)) if line.trim_end() == READY => {
            Ok(Progress::Ready)
        }
        (Awaiting::Ready, WorkerEvent::Stdout(line)) => Err(PoolError::Handshake(format!(
            "expected {READY:?}, got {line:?}"
        ))),
        (Awaiting::Ready, WorkerEvent::Stderr(line)) => Err(PoolError::Handshake(line)),
        (Awaiting::Ready, WorkerEvent::Exited) => Err(PoolError::Spawn {
            reason: "worker exited before signalling readiness".to_string(),
            source: None,
        }),

        (Awaiting::Status, WorkerEvent::Stdout(line)) if line.trim_end() == OK => {
            Ok(Progress::AwaitPayload)
        }
        (Awaiting::Status, WorkerEvent::Stdout(line)) => Err(PoolError::Protocol(format!(
            "expected status {OK:?}, got {line:?}"
        ))),
        (Awaiting::Payload, WorkerEvent::Stdout(line)) => Ok(Progress::Payload(line)),

        (Awaiting::Status | Awaiting::Payload, WorkerEvent::Stderr(line)) => {
            Err(PoolError::Remote(line))
        }
        (Awaiting::Status | Awaiting::Payload, WorkerEvent::Exited) => Err(PoolError::Protocol(
            "worker exited in the middle of a request".to_string(),
        )),
    }
}

/// One unit of the pool's live process count, held until the process is reaped
pub(crate) struct LiveToken(Arc<PoolCounters>);

impl LiveToken {
    pub(crate) fn new(counters: Arc<PoolCounters>) -> Self {
        counters.worker_started();
        Self(counters)
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.worker_stopped();
    }
}

/// A child process together with its share of the live count
struct Process {
    child: Child,
    live: LiveToken,
}

impl Process {
    /// Releases the live count once the process has exited, killing it first
    /// if `kill` is set
    fn reap(mut self, worker: u64, kill: bool) {
        if !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        if kill {
            if let Err(err) = self.child.start_kill() {
                debug!(worker, error = %err, "worker already gone");
            }
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(worker, "no runtime left to reap worker");
            return;
        };
        let Process { mut child, live } = self;
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(worker, %status, "worker reaped"),
                Err(err) => warn!(worker, error = %err, "cannot wait for worker"),
            }
            drop(live);
        });
    }
}

pub(crate) struct Worker {
    id: u64,
    /// `None` once terminated
    process: Option<Process>,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    /// `None` once the error stream has closed
    stderr: Option<Lines<BufReader<ChildStderr>>>,
    state: WorkerState,
    idle_since: Instant,
}

/// Workers dropped without [`Worker::terminate`], e.g. when a request future
/// is cancelled, are reaped in the background. A healthy idle worker only has
/// its input closed; any other is killed.
impl Drop for Worker {
    fn drop(&mut self) {
        self.stdin.take();
        if let Some(process) = self.process.take() {
            process.reap(self.id, self.state != WorkerState::Idle);
        }
    }
}

impl Worker {
    /// Starts the process and waits for its readiness line
    pub(crate) async fn spawn(
        id: u64,
        command: &WorkerCommand,
        live: LiveToken,
        create_timeout: Duration,
    ) -> Result<Worker, PoolError> {
        let mut state = WorkerState::Spawning;
        debug!(worker = id, program = %command.program, ?state, "spawning worker");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| PoolError::Spawn {
                reason: format!("cannot start {}", command.program),
                source: Some(err),
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            Process { child, live }.reap(id, true);
            return Err(PoolError::Spawn {
                reason: "worker streams were not captured".to_string(),
                source: None,
            });
        };

        state = WorkerState::AwaitingReady;
        let mut worker = Worker {
            id,
            process: Some(Process { child, live }),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr: Some(BufReader::new(stderr).lines()),
            state,
            idle_since: Instant::now(),
        };

        let handshake = tokio::time::timeout(create_timeout, async {
            let event = worker.next_event().await;
            transition(Awaiting::Ready, event)
        })
        .await;

        match handshake {
            Ok(Ok(_)) => {
                worker.set_state(WorkerState::Idle);
                worker.idle_since = Instant::now();
                Ok(worker)
            }
            Ok(Err(err)) => {
                worker.terminate().await;
                Err(err)
            }
            Err(_) => {
                worker.terminate().await;
                Err(PoolError::CreateTimeout(create_timeout))
            }
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!(worker = self.id, from = ?self.state, to = ?state, "worker transition");
        self.state = state;
    }

    pub(crate) fn mark_dead(&mut self) {
        if self.state != WorkerState::Dead {
            self.set_state(WorkerState::Dead);
        }
    }

    /// Whether the worker can take another request
    pub(crate) fn is_usable(&mut self) -> bool {
        if self.state != WorkerState::Idle {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(worker = self.id, %status, "worker process has exited");
                self.mark_dead();
                false
            }
            Err(err) => {
                warn!(worker = self.id, error = %err, "cannot poll worker process");
                self.mark_dead();
                false
            }
        }
    }

    /// Kills the process and waits for it to exit
    pub(crate) async fn terminate(mut self) {
        self.mark_dead();
        if let Some(mut process) = self.process.take() {
            if let Err(err) = process.child.kill().await {
                debug!(worker = self.id, error = %err, "worker already gone");
            }
        }
    }

    /// Next line from either stream; the error stream takes priority
    async fn next_event(&mut self) -> WorkerEvent {
        loop {
            let Self { stdout, stderr, .. } = self;
            let error_line = async move {
                match stderr {
                    Some(lines) => lines.next_line().await,
                    None => std::future::pending().await,
                }
            };
            let (from_stderr, line) = tokio::select! {
                biased;
                line = error_line => (true, line),
                line = stdout.next_line() => (false, line),
            };

            match (from_stderr, line) {
                (true, Ok(Some(line))) => return WorkerEvent::Stderr(line),
                (true, _) => self.stderr = None,
                (false, Ok(Some(line))) => return WorkerEvent::Stdout(line),
                (false, _) => return WorkerEvent::Exited,
            }
        }
    }

    /// Sends one payload and waits for the result
    ///
    /// Any failure leaves the worker `Dead`.
    pub(crate) async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, PoolError> {
        self.set_state(WorkerState::Busy);
        match self.exchange(payload).await {
            Ok(result) => {
                self.set_state(WorkerState::Idle);
                self.idle_since = Instant::now();
                Ok(result)
            }
            Err(err) => {
                self.mark_dead();
                Err(err)
            }
        }
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>, PoolError> {
        let request = protocol::encode_request(payload)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PoolError::Protocol("worker input is closed".to_string()))?;
        stdin
            .write_all(request.as_bytes())
            .await
            .map_err(|err| PoolError::Protocol(format!("cannot write request: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| PoolError::Protocol(format!("cannot write request: {err}")))?;

        let mut awaiting = Awaiting::Status;
        loop {
            let event = self.next_event().await;
            match transition(awaiting, event)? {
                Progress::AwaitPayload => awaiting = Awaiting::Payload,
                Progress::Payload(line) => return protocol::decode_result(&line),
                Progress::Ready => {
                    return Err(PoolError::Protocol("unexpected readiness line".to_string()));
                }
            }
        }
    }

    /// Closes the input stream and waits up to `grace` for the process to exit
    ///
    /// A process still running after `grace` is left to exit on its own.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.stdin.take();
        let Some(process) = self.process.as_mut() else {
            return;
        };
        match tokio::time::timeout(grace, process.child.wait()).await {
            Ok(Ok(status)) => debug!(worker = self.id, %status, "worker exited"),
            Ok(Err(err)) => warn!(worker = self.id, error = %err, "cannot wait for worker"),
            Err(_) => warn!(worker = self.id, "worker still running after its input was closed"),
        }
    }
}
