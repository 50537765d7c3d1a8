//! `StreamingRunController`: starts a streamed backtest on a background
//! thread, folds every decoded event into a shared `RunState`, and lets the
//! caller cancel, reset or reconfigure between runs.
//!
//! Each run gets a generation number. The decode thread only writes to the
//! shared state while its generation is current and its cancel flag is
//! down; both are checked under the state lock, so a superseded or cancelled
//! run can never touch the results of the next one. Stream bodies yield
//! `WouldBlock` while the server is quiet, so a detached run drops its body
//! within one poll interval instead of waiting for the next chunk.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use stratstream_core::{FrameDecoder, RunConfig, RunConfigPatch, RunState, RunUpdate};
use tracing::{debug, info, warn};

use crate::transport::{BacktestTransport, StreamBody};

/// Default read buffer for the decode loop.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

const JOIN_POLL: Duration = Duration::from_millis(10);

// ── Shared state ─────────────────────────────────────────────────────

struct Inner {
    state: RunState,
    /// Generation of the run allowed to write `state`.
    generation: u64,
    listeners: Vec<Sender<RunUpdate>>,
}

impl Inner {
    fn publish(&mut self, update: &RunUpdate) {
        self.listeners.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

struct Shared {
    inner: Mutex<Inner>,
    /// Signalled whenever `state.is_running` drops to false.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ActiveRun {
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

// ── Controller ───────────────────────────────────────────────────────

/// Client-side controller for one streamed backtest at a time.
pub struct StreamingRunController {
    transport: Arc<dyn BacktestTransport>,
    shared: Arc<Shared>,
    config: RunConfig,
    chunk_size: usize,
    active: Option<ActiveRun>,
}

impl StreamingRunController {
    pub fn new(transport: Arc<dyn BacktestTransport>) -> Self {
        Self::with_config(transport, RunConfig::default())
    }

    pub fn with_config(transport: Arc<dyn BacktestTransport>, config: RunConfig) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RunState::new(),
                    generation: 0,
                    listeners: Vec::new(),
                }),
                idle: Condvar::new(),
            }),
            config,
            chunk_size: DEFAULT_CHUNK_SIZE,
            active: None,
        }
    }

    /// Read buffer size used by subsequent runs.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    // ── Configuration ────────────────────────────────────────────────

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Shallow-merge `patch` into the configuration. A run already in
    /// progress keeps the snapshot it started with.
    pub fn set_config(&mut self, patch: RunConfigPatch) {
        self.config.merge(patch);
        debug!(config = ?self.config, "run config updated");
    }

    // ── Run lifecycle ────────────────────────────────────────────────

    /// Start a new run with the current configuration and return its
    /// generation number.
    ///
    /// Any run still in flight is detached first: its thread drops the
    /// stream body at its next read and none of its events reach the state. Results are
    /// cleared and `is_running` is set before this returns.
    pub fn start(&mut self, token: &str) -> u64 {
        self.detach_active();

        let generation = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            let update = inner.state.begin_run();
            inner.publish(&update);
            inner.generation
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let task = RunTask {
            generation,
            config: self.config.clone(),
            token: token.to_string(),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            cancel: Arc::clone(&cancel),
            chunk_size: self.chunk_size,
        };

        info!(
            generation,
            strategy = %self.config.strategy,
            symbol = %self.config.symbol,
            start = %self.config.start_date,
            end = %self.config.end_date,
            agent = self.config.agent_enabled,
            "starting streamed backtest"
        );

        let spawned = thread::Builder::new()
            .name(format!("stratstream-run-{generation}"))
            .spawn(move || task.run());

        match spawned {
            Ok(handle) => {
                self.active = Some(ActiveRun {
                    generation,
                    cancel,
                    handle: Some(handle),
                });
            }
            Err(e) => {
                warn!(generation, error = %e, "failed to spawn run thread");
                let mut inner = self.shared.lock();
                let update = inner.state.fail(format!("failed to start run: {e}"));
                inner.publish(&update);
                self.shared.idle.notify_all();
            }
        }
        generation
    }

    /// Stop the active run.
    ///
    /// The server is notified on a background thread; whether that request
    /// succeeds is only logged. Locally the run ends at once: `is_running`
    /// becomes false, results so far are kept, and the decode thread is
    /// detached so nothing further is appended. Safe to call when idle.
    pub fn cancel(&self, token: &str) -> CancelNotice {
        let transport = Arc::clone(&self.transport);
        let token = token.to_string();
        let dispatched = thread::Builder::new()
            .name("stratstream-cancel".into())
            .spawn(move || match transport.cancel_run(&token) {
                Ok(()) => debug!("cancel request acknowledged"),
                Err(e) => warn!(error = %e, "cancel request failed"),
            });

        let handle = match dispatched {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn cancel thread");
                None
            }
        };

        let mut inner = self.shared.lock();
        if let Some(active) = &self.active {
            active.cancel.store(true, Ordering::SeqCst);
        }
        if inner.state.is_running {
            info!(generation = inner.generation, "run cancelled");
            let update = inner.state.mark_cancelled();
            inner.publish(&update);
            self.shared.idle.notify_all();
        }
        CancelNotice { handle }
    }

    /// Clear results. Does not stop a run in progress; its later events
    /// keep accumulating into the emptied state.
    pub fn reset(&self) {
        self.shared.lock().state.reset();
    }

    /// Alias of [`reset`](Self::reset).
    pub fn clear_results(&self) {
        self.reset();
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Copy of the current state.
    pub fn snapshot(&self) -> RunState {
        self.shared.lock().state.clone()
    }

    /// Borrow the current state under the lock without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&RunState) -> R) -> R {
        f(&self.shared.lock().state)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().state.is_running
    }

    /// Generation of the most recently started run (0 before the first).
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Receive every state change from now on, in the order applied.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<RunUpdate> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().listeners.push(tx);
        rx
    }

    /// Block until no run is active or `timeout` elapses. Returns true if
    /// the controller is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        let (inner, _) = self
            .shared
            .idle
            .wait_timeout_while(inner, timeout, |i| i.state.is_running)
            .unwrap_or_else(PoisonError::into_inner);
        !inner.state.is_running
    }

    /// Wait for the decode thread of the current run to exit. Returns
    /// false if there is none or it panicked.
    pub fn join(&mut self) -> bool {
        match self.active.as_mut().and_then(|a| a.handle.take()) {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }

    /// Like [`join`](Self::join), but gives up after `timeout` and leaves
    /// the thread running. A server may hold the connection open after the
    /// run has ended.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        loop {
            match &active.handle {
                None => return false,
                Some(handle) if handle.is_finished() => break,
                Some(_) if Instant::now() >= deadline => {
                    debug!(generation = active.generation, "decode thread still running");
                    return false;
                }
                Some(_) => thread::sleep(JOIN_POLL),
            }
        }
        active.handle.take().is_some_and(|h| h.join().is_ok())
    }

    fn detach_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(generation = active.generation, "detaching previous run");
            active.cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for StreamingRunController {
    fn drop(&mut self) {
        self.detach_active();
    }
}

/// Handle to a dispatched cancel request.
pub struct CancelNotice {
    handle: Option<JoinHandle<()>>,
}

impl CancelNotice {
    /// Block until the server request has finished, successfully or not.
    pub fn wait(self) {
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

// ── Decode task ──────────────────────────────────────────────────────

struct RunTask {
    generation: u64,
    config: RunConfig,
    token: String,
    transport: Arc<dyn BacktestTransport>,
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    chunk_size: usize,
}

impl RunTask {
    fn run(self) {
        let body = match self.transport.open_stream(&self.config, &self.token) {
            Ok(body) => body,
            Err(e) => {
                warn!(generation = self.generation, error = %e, "stream request failed");
                self.commit(|state| vec![state.fail(e.to_string())]);
                return;
            }
        };
        self.pump(body);
    }

    fn pump(&self, mut body: StreamBody) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                debug!(generation = self.generation, "run detached; dropping stream");
                return;
            }
            match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let events = decoder.push(&buf[..n]);
                    if events.is_empty() {
                        continue;
                    }
                    let live = self.commit(|state| {
                        events.into_iter().filter_map(|e| state.apply(e)).collect()
                    });
                    if !live {
                        debug!(generation = self.generation, "run superseded; dropping stream");
                        return;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!(generation = self.generation, error = %e, "stream read failed");
                    self.commit(|state| vec![state.fail(e.to_string())]);
                    return;
                }
            }
        }

        let stats = decoder.finish();
        info!(
            generation = self.generation,
            bytes = stats.bytes,
            events = stats.events,
            malformed = stats.malformed,
            "stream closed"
        );
        self.commit(|state| state.close_stream().into_iter().collect());
    }

    /// Apply `f` to the shared state if this run still owns it, publish the
    /// resulting updates and wake idle waiters. Returns false if the run has
    /// been superseded or cancelled.
    fn commit(&self, f: impl FnOnce(&mut RunState) -> Vec<RunUpdate>) -> bool {
        let mut inner = self.shared.lock();
        if inner.generation != self.generation || self.cancel.load(Ordering::SeqCst) {
            return false;
        }
        for update in f(&mut inner.state) {
            inner.publish(&update);
        }
        if !inner.state.is_running {
            self.shared.idle.notify_all();
        }
        true
    }
}
