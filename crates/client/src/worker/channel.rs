//! Orchestrator-side manager for the background worker.
//!
//! Owns at most one worker at a time, started lazily by the first enqueue.
//! Each request gets a monotonically increasing index and a pending entry;
//! responses are matched back by index, never by arrival order. A request
//! is retired by its terminal message, by its deadline, or by the worker
//! going away, whichever comes first. Anything that arrives for a retired
//! index is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::WorkerConfig;
use super::protocol::{LoadRequest, Outbound, Payload};
use super::runtime::{self, WorkerHandle};
use script_cache_core::Error;

/// Lifecycle of the managed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Running,
}

/// One outstanding background fetch.
#[derive(Debug)]
struct PendingRequest {
    url: String,
    on_data: oneshot::Sender<Payload>,
}

#[derive(Debug)]
struct RunningWorker {
    handle: WorkerHandle,
    router: JoinHandle<()>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    worker: Option<RunningWorker>,
    generation: u64,
    next_index: u64,
    pending: HashMap<u64, PendingRequest>,
}

/// Manager for one background worker and its pending requests.
#[derive(Debug)]
pub struct WorkerChannel {
    config: WorkerConfig,
    request_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl WorkerChannel {
    pub fn new(config: WorkerConfig, request_timeout: Duration) -> Self {
        Self { config, request_timeout, inner: Arc::new(Mutex::new(Inner::default())) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    pub fn state(&self) -> ChannelState {
        if self.lock().worker.is_some() { ChannelState::Running } else { ChannelState::Stopped }
    }

    /// Number of requests still waiting for a terminal message.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Queue a background fetch of `url`.
    ///
    /// Starts the worker if it isn't running. The returned receiver yields the
    /// payload on success; it is closed without a value when the fetch fails,
    /// times out, or the worker is torn down first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, url: &str) -> Result<oneshot::Receiver<Payload>, Error> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();

        if inner.worker.is_none() {
            self.start(&mut inner)?;
        }

        let index = inner.next_index;
        inner.next_index += 1;
        inner.pending.insert(index, PendingRequest { url: url.to_string(), on_data: tx });

        let message = LoadRequest { url: url.to_string(), index }.to_message();
        if let Err(e) = post(&inner, message.clone()) {
            // worker died before its router noticed
            tracing::warn!(url, error = %e, "worker gone, restarting");
            retire_dead(&mut inner, index);

            let restarted = self.start(&mut inner).and_then(|()| post(&inner, message));
            if let Err(e) = restarted {
                inner.pending.remove(&index);
                tracing::warn!(url, error = %e, "request not queued");
                return Err(e);
            }
        }
        drop(inner);

        self.arm_deadline(index);
        tracing::debug!(url, index, "queued background fetch");
        Ok(rx)
    }

    fn start(&self, inner: &mut Inner) -> Result<(), Error> {
        let (handle, outbound) = runtime::spawn(self.config.clone())?;
        inner.generation += 1;
        let generation = inner.generation;
        let router = tokio::spawn(route(Arc::downgrade(&self.inner), outbound, generation));
        inner.worker = Some(RunningWorker { handle, router, generation });
        tracing::debug!(generation, "background worker started");
        Ok(())
    }

    fn arm_deadline(&self, index: u64) {
        let inner = Arc::downgrade(&self.inner);
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else { return };
            if let Some(request) = lock(&inner).pending.remove(&index) {
                tracing::warn!(url = %request.url, index, timeout_ms = timeout.as_millis() as u64, "background fetch timed out");
            }
        });
    }

    /// Stop the worker and abandon every pending request.
    ///
    /// Indices keep counting up; a later enqueue starts a fresh worker.
    pub fn terminate(&self) {
        let (worker, abandoned) = {
            let mut inner = self.lock();
            let abandoned = inner.pending.len();
            inner.pending.clear();
            (inner.worker.take(), abandoned)
        };

        if let Some(worker) = worker {
            worker.router.abort();
            worker.handle.shutdown();
            tracing::debug!(generation = worker.generation, abandoned, "background worker terminated");
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn post(inner: &Inner, message: serde_json::Value) -> Result<(), Error> {
    match &inner.worker {
        Some(worker) => worker.handle.post(message),
        None => Err(Error::WorkerUnavailable("no worker running".into())),
    }
}

/// Drop a worker whose thread has exited, abandoning every pending request except `keep`.
fn retire_dead(inner: &mut Inner, keep: u64) {
    if let Some(worker) = inner.worker.take() {
        worker.router.abort();
        let before = inner.pending.len();
        inner.pending.retain(|index, _| *index == keep);
        let abandoned = before - inner.pending.len();
        tracing::error!(generation = worker.generation, abandoned, "background worker exited unexpectedly");
    }
}

/// Route worker messages to their pending requests until the worker goes away.
async fn route(inner: Weak<Mutex<Inner>>, mut outbound: mpsc::UnboundedReceiver<Outbound>, generation: u64) {
    while let Some(message) = outbound.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        deliver(&inner, message);
    }

    let Some(inner) = inner.upgrade() else { return };
    let mut inner = lock(&inner);
    if inner.worker.as_ref().is_some_and(|w| w.generation == generation) {
        let abandoned = inner.pending.len();
        inner.worker = None;
        inner.pending.clear();
        tracing::error!(generation, abandoned, "background worker exited unexpectedly");
    }
}

fn deliver(inner: &Mutex<Inner>, message: Outbound) {
    match message {
        Outbound::Data { index, payload } => {
            let Some(request) = lock(inner).pending.remove(&index) else {
                tracing::debug!(index, "dropping data for unknown or retired request");
                return;
            };
            tracing::debug!(url = %request.url, index, bytes = payload.len(), "background fetch complete");
            // the caller may have stopped listening
            let _ = request.on_data.send(payload);
        }
        Outbound::Error { index, error } => {
            let Some(request) = lock(inner).pending.remove(&index) else {
                tracing::debug!(index, "dropping error for unknown or retired request");
                return;
            };
            tracing::warn!(url = %request.url, index, code = %error.code, message = %error.message, "background fetch failed");
        }
        Outbound::Fault { error } => {
            tracing::error!(code = %error.code, message = %error.message, "background worker fault");
        }
    }
}
