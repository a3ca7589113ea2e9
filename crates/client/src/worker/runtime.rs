//! The isolated background worker.
//!
//! Runs on its own OS thread with its own single-threaded tokio runtime and
//! shares nothing with the caller except the two channels. Every valid load
//! request starts one fetch; fetches run concurrently on the worker's event
//! loop and each posts exactly one terminal message back.

use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::WorkerConfig;
use super::protocol::{ErrorInfo, LoadRequest, Outbound, Payload, parse_inbound};
use crate::fetch::Fetcher;
use script_cache_core::Error;

/// Caller-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    inbound: mpsc::UnboundedSender<Value>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Post a message to the worker. Fails if the worker has exited.
    pub fn post(&self, message: Value) -> Result<(), Error> {
        self.inbound
            .send(message)
            .map_err(|_| Error::WorkerUnavailable("worker inbound channel closed".into()))
    }

    /// Stop the worker. In-flight fetches are dropped with the worker's runtime.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // detach; the thread exits on its own once the signal lands
        drop(self.thread.take());
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// A handle whose worker is already gone.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (inbound, _) = mpsc::unbounded_channel();
        Self { inbound, shutdown: None, thread: None }
    }
}

/// Start a worker thread.
///
/// Returns the handle for posting requests and the receiver for everything
/// the worker sends back. The receiver yields None once the worker is gone.
pub fn spawn(config: WorkerConfig) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<Outbound>), Error> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let thread = std::thread::Builder::new()
        .name("script-cache-worker".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start worker runtime");
                    return;
                }
            };
            runtime.block_on(run(config, inbound_rx, outbound_tx, shutdown_rx));
            tracing::debug!("worker stopped");
        })
        .map_err(|e| Error::WorkerUnavailable(format!("failed to spawn worker thread: {e}")))?;

    let handle = WorkerHandle { inbound: inbound_tx, shutdown: Some(shutdown_tx), thread: Some(thread) };
    Ok((handle, outbound_rx))
}

async fn run(
    config: WorkerConfig, mut inbound: mpsc::UnboundedReceiver<Value>, outbound: mpsc::UnboundedSender<Outbound>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let fetcher = match Fetcher::new(config.fetch.clone()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            tracing::error!(error = %e, "worker could not build its fetcher");
            return;
        }
    };
    tracing::debug!(transport = fetcher.transport_name(), chunk_size = config.chunk_size, "worker started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = inbound.recv() => match message {
                Some(message) => dispatch(&message, &fetcher, config.chunk_size, &outbound),
                None => break,
            },
        }
    }
}

fn dispatch(message: &Value, fetcher: &Arc<Fetcher>, chunk_size: usize, outbound: &mpsc::UnboundedSender<Outbound>) {
    let requests = match parse_inbound(message) {
        Ok(requests) => requests,
        Err(e) => {
            tracing::error!(error = %e, "worker received malformed message");
            let _ = outbound.send(Outbound::Fault { error: ErrorInfo::from(&e) });
            return;
        }
    };

    for LoadRequest { url, index } in requests {
        let fetcher = fetcher.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let message = match fetcher.fetch(&url).await {
                Ok(body) => Outbound::Data { index, payload: Payload::split(body, chunk_size) },
                Err(e) => Outbound::Error { index, error: ErrorInfo::from(&e) },
            };
            // the manager may already be gone
            let _ = outbound.send(message);
        });
    }
}
