use crate::server::{
    backend::{BackendSession, Launcher},
    config::SessionConfig,
    ports::PortAllocator,
    queue::TaskSource,
    telemetry::{increment_exchange_faults, record_exchange_duration},
};
use bytes::Bytes;
use orcano_core::{Error, storage::FileStore};
use std::{sync::Arc, time::Instant};

/// Result line sent to a client whose request hit any backend fault.
pub const INTERNAL_ERROR: &[u8] = b"error: internal error\n";

/// Why a worker loop returned.
#[derive(Debug)]
pub enum WorkerExit {
    /// The backend never became reachable.
    StartupFailed(Error),
    /// An exchange failed; the in-flight task got the internal error.
    Faulted(Error),
    /// The backend process died while the worker was idle.
    BackendExited(Error),
    /// The admission queue closed; there is nothing left to serve.
    QueueClosed,
}

/// Everything a worker needs, shared by all workers of a pool.
pub struct WorkerContext<L> {
    pub launcher: L,
    pub ports: Arc<PortAllocator>,
    pub store: Arc<FileStore>,
    pub queue: TaskSource,
    pub session: SessionConfig,
}

/// Runs one worker: start a backend session, then serve tasks until it
/// faults.
///
/// A storage failure only fails the request at hand; the backend finished the
/// exchange, so it keeps serving.
///
/// The session is always shut down (process reaped, port released) before
/// this returns, except when the surrounding task is aborted, in which case
/// the process is killed on drop.
///
/// # Arguments
///
/// - `slot`: Index of the pool slot this worker fills (used for logs).
/// - `ctx`: Shared launcher, port pool, store, queue and session limits.
/// - `on_running`: Called once the backend is connected and serving.
pub async fn worker_loop<L, F>(slot: usize, ctx: Arc<WorkerContext<L>>, on_running: F) -> WorkerExit
where
    L: Launcher,
    F: FnOnce(),
{
    let mut session = match BackendSession::start(
        &ctx.launcher,
        Arc::clone(&ctx.ports),
        Arc::clone(&ctx.store),
        ctx.session,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Worker {slot} failed to start its backend: {e}");
            return WorkerExit::StartupFailed(e);
        }
    };

    tracing::info!(
        "Worker {slot} serving with backend on port {}",
        session.port()
    );
    on_running();

    loop {
        let task = tokio::select! {
            task = ctx.queue.take() => task,
            err = session.wait_exit() => {
                tracing::warn!("Worker {slot} backend exited while idle: {err}");
                session.shutdown().await;
                return WorkerExit::BackendExited(err);
            }
        };

        let Some(task) = task else {
            tracing::debug!("Worker {slot} stopping, queue closed");
            session.shutdown().await;
            return WorkerExit::QueueClosed;
        };

        let started = Instant::now();
        let result = session.exchange(task.request().clone()).await;
        record_exchange_duration(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(response) => task.complete(response),
            Err(e @ Error::Storage(_)) => {
                tracing::error!("Worker {slot} request failed on storage, backend kept: {e}");
                increment_exchange_faults();
                task.complete(Bytes::from_static(INTERNAL_ERROR));
            }
            Err(e) => {
                tracing::warn!(
                    "Worker {slot} exchange on port {} failed: {e}",
                    session.port()
                );
                increment_exchange_faults();
                task.complete(Bytes::from_static(INTERNAL_ERROR));
                session.shutdown().await;
                return WorkerExit::Faulted(e);
            }
        }
    }
}
