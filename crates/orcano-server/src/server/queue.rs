//! Bounded admission queue between client sessions and workers.
//!
//! The queue is the only admission control in the frontend: it bounds the
//! number of outstanding requests and decouples the rate of client
//! connections from the fixed number of backend workers. Producers suspend
//! while it is full; consumers suspend while it is empty. Nothing is ever
//! dropped or rejected.

use bytes::Bytes;
use orcano_core::Error;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};

/// One client command line awaiting its response.
#[derive(Debug)]
pub struct Task {
    request: Bytes,
    completion: oneshot::Sender<Bytes>,
}

impl Task {
    /// Creates a task together with the receiver its result arrives on.
    pub fn new(request: Bytes) -> (Self, oneshot::Receiver<Bytes>) {
        let (completion, rx) = oneshot::channel();
        (
            Self {
                request,
                completion,
            },
            rx,
        )
    }

    pub fn request(&self) -> &Bytes {
        &self.request
    }

    /// Delivers the response. The submitter may have disconnected, in which
    /// case the result is dropped.
    pub fn complete(self, response: Bytes) {
        if self.completion.send(response).is_err() {
            tracing::debug!("Task result dropped, submitter is gone");
        }
    }
}

/// Producer side of a multi-producer / multi-consumer FIFO of [`Task`]s
/// with capacity `K`.
///
/// Producers use the channel's own fair waiting. The queue closes for
/// consumers once every `AdmissionQueue` clone is dropped.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::Sender<Task>,
}

/// Consumer side of the admission queue, shared by all workers.
///
/// Consumers serialize on an async mutex around the receiver, which hands
/// tasks out in arrival order to whichever worker asked first.
#[derive(Clone)]
pub struct TaskSource {
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> (Self, TaskSource) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self { tx },
            TaskSource {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Enqueues `task`, waiting for space if the queue is full.
    pub async fn submit(&self, task: Task) -> Result<(), Error> {
        self.tx.send(task).await.map_err(|_| Error::QueueClosed)
    }

    /// Number of tasks currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl TaskSource {
    /// Takes the oldest task, waiting if the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    ///
    /// Cancel-safe: a task is only removed when this future completes.
    pub async fn take(&self) -> Option<Task> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}
