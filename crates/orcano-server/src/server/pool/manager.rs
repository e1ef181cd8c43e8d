//! Supervisor keeping a fixed number of backend workers alive.
//!
//! This module defines [`WorkerPool`], which spawns `N` [`worker_loop`]s on a
//! [`JoinSet`] and replaces any that exits. Each slot moves through
//! [`WorkerState`]s independently; a restarting slot never delays the others
//! because its backoff is slept inside the replacement task itself.
//!
//! Supervision stops when the shared [`CancellationToken`] is cancelled, or
//! when every worker has left because the admission queue closed.

use crate::server::{
    backend::Launcher,
    config::PoolConfig,
    pool::worker::{WorkerContext, WorkerExit, worker_loop},
    telemetry::increment_worker_restarts,
};
use core::time::Duration;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one worker slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Launching a backend and waiting for its control connection.
    Starting,
    /// Serving tasks from the admission queue.
    Running,
    /// The last worker in this slot exited; a replacement is due.
    Faulted,
    /// A replacement is waiting out the restart backoff.
    Restarting,
    /// The slot will not be refilled.
    Stopped,
}

/// Observable status of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotStatus {
    pub state: WorkerState,
    pub restarts: u64,
}

type Slots = Arc<Mutex<Vec<SlotStatus>>>;

/// Handle to a running supervisor.
pub struct WorkerPool {
    slots: Slots,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawns `config.num_workers` workers plus the supervisor task.
    ///
    /// Returns immediately; backends start in the background.
    pub fn spawn<L: Launcher>(
        config: &PoolConfig,
        ctx: WorkerContext<L>,
        shutdown: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let slots: Slots = Arc::new(Mutex::new(vec![
            SlotStatus {
                state: WorkerState::Starting,
                restarts: 0,
            };
            config.num_workers
        ]));

        let supervisor = Supervisor {
            ctx: Arc::new(ctx),
            slots: Arc::clone(&slots),
            backoff: config.restart_backoff,
            workers: JoinSet::new(),
            owners: HashMap::with_capacity(config.num_workers),
        };
        let handle = tokio::spawn(supervisor.run(config.num_workers, shutdown.clone()));

        (Self { slots, shutdown }, handle)
    }

    /// Snapshot of every slot's state and restart count.
    pub fn states(&self) -> Vec<SlotStatus> {
        self.slots.lock().clone()
    }

    /// Stops supervision. Running workers are aborted and their backends
    /// killed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct Supervisor<L> {
    ctx: Arc<WorkerContext<L>>,
    slots: Slots,
    backoff: Duration,
    workers: JoinSet<WorkerExit>,
    owners: HashMap<Id, usize>,
}

impl<L: Launcher> Supervisor<L> {
    async fn run(mut self, num_workers: usize, shutdown: CancellationToken) {
        for slot in 0..num_workers {
            self.spawn_worker(slot, None);
        }
        tracing::info!("Worker pool started with {num_workers} workers");

        loop {
            let joined = tokio::select! {
                () = shutdown.cancelled() => break,
                joined = self.workers.join_next_with_id() => joined,
            };

            let Some(joined) = joined else {
                tracing::info!("All workers stopped");
                break;
            };

            let (id, exit) = match joined {
                Ok((id, exit)) => (id, Some(exit)),
                Err(e) => (e.id(), None),
            };
            let Some(slot) = self.owners.remove(&id) else {
                continue;
            };

            match exit {
                Some(WorkerExit::QueueClosed) => {
                    self.set_state(slot, WorkerState::Stopped);
                    continue;
                }
                Some(exit) => tracing::warn!("Worker {slot} exited: {exit:?}"),
                None => tracing::error!("Worker {slot} panicked"),
            }

            self.set_state(slot, WorkerState::Faulted);
            increment_worker_restarts();
            self.slots.lock()[slot].restarts += 1;
            self.spawn_worker(slot, Some(self.backoff));
        }

        tracing::info!("Stopping worker pool");
        self.ctx.ports.close();
        self.workers.shutdown().await;
        for status in self.slots.lock().iter_mut() {
            status.state = WorkerState::Stopped;
        }
    }

    /// Spawns the worker for `slot`. `restart` carries the backoff to sleep
    /// first when this replaces an exited worker.
    fn spawn_worker(&mut self, slot: usize, restart: Option<Duration>) {
        let ctx = Arc::clone(&self.ctx);
        let slots = Arc::clone(&self.slots);

        let handle = self.workers.spawn(async move {
            if let Some(backoff) = restart {
                set_state(&slots, slot, WorkerState::Restarting);
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
            set_state(&slots, slot, WorkerState::Starting);
            worker_loop(slot, ctx, move || {
                set_state(&slots, slot, WorkerState::Running);
            })
            .await
        });
        self.owners.insert(handle.id(), slot);
    }

    fn set_state(&self, slot: usize, state: WorkerState) {
        set_state(&self.slots, slot, state);
    }
}

fn set_state(slots: &Mutex<Vec<SlotStatus>>, slot: usize, state: WorkerState) {
    if let Some(status) = slots.lock().get_mut(slot) {
        status.state = state;
    }
}
