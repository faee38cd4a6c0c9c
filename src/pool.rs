//! Bounded background executor for sync work.
//!
//! A fixed set of worker tasks pulls jobs off a bounded queue, so at most
//! `max_concurrent` syncs touch the index at once no matter how many saves or
//! project-opens fire. Submission never blocks: a full queue drops the job and
//! reports it to the caller. Jobs are blocking closures and run on tokio's
//! blocking pool.
//!
//! Lifecycle is one-way: `Running -> Draining -> Stopped`.

use crate::config::PoolConfig;
use crate::sync::SyncError;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub type Task = Box<dyn FnOnce() -> Result<(), SyncError> + Send + 'static>;

struct Job {
    label: String,
    task: Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    Stopped,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Running,
            1 => PoolState::Draining,
            _ => PoolState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue at capacity; the job was dropped.
    QueueFull,
    /// Pool is draining or stopped.
    ShuttingDown,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "sync queue full"),
            SubmitError::ShuttingDown => write!(f, "sync pool shutting down"),
        }
    }
}

impl std::error::Error for SubmitError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued jobs discarded without running.
    pub cancelled: usize,
    /// Jobs still running when the grace period ran out.
    pub abandoned: usize,
}

#[derive(Default)]
struct Counters {
    state: AtomicU8,
    active: AtomicUsize,
    queued: AtomicUsize,
    cancelled: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) == 0
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

struct Inner {
    counters: Arc<Counters>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    grace: Duration,
}

/// Cheap to clone; all clones share one queue and one set of workers.
#[derive(Clone)]
pub struct SyncPool {
    inner: Arc<Inner>,
}

impl SyncPool {
    pub fn new(handle: &Handle, config: &PoolConfig) -> Self {
        Self::with_limits(
            handle,
            config.max_concurrent,
            config.queue_capacity,
            config.shutdown_grace(),
        )
    }

    pub fn with_limits(
        handle: &Handle,
        max_concurrent: usize,
        queue_capacity: usize,
        grace: Duration,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..max_concurrent)
            .map(|n| handle.spawn(worker(n, rx.clone(), counters.clone())))
            .collect();

        log::debug!("sync pool started: {max_concurrent} workers, queue {queue_capacity}");

        Self {
            inner: Arc::new(Inner {
                counters,
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(workers),
                grace,
            }),
        }
    }

    /// Queue `task` without waiting. `label` identifies the job in logs.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() -> Result<(), SyncError> + Send + 'static,
    {
        if self.state() != PoolState::Running {
            return Err(SubmitError::ShuttingDown);
        }
        let guard = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::ShuttingDown);
        };

        let counters = &self.inner.counters;
        counters.queued.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            label: label.into(),
            task: Box::new(task),
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(e) => {
                counters.queued.fetch_sub(1, Ordering::SeqCst);
                counters.notify_if_idle();
                match e {
                    TrySendError::Full(_) => Err(SubmitError::QueueFull),
                    TrySendError::Closed(_) => Err(SubmitError::ShuttingDown),
                }
            }
        }
    }

    /// Jobs currently executing.
    pub fn active_count(&self) -> usize {
        self.inner.counters.active.load(Ordering::SeqCst)
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn queued_count(&self) -> usize {
        self.inner.counters.queued.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PoolState {
        self.inner.counters.state()
    }

    /// Resolve once nothing is queued or running. New submissions made while
    /// waiting extend the wait.
    pub async fn idle(&self) {
        let counters = &self.inner.counters;
        loop {
            let notified = counters.idle.notified();
            let mut notified = std::pin::pin!(notified);
            // register before checking so a wakeup in between is not lost
            notified.as_mut().enable();
            if counters.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, discard queued jobs, and wait up to the grace
    /// period for running jobs. Jobs still running afterwards are abandoned,
    /// not killed. Calling this again after the first call is a no-op.
    pub async fn shutdown(&self) -> ShutdownReport {
        let counters = &self.inner.counters;
        if counters
            .state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ShutdownReport::default();
        }

        log::info!(
            "sync pool draining: {} running, {} queued (grace {:?})",
            self.active_count(),
            self.queued_count(),
            self.inner.grace
        );

        // Closing the channel lets workers exit once the queue is empty
        drop(
            self.inner
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut report = ShutdownReport::default();
        match tokio::time::timeout(self.inner.grace, futures::future::join_all(handles)).await {
            Ok(_) => {}
            Err(_) => {
                report.abandoned = self.active_count();
                log::warn!(
                    "sync pool grace period elapsed, abandoning {} running task(s)",
                    report.abandoned
                );
            }
        }
        // jobs still in the channel will be discarded once a worker frees up
        report.cancelled = counters.cancelled.load(Ordering::SeqCst) + self.queued_count();

        counters.state.store(2, Ordering::SeqCst);
        log::info!(
            "sync pool stopped ({} cancelled, {} abandoned)",
            report.cancelled,
            report.abandoned
        );
        report
    }
}

async fn worker(
    n: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(job) = next else {
            break;
        };
        // active goes up before queued comes down so idle() never sees a gap
        counters.active.fetch_add(1, Ordering::SeqCst);
        counters.queued.fetch_sub(1, Ordering::SeqCst);

        if counters.state() != PoolState::Running {
            counters.cancelled.fetch_add(1, Ordering::SeqCst);
            counters.active.fetch_sub(1, Ordering::SeqCst);
            counters.notify_if_idle();
            log::debug!("discarding queued sync task {} (pool draining)", job.label);
            continue;
        }

        let result = tokio::task::spawn_blocking(job.task).await;
        counters.active.fetch_sub(1, Ordering::SeqCst);
        counters.notify_if_idle();

        match result {
            Ok(Ok(())) => log::debug!("worker {n}: sync task {} done", job.label),
            Ok(Err(e)) => log::warn!("worker {n}: background sync {} failed: {e}", job.label),
            Err(e) => log::error!("worker {n}: background sync {} panicked: {e}", job.label),
        }
    }
    log::debug!("worker {n} exiting");
}
