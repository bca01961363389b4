// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size worker thread pool
//!
//! Workers pull jobs from one shared FIFO guarded by a mutex and sleep on a
//! condition variable while it is empty. Two ways to hand work over:
//!
//! - [`WorkerPool::submit`] for owned (`'static`) jobs, returning a
//!   [`TaskHandle`] to block on later
//! - [`WorkerPool::scope`] for jobs that borrow from the caller's stack; the
//!   scope does not return until every job submitted through it has finished
//!
//! Jobs run under `catch_unwind`, so a panicking job is reported to whoever
//! waits on it and the worker keeps serving the queue.

use crate::errors::{HalError, HalResult};
use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Completion handle of a job submitted with [`WorkerPool::submit`]
pub struct TaskHandle<T> {
    result: Receiver<Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Block until the job has run and return its output
    pub fn wait(self) -> HalResult<T> {
        match self.result.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(msg)) => Err(HalError::TaskFailed(msg)),
            Err(_) => Err(HalError::TaskFailed(
                "task dropped before it ran".to_string(),
            )),
        }
    }
}

/// Fixed-size pool of worker threads sharing one FIFO job queue
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Pool with one worker per available hardware thread
    pub fn new() -> Self {
        let size = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(size)
    }

    /// Pool with exactly `size` workers (at least one)
    pub fn with_threads(size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            threads: Vec::new(),
            size: size.max(1),
        }
    }

    /// Number of worker threads the pool runs when started
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Spawn the worker threads
    pub fn start(&mut self) -> HalResult<()> {
        if self.is_running() {
            return Err(HalError::PoolAlreadyRunning);
        }
        self.shared.lock().shutdown = false;

        for i in 0..self.size {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("hal-worker-{}", i))
                .spawn(move || worker_loop(shared));
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    warn!(error = %e, worker = i, "Could not spawn worker thread");
                    self.stop();
                    return Err(HalError::Io(e.to_string()));
                }
            }
        }

        info!(threads = self.size, "Worker pool started");
        Ok(())
    }

    /// Signal shutdown, wake every worker and join them.
    ///
    /// Jobs already running finish first. Jobs still queued are dropped and
    /// their handles report [`HalError::TaskFailed`].
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        let abandoned = {
            let mut queue = self.shared.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.jobs)
        };
        self.shared.available.notify_all();

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("hal-worker").to_string();
            if handle.join().is_err() {
                warn!(name = %name, "Worker thread panicked");
            }
        }

        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Dropped queued jobs on shutdown");
        }
        drop(abandoned);
        info!("Worker pool stopped");
    }

    fn push(&self, job: Job) {
        self.shared.lock().jobs.push_back(job);
        self.shared.available.notify_one();
    }

    /// Queue an owned job; returns immediately
    pub fn submit<F, T>(&self, task: F) -> HalResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_running() {
            return Err(HalError::PoolNotRunning);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.push(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).map_err(|p| panic_message(&*p));
            // The handle may have been dropped; nobody is waiting then
            let _ = tx.send(result);
        }));
        Ok(TaskHandle { result: rx })
    }

    /// Run `f` with a [`Scope`] whose jobs may borrow from the caller.
    ///
    /// Returns only after every job submitted through the scope has finished.
    /// A panic inside a job surfaces as [`HalError::TaskFailed`]; a panic in
    /// `f` itself is resumed after the jobs are drained.
    pub fn scope<'env, F, R>(&self, f: F) -> HalResult<R>
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>) -> R,
    {
        if !self.is_running() {
            return Err(HalError::PoolNotRunning);
        }

        let scope = Scope {
            pool: self,
            pending: Arc::new(Pending::default()),
            scope: PhantomData,
            env: PhantomData,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| f(&scope)));
        let failures = scope.pending.wait_idle();

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        };
        match failures.into_iter().next() {
            Some(msg) => Err(HalError::TaskFailed(msg)),
            None => Ok(value),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let name = thread::current().name().unwrap_or("hal-worker").to_string();
    debug!(name = %name, "Worker thread started");

    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if queue.shutdown {
                    debug!(name = %name, "Worker thread exiting");
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        job();
    }
}

#[derive(Default)]
struct PendingState {
    count: usize,
    failures: Vec<String>,
}

#[derive(Default)]
struct Pending {
    state: Mutex<PendingState>,
    idle: Condvar,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self) {
        self.lock().count += 1;
    }

    fn finish(&self, failure: Option<String>) {
        let mut state = self.lock();
        if let Some(msg) = failure {
            state.failures.push(msg);
        }
        state.count -= 1;
        if state.count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) -> Vec<String> {
        let mut state = self.lock();
        while state.count > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        std::mem::take(&mut state.failures)
    }
}

/// Submission handle for jobs that borrow from the enclosing stack frame
pub struct Scope<'scope, 'env: 'scope> {
    pool: &'scope WorkerPool,
    pending: Arc<Pending>,
    scope: PhantomData<&'scope mut &'scope ()>,
    env: PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Queue a job that may borrow anything outliving the scope
    pub fn submit<F>(&'scope self, task: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        self.pending.add();
        let pending = Arc::clone(&self.pending);
        let job: Box<dyn FnOnce() + Send + 'scope> = Box::new(move || {
            let failure = catch_unwind(AssertUnwindSafe(task))
                .err()
                .map(|p| panic_message(&*p));
            pending.finish(failure);
        });
        // SAFETY: `WorkerPool::scope` blocks until `pending` drains, and the
        // pool cannot be stopped while the scope borrows it, so every borrow
        // captured by `task` outlives the job.
        let job: Job = unsafe {
            std::mem::transmute::<Box<dyn FnOnce() + Send + 'scope>, Box<dyn FnOnce() + Send + 'static>>(
                job,
            )
        };
        self.pool.push(job);
    }
}
