//! This module contains the worker pool and the main worker loop.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::vec::Vec;
use core::cell::Cell;
use core::mem;
use core::num::NonZero;
use core::ptr;
use core::sync::atomic::AtomicUsize;

use tracing::debug;
use tracing::trace;
use tracing::trace_span;
use tracing::warn;

use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::latch::CountLatch;
use crate::platform::Arc;
use crate::platform::Condvar;
use crate::platform::JoinHandle;
use crate::platform::Mutex;
use crate::platform::ThreadBuilder;
use crate::platform::lock;
use crate::platform::thread_local;
use crate::task::Task;

// -----------------------------------------------------------------------------
// Thread pool types

/// A fixed-size pool of worker threads fed from one shared FIFO queue.
///
/// Workers are spawned when the pool is created and run until it is shut
/// down. Shutdown is graceful: tasks that were accepted before the pool
/// stopped accepting work are still executed.
pub(crate) struct ThreadPool {
    shared: Arc<Shared>,
    managed_threads: Mutex<Vec<ManagedWorker>>,
}

/// The part of the pool every worker holds a reference to.
struct Shared {
    /// Distinguishes workers of different pools living in one process.
    id: usize,
    num_threads: NonZero<usize>,
    state: Mutex<ThreadPoolState>,
    /// Notified when a task is queued, and when the pool halts.
    job_is_ready: Condvar,
}

struct ThreadPoolState {
    queue: VecDeque<Task>,
    halt: bool,
}

struct ManagedWorker {
    index: usize,
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Creates a pool and starts its workers.
    ///
    /// Returns [`Error::ResourceExhausted`] if a worker thread cannot be
    /// spawned. Any workers started before the failure are shut down again.
    pub fn new(config: &Config) -> Result<ThreadPool> {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

        let num_threads = config.workers();
        let pool = ThreadPool {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed),
                num_threads,
                state: Mutex::new(ThreadPoolState {
                    queue: VecDeque::new(),
                    halt: false,
                }),
                job_is_ready: Condvar::new(),
            }),
            managed_threads: Mutex::new(Vec::with_capacity(num_threads.get())),
        };

        // On failure `pool` is dropped, which shuts down the threads that did
        // start.
        pool.spawn_workers(config)?;

        debug!("started thread pool with {} workers", num_threads);
        Ok(pool)
    }

    fn spawn_workers(&self, config: &Config) -> Result<()> {
        let mut managed_threads = lock(&self.managed_threads);
        for index in 0..self.shared.num_threads.get() {
            debug!("spawning managed worker with index {}", index);
            let shared = self.shared.clone();
            let mut builder =
                ThreadBuilder::new().name(format!("{} {index}", config.thread_name_prefix()));
            if let Some(stack_size) = config.stack_size() {
                builder = builder.stack_size(stack_size);
            }
            match builder.spawn(move || managed_worker(index, shared)) {
                Ok(handle) => managed_threads.push(ManagedWorker { index, handle }),
                Err(error) => {
                    warn!("failed to spawn worker {}: {}", index, error);
                    return Err(Error::ResourceExhausted("worker thread"));
                }
            }
        }
        Ok(())
    }

    /// The number of worker threads.
    pub fn num_threads(&self) -> NonZero<usize> {
        self.shared.num_threads
    }

    /// Returns false once the pool has begun shutting down.
    pub fn is_accepting(&self) -> bool {
        !lock(&self.shared.state).halt
    }

    /// The number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Hands a task to the pool. If the pool has shut down, the task is given
    /// back untouched.
    pub fn enqueue(&self, task: Task) -> Result<(), Task> {
        let mut state = lock(&self.shared.state);
        if state.halt {
            return Err(task);
        }
        state.queue.push_back(task);
        drop(state);

        self.shared.job_is_ready.notify_one();
        Ok(())
    }

    /// Blocks until `latch` opens.
    ///
    /// When called from one of this pool's own workers, the thread executes
    /// queued tasks while it waits, so nested fork-join regions make progress
    /// even when every worker is blocked in a sync.
    pub fn wait_until(&self, latch: &CountLatch) {
        let on_own_worker = Worker::map_current(|worker| worker.pool.id == self.shared.id)
            .unwrap_or(false);

        if on_own_worker {
            while !latch.probe() {
                let Some(task) = self.shared.claim_task() else {
                    break;
                };
                trace!("executing queued task while waiting");
                task.execute();
            }
        }

        latch.wait();
    }

    /// Stops accepting tasks, lets the workers drain the queue, and joins
    /// them. Calling this more than once is harmless.
    ///
    /// A worker calling this on its own pool is not joined; it exits on its
    /// own once the queue has drained.
    pub fn shutdown(&self) {
        let mut state = lock(&self.shared.state);
        if !mem::replace(&mut state.halt, true) {
            debug!(
                "shutting down thread pool, draining {} queued tasks",
                state.queue.len()
            );
        }
        drop(state);
        self.shared.job_is_ready.notify_all();

        let own_index = Worker::map_current(|worker| {
            (worker.pool.id == self.shared.id).then_some(worker.index)
        })
        .flatten();

        let managed_threads = mem::take(&mut *lock(&self.managed_threads));
        for worker in managed_threads {
            if Some(worker.index) == own_index {
                continue;
            }
            trace!("joining worker {}", worker.index);
            if worker.handle.join().is_err() {
                warn!("worker {} exited by panicking", worker.index);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    /// Takes the oldest queued task without blocking.
    fn claim_task(&self) -> Option<Task> {
        lock(&self.state).queue.pop_front()
    }

    /// Blocks until a task is available. Returns `None` only once the pool
    /// has halted and the queue is empty.
    fn next_task(&self) -> Option<Task> {
        let mut state = lock(&self.state);
        loop {
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.halt {
                return None;
            }
            state = self
                .job_is_ready
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

// -----------------------------------------------------------------------------
// Worker thread data

#[cfg(not(loom))]
thread_local! {
    static WORKER_PTR: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

#[cfg(loom)]
thread_local! {
    static WORKER_PTR: Cell<*const Worker> = Cell::new(ptr::null());
}

/// The local context of a pool worker thread.
///
/// Every worker thread installs exactly one `Worker` for as long as its loop
/// runs. Other threads never have one.
pub(crate) struct Worker {
    index: usize,
    pool: Arc<Shared>,
}

impl Worker {
    /// Calls the provided closure on the thread's worker instance, if it has
    /// one.
    #[inline]
    pub fn map_current<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&Worker) -> R,
    {
        let worker_ptr = WORKER_PTR.with(Cell::get);
        if worker_ptr.is_null() {
            return None;
        }
        // SAFETY: `WORKER_PTR` is only set by `occupy`, always to a worker on
        // the stack of that call, and restored before `occupy` returns. So a
        // non-null pointer refers to a live worker. The reference does not
        // escape the closure.
        Some(f(unsafe { &*worker_ptr }))
    }

    /// Installs `worker` as the thread's worker for the duration of `f`.
    fn occupy<F, R>(worker: Worker, f: F) -> R
    where
        F: FnOnce(&Worker) -> R,
    {
        let span = trace_span!("worker", index = worker.index);
        let _enter = span.enter();

        let outer_ptr = WORKER_PTR.with(|ptr| ptr.replace(&worker));
        let result = f(&worker);
        WORKER_PTR.with(|ptr| ptr.set(outer_ptr));

        result
    }
}

/// The index of the calling thread within its pool, or `None` if the caller
/// is not a pool worker.
pub fn current_worker_index() -> Option<usize> {
    Worker::map_current(|worker| worker.index)
}

// -----------------------------------------------------------------------------
// Main worker loop

/// This is the main loop for a worker thread. It executes queued tasks in
/// FIFO order until the pool halts and the queue is empty.
fn managed_worker(index: usize, shared: Arc<Shared>) {
    trace!("starting managed worker");

    Worker::occupy(Worker { index, pool: shared }, |worker| {
        while let Some(task) = worker.pool.next_task() {
            task.execute();
        }
    });

    trace!("exiting managed worker");
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn workers_start_and_stop() {
        let pool = ThreadPool::new(&Config::new(3).unwrap()).unwrap();
        assert_eq!(pool.num_threads().get(), 3);
        assert!(pool.is_accepting());
        assert_eq!(pool.queued(), 0);

        pool.shutdown();
        assert!(!pool.is_accepting());
        // Idempotent.
        pool.shutdown();
    }

    #[test]
    fn current_thread_is_not_a_worker() {
        assert_eq!(current_worker_index(), None);
    }

    #[test]
    fn open_latch_does_not_block() {
        let pool = ThreadPool::new(&Config::new(1).unwrap()).unwrap();
        pool.wait_until(&CountLatch::new());
    }
}
