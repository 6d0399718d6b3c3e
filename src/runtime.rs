//! The runtime façade: create-group, spawn-into-group and sync, plus the
//! process-wide runtime used by the free functions and the C entry points.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ffi::c_void;

use tracing::trace;

use crate::buffer::ArgBuffer;
use crate::buffer::ArgSchema;
use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::grain;
use crate::group::GroupHandle;
use crate::group::GroupRegistry;
use crate::group::GroupStats;
use crate::roots::NoRoots;
use crate::roots::RootGuard;
use crate::roots::RootRegistry;
use crate::task::Body;
use crate::task::OutlinedFn;
use crate::task::Task;
use crate::task::TaskFn;
use crate::task::TaskId;
use crate::task::TaskState;
use crate::thread_pool::ThreadPool;

/// A task-group runtime: a worker pool, the live task groups, and the memory
/// manager that traced arguments are rooted with.
///
/// Most programs use the process-wide runtime through [`Runtime::global`] or
/// the free functions [`create_group`], [`spawn`] and [`sync`]. Separate
/// runtimes are independent; a group handle is only meaningful to the runtime
/// that created it.
///
/// Dropping a runtime shuts its pool down, draining any queued tasks.
pub struct Runtime {
    pool: ThreadPool,
    groups: GroupRegistry,
    roots: Arc<dyn RootRegistry>,
}

impl Runtime {
    /// Starts a runtime whose tasks hold no traced references.
    pub fn new(config: Config) -> Result<Runtime> {
        Runtime::with_root_registry(config, Arc::new(NoRoots))
    }

    /// Starts a runtime that registers traced task arguments with `roots`.
    pub fn with_root_registry(config: Config, roots: Arc<dyn RootRegistry>) -> Result<Runtime> {
        let pool = ThreadPool::new(&config)?;
        Ok(Runtime {
            pool,
            groups: GroupRegistry::new(),
            roots,
        })
    }

    /// The number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.pool.num_threads().get()
    }

    // -------------------------------------------------------------------------
    // Groups

    /// Creates a new, empty task group.
    ///
    /// Returns [`Error::Shutdown`] once the runtime has been shut down.
    pub fn create_group(&self) -> Result<GroupHandle> {
        if !self.pool.is_accepting() {
            return Err(Error::Shutdown);
        }
        Ok(self.groups.create())
    }

    /// Blocks until every task spawned into `group` has finished, then
    /// retires the group.
    ///
    /// Tasks may still be spawned into the group while the sync is waiting,
    /// including by the group's own tasks, and the sync waits for them too.
    /// Once the outstanding count is zero the group is retired and the handle
    /// stops being valid: spawning into it, or syncing it again, fails with
    /// [`Error::InvalidGroup`]. A second sync of a group that is already
    /// being synced fails the same way.
    ///
    /// If any task failed, the first recorded failure is returned as
    /// [`Error::TaskFailure`]. Every task has still run to completion.
    ///
    /// When called from inside a task, the calling worker executes queued
    /// tasks while it waits.
    pub fn sync(&self, group: GroupHandle) -> Result<()> {
        let group = self.groups.begin_sync(group)?;
        trace!(
            "syncing group {} with {} outstanding tasks",
            group.handle(),
            group.outstanding().count()
        );

        loop {
            self.pool.wait_until(group.outstanding());
            if self.groups.try_retire(&group) {
                break;
            }
            trace!("group {} gained tasks while syncing", group.handle());
        }

        match group.take_failure() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Spawning

    /// Spawns `body` into `group` with a private copy of `args`.
    ///
    /// Returns as soon as the task is queued. The caller may reuse `args`
    /// immediately.
    pub fn spawn(&self, group: GroupHandle, body: TaskFn, args: &[u8]) -> Result<TaskId> {
        self.spawn_with_schema(group, body, args, &ArgSchema::new())
    }

    /// Like [`Runtime::spawn`], registering the traced fields of `args` as
    /// roots while the task is in flight.
    pub fn spawn_with_schema(
        &self,
        group: GroupHandle,
        body: TaskFn,
        args: &[u8],
        schema: &ArgSchema,
    ) -> Result<TaskId> {
        let args = ArgBuffer::copy_from(args)?;
        // SAFETY: Native bodies accept any buffer.
        unsafe { self.submit(group, Body::Native(body), args, schema) }
    }

    /// Spawns a compiler-outlined body into `group` with a private copy of
    /// `args`.
    ///
    /// # Safety
    ///
    /// `body` must be sound to call, on any thread, with a pointer to a
    /// [`ARG_ALIGN`](crate::ARG_ALIGN)-aligned copy of `args`.
    pub unsafe fn spawn_outlined(
        &self,
        group: GroupHandle,
        body: OutlinedFn,
        args: &[u8],
        schema: &ArgSchema,
    ) -> Result<TaskId> {
        let args = ArgBuffer::copy_from(args)?;
        // SAFETY: The caller upholds the contract of `body`.
        unsafe { self.submit(group, Body::Outlined(body), args, schema) }
    }

    /// Like [`Runtime::spawn_outlined`], copying the arguments from a raw
    /// pointer. A null `args` is accepted only with a zero `len`.
    ///
    /// # Safety
    ///
    /// A non-null `args` must be valid for reads of `len` bytes for the
    /// duration of the call, and `body` must be sound to call with a pointer
    /// to a copy of those bytes.
    pub unsafe fn spawn_outlined_raw(
        &self,
        group: GroupHandle,
        body: OutlinedFn,
        args: *const c_void,
        len: usize,
        schema: &ArgSchema,
    ) -> Result<TaskId> {
        // SAFETY: The caller ensures `args` is valid for `len` bytes.
        let args = unsafe { ArgBuffer::copy_from_raw(args.cast::<u8>(), len) }?;
        // SAFETY: The caller upholds the contract of `body`.
        unsafe { self.submit(group, Body::Outlined(body), args, schema) }
    }

    /// Registers roots, counts the task against its group and queues it.
    ///
    /// # Safety
    ///
    /// `body` must be sound to invoke on `args`.
    unsafe fn submit(
        &self,
        group: GroupHandle,
        body: Body,
        args: ArgBuffer,
        schema: &ArgSchema,
    ) -> Result<TaskId> {
        schema.validate(args.len())?;
        if !self.pool.is_accepting() {
            return Err(Error::Shutdown);
        }

        // Unknown handles are turned away before the collector hears about
        // any roots. The handle is checked again on admission.
        self.groups.get(group)?;

        // Roots are registered before the task becomes visible to any
        // worker, and released by the guard if anything below fails.
        let roots = RootGuard::register(&self.roots, &args, schema)?;

        let id = TaskId::next();
        let group_ref = self.groups.admit(group, id)?;
        trace!(
            "spawning task {} into group {} with {} argument bytes",
            id,
            group,
            args.len()
        );

        // SAFETY: Forwarded from our caller.
        let task = unsafe { Task::new(id, body, args, roots, group_ref) };

        // The pool may have shut down since the check above.
        if let Err(task) = self.pool.enqueue(task) {
            task.withdraw();
            return Err(Error::Shutdown);
        }

        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Policy and diagnostics

    /// Suggests a loop chunk size for a loop of `limit` iterations on this
    /// runtime's pool. See [`grainsize`](crate::grainsize).
    pub fn grainsize(&self, limit: u64) -> u64 {
        grain::grainsize_for(limit, self.pool.num_threads())
    }

    /// The tasks of `group` that are still pending or running.
    pub fn live_tasks(&self, group: GroupHandle) -> Result<Vec<(TaskId, TaskState)>> {
        Ok(self.groups.get(group)?.live_tasks())
    }

    /// A snapshot of the counters of `group`.
    pub fn group_stats(&self, group: GroupHandle) -> Result<GroupStats> {
        Ok(self.groups.get(group)?.stats())
    }

    /// The number of groups created but not yet synced.
    pub fn live_groups(&self) -> usize {
        self.groups.len()
    }

    /// The number of tasks waiting for a worker.
    pub fn queued_tasks(&self) -> usize {
        self.pool.queued()
    }

    /// Stops accepting work, waits for the queued tasks to run, and joins the
    /// workers. Later calls to [`Runtime::create_group`] and the spawn
    /// methods fail with [`Error::Shutdown`]. Groups created before the
    /// shutdown may still be synced.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

// -----------------------------------------------------------------------------
// Process-wide runtime

#[cfg(not(loom))]
static GLOBAL: std::sync::OnceLock<Runtime> = std::sync::OnceLock::new();

#[cfg(not(loom))]
impl Runtime {
    /// The process-wide runtime, built on first use from
    /// [`Config::from_env`] unless one was installed with
    /// [`Runtime::install_global`].
    pub fn global() -> Result<&'static Runtime> {
        if let Some(runtime) = GLOBAL.get() {
            return Ok(runtime);
        }

        let runtime = Runtime::new(Config::from_env()?)?;
        // If another thread won the race, its runtime is kept and this one is
        // dropped, shutting down its fresh pool.
        let global = GLOBAL.get_or_init(move || runtime);
        tracing::debug!("initialized the global runtime");
        Ok(global)
    }

    /// Installs `runtime` as the process-wide runtime.
    ///
    /// Returns [`Error::AlreadyInitialized`] if the global runtime has
    /// already been built or installed.
    pub fn install_global(runtime: Runtime) -> Result<&'static Runtime> {
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            runtime
        });
        match installed {
            true => Ok(global),
            false => Err(Error::AlreadyInitialized),
        }
    }
}

/// Creates a task group on the global runtime.
#[cfg(not(loom))]
pub fn create_group() -> Result<GroupHandle> {
    Runtime::global()?.create_group()
}

/// Spawns a task on the global runtime. See [`Runtime::spawn`].
#[cfg(not(loom))]
pub fn spawn(group: GroupHandle, body: TaskFn, args: &[u8]) -> Result<TaskId> {
    Runtime::global()?.spawn(group, body, args)
}

/// Syncs a group of the global runtime. See [`Runtime::sync`].
#[cfg(not(loom))]
pub fn sync(group: GroupHandle) -> Result<()> {
    Runtime::global()?.sync(group)
}

/// The grainsize the global runtime suggests for a loop of `limit`
/// iterations.
#[cfg(not(loom))]
pub fn current_grainsize(limit: u64) -> Result<u64> {
    Ok(Runtime::global()?.grainsize(limit))
}
