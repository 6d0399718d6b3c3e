//! Task groups: the bookkeeping shared by the tasks of one fork region and the
//! context that will sync them.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZero;
use core::sync::atomic::AtomicU64;

use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::error::TaskFailure;
use crate::latch::CountLatch;
use crate::platform::Arc;
use crate::platform::Mutex;
use crate::platform::lock;
use crate::task::TaskId;
use crate::task::TaskState;

// -----------------------------------------------------------------------------
// Handles

/// An opaque handle naming a task group.
///
/// Handles are plain values: copying one does not duplicate the group. A
/// handle stops being valid once the group has been synced.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupHandle(NonZero<u64>);

impl GroupHandle {
    fn next() -> GroupHandle {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let raw = NEXT.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        // The counter starts at one and would take centuries to wrap.
        GroupHandle(NonZero::new(raw).unwrap_or(NonZero::<u64>::MAX))
    }

    /// Rebuilds a handle from its raw value. Zero is never a valid handle.
    pub fn from_raw(raw: u64) -> Option<GroupHandle> {
        NonZero::new(raw).map(GroupHandle)
    }

    /// The raw value of the handle, suitable for passing across an FFI
    /// boundary. Never zero.
    pub fn into_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupHandle({})", self.0)
    }
}

/// A snapshot of a group's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Tasks successfully spawned into the group.
    pub spawned: u64,
    /// Tasks whose body returned normally.
    pub completed: u64,
    /// Tasks whose body returned an error or panicked.
    pub failed: u64,
    /// Tasks still pending or running.
    pub outstanding: u32,
}

// -----------------------------------------------------------------------------
// Group

/// The shared state of one task group.
///
/// The spawning context reaches the group through the registry; each task
/// holds an `Arc` back-reference so it can report completion. The group is
/// freed once it has been retired and the last task has dropped its
/// reference.
pub(crate) struct Group {
    handle: GroupHandle,
    /// Number of tasks spawned but not yet completed.
    outstanding: CountLatch,
    tasks: Mutex<GroupTasks>,
}

#[derive(Default)]
struct GroupTasks {
    live: BTreeMap<TaskId, TaskState>,
    failure: Option<TaskFailure>,
    suppressed: usize,
    spawned: u64,
    completed: u64,
    failed: u64,
}

impl Group {
    fn new(handle: GroupHandle) -> Group {
        Group {
            handle,
            outstanding: CountLatch::new(),
            tasks: Mutex::new(GroupTasks::default()),
        }
    }

    pub fn handle(&self) -> GroupHandle {
        self.handle
    }

    pub fn outstanding(&self) -> &CountLatch {
        &self.outstanding
    }

    /// Counts a new task against the group. This must happen before the task
    /// becomes visible to any worker.
    fn admit(&self, id: TaskId) -> Result<()> {
        let count = self
            .outstanding
            .increment()
            .ok_or(Error::ResourceExhausted("too many outstanding tasks in group"))?;
        trace!("group {} outstanding count increased to {}", self.handle, count);

        let mut tasks = lock(&self.tasks);
        tasks.live.insert(id, TaskState::Pending);
        tasks.spawned += 1;
        Ok(())
    }

    pub fn mark_running(&self, id: TaskId) {
        if let Some(state) = lock(&self.tasks).live.get_mut(&id) {
            *state = TaskState::Running;
        }
    }

    /// Records the outcome of a task, then releases its unit of the
    /// outstanding count. The first failure wins.
    pub fn complete(&self, id: TaskId, failure: Option<TaskFailure>) {
        let mut tasks = lock(&self.tasks);
        tasks.live.remove(&id);
        match failure {
            None => tasks.completed += 1,
            Some(failure) => {
                tasks.failed += 1;
                if tasks.failure.is_none() {
                    warn!("group {} recorded failure: {}", self.handle, failure);
                    tasks.failure = Some(failure);
                } else {
                    tasks.suppressed += 1;
                    warn!("group {} suppressed failure: {}", self.handle, failure);
                }
            }
        }
        drop(tasks);

        trace!("task {} of group {} finished", id, self.handle);
        self.outstanding.decrement();
    }

    /// Undoes the admission of a task that was never enqueued.
    pub fn withdraw(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        tasks.live.remove(&id);
        tasks.spawned -= 1;
        drop(tasks);

        self.outstanding.decrement();
    }

    /// Takes the recorded failure, if any.
    pub fn take_failure(&self) -> Option<TaskFailure> {
        let mut tasks = lock(&self.tasks);
        let suppressed = tasks.suppressed;
        tasks.failure.take().map(|mut failure| {
            failure.set_suppressed(suppressed);
            failure
        })
    }

    pub fn live_tasks(&self) -> Vec<(TaskId, TaskState)> {
        lock(&self.tasks)
            .live
            .iter()
            .map(|(&id, &state)| (id, state))
            .collect()
    }

    pub fn stats(&self) -> GroupStats {
        let tasks = lock(&self.tasks);
        GroupStats {
            spawned: tasks.spawned,
            completed: tasks.completed,
            failed: tasks.failed,
            outstanding: self.outstanding.count(),
        }
    }
}

// -----------------------------------------------------------------------------
// Registry

/// Maps live group handles to their groups.
///
/// Admission of a new task and retirement of its group both happen under the
/// registry lock, and a group is retired only while its outstanding count is
/// zero. A spawn therefore either lands before retirement, and the sync in
/// progress waits for it, or fails with [`Error::InvalidGroup`].
pub(crate) struct GroupRegistry {
    groups: Mutex<BTreeMap<GroupHandle, Entry>>,
}

struct Entry {
    group: Arc<Group>,
    /// Set once a sync has claimed the group.
    syncing: bool,
}

impl GroupRegistry {
    pub fn new() -> GroupRegistry {
        GroupRegistry {
            groups: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allocates a new, empty group.
    pub fn create(&self) -> GroupHandle {
        let handle = GroupHandle::next();
        let group = Arc::new(Group::new(handle));
        lock(&self.groups).insert(
            handle,
            Entry {
                group,
                syncing: false,
            },
        );
        debug!("created task group {}", handle);
        handle
    }

    /// Looks up a live group and counts a new task against it. Groups that
    /// are being synced still accept tasks until they are retired.
    pub fn admit(&self, handle: GroupHandle, id: TaskId) -> Result<Arc<Group>> {
        let groups = lock(&self.groups);
        let entry = groups.get(&handle).ok_or(Error::InvalidGroup(handle))?;
        entry.group.admit(id)?;
        Ok(entry.group.clone())
    }

    /// Claims a group for syncing. Only one sync may claim a group, so a
    /// second claim fails as if the group were already retired.
    pub fn begin_sync(&self, handle: GroupHandle) -> Result<Arc<Group>> {
        let mut groups = lock(&self.groups);
        match groups.get_mut(&handle) {
            Some(entry) if !entry.syncing => {
                entry.syncing = true;
                Ok(entry.group.clone())
            }
            _ => Err(Error::InvalidGroup(handle)),
        }
    }

    /// Removes a group claimed by [`GroupRegistry::begin_sync`], provided
    /// none of its tasks are outstanding. Returns false, leaving the group in
    /// place, if a task was admitted since the count was last seen at zero.
    pub fn try_retire(&self, group: &Group) -> bool {
        let mut groups = lock(&self.groups);
        if !group.outstanding().probe() {
            return false;
        }
        groups.remove(&group.handle());
        debug!("retired task group {}", group.handle());
        true
    }

    pub fn get(&self, handle: GroupHandle) -> Result<Arc<Group>> {
        lock(&self.groups)
            .get(&handle)
            .map(|entry| entry.group.clone())
            .ok_or(Error::InvalidGroup(handle))
    }

    /// The number of groups that have been created but not yet retired.
    pub fn len(&self) -> usize {
        lock(&self.groups).len()
    }
}
