//! Error types reported by the runtime.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use core::any::Any;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::group::GroupHandle;
use crate::task::TaskError;
use crate::task::TaskId;
use crate::unwind;

/// Shorthand for results produced by the runtime.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong when talking to the runtime.
///
/// Only [`Error::TaskFailure`] ever crosses from a worker thread to the
/// spawning thread, and it only does so through [`Runtime::sync`]. Every other
/// variant is reported synchronously by the call that caused it.
///
/// [`Runtime::sync`]: crate::Runtime::sync
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, such as a null argument pointer with a nonzero length,
    /// a schema field outside the argument buffer, or a zero worker count.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The group handle is unknown, or the group has already been synced.
    #[error("invalid task group {0}")]
    InvalidGroup(GroupHandle),

    /// Storage for a group, a task or an argument buffer could not be
    /// allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A task spawned into the group failed. Raised once, at sync.
    #[error(transparent)]
    TaskFailure(#[from] TaskFailure),

    /// The thread pool has been shut down and no longer accepts work.
    #[error("the thread pool is shut down")]
    Shutdown,

    /// The process-wide runtime had already been initialized.
    #[error("the global runtime is already initialized")]
    AlreadyInitialized,
}

/// The failure of a spawned task, captured on the worker and surfaced at the
/// matching sync.
///
/// When several tasks in one group fail, the first recorded failure wins and
/// the rest are counted in [`TaskFailure::suppressed`].
#[derive(Debug, thiserror::Error)]
#[error("task {task} failed: {message}")]
pub struct TaskFailure {
    task: TaskId,
    message: String,
    suppressed: usize,
    #[source]
    source: Option<TaskError>,
    /// Behind a mutex only so that `TaskFailure` is `Sync`.
    payload: Option<Mutex<Box<dyn Any + Send>>>,
}

impl TaskFailure {
    /// Builds a failure from an error returned by a task body.
    pub(crate) fn from_error(task: TaskId, error: TaskError) -> TaskFailure {
        TaskFailure {
            task,
            message: error.to_string(),
            suppressed: 0,
            source: Some(error),
            payload: None,
        }
    }

    /// Builds a failure from a panic payload caught on a worker.
    pub(crate) fn from_panic(task: TaskId, payload: Box<dyn Any + Send>) -> TaskFailure {
        TaskFailure {
            task,
            message: unwind::payload_message(payload.as_ref()),
            suppressed: 0,
            source: None,
            payload: Some(Mutex::new(payload)),
        }
    }

    pub(crate) fn set_suppressed(&mut self, suppressed: usize) {
        self.suppressed = suppressed;
    }

    /// The task that failed first.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// A human readable description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// How many later failures in the same group were dropped in favor of
    /// this one.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Returns true if the task body panicked, rather than returning an
    /// error.
    pub fn is_panic(&self) -> bool {
        self.payload.is_some()
    }

    /// Re-raises the failure on the current thread. Panics are resumed with
    /// their original payload; returned errors become a new panic.
    pub fn into_panic(self) -> ! {
        match self.payload {
            Some(payload) => {
                unwind::resume_unwinding(payload.into_inner().unwrap_or_else(PoisonError::into_inner))
            }
            None => panic!("task {} failed: {}", self.task, self.message),
        }
    }
}
