//! This module defines the executable unit of work, the [`Task`].
//!
//! A task pairs a body function pointer with its own copy of the argument
//! bytes. When using a task, one must be careful to ensure that:
//! (a) The argument copy is never touched by anyone but the task.
//! (b) Each task is executed (or withdrawn) exactly once.
//! (c) The group counter is decremented only after the task's storage and
//!     root registrations have been released.

use alloc::boxed::Box;
use core::ffi::c_void;
use core::fmt;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

use tracing::trace;

use crate::buffer::ArgBuffer;
use crate::error::TaskFailure;
use crate::group::Group;
use crate::platform::Arc;
use crate::roots::RootGuard;
use crate::unwind;

/// The error type task bodies may return.
pub type TaskError = Box<dyn core::error::Error + Send + Sync>;

/// The body of a task written in Rust. It receives the task's private copy of
/// the argument bytes.
pub type TaskFn = fn(&mut [u8]) -> Result<(), TaskError>;

/// The body of a compiler-outlined task. It receives a pointer to the task's
/// private copy of its argument struct, aligned to
/// [`ARG_ALIGN`](crate::ARG_ALIGN).
///
/// Outlined bodies report failure by unwinding, which is why they use the
/// `C-unwind` ABI.
pub type OutlinedFn = unsafe extern "C-unwind" fn(*mut c_void);

// -----------------------------------------------------------------------------
// Identity and state

/// A process-wide unique task identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> TaskId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw identifier.
    pub fn from_raw(raw: u64) -> TaskId {
        TaskId(raw)
    }

    /// The raw identifier.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a task is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Spawned, waiting for a worker.
    Pending,
    /// Picked up by a worker; the body is executing.
    Running,
    /// The body returned normally.
    Done,
    /// The body returned an error or panicked.
    Failed,
}

// -----------------------------------------------------------------------------
// Body

#[derive(Clone, Copy)]
pub(crate) enum Body {
    Native(TaskFn),
    Outlined(OutlinedFn),
}

impl Body {
    /// Calls the body on the argument buffer.
    ///
    /// # Safety
    ///
    /// For [`Body::Outlined`], the function must be sound to call with a
    /// pointer to `args`. This is the contract of `Runtime::spawn_outlined`.
    unsafe fn invoke(self, args: &mut ArgBuffer) -> Result<(), TaskError> {
        match self {
            Body::Native(body) => body(args.as_mut_slice()),
            Body::Outlined(body) => {
                // SAFETY: The caller ensures `body` accepts this buffer.
                unsafe { body(args.as_mut_ptr().cast::<c_void>()) };
                Ok(())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Task

/// A spawned unit of work, owned by whichever queue or worker holds it.
pub(crate) struct Task {
    id: TaskId,
    body: Body,
    args: ArgBuffer,
    roots: RootGuard,
    group: Arc<Group>,
}

impl Task {
    /// Creates a new task. The group must already have admitted `id`.
    ///
    /// # Safety
    ///
    /// If `body` is [`Body::Outlined`], it must be sound to call with a
    /// pointer to `args`.
    pub(crate) unsafe fn new(
        id: TaskId,
        body: Body,
        args: ArgBuffer,
        roots: RootGuard,
        group: Arc<Group>,
    ) -> Task {
        Task {
            id,
            body,
            args,
            roots,
            group,
        }
    }

    /// Runs the task to completion: invokes the body, releases the argument
    /// storage and roots, and reports the outcome to the group.
    pub(crate) fn execute(self) {
        let Task {
            id,
            body,
            mut args,
            roots,
            group,
        } = self;

        group.mark_running(id);
        trace!("running task {} of group {}", id, group.handle());

        // SAFETY: The constructor of `Task` is required to ensure this is valid.
        let outcome = unwind::halt_unwinding(|| unsafe { body.invoke(&mut args) });

        // Create an abort guard. A panic past this point would leave the
        // group counter raised forever, and its sync would never return.
        let abort_guard = unwind::AbortOnDrop;

        drop(args);
        drop(roots);

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(TaskFailure::from_error(id, error)),
            Err(payload) => Some(TaskFailure::from_panic(id, payload)),
        };
        group.complete(id, failure);

        // Forget the abort guard, re-enabling panics.
        core::mem::forget(abort_guard);
    }

    /// Takes back a task that never reached a worker, undoing its admission.
    pub(crate) fn withdraw(self) {
        let Task {
            id,
            args,
            roots,
            group,
            ..
        } = self;
        drop(args);
        drop(roots);
        group.withdraw(id);
    }
}
