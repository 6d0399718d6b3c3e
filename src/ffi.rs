//! C entry points for compiler-generated code.
//!
//! Every function here works on the process-wide runtime (see
//! [`Runtime::global`]). None of them unwinds: failures are reported as a
//! [`Status`] code, or as a zero group handle from [`spindle_taskgroup`].
//!
//! ```c
//! struct body_args { long *out; long value; };
//! static void body(void *raw) {
//!     struct body_args *args = raw;
//!     *args->out = args->value * 2;
//! }
//!
//! uint64_t group = spindle_taskgroup();
//! struct body_args args = { &result, 21 };
//! spindle_spawn(group, body, &args, sizeof args);
//! spindle_sync(group);
//! ```

use core::ffi::c_void;

use tracing::warn;

use crate::buffer::ArgSchema;
use crate::error::Error;
use crate::group::GroupHandle;
use crate::runtime::Runtime;
use crate::task::OutlinedFn;
use crate::unwind;

/// The result of a C entry point.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The call succeeded.
    Ok = 0,
    /// See [`Error::InvalidArgument`].
    InvalidArgument = 1,
    /// See [`Error::InvalidGroup`]. Also returned for the zero handle, which
    /// [`spindle_taskgroup`] hands out on failure.
    InvalidGroup = 2,
    /// See [`Error::ResourceExhausted`].
    ResourceExhausted = 3,
    /// A task in the synced group failed. The failure has been logged.
    TaskFailure = 4,
    /// See [`Error::Shutdown`].
    Shutdown = 5,
    /// See [`Error::AlreadyInitialized`].
    AlreadyInitialized = 6,
    /// The runtime panicked while handling the call. The panic has been
    /// logged.
    Panicked = 7,
}

impl From<&Error> for Status {
    fn from(error: &Error) -> Status {
        match error {
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::InvalidGroup(_) => Status::InvalidGroup,
            Error::ResourceExhausted(_) => Status::ResourceExhausted,
            Error::TaskFailure(_) => Status::TaskFailure,
            Error::Shutdown => Status::Shutdown,
            Error::AlreadyInitialized => Status::AlreadyInitialized,
        }
    }
}

impl From<crate::Result<()>> for Status {
    fn from(result: crate::Result<()>) -> Status {
        match result {
            Ok(()) => Status::Ok,
            Err(error) => {
                warn!("spindle entry point failed: {}", error);
                Status::from(&error)
            }
        }
    }
}

/// Runs `f`, turning an unexpected panic into `fallback` instead of
/// unwinding into C.
fn guarded<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    unwind::halt_unwinding(f).unwrap_or_else(|payload| {
        warn!(
            "panic in spindle entry point: {}",
            unwind::payload_message(payload.as_ref())
        );
        fallback
    })
}

fn group_from_raw(entry: &str, raw: u64) -> Result<GroupHandle, Status> {
    GroupHandle::from_raw(raw).ok_or_else(|| {
        warn!("{} called with the zero task group handle", entry);
        Status::InvalidGroup
    })
}

/// Creates a task group. Returns its handle, or 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn spindle_taskgroup() -> u64 {
    guarded(0, || match Runtime::global().and_then(Runtime::create_group) {
        Ok(handle) => handle.into_raw(),
        Err(error) => {
            warn!("spindle_taskgroup failed: {}", error);
            0
        }
    })
}

/// Spawns `f` into `group` with a private copy of the `arg_size` bytes at
/// `arg`. Returns as soon as the task is queued.
///
/// # Safety
///
/// A non-null `arg` must be valid for reads of `arg_size` bytes for the
/// duration of the call. `f` must be sound to call on any thread with a
/// pointer to a 16-byte aligned copy of those bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn spindle_spawn(
    group: u64,
    f: Option<OutlinedFn>,
    arg: *const c_void,
    arg_size: usize,
) -> Status {
    guarded(Status::Panicked, || match group_from_raw("spindle_spawn", group) {
        // SAFETY: Forwarded from our caller.
        Ok(group) => Status::from(unsafe { spawn(group, f, arg, arg_size) }),
        Err(status) => status,
    })
}

unsafe fn spawn(
    group: GroupHandle,
    f: Option<OutlinedFn>,
    arg: *const c_void,
    arg_size: usize,
) -> crate::Result<()> {
    let body = f.ok_or(Error::InvalidArgument("null task function"))?;
    let runtime = Runtime::global()?;
    // SAFETY: Forwarded from our caller.
    unsafe { runtime.spawn_outlined_raw(group, body, arg, arg_size, &ArgSchema::new()) }?;
    Ok(())
}

/// Waits for every task in `group` to finish and retires the group.
///
/// Returns [`Status::TaskFailure`] if any task in the group failed.
#[unsafe(no_mangle)]
pub extern "C" fn spindle_sync(group: u64) -> Status {
    guarded(Status::Panicked, || match group_from_raw("spindle_sync", group) {
        Ok(group) => Status::from(sync(group)),
        Err(status) => status,
    })
}

fn sync(group: GroupHandle) -> crate::Result<()> {
    Runtime::global()?.sync(group)
}

/// The suggested loop chunk size for a loop of `limit` iterations, or 0 if
/// the runtime cannot be started.
#[unsafe(no_mangle)]
pub extern "C" fn spindle_grainsize(limit: u64) -> u64 {
    guarded(0, || match Runtime::global() {
        Ok(runtime) => runtime.grainsize(limit),
        Err(error) => {
            warn!("spindle_grainsize failed: {}", error);
            0
        }
    })
}
