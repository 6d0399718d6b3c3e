//! A fork-join task-group runtime.
//!
//! Spindle schedules lightweight tasks onto a fixed pool of worker threads.
//! Tasks are spawned into a *task group*, and the context that created the
//! group later *syncs* it, blocking until every task in the group has run to
//! completion. It is designed as the lowering target for compiler-outlined
//! parallel regions: each task is a plain function pointer plus an opaque
//! argument blob, which is copied into task-owned storage before `spawn`
//! returns.
//!
//! ```
//! # #![cfg(not(loom))]
//! use spindle::{Config, Runtime, TaskError};
//!
//! fn double(args: &mut [u8]) -> Result<(), TaskError> {
//!     let value = u64::from_ne_bytes(args.try_into()?);
//!     assert_eq!(value * 2, 84);
//!     Ok(())
//! }
//!
//! let runtime = Runtime::new(Config::new(2)?)?;
//! let group = runtime.create_group()?;
//! runtime.spawn(group, double, &42u64.to_ne_bytes())?;
//! runtime.sync(group)?;
//! # Ok::<(), spindle::Error>(())
//! ```
//!
//! Arguments that hold references into a garbage-collected heap can be
//! described with an [`ArgSchema`]. Traced fields are registered with the
//! runtime's [`RootRegistry`] for the whole time the task is in flight, and
//! released exactly once when it finishes.
//!
//! Compiler-generated code that cannot link against Rust generics uses the
//! C entry points in [`ffi`].

#![no_std]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod buffer;
mod compile_fail;
mod config;
mod error;
#[cfg(not(loom))]
pub mod ffi;
mod grain;
mod group;
mod latch;
mod roots;
mod runtime;
mod task;
mod thread_pool;
mod unwind;

// -----------------------------------------------------------------------------
// Top-level exports

pub use buffer::ARG_ALIGN;
pub use buffer::ArgBuffer;
pub use buffer::ArgSchema;
pub use buffer::Field;
pub use buffer::FieldKind;
pub use config::Config;
pub use config::NUM_THREADS_ENV;
pub use error::Error;
pub use error::Result;
pub use error::TaskFailure;
pub use grain::CHUNKS_PER_WORKER;
pub use grain::MAX_GRAINSIZE;
pub use grain::grainsize;
pub use group::GroupHandle;
pub use group::GroupStats;
pub use roots::HeapRef;
pub use roots::NoRoots;
pub use roots::RootRegistry;
pub use runtime::Runtime;
#[cfg(not(loom))]
pub use runtime::create_group;
#[cfg(not(loom))]
pub use runtime::current_grainsize;
#[cfg(not(loom))]
pub use runtime::spawn;
#[cfg(not(loom))]
pub use runtime::sync;
pub use task::OutlinedFn;
pub use task::TaskError;
pub use task::TaskFn;
pub use task::TaskId;
pub use task::TaskState;
pub use thread_pool::current_worker_index;

// -----------------------------------------------------------------------------
// Platform Support

// This crate uses `loom` for testing, which requires mocking all of the core
// threading primitives (`Mutex` and the like).
//
// To make things a bit simpler, we re-export all the important types in the
// `platform` module.

#[cfg(not(loom))]
mod platform {

    // Core exports

    pub use alloc::sync::Arc;
    pub use core::sync::atomic::AtomicU32;
    pub use core::sync::atomic::Ordering;
    pub use std::sync::Condvar;
    pub use std::sync::Mutex;
    pub use std::sync::MutexGuard;
    pub use std::thread::Builder as ThreadBuilder;
    pub use std::thread::JoinHandle;
    pub use std::thread::available_parallelism;
    pub use std::thread_local;

    // Futex operations

    pub use atomic_wait::wait;
    pub use atomic_wait::wake_all;

    /// Locks a mutex, recovering the guard if another thread panicked while
    /// holding it. Task bodies never run under one of these locks.
    #[inline]
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(loom)]
mod platform {

    // Core exports

    pub use loom::sync::Arc;
    pub use loom::sync::Condvar;
    pub use loom::sync::Mutex;
    pub use loom::sync::MutexGuard;
    pub use loom::sync::atomic::AtomicU32;
    pub use loom::sync::atomic::Ordering;
    pub use loom::thread::Builder as ThreadBuilder;
    pub use loom::thread::JoinHandle;
    pub use loom::thread_local;
    pub use std::thread::available_parallelism;

    // Futex operations
    //
    // Loom cannot model a futex, so waiting degrades into a yield. Callers
    // always re-check the watched value in a loop.

    pub fn wait(atomic: &AtomicU32, value: u32) {
        if atomic.load(Ordering::Acquire) == value {
            loom::thread::yield_now();
        }
    }

    pub fn wake_all(_atomic: &AtomicU32) {}

    #[inline]
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
