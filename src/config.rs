//! Runtime configuration.

use alloc::string::String;
use alloc::string::ToString;
use core::num::NonZero;

use crate::error::Error;
use crate::error::Result;
use crate::platform::available_parallelism;

/// The environment variable holding the worker count of the global runtime.
pub const NUM_THREADS_ENV: &str = "SPINDLE_NUM_THREADS";

/// Settings for a [`Runtime`](crate::Runtime) and its worker pool.
///
/// The worker count is fixed for the lifetime of the pool; there is no
/// resizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    num_threads: NonZero<usize>,
    thread_name_prefix: String,
    stack_size: Option<usize>,
}

impl Config {
    /// Creates a configuration with the given number of worker threads.
    ///
    /// Returns [`Error::InvalidArgument`] if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Result<Config> {
        let num_threads = NonZero::new(num_threads)
            .ok_or(Error::InvalidArgument("worker count must be at least one"))?;
        Ok(Config {
            num_threads,
            thread_name_prefix: "spindle worker".to_string(),
            stack_size: None,
        })
    }

    /// Reads the worker count from [`NUM_THREADS_ENV`], falling back to the
    /// available parallelism of the machine when the variable is unset.
    pub fn from_env() -> Result<Config> {
        match std::env::var(NUM_THREADS_ENV) {
            Ok(value) => Config::new(parse_num_threads(&value)?),
            Err(std::env::VarError::NotPresent) => Ok(Config::available()),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::InvalidArgument(
                "worker count in the environment is not valid unicode",
            )),
        }
    }

    /// Uses one worker per available hardware thread.
    pub fn available() -> Config {
        let num_threads = available_parallelism().unwrap_or(NonZero::<usize>::MIN);
        Config {
            num_threads,
            thread_name_prefix: "spindle worker".to_string(),
            stack_size: None,
        }
    }

    /// Sets the prefix used to name worker threads. Each worker is named
    /// `"{prefix} {index}"`.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Config {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the stack size of each worker thread, in bytes.
    pub fn with_stack_size(mut self, stack_size: usize) -> Config {
        self.stack_size = Some(stack_size);
        self
    }

    /// The number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads.get()
    }

    pub(crate) fn workers(&self) -> NonZero<usize> {
        self.num_threads
    }

    /// The prefix used to name worker threads.
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// The stack size of each worker thread, if one was set.
    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }
}

fn parse_num_threads(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::InvalidArgument("worker count in the environment is not a number"))
}
