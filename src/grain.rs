//! Loop chunking policy.
//!
//! A compiler that lowers a parallel loop into tasks asks the runtime how many
//! iterations each task should take. The policy aims for a few chunks per
//! worker, so idle workers find something to pick up, while capping the chunk
//! size so very long loops still split finely.

use core::num::NonZero;

use crate::error::Error;
use crate::error::Result;

/// The largest grainsize the policy ever suggests.
pub const MAX_GRAINSIZE: u64 = 2048;

/// The number of chunks the policy aims to give each worker.
pub const CHUNKS_PER_WORKER: u64 = 8;

/// Suggests how many iterations of a loop of `limit` iterations each task
/// should execute on a pool of `workers` threads.
///
/// The result is `ceil(limit / (workers * 8))`, capped at [`MAX_GRAINSIZE`].
/// It is zero only for an empty loop.
///
/// ```
/// use spindle::grainsize;
///
/// assert_eq!(grainsize(1000, 4)?, 32);
/// assert_eq!(grainsize(10, 8)?, 1);
/// assert_eq!(grainsize(1 << 30, 4)?, 2048);
/// # Ok::<(), spindle::Error>(())
/// ```
///
/// Returns [`Error::InvalidArgument`] if `workers` is zero.
pub fn grainsize(limit: u64, workers: usize) -> Result<u64> {
    let workers =
        NonZero::new(workers).ok_or(Error::InvalidArgument("worker count must be nonzero"))?;
    Ok(grainsize_for(limit, workers))
}

pub(crate) fn grainsize_for(limit: u64, workers: NonZero<usize>) -> u64 {
    let workers = u64::try_from(workers.get()).unwrap_or(u64::MAX);
    let chunks = workers.saturating_mul(CHUNKS_PER_WORKER);
    limit.div_ceil(chunks).min(MAX_GRAINSIZE)
}
