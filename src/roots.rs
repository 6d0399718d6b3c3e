//! Root registration with the host memory manager.
//!
//! A task's argument buffer may hold references into a traced heap. The
//! collector can run on another thread while the task is in flight, so every
//! traced reference is registered as a root before `spawn` returns and
//! unregistered exactly once after the task finishes, whatever its outcome.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZero;

use tracing::trace;

use crate::buffer::ArgBuffer;
use crate::buffer::ArgSchema;
use crate::error::Error;
use crate::error::Result;

/// The address of an object in a traced heap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapRef(NonZero<usize>);

impl HeapRef {
    /// Wraps an address. Returns `None` for the null address, which refers to
    /// nothing.
    #[inline]
    pub fn from_addr(addr: usize) -> Option<HeapRef> {
        NonZero::new(addr).map(HeapRef)
    }

    /// Wraps a pointer. Returns `None` for a null pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Option<HeapRef> {
        HeapRef::from_addr(ptr.addr())
    }

    /// The address of the object.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({:#x})", self.addr())
    }
}

/// The interface to a tracing memory manager.
///
/// Registrations nest: an object registered twice must stay rooted until it
/// has been unregistered twice.
pub trait RootRegistry: Send + Sync {
    /// Keeps `root` alive and visible to the collector until it is
    /// unregistered.
    fn register_root(&self, root: HeapRef);

    /// Releases one registration of `root`.
    fn unregister_root(&self, root: HeapRef);
}

/// A registry for hosts without a traced heap. Registration does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRoots;

impl RootRegistry for NoRoots {
    #[inline]
    fn register_root(&self, _root: HeapRef) {}

    #[inline]
    fn unregister_root(&self, _root: HeapRef) {}
}

// -----------------------------------------------------------------------------
// Scoped registration

/// The roots registered on behalf of one task. Dropping the guard releases
/// every registration, so release happens exactly once on every exit path.
pub struct RootGuard {
    registry: Option<Arc<dyn RootRegistry>>,
    roots: Vec<HeapRef>,
}

impl RootGuard {
    /// A guard holding no roots.
    pub fn empty() -> RootGuard {
        RootGuard {
            registry: None,
            roots: Vec::new(),
        }
    }

    /// Registers every non-null traced field of `args`, as described by
    /// `schema`. The schema must already have been validated against the
    /// buffer.
    pub fn register(
        registry: &Arc<dyn RootRegistry>,
        args: &ArgBuffer,
        schema: &ArgSchema,
    ) -> Result<RootGuard> {
        if !schema.has_traced() {
            return Ok(RootGuard::empty());
        }

        let mut pending = Vec::new();
        pending
            .try_reserve_exact(schema.traced_offsets().count())
            .map_err(|_| Error::ResourceExhausted("root registrations"))?;

        for offset in schema.traced_offsets() {
            let word = args.read_word(offset).ok_or(Error::InvalidArgument(
                "traced field lies outside the argument buffer",
            ))?;
            if let Some(root) = HeapRef::from_addr(word) {
                pending.push(root);
            }
        }

        // Register only once every field has been read, so a failure above
        // leaves nothing behind.
        let mut guard = RootGuard {
            registry: Some(registry.clone()),
            roots: Vec::new(),
        };
        guard
            .roots
            .try_reserve_exact(pending.len())
            .map_err(|_| Error::ResourceExhausted("root registrations"))?;

        // Each root joins the guard as soon as it is registered, so a
        // registry that panics partway leaves no earlier root behind.
        for root in pending {
            trace!("registering root {:?}", root);
            registry.register_root(root);
            guard.roots.push(root);
        }

        Ok(guard)
    }

    /// The roots held by this guard.
    pub fn roots(&self) -> &[HeapRef] {
        &self.roots
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            for root in self.roots.drain(..) {
                trace!("unregistering root {:?}", root);
                registry.unregister_root(root);
            }
        }
    }
}
