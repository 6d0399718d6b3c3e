//! This module defines the task-owned copy of an argument blob, the
//! [`ArgBuffer`], and the optional [`ArgSchema`] describing which of its
//! fields are references into a traced heap.
//!
//! Spawning is asynchronous: the caller is free to reuse or free its own
//! argument storage as soon as `spawn` returns. The runtime therefore copies
//! the caller's bytes into an `ArgBuffer` before returning, and from then on
//! only the task that owns the buffer may touch it.

use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr;
use core::slice;

use crate::error::Error;
use crate::error::Result;

/// The alignment of every argument buffer. Outlined task bodies may
/// reinterpret the buffer as their argument struct as long as the struct's
/// alignment does not exceed this.
pub const ARG_ALIGN: usize = 16;

/// The size of a traced reference inside an argument buffer.
const WORD: usize = size_of::<usize>();

/// The unit of storage of an argument buffer, used only to force alignment.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; ARG_ALIGN]);

const ZEROED: Chunk = Chunk([0; ARG_ALIGN]);

// -----------------------------------------------------------------------------
// Argument buffer

/// An owned, aligned copy of a task's argument bytes.
///
/// The storage is released exactly once, when the buffer is dropped after the
/// task body has returned.
pub struct ArgBuffer {
    chunks: Vec<Chunk>,
    len: usize,
}

impl ArgBuffer {
    /// Copies `bytes` into newly allocated, task-owned storage.
    ///
    /// Returns [`Error::ResourceExhausted`] if the storage cannot be
    /// allocated.
    pub fn copy_from(bytes: &[u8]) -> Result<ArgBuffer> {
        let count = bytes.len().div_ceil(ARG_ALIGN);
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(count)
            .map_err(|_| Error::ResourceExhausted("argument buffer"))?;
        chunks.resize(count, ZEROED);

        // SAFETY: `chunks` holds `count * ARG_ALIGN >= bytes.len()` initialized
        // bytes, and it was freshly allocated so it cannot overlap `bytes`.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                chunks.as_mut_ptr().cast::<u8>(),
                bytes.len(),
            );
        }

        Ok(ArgBuffer {
            chunks,
            len: bytes.len(),
        })
    }

    /// Copies `len` bytes starting at `ptr`.
    ///
    /// A null pointer is accepted only together with a zero length, in which
    /// case the buffer is empty. Otherwise this returns
    /// [`Error::InvalidArgument`].
    ///
    /// # Safety
    ///
    /// When `ptr` is non-null it must be valid for reads of `len` bytes for
    /// the duration of this call.
    pub unsafe fn copy_from_raw(ptr: *const u8, len: usize) -> Result<ArgBuffer> {
        if ptr.is_null() {
            return match len {
                0 => ArgBuffer::copy_from(&[]),
                _ => Err(Error::InvalidArgument(
                    "null argument pointer with a nonzero length",
                )),
            };
        }

        // SAFETY: The caller ensures `ptr` is valid for `len` bytes.
        let bytes = unsafe { slice::from_raw_parts(ptr, len) };
        ArgBuffer::copy_from(bytes)
    }

    /// The number of argument bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the task received no argument bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The argument bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `chunks` holds at least `len` initialized bytes. For an
        // empty buffer the pointer is dangling but non-null and aligned.
        unsafe { slice::from_raw_parts(self.chunks.as_ptr().cast::<u8>(), self.len) }
    }

    /// The argument bytes, mutably. Task bodies are free to use their buffer
    /// as scratch space.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: As in `as_slice`, and we hold a unique borrow of `chunks`.
        unsafe { slice::from_raw_parts_mut(self.chunks.as_mut_ptr().cast::<u8>(), self.len) }
    }

    /// A pointer to the start of the buffer, aligned to [`ARG_ALIGN`]. Never
    /// null, even when the buffer is empty.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.chunks.as_mut_ptr().cast::<u8>()
    }

    /// Reads the pointer-sized word at `offset`.
    ///
    /// Returns `None` if the word does not fit inside the buffer.
    pub fn read_word(&self, offset: usize) -> Option<usize> {
        let end = offset.checked_add(WORD)?;
        let bytes = self.as_slice().get(offset..end)?;
        let mut word = [0; WORD];
        word.copy_from_slice(bytes);
        Some(usize::from_ne_bytes(word))
    }
}

// -----------------------------------------------------------------------------
// Argument schema

/// How the runtime treats one field of an argument buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain data, or a pointer the task owns outright. The runtime copies it
    /// and otherwise ignores it.
    Raw,
    /// A pointer-sized reference into a traced heap. It is registered as a
    /// root while the task is in flight.
    Traced,
}

/// A tagged field of an argument buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    /// Byte offset of the field from the start of the buffer.
    pub offset: usize,
    /// How the field is treated.
    pub kind: FieldKind,
}

/// A per-field description of an argument buffer.
///
/// Fields that are not listed are treated as [`FieldKind::Raw`], so an empty
/// schema describes an entirely opaque blob.
///
/// ```
/// use spindle::{ArgSchema, FieldKind};
///
/// // struct Args { len: usize, object: *const Object }
/// let schema = ArgSchema::new().raw(0).traced(8);
/// assert_eq!(schema.traced_offsets().collect::<Vec<_>>(), [8]);
/// assert_eq!(schema.fields()[0].kind, FieldKind::Raw);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgSchema {
    fields: Vec<Field>,
}

impl ArgSchema {
    /// Creates an empty schema.
    pub fn new() -> ArgSchema {
        ArgSchema::default()
    }

    /// Adds a raw field at `offset`.
    pub fn raw(mut self, offset: usize) -> ArgSchema {
        self.fields.push(Field {
            offset,
            kind: FieldKind::Raw,
        });
        self
    }

    /// Adds a traced field at `offset`.
    pub fn traced(mut self, offset: usize) -> ArgSchema {
        self.fields.push(Field {
            offset,
            kind: FieldKind::Traced,
        });
        self
    }

    /// The fields of the schema, in the order they were added.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The offsets of every traced field.
    pub fn traced_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields
            .iter()
            .filter(|field| field.kind == FieldKind::Traced)
            .map(|field| field.offset)
    }

    /// Returns true if the schema has at least one traced field.
    pub fn has_traced(&self) -> bool {
        self.traced_offsets().next().is_some()
    }

    /// Checks that the schema fits an argument buffer of `len` bytes.
    ///
    /// Raw fields must start inside the buffer. Traced fields must be
    /// pointer-aligned and lie entirely inside the buffer.
    pub fn validate(&self, len: usize) -> Result<()> {
        for field in &self.fields {
            match field.kind {
                FieldKind::Raw if field.offset >= len => {
                    return Err(Error::InvalidArgument(
                        "raw field lies outside the argument buffer",
                    ));
                }
                FieldKind::Traced if field.offset % WORD != 0 => {
                    return Err(Error::InvalidArgument("traced field is not pointer-aligned"));
                }
                FieldKind::Traced if field.offset.checked_add(WORD).is_none_or(|end| end > len) => {
                    return Err(Error::InvalidArgument(
                        "traced field lies outside the argument buffer",
                    ));
                }
                FieldKind::Raw | FieldKind::Traced => {}
            }
        }
        Ok(())
    }
}
