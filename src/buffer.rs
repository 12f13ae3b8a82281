//! Reference-counted byte buffers with zero-copy tail slices.
//!
//! A root allocation owns its storage; aliases and tail slices share it and
//! keep it alive. Every view's window is anchored to the end of the root's
//! storage, so a protocol layer can allocate `header + payload`, hand a
//! payload-sized tail slice upward, and later write its header through the
//! root view.
//!
//! Storage accounting is kept by the [`BufferArena`] the root was allocated
//! from: bytes are charged on allocation and returned exactly once, when the
//! last view referencing them is dropped.

use std::{
   cell::{Cell, Ref, RefCell, RefMut},
   fmt,
   num::NonZeroUsize,
   rc::Rc,
};

use log::trace;

use crate::error::{L2capError, Result};

#[derive(Debug)]
struct ArenaInner {
   limit: Option<usize>,
   in_use: Cell<usize>,
   live: Cell<usize>,
}

/// Allocator for [`Buffer`] roots.
///
/// This type is cheaply cloneable; clones share the same accounting.
#[derive(Debug, Clone)]
pub struct BufferArena(Rc<ArenaInner>);

impl Default for BufferArena {
   fn default() -> Self {
      Self::new()
   }
}

impl BufferArena {
   /// Creates an arena with no upper bound besides the system allocator.
   pub fn new() -> Self {
      Self(Rc::new(ArenaInner {
         limit: None,
         in_use: Cell::new(0),
         live: Cell::new(0),
      }))
   }

   /// Creates an arena that refuses to hold more than `limit` bytes at once.
   pub fn with_limit(limit: usize) -> Self {
      Self(Rc::new(ArenaInner {
         limit: Some(limit),
         in_use: Cell::new(0),
         live: Cell::new(0),
      }))
   }

   /// Bytes currently held by live roots.
   pub fn bytes_in_use(&self) -> usize {
      self.0.in_use.get()
   }

   /// Number of root allocations whose storage has not been freed yet.
   pub fn live_buffers(&self) -> usize {
      self.0.live.get()
   }

   /// Allocates a zeroed root buffer of `capacity` bytes.
   pub fn alloc(&self, capacity: NonZeroUsize) -> Result<Buffer> {
      let capacity = capacity.get();
      let available = self
         .0
         .limit
         .map_or(usize::MAX, |limit| limit.saturating_sub(self.bytes_in_use()));
      if capacity > available {
         return Err(L2capError::BufferExhausted {
            requested: capacity,
            available,
         });
      }

      let mut storage = Vec::new();
      storage
         .try_reserve_exact(capacity)
         .map_err(|_| L2capError::BufferExhausted {
            requested: capacity,
            available,
         })?;
      storage.resize(capacity, 0);

      self.0.in_use.set(self.bytes_in_use() + capacity);
      self.0.live.set(self.live_buffers() + 1);
      trace!("buffer alloc {capacity} bytes ({} in use)", self.bytes_in_use());

      Ok(Buffer {
         root: Rc::new(Slab {
            capacity,
            storage: RefCell::new(storage.into_boxed_slice()),
            arena: self.clone(),
         }),
         len: capacity,
      })
   }

   /// Allocates a root sized to `bytes` and copies them in.
   ///
   /// Returns `Ok(None)` for an empty input, since buffers are never empty.
   pub fn alloc_copy(&self, bytes: &[u8]) -> Result<Option<Buffer>> {
      let Some(capacity) = NonZeroUsize::new(bytes.len()) else {
         return Ok(None);
      };
      let buffer = self.alloc(capacity)?;
      buffer.copy_from_slice(bytes);
      Ok(Some(buffer))
   }
}

/// Backing storage of a root allocation.
struct Slab {
   capacity: usize,
   storage: RefCell<Box<[u8]>>,
   arena: BufferArena,
}

impl Drop for Slab {
   fn drop(&mut self) {
      let capacity = self.capacity;
      let inner = &self.arena.0;
      inner.in_use.set(inner.in_use.get() - capacity);
      inner.live.set(inner.live.get() - 1);
      trace!("buffer free {capacity} bytes ({} in use)", inner.in_use.get());
   }
}

/// A view over the last `len` bytes of a root allocation.
///
/// Dropping a view releases its reference; the storage goes back to the
/// arena when the last view is gone. Writes through any view are visible
/// through every other view covering the same bytes.
pub struct Buffer {
   root: Rc<Slab>,
   len: usize,
}

impl fmt::Debug for Buffer {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Buffer")
         .field("len", &self.len)
         .field("offset", &self.offset())
         .field("ref_count", &self.ref_count())
         .finish()
   }
}

#[allow(clippy::len_without_is_empty)]
impl Buffer {
   /// Creates a view with the same window as `self`.
   pub fn alias(&self) -> Buffer {
      self.tail_slice(self.len)
   }

   /// Creates a view over the last `len` bytes of this view's window.
   ///
   /// # Panics
   ///
   /// Panics if `len` is zero or larger than [`Buffer::len`].
   pub fn tail_slice(&self, len: usize) -> Buffer {
      assert!(
         len > 0 && len <= self.len,
         "tail slice of {len} bytes out of range for a {}-byte buffer",
         self.len
      );
      Buffer {
         root: Rc::clone(&self.root),
         len,
      }
   }

   /// Releases this view. Same as dropping it.
   pub fn release(self) {}

   /// Number of bytes visible through this view.
   pub fn len(&self) -> usize {
      self.len
   }

   /// Size of the root allocation backing this view.
   pub fn capacity(&self) -> usize {
      self.root.capacity
   }

   /// Position of this view's window within the root storage.
   pub fn offset(&self) -> usize {
      self.capacity() - self.len
   }

   /// Number of live views sharing the root storage, this one included.
   pub fn ref_count(&self) -> usize {
      Rc::strong_count(&self.root)
   }

   pub fn shares_storage_with(&self, other: &Buffer) -> bool {
      Rc::ptr_eq(&self.root, &other.root)
   }

   /// Borrows the visible window.
   ///
   /// # Panics
   ///
   /// Panics if any view over the same storage is mutably borrowed.
   pub fn bytes(&self) -> Ref<'_, [u8]> {
      let offset = self.offset();
      Ref::map(self.root.storage.borrow(), |storage| &storage[offset..])
   }

   /// Mutably borrows the visible window.
   ///
   /// # Panics
   ///
   /// Panics if any view over the same storage is already borrowed.
   pub fn bytes_mut(&self) -> RefMut<'_, [u8]> {
      let offset = self.offset();
      RefMut::map(self.root.storage.borrow_mut(), |storage| &mut storage[offset..])
   }

   /// Address of the first byte of the window.
   pub fn as_ptr(&self) -> *const u8 {
      self.bytes().as_ptr()
   }

   /// Overwrites the start of the window with `src`.
   ///
   /// # Panics
   ///
   /// Panics if `src` is longer than the window.
   pub fn copy_from_slice(&self, src: &[u8]) {
      self.bytes_mut()[..src.len()].copy_from_slice(src);
   }

   pub fn to_vec(&self) -> Vec<u8> {
      self.bytes().to_vec()
   }
}
