//! The backing buffer of a zone.
//!
//! This is the only module in the workspace that touches the host
//! allocator or dereferences raw pointers. Everything above it reads and
//! writes block headers through the bounds-checked byte slices exposed
//! here, so a corrupted header can at worst panic, never read outside
//! the buffer.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use zonal_core::{ConfigError, ZoneError};

/// Alignment of every zone buffer. Matches the block granularity.
pub(crate) const REGION_ALIGN: usize = 16;

/// An owned, zero-initialised, 16-byte aligned byte buffer.
pub(crate) struct RawRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawRegion {
    /// Allocate `len` zeroed bytes from the host allocator.
    ///
    /// Fresh buffers are zeroed rather than left uninitialised because
    /// their tail is exposed through `&[u8]` as free-block payload.
    pub(crate) fn zeroed(len: usize) -> Result<Self, ZoneError> {
        if len == 0 {
            return Err(ZoneError::Config(ConfigError::ZeroCapacity));
        }
        let layout = Layout::from_size_align(len, REGION_ALIGN)
            .map_err(|_| ZoneError::CapacityOverflow { requested: len })?;
        // SAFETY: `layout` has a non-zero size (checked above).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(ZoneError::HostAllocationFailed { bytes: len })?;
        Ok(Self { ptr, layout })
    }

    /// Length of the buffer in bytes.
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Base address of the buffer.
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the byte at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not inside the buffer.
    pub(crate) fn ptr_at(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.len(),
            "index {index} outside region of {} bytes",
            self.len()
        );
        // SAFETY: `index < len`, so the result stays inside the allocation.
        unsafe { self.ptr.add(index) }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: `ptr` owns `len` initialised bytes for the lifetime of
        // `self`; the shared borrow of `self` prevents concurrent mutation.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and the exclusive borrow of `self` makes
        // this the only live view of the buffer.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for RawRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with this exact
        // layout and is released exactly once.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the region uniquely owns its buffer and has no interior
// mutability; all mutation goes through `&mut self`.
unsafe impl Send for RawRegion {}
// SAFETY: shared access only ever reads.
unsafe impl Sync for RawRegion {}
