//! Off-heap chunk pool
//!
//! One contiguous, zero-initialised region obtained straight from the global
//! allocator. The pool never hands out references itself; chunk handles carve
//! disjoint byte ranges out of it, and the bitmap guarantees the ranges of
//! live handles never overlap.

use super::geometry::Geometry;
use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use tracing::debug;

/// Alignment of the pool base; chunk sizes are multiples of 8 so every chunk
/// starts 8-byte aligned
const POOL_ALIGN: usize = 8;

/// Fixed-capacity off-heap region
#[derive(Debug)]
pub struct Pool {
    base: NonNull<u8>,
    layout: Layout,
    chunk_size: usize,
    num_chunks: usize,
}

// Safety: Pool owns its region exclusively. Concurrent access to distinct
// byte ranges is coordinated by the allocator's bitmap.
unsafe impl Send for Pool {}
// Safety: see above; `&Pool` only exposes raw pointers.
unsafe impl Sync for Pool {}

impl Pool {
    /// Reserve `num_chunks * chunk_size` zeroed bytes
    pub fn new(geometry: &Geometry) -> Result<Self> {
        let capacity = geometry
            .num_chunks
            .checked_mul(geometry.chunk_size)
            .filter(|&c| c > 0)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("Invalid pool geometry: {:?}", geometry))
            })?;

        let layout = Layout::from_size_align(capacity, POOL_ALIGN)
            .map_err(|e| Error::InvalidConfig(format!("Invalid pool layout: {}", e)))?;

        // Safety: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or_else(|| {
            Error::OutOfMemory(format!("Failed to reserve {} byte pool", capacity))
        })?;

        debug!(capacity, "Reserved off-heap pool");
        Ok(Self {
            base,
            layout,
            chunk_size: geometry.chunk_size,
            num_chunks: geometry.num_chunks,
        })
    }

    /// Pool size in bytes
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Start of physical chunk `chunk_ref`
    ///
    /// # Panics
    ///
    /// Panics if `chunk_ref` is not a chunk of this pool. Refs only come from
    /// the bitmap, so this indicates corrupted bookkeeping.
    pub fn chunk_ptr(&self, chunk_ref: u32) -> NonNull<u8> {
        let index = chunk_ref as usize;
        assert!(
            index < self.num_chunks,
            "chunk ref {} outside pool of {} chunks",
            index,
            self.num_chunks
        );
        // Safety: index < num_chunks, so the offset is inside the allocation.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.chunk_size)) }
    }

    /// Whether `len` bytes starting at `chunk_ref` stay inside the pool
    pub fn contains(&self, chunk_ref: u32, len: usize) -> bool {
        (chunk_ref as usize)
            .checked_mul(self.chunk_size)
            .and_then(|start| start.checked_add(len))
            .is_some_and(|end| end <= self.capacity())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Safety: base was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
        debug!(capacity = self.layout.size(), "Released off-heap pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry {
            chunk_size: 64,
            num_chunks: 16,
            lock_section_size: 8,
        }
    }

    #[test]
    fn test_pool_reserve() {
        let pool = Pool::new(&geometry()).unwrap();
        assert_eq!(pool.capacity(), 1024);
        assert!(pool.contains(0, 1024));
        assert!(pool.contains(15, 64));
        assert!(!pool.contains(15, 65));
        assert!(!pool.contains(16, 1));
    }

    #[test]
    fn test_chunk_ptr_offsets() {
        let pool = Pool::new(&geometry()).unwrap();
        let first = pool.chunk_ptr(0).as_ptr() as usize;
        let third = pool.chunk_ptr(2).as_ptr() as usize;
        assert_eq!(first % POOL_ALIGN, 0);
        assert_eq!(third - first, 128);
    }

    #[test]
    fn test_pool_is_zeroed() {
        let pool = Pool::new(&geometry()).unwrap();
        // Safety: the whole pool is in range and nobody else uses it.
        let bytes = unsafe { std::slice::from_raw_parts(pool.chunk_ptr(0).as_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "outside pool")]
    fn test_chunk_ptr_out_of_range() {
        let pool = Pool::new(&geometry()).unwrap();
        pool.chunk_ptr(16);
    }

    #[test]
    fn test_pool_zero_capacity() {
        let empty = Geometry {
            chunk_size: 64,
            num_chunks: 0,
            lock_section_size: 8,
        };
        assert!(Pool::new(&empty).is_err());
    }
}
