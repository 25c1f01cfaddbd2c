//! Chunk handles
//!
//! A [`Chunk`] owns one or more physically contiguous chunks of the pool.
//! It starts with weight 1 and grows in place while the allocator finds
//! adjacent free bits in the same scan. Dropping a chunk clears its bits.

use super::allocator::SlabCore;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Handle to `weight` contiguous chunks starting at `chunk_ref`
pub struct Chunk {
    core: Arc<SlabCore>,
    chunk_ref: u32,
    weight: u32,
    base: NonNull<u8>,
    len: usize,
}

// Safety: the byte range is owned exclusively by this handle (its bits are
// set in the bitmap until drop) and the pool outlives it through `core`.
unsafe impl Send for Chunk {}
// Safety: shared access only reads the owned range.
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Wrap a freshly claimed physical chunk
    pub(crate) fn new(core: Arc<SlabCore>, chunk_ref: u32) -> Self {
        let base = core.pool().chunk_ptr(chunk_ref);
        let len = core.chunk_size();
        Self {
            core,
            chunk_ref,
            weight: 1,
            base,
            len,
        }
    }

    /// Absorb the next physical chunk
    ///
    /// Only a boundary move: the following chunk is already adjacent in the
    /// pool, nothing is copied.
    pub(crate) fn extend(&mut self) {
        let len = self.len + self.core.chunk_size();
        debug_assert!(
            self.core.pool().contains(self.chunk_ref, len),
            "extending chunk {} past the pool",
            self.chunk_ref
        );
        self.weight += 1;
        self.len = len;
    }

    /// Index of the first physical chunk
    pub fn chunk_ref(&self) -> u32 {
        self.chunk_ref
    }

    /// Number of physical chunks covered
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Size of the view in bytes (`weight * chunk_size`)
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a chunk covers at least one physical chunk
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read access to the chunk's bytes
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: [base, base + len) lies inside the pool, is owned by this
        // handle, and the pool is kept alive by `core`.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Write access to the chunk's bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }

    /// Return the chunks to the allocator
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        self.core.release(self.chunk_ref, self.weight);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("chunk_ref", &self.chunk_ref)
            .field("weight", &self.weight)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AllocatorConfig;
    use crate::slab::SlabAllocator;

    fn allocator() -> SlabAllocator {
        SlabAllocator::new(&AllocatorConfig::new(1024, 64).with_parallelism(1)).unwrap()
    }

    #[test]
    fn test_chunk_view_matches_weight() {
        let slab = allocator();
        let buffer = slab.allocate_chunks(3).unwrap();

        let chunk = &buffer.chunks()[0];
        assert_eq!(chunk.weight(), 3);
        assert_eq!(chunk.len(), 3 * 64);
        assert_eq!(chunk.as_bytes().len(), chunk.len());
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_chunk_bytes_are_writable() {
        let slab = allocator();
        let mut buffer = slab.allocate_chunks(1).unwrap();
        {
            let chunk = &mut buffer.chunks_mut()[0];
            chunk.as_bytes_mut()[..4].copy_from_slice(b"slab");
            assert_eq!(&chunk.as_bytes()[..4], b"slab");
        }
        buffer.release();
    }

    #[test]
    fn test_chunk_release_clears_bits() {
        let slab = allocator();
        let buffer = slab.allocate_chunks(2).unwrap();
        let chunk_ref = buffer.chunks()[0].chunk_ref();
        assert!(slab.is_allocated(chunk_ref));
        assert!(slab.is_allocated(chunk_ref + 1));

        buffer.release();
        assert!(!slab.is_allocated(chunk_ref));
        assert!(!slab.is_allocated(chunk_ref + 1));
        assert_eq!(slab.allocated_bytes(), 0);
    }

    #[test]
    fn test_chunk_debug() {
        let slab = allocator();
        let buffer = slab.allocate_chunks(1).unwrap();
        let text = format!("{:?}", buffer.chunks()[0]);
        assert!(text.contains("weight: 1"));
        assert!(text.contains("len: 64"));
    }
}
