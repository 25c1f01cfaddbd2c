//! Striped Slab Allocator
//!
//! Hands out fixed-size chunks of one pre-reserved off-heap pool to
//! concurrent callers. Free chunks are tracked in a bitmap split into lock
//! sections, so contention is bounded by the number of sections instead of
//! one global lock.
//!
//! # Architecture
//!
//! ```text
//! SlabAllocator
//!   ├─→ allocated_bytes (AtomicUsize, optimistic reservation)
//!   ├─→ Bitmap
//!   │     ├─→ Section 0 (Mutex) → [1111_0000 0000_0000]
//!   │     ├─→ Section 1 (Mutex) → [0000_0000 0000_0000]
//!   │     └─→ Section N (Mutex) → [1100_0001 0000_0000]
//!   └─→ Pool (off-heap, num_chunks × chunk_size)
//!
//! AllocatedBuffer
//!   └─→ [Chunk(ref=0, weight=4), Chunk(ref=40, weight=2), ...]
//! ```
//!
//! Physically adjacent chunks found in the same section scan are coalesced
//! into one [`Chunk`] whose view simply grows; buffers therefore hold chunks
//! of different sizes.

pub mod allocator;
pub mod bitmap;
pub mod buffer;
pub mod chunk;
pub mod geometry;
pub mod pool;

pub use allocator::{Allocator, SlabAllocator, SlabStats};
pub use bitmap::Bitmap;
pub use buffer::{AllocatedBuffer, LongBuffer, LongIterator, LONG_BYTES, LONG_SENTINEL};
pub use chunk::Chunk;
pub use geometry::Geometry;
pub use pool::Pool;
