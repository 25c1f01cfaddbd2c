//! Striped slab allocator
//!
//! Capacity is reserved optimistically on one atomic counter before any lock
//! is taken; the bitmap scan that follows is then guaranteed to find enough
//! free bits, because the counter never drops below the number of set bits.

use super::bitmap::Bitmap;
use super::buffer::{AllocatedBuffer, LongBuffer};
use super::chunk::Chunk;
use super::geometry::Geometry;
use super::pool::Pool;
use crate::config::AllocatorConfig;
use crate::error::Result;
use crate::sink::{MetricsSink, NoopMetrics, ALLOCATION_SECONDS, RESERVED_BYTES};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Step of the rotating start-section counter
const SECTION_STEP: usize = 1_000_003;

/// Capability consumers program against
pub trait Allocator {
    /// Buffer type handed out
    type Buffer: LongBuffer;

    /// Actual chunk size in bytes
    fn chunk_size(&self) -> usize;

    /// Allocate enough chunks to hold `bytes`
    fn allocate(&self, bytes: usize) -> Option<Self::Buffer> {
        self.allocate_chunks(bytes.div_ceil(self.chunk_size()))
    }

    /// Allocate `n` chunks
    ///
    /// Returns `None` when the pool has no free chunk left. When fewer than
    /// `n` are free the grant is reduced to what remains.
    fn allocate_chunks(&self, n: usize) -> Option<Self::Buffer>;
}

/// State shared by the allocator and every live chunk
pub(crate) struct SlabCore {
    geometry: Geometry,
    pool: Pool,
    bitmap: Bitmap,
    allocated_bytes: AtomicUsize,
    next_section: AtomicUsize,
    section_step: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl SlabCore {
    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.geometry.chunk_size
    }

    /// Clear `len` chunks starting at `chunk_ref` and return their capacity
    pub(crate) fn release(&self, chunk_ref: u32, len: u32) {
        self.bitmap.clear(chunk_ref, len);
        let bytes = len as usize * self.geometry.chunk_size;
        let previous = self.allocated_bytes.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(previous >= bytes, "released more than was allocated");
        trace!(chunk_ref, len, "Released chunks");
    }

    /// Pick the section a scan starts from
    ///
    /// Advances a shared offset by a large prime modulo the section count, so
    /// concurrent callers spread over the sections without any randomness.
    fn next_start_section(&self) -> usize {
        let sections = self.bitmap.section_count();
        let step = self.section_step;
        let previous = self
            .next_section
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((cur + step) % sections)
            })
            .unwrap_or_else(|cur| cur);
        (previous + step) % sections
    }
}

impl fmt::Debug for SlabCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabCore")
            .field("geometry", &self.geometry)
            .field("allocated_bytes", &self.allocated_bytes)
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Off-heap slab allocator
///
/// Cheap to clone; clones share the same pool.
#[derive(Debug, Clone)]
pub struct SlabAllocator {
    core: Arc<SlabCore>,
}

impl SlabAllocator {
    /// Create an allocator that reports to no metrics sink
    pub fn new(config: &AllocatorConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create an allocator reporting to `metrics`
    pub fn with_metrics(config: &AllocatorConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let geometry = Geometry::derive(config)?;
        let pool = Pool::new(&geometry)?;
        let bitmap = Bitmap::new(&geometry);
        let section_step = SECTION_STEP % bitmap.section_count();

        info!(
            requested_capacity = config.capacity,
            requested_chunk_size = config.chunk_size,
            capacity = geometry.capacity(),
            chunk_size = geometry.chunk_size,
            num_chunks = geometry.num_chunks,
            lock_section_size = geometry.lock_section_size,
            lock_sections = geometry.lock_sections(),
            "Initialized slab allocator"
        );

        Ok(Self {
            core: Arc::new(SlabCore {
                geometry,
                pool,
                bitmap,
                allocated_bytes: AtomicUsize::new(0),
                next_section: AtomicUsize::new(0),
                section_step,
                metrics,
            }),
        })
    }

    /// Actual chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.core.geometry.chunk_size
    }

    /// Allocate enough chunks to hold `bytes`
    pub fn allocate(&self, bytes: usize) -> Option<AllocatedBuffer> {
        self.allocate_chunks(bytes.div_ceil(self.chunk_size()))
    }

    /// Allocate `n` chunks
    ///
    /// `n` is clamped to the pool size, then reserved on the capacity
    /// counter. If the pool cannot hold all of them the request shrinks to
    /// what is left; if nothing is left `None` is returned. The reserved
    /// chunks are then claimed section by section, coalescing physically
    /// adjacent chunks found in the same section scan into one [`Chunk`].
    pub fn allocate_chunks(&self, n: usize) -> Option<AllocatedBuffer> {
        let started = Instant::now();
        let core = &self.core;
        let chunk_size = core.geometry.chunk_size;
        let capacity = core.geometry.capacity();

        let requested = n;
        let mut n = n.min(core.geometry.num_chunks);
        if n == 0 {
            debug!("Zero-chunk allocation requested");
            return None;
        }

        let reserved = n * chunk_size;
        let mut total = core.allocated_bytes.fetch_add(reserved, Ordering::AcqRel) + reserved;
        if total > capacity {
            let excess = ((total - capacity) / chunk_size).min(n);
            n -= excess;
            core.allocated_bytes
                .fetch_sub(excess * chunk_size, Ordering::AcqRel);
            total -= excess * chunk_size;

            if n == 0 {
                core.metrics.gauge(RESERVED_BYTES, capacity as f64);
                warn!(requested, capacity, "Slab pool exhausted");
                return None;
            }
            debug!(requested, granted = n, "Slab pool nearly full, reduced grant");
        }
        core.metrics.gauge(RESERVED_BYTES, total as f64);

        let sections = core.bitmap.section_count();
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut found = 0;
        let mut passes = 0usize;

        while found < n {
            let start = core.next_start_section();
            for i in 0..sections {
                if found == n {
                    break;
                }
                let section = (start + i) % sections;
                found += core.bitmap.claim(section, n - found, |chunk_ref, continues| {
                    match chunks.last_mut() {
                        Some(last) if continues => last.extend(),
                        _ => chunks.push(Chunk::new(Arc::clone(&self.core), chunk_ref)),
                    }
                });
            }

            passes += 1;
            if found < n {
                // Bits freed behind the scan cursor; the next pass finds them
                trace!(passes, found, wanted = n, "Scan pass came up short");
                std::hint::spin_loop();
            }
        }

        core.metrics
            .histogram(ALLOCATION_SECONDS, started.elapsed().as_secs_f64());
        debug!(
            requested,
            granted = n,
            chunks = chunks.len(),
            passes,
            "Allocated chunks"
        );

        Some(AllocatedBuffer::new(chunks, n * chunk_size))
    }

    /// Pool capacity in bytes
    pub fn capacity(&self) -> usize {
        self.core.geometry.capacity()
    }

    /// Number of physical chunks
    pub fn num_chunks(&self) -> usize {
        self.core.geometry.num_chunks
    }

    /// Chunks per lock section
    pub fn lock_section_size(&self) -> usize {
        self.core.geometry.lock_section_size
    }

    /// Number of lock sections
    pub fn lock_sections(&self) -> usize {
        self.core.bitmap.section_count()
    }

    /// Bytes currently reserved
    pub fn allocated_bytes(&self) -> usize {
        self.core.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes still available
    pub fn free_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.allocated_bytes())
    }

    /// Whether physical chunk `chunk_ref` is held by a live [`Chunk`]
    pub fn is_allocated(&self, chunk_ref: u32) -> bool {
        self.core.bitmap.is_set(chunk_ref)
    }

    /// Copy of the allocation bitmap (MSB first, 1 = allocated)
    pub fn bitmap_snapshot(&self) -> Vec<u8> {
        self.core.bitmap.snapshot()
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> SlabStats {
        let allocated_chunks = self.core.bitmap.count_set();
        SlabStats {
            capacity: self.capacity(),
            chunk_size: self.chunk_size(),
            num_chunks: self.num_chunks(),
            lock_section_size: self.lock_section_size(),
            lock_sections: self.lock_sections(),
            allocated_bytes: self.allocated_bytes(),
            allocated_chunks,
            free_chunks: self.num_chunks() - allocated_chunks,
        }
    }
}

impl Allocator for SlabAllocator {
    type Buffer = AllocatedBuffer;

    fn chunk_size(&self) -> usize {
        SlabAllocator::chunk_size(self)
    }

    fn allocate(&self, bytes: usize) -> Option<AllocatedBuffer> {
        SlabAllocator::allocate(self, bytes)
    }

    fn allocate_chunks(&self, n: usize) -> Option<AllocatedBuffer> {
        SlabAllocator::allocate_chunks(self, n)
    }
}

/// Statistics for the slab allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlabStats {
    pub capacity: usize,
    pub chunk_size: usize,
    pub num_chunks: usize,
    pub lock_section_size: usize,
    pub lock_sections: usize,
    pub allocated_bytes: usize,
    pub allocated_chunks: usize,
    pub free_chunks: usize,
}
