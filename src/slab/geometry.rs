//! Pool geometry derivation
//!
//! Turns a requested `(capacity, chunk_size)` into the exact layout the
//! allocator uses: chunk count, actual chunk size and lock section size.

use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use serde::Serialize;

/// Bits per bitmap byte; lock sections are byte aligned
pub const BITS_PER_BYTE: usize = 8;

/// Lock sections targeted per unit of parallelism
pub const SECTIONS_PER_CORE: usize = 8;

/// Derived pool layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    /// Actual chunk size in bytes (multiple of 8)
    pub chunk_size: usize,
    /// Number of physical chunks (multiple of `lock_section_size`)
    pub num_chunks: usize,
    /// Chunks covered by one lock section (multiple of 8)
    pub lock_section_size: usize,
}

impl Geometry {
    /// Derive the layout for a config
    pub fn derive(config: &AllocatorConfig) -> Result<Self> {
        config.validate()?;
        Self::compute(
            config.capacity,
            config.chunk_size,
            config.effective_parallelism(),
        )
    }

    /// Derive the layout from raw numbers
    ///
    /// `num_chunks` is the smallest multiple of the lock section size covering
    /// the requested capacity at the requested granularity. The chunk size is
    /// then re-derived so that `num_chunks * chunk_size` lands just above the
    /// requested capacity.
    pub fn compute(capacity: usize, chunk_size: usize, parallelism: usize) -> Result<Self> {
        if capacity == 0 || chunk_size == 0 || parallelism == 0 {
            return Err(Error::InvalidConfig(format!(
                "capacity ({}), chunk_size ({}) and parallelism ({}) must be non-zero",
                capacity, chunk_size, parallelism
            )));
        }

        let requested_chunks = capacity.div_ceil(chunk_size);
        let target_sections = parallelism.saturating_mul(SECTIONS_PER_CORE);
        let lock_section_size = round_up_8(requested_chunks.div_ceil(target_sections));

        let num_chunks = requested_chunks
            .checked_next_multiple_of(lock_section_size)
            .ok_or_else(|| Error::InvalidConfig("chunk count overflows".to_string()))?;

        if num_chunks > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "{} chunks exceed the addressable chunk refs",
                num_chunks
            )));
        }

        let chunk_size = round_up_8(capacity.div_ceil(num_chunks));

        num_chunks.checked_mul(chunk_size).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "pool of {} x {} bytes overflows",
                num_chunks, chunk_size
            ))
        })?;

        Ok(Self {
            chunk_size,
            num_chunks,
            lock_section_size,
        })
    }

    /// Pool size in bytes
    pub fn capacity(&self) -> usize {
        self.num_chunks * self.chunk_size
    }

    /// Number of lock sections
    pub fn lock_sections(&self) -> usize {
        self.num_chunks / self.lock_section_size
    }

    /// Bitmap bytes guarded by one lock section
    pub fn section_bytes(&self) -> usize {
        self.lock_section_size / BITS_PER_BYTE
    }

    /// Total bitmap size in bytes
    pub fn bitmap_bytes(&self) -> usize {
        self.num_chunks / BITS_PER_BYTE
    }
}

/// Round up to a multiple of 8, never below 8
fn round_up_8(value: usize) -> usize {
    value.max(1).next_multiple_of(BITS_PER_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_pool_keeps_chunk_size() {
        let g = Geometry::compute(1024, 64, 4).unwrap();
        assert_eq!(g.chunk_size, 64);
        assert_eq!(g.num_chunks, 16);
        assert_eq!(g.lock_section_size, 8);
        assert_eq!(g.lock_sections(), 2);
        assert_eq!(g.capacity(), 1024);
        assert_eq!(g.bitmap_bytes(), 2);
        assert_eq!(g.section_bytes(), 1);
    }

    #[test]
    fn test_chunk_size_rederived() {
        // 1000 / 64 -> 16 chunks; 1000 / 16 = 62.5 -> rounds up to 64
        let g = Geometry::compute(1000, 64, 1).unwrap();
        assert_eq!(g.num_chunks, 16);
        assert_eq!(g.chunk_size, 64);

        // 100 / 10 -> 10 chunks, padded to 16; 100 / 16 = 6.25 -> 8
        let g = Geometry::compute(100, 10, 1).unwrap();
        assert_eq!(g.num_chunks, 16);
        assert_eq!(g.chunk_size, 8);
        assert!(g.capacity() >= 100);
    }

    #[test]
    fn test_section_size_scales_with_pool() {
        // 64 MiB / 1 KiB = 65536 chunks, 4 cores -> 32 sections of 2048
        let g = Geometry::compute(64 * 1024 * 1024, 1024, 4).unwrap();
        assert_eq!(g.lock_section_size, 2048);
        assert_eq!(g.lock_sections(), 32);
        assert_eq!(g.chunk_size, 1024);
    }

    #[test]
    fn test_invariants_hold_for_many_configs() {
        for capacity in [1, 7, 8, 100, 1023, 4096, 65_537, 1 << 20, 3 * (1 << 20) + 5] {
            for chunk_size in [1, 3, 8, 60, 64, 1000, 4096] {
                for parallelism in [1, 2, 3, 8, 64] {
                    let g = Geometry::compute(capacity, chunk_size, parallelism).unwrap();
                    assert_eq!(g.lock_section_size % 8, 0);
                    assert_eq!(g.num_chunks % g.lock_section_size, 0);
                    assert_eq!(g.chunk_size % 8, 0);
                    assert!(g.chunk_size >= 8);
                    assert!(
                        g.capacity() >= capacity,
                        "capacity {} chunk {} par {} -> {:?}",
                        capacity,
                        chunk_size,
                        parallelism,
                        g
                    );
                }
            }
        }
    }

    #[test]
    fn test_zero_rejected() {
        assert!(Geometry::compute(0, 64, 1).is_err());
        assert!(Geometry::compute(1024, 0, 1).is_err());
        assert!(Geometry::compute(1024, 64, 0).is_err());
    }

    #[test]
    fn test_derive_from_config() {
        let cfg = AllocatorConfig::new(2048, 128).with_parallelism(2);
        let g = Geometry::derive(&cfg).unwrap();
        assert_eq!(g.num_chunks, 16);
        assert_eq!(g.chunk_size, 128);
    }
}
