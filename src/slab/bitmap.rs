//! Free-list bitmap with striped locks
//!
//! One bit per physical chunk, 1 = allocated, most significant bit first
//! within each byte. The bitmap is split into byte-aligned lock sections;
//! every section owns its bytes behind its own mutex, so threads working in
//! different sections never contend.
//!
//! ```text
//! section 0            section 1            section 2
//! [1111_1111 0110_0000][0000_0000 0000_0000][1000_0001 1111_1111]
//!  refs 0..16            refs 16..32          refs 32..48
//! ```

use super::geometry::{Geometry, BITS_PER_BYTE};
use parking_lot::Mutex;
use tracing::trace;

const FULL: u8 = 0xFF;

/// Mask selecting bit `bit` (0 = most significant) of a byte
#[inline]
fn bit_mask(bit: usize) -> u8 {
    0x80 >> bit
}

/// Striped allocation bitmap
#[derive(Debug)]
pub struct Bitmap {
    sections: Vec<Mutex<Box<[u8]>>>,
    lock_section_size: usize,
    num_chunks: usize,
}

impl Bitmap {
    /// Create an all-free bitmap for the given geometry
    pub fn new(geometry: &Geometry) -> Self {
        let sections = (0..geometry.lock_sections())
            .map(|_| Mutex::new(vec![0u8; geometry.section_bytes()].into_boxed_slice()))
            .collect();

        Self {
            sections,
            lock_section_size: geometry.lock_section_size,
            num_chunks: geometry.num_chunks,
        }
    }

    /// Number of lock sections
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Claim up to `wanted` free chunks in one section
    ///
    /// The section is locked for the whole scan. Free bits are claimed in
    /// ascending ref order; `on_claim(chunk_ref, continues)` is called for
    /// each, where `continues` is true when the previous bit position was
    /// claimed by this same scan (the two chunks are physically adjacent).
    /// Fully allocated bytes are skipped without looking at their bits.
    ///
    /// Returns the number of chunks claimed.
    pub fn claim<F>(&self, section: usize, wanted: usize, mut on_claim: F) -> usize
    where
        F: FnMut(u32, bool),
    {
        if wanted == 0 {
            return 0;
        }

        let mut shared = self.sections[section].lock();
        let local = shared.to_vec();
        let first_ref = section * self.lock_section_size;

        let mut found = 0;
        let mut continues = false;

        'bytes: for (byte_idx, &byte) in local.iter().enumerate() {
            if byte == FULL {
                continues = false;
                continue;
            }

            for bit in 0..BITS_PER_BYTE {
                if found == wanted {
                    break 'bytes;
                }

                let mask = bit_mask(bit);
                if byte & mask != 0 {
                    continues = false;
                    continue;
                }

                shared[byte_idx] |= mask;
                let chunk_ref = first_ref + byte_idx * BITS_PER_BYTE + bit;
                // Geometry caps num_chunks at u32::MAX
                on_claim(chunk_ref as u32, continues);
                continues = true;
                found += 1;
            }
        }

        trace!(section, wanted, found, "Scanned lock section");
        found
    }

    /// Clear `len` bits starting at `chunk_ref`
    ///
    /// Each touched section is locked once for its part of the range.
    pub fn clear(&self, chunk_ref: u32, len: u32) {
        let mut idx = chunk_ref as usize;
        let end = idx + len as usize;
        debug_assert!(end <= self.num_chunks, "release past end of bitmap");

        while idx < end {
            let section = idx / self.lock_section_size;
            let section_start = section * self.lock_section_size;
            let section_end = end.min(section_start + self.lock_section_size);

            let mut bytes = self.sections[section].lock();
            for i in idx..section_end {
                let local = i - section_start;
                let mask = bit_mask(local % BITS_PER_BYTE);
                let byte = &mut bytes[local / BITS_PER_BYTE];
                debug_assert!(*byte & mask != 0, "chunk {} released while free", i);
                *byte &= !mask;
            }
            drop(bytes);

            idx = section_end;
        }
    }

    /// Whether chunk `chunk_ref` is currently allocated
    pub fn is_set(&self, chunk_ref: u32) -> bool {
        let idx = chunk_ref as usize;
        if idx >= self.num_chunks {
            return false;
        }
        let local = idx % self.lock_section_size;
        let bytes = self.sections[idx / self.lock_section_size].lock();
        bytes[local / BITS_PER_BYTE] & bit_mask(local % BITS_PER_BYTE) != 0
    }

    /// Copy of the whole bitmap, each section read under its lock
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.num_chunks / BITS_PER_BYTE);
        for section in &self.sections {
            out.extend_from_slice(&section.lock());
        }
        out
    }

    /// Number of allocated chunks
    pub fn count_set(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.lock().iter().map(|b| b.count_ones() as usize).sum::<usize>())
            .sum()
    }
}
