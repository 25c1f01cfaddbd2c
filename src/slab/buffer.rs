//! Chunk-backed buffers of 64-bit values
//!
//! An [`AllocatedBuffer`] strings together the chunks of one allocation. The
//! chunks may have different sizes (coalesced chunks are `weight` times
//! larger), so positions are always resolved by walking cumulative chunk
//! lengths, never by dividing by a uniform chunk size.
//!
//! ```text
//! capacity = 5 * 64
//! chunks   [ ref 3, weight 2 | ref 9, weight 1 | ref 12, weight 2 ]
//! bytes    0               128              192                 320
//! ```
//!
//! Values are stored little-endian.

use super::chunk::Chunk;
use std::iter::FusedIterator;
use tracing::{debug, warn};

/// Size of one value in bytes
pub const LONG_BYTES: usize = 8;

/// Returned by `get_long` for positions outside the buffer
pub const LONG_SENTINEL: i64 = i64::MIN;

/// Capability consumers program against
pub trait LongBuffer {
    /// Bytes granted, regardless of how many chunk objects back them
    fn capacity(&self) -> usize;

    /// Append a value; `false` once the buffer is full
    fn put_long(&mut self, value: i64) -> bool;

    /// Write a value at byte position `pos`; `false` if out of range
    fn put_long_at(&mut self, pos: usize, value: i64) -> bool;

    /// Read the value at byte position `pos`; [`LONG_SENTINEL`] if out of range
    fn get_long(&self, pos: usize) -> i64;

    /// Iterate over the values appended so far
    fn iter(&self) -> LongIterator<'_>;

    /// Give the memory back
    fn release(self);
}

/// One allocation, possibly spread over several chunks
#[derive(Debug)]
pub struct AllocatedBuffer {
    chunks: Vec<Chunk>,
    capacity: usize,
    /// Chunk the next `put_long` goes to
    chunk_write_index: usize,
    /// Byte offset inside that chunk
    value_write_index: usize,
    /// Bytes appended by `put_long` (high-water mark for iteration)
    written: usize,
}

impl AllocatedBuffer {
    pub(crate) fn new(chunks: Vec<Chunk>, capacity: usize) -> Self {
        debug_assert_eq!(
            chunks.iter().map(Chunk::len).sum::<usize>(),
            capacity,
            "chunk lengths must add up to the granted capacity"
        );
        Self {
            chunks,
            capacity,
            chunk_write_index: 0,
            value_write_index: 0,
            written: 0,
        }
    }

    /// Bytes granted, regardless of how many chunk objects back them
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values appended with [`put_long`](Self::put_long)
    pub fn len(&self) -> usize {
        self.written / LONG_BYTES
    }

    /// Whether nothing was appended yet
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Number of chunk handles (not physical chunks)
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The chunk handles, in allocation order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Mutable access to the chunk handles
    pub fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    /// Append a value
    ///
    /// Moves on to the next chunk when the current one is full. Returns
    /// `false` when no chunk has room left; the caller should stop writing.
    pub fn put_long(&mut self, value: i64) -> bool {
        while let Some(chunk) = self.chunks.get_mut(self.chunk_write_index) {
            let end = self.value_write_index + LONG_BYTES;
            if let Some(dst) = chunk.as_bytes_mut().get_mut(self.value_write_index..end) {
                dst.copy_from_slice(&value.to_le_bytes());
                self.value_write_index = end;
                self.written += LONG_BYTES;
                return true;
            }

            self.chunk_write_index += 1;
            self.value_write_index = 0;
        }
        false
    }

    /// Write a value at byte position `pos`
    ///
    /// Does not move the append cursor. A value that would cross the end of
    /// its chunk is rejected.
    pub fn put_long_at(&mut self, pos: usize, value: i64) -> bool {
        if !self.in_range(pos) {
            return false;
        }

        let Some((index, offset)) = self.locate(pos) else {
            warn!(pos, capacity = self.capacity, "No chunk owns position");
            return false;
        };

        match self.chunks[index]
            .as_bytes_mut()
            .get_mut(offset..offset + LONG_BYTES)
        {
            Some(dst) => {
                dst.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => {
                warn!(pos, chunk = index, offset, "Write crosses chunk boundary");
                false
            }
        }
    }

    /// Read the value at byte position `pos`
    ///
    /// Returns [`LONG_SENTINEL`] when `pos + 8` exceeds the capacity or the
    /// value would cross the end of its chunk.
    pub fn get_long(&self, pos: usize) -> i64 {
        if !self.in_range(pos) {
            return LONG_SENTINEL;
        }

        let Some((index, offset)) = self.locate(pos) else {
            warn!(pos, capacity = self.capacity, "No chunk owns position");
            return LONG_SENTINEL;
        };

        match self.chunks[index]
            .as_bytes()
            .get(offset..offset + LONG_BYTES)
            .and_then(|src| <[u8; LONG_BYTES]>::try_from(src).ok())
        {
            Some(bytes) => i64::from_le_bytes(bytes),
            None => {
                warn!(pos, chunk = index, offset, "Read crosses chunk boundary");
                LONG_SENTINEL
            }
        }
    }

    /// Iterate over the values appended so far
    ///
    /// The iterator covers what was written when it was created and always
    /// starts from the first value.
    pub fn iter(&self) -> LongIterator<'_> {
        LongIterator::new(&self.chunks, self.written)
    }

    /// Give every chunk back to the allocator
    pub fn release(mut self) {
        let chunks = self.chunks.len();
        for chunk in self.chunks.drain(..) {
            chunk.release();
        }
        debug!(chunks, capacity = self.capacity, "Released buffer");
    }

    fn in_range(&self, pos: usize) -> bool {
        pos.checked_add(LONG_BYTES)
            .is_some_and(|end| end <= self.capacity)
    }

    /// Chunk index and offset inside it for byte position `pos`
    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let end = start + chunk.len();
            if pos < end {
                return Some((index, pos - start));
            }
            start = end;
        }
        None
    }
}

impl LongBuffer for AllocatedBuffer {
    fn capacity(&self) -> usize {
        AllocatedBuffer::capacity(self)
    }

    fn put_long(&mut self, value: i64) -> bool {
        AllocatedBuffer::put_long(self, value)
    }

    fn put_long_at(&mut self, pos: usize, value: i64) -> bool {
        AllocatedBuffer::put_long_at(self, pos, value)
    }

    fn get_long(&self, pos: usize) -> i64 {
        AllocatedBuffer::get_long(self, pos)
    }

    fn iter(&self) -> LongIterator<'_> {
        AllocatedBuffer::iter(self)
    }

    fn release(self) {
        AllocatedBuffer::release(self)
    }
}

impl<'a> IntoIterator for &'a AllocatedBuffer {
    type Item = i64;
    type IntoIter = LongIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward-only iterator over appended values
///
/// Reads the chunks without touching the buffer's write cursor.
#[derive(Debug, Clone)]
pub struct LongIterator<'a> {
    chunks: &'a [Chunk],
    chunk_index: usize,
    offset: usize,
    /// Bytes left before the high-water mark
    remaining: usize,
    /// Cached `has_next` answer, cleared by `next`
    ready: Option<bool>,
}

impl<'a> LongIterator<'a> {
    fn new(chunks: &'a [Chunk], written: usize) -> Self {
        Self {
            chunks,
            chunk_index: 0,
            offset: 0,
            remaining: written,
            ready: None,
        }
    }

    /// Whether another value is available
    pub fn has_next(&mut self) -> bool {
        if let Some(ready) = self.ready {
            return ready;
        }
        let ready = self.seek();
        self.ready = Some(ready);
        ready
    }

    /// Position on the next chunk that still holds an unread value
    fn seek(&mut self) -> bool {
        if self.remaining < LONG_BYTES {
            return false;
        }
        while let Some(chunk) = self.chunks.get(self.chunk_index) {
            if self.offset + LONG_BYTES <= chunk.len() {
                return true;
            }
            self.chunk_index += 1;
            self.offset = 0;
        }
        false
    }
}

impl Iterator for LongIterator<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if !self.has_next() {
            return None;
        }

        let end = self.offset + LONG_BYTES;
        let bytes: [u8; LONG_BYTES] = self.chunks[self.chunk_index].as_bytes()
            [self.offset..end]
            .try_into()
            .ok()?;

        self.offset = end;
        self.remaining -= LONG_BYTES;
        self.ready = None;
        Some(i64::from_le_bytes(bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining / LONG_BYTES;
        (n, Some(n))
    }
}

impl ExactSizeIterator for LongIterator<'_> {}

impl FusedIterator for LongIterator<'_> {}
