// Copyright © 2024 Nathaniel Hardesty
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the “Software”), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

//! # FIXED BUFFER

use crate::Error;

/// Inline capacity held by every buffer before any heap growth occurs.
pub const DEFAULT_INLINE_CAPACITY: usize = 8 * 1024;

/// Default ceiling on heap growth.
pub const DEFAULT_MAX_CAPACITY: usize = 16 * 1024 * 1024;

/// ## FIXED BUFFER
///
/// A byte buffer with a read cursor and a write cursor, preallocated with an
/// inline region so short frames never touch the heap, growing onto the heap
/// up to a fixed ceiling when a frame outgrows it.
///
/// Bytes enter through [Append] or through [Writable] plus [Commit], and
/// leave through [Readable] plus [Consume]. [Compact] moves the unread
/// region to the front so the space behind the read cursor can be refilled.
///
/// This type makes no thread-safety guarantees.
///
/// [Append]:   FixedBuffer::append
/// [Writable]: FixedBuffer::writable
/// [Commit]:   FixedBuffer::commit
/// [Readable]: FixedBuffer::readable
/// [Consume]:  FixedBuffer::consume
/// [Compact]:  FixedBuffer::compact
#[derive(Debug)]
pub struct FixedBuffer {
  inline: [u8; DEFAULT_INLINE_CAPACITY],
  heap: Option<Vec<u8>>,
  max_capacity: usize,
  capacity: usize,
  read_pos: usize,
  write_pos: usize,
}

impl Default for FixedBuffer {
  fn default() -> Self {
    Self::new()
  }
}

impl FixedBuffer {
  /// ### NEW FIXED BUFFER
  ///
  /// Creates an empty buffer with the default inline capacity and the
  /// default maximum capacity.
  pub fn new() -> Self {
    Self::with_max_capacity(DEFAULT_MAX_CAPACITY)
  }

  /// ### NEW FIXED BUFFER WITH MAXIMUM CAPACITY
  ///
  /// Creates an empty buffer which will refuse to grow beyond the provided
  /// ceiling. A ceiling below the inline capacity is raised to it.
  pub fn with_max_capacity(max_capacity: usize) -> Self {
    FixedBuffer {
      inline: [0u8; DEFAULT_INLINE_CAPACITY],
      heap: None,
      max_capacity: max_capacity.max(DEFAULT_INLINE_CAPACITY),
      capacity: DEFAULT_INLINE_CAPACITY,
      read_pos: 0,
      write_pos: 0,
    }
  }

  /// ### CAPACITY
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// ### LENGTH
  ///
  /// The number of unread bytes.
  pub fn len(&self) -> usize {
    self.write_pos - self.read_pos
  }

  /// ### EMPTY
  pub fn is_empty(&self) -> bool {
    self.read_pos == self.write_pos
  }

  /// ### CLEAR
  ///
  /// Discards all content. Capacity is retained.
  pub fn clear(&mut self) {
    self.read_pos = 0;
    self.write_pos = 0;
  }

  /// ### COMPACT
  ///
  /// Moves the unread region to the front of the storage, reclaiming the
  /// space behind the read cursor.
  pub fn compact(&mut self) {
    if self.read_pos == 0 {
      return;
    }
    let (read_pos, write_pos) = (self.read_pos, self.write_pos);
    self.storage_mut().copy_within(read_pos..write_pos, 0);
    self.write_pos -= read_pos;
    self.read_pos = 0;
  }

  /// ### READABLE
  ///
  /// The unread region.
  pub fn readable(&self) -> &[u8] {
    &self.storage()[self.read_pos..self.write_pos]
  }

  /// ### WRITABLE
  ///
  /// The unwritten region. Writing into it becomes visible to readers only
  /// after [Commit].
  ///
  /// [Commit]: FixedBuffer::commit
  pub fn writable(&mut self) -> &mut [u8] {
    let (write_pos, capacity) = (self.write_pos, self.capacity);
    &mut self.storage_mut()[write_pos..capacity]
  }

  /// ### COMMIT
  ///
  /// Marks `n` bytes of the writable region as written.
  pub fn commit(&mut self, n: usize) -> Result<(), Error> {
    if n > self.capacity - self.write_pos {
      return Err(Error::InvalidArgument);
    }
    self.write_pos += n;
    Ok(())
  }

  /// ### CONSUME
  ///
  /// Marks `n` bytes of the readable region as read.
  pub fn consume(&mut self, n: usize) -> Result<(), Error> {
    if n > self.len() {
      return Err(Error::InvalidArgument);
    }
    self.read_pos += n;
    if self.read_pos == self.write_pos {
      self.read_pos = 0;
      self.write_pos = 0;
    }
    Ok(())
  }

  /// ### APPEND
  ///
  /// Copies `data` behind the write cursor, compacting and then growing the
  /// storage as required.
  pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
    self.ensure_writable(data.len())?;
    let write_pos = self.write_pos;
    self.storage_mut()[write_pos..write_pos + data.len()].copy_from_slice(data);
    self.write_pos += data.len();
    Ok(())
  }

  /// ### RESERVE
  ///
  /// Grows the storage to at least `new_capacity`, preserving content.
  pub fn reserve(&mut self, new_capacity: usize) -> Result<(), Error> {
    if new_capacity <= self.capacity {
      return Ok(());
    }
    self.grow(new_capacity)
  }

  fn storage(&self) -> &[u8] {
    match &self.heap {
      Some(heap) => heap.as_slice(),
      None => &self.inline,
    }
  }

  fn storage_mut(&mut self) -> &mut [u8] {
    match &mut self.heap {
      Some(heap) => heap.as_mut_slice(),
      None => &mut self.inline,
    }
  }

  fn ensure_writable(&mut self, n: usize) -> Result<(), Error> {
    if self.capacity - self.write_pos >= n {
      return Ok(());
    }
    self.compact();
    if self.capacity - self.write_pos >= n {
      return Ok(());
    }
    self.grow(self.write_pos + n)
  }

  fn grow(&mut self, min_capacity: usize) -> Result<(), Error> {
    if min_capacity > self.max_capacity {
      return Err(Error::BufferOverflow);
    }
    // Double on each growth to amortize copies, clamped to the ceiling.
    let new_capacity = (self.capacity * 2).clamp(min_capacity, self.max_capacity);
    let mut heap = vec![0u8; new_capacity];
    heap[..self.write_pos].copy_from_slice(&self.storage()[..self.write_pos]);
    self.heap = Some(heap);
    self.capacity = new_capacity;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn append_consume_round_trip() {
    let mut buffer = FixedBuffer::new();
    buffer.append(b"hello").unwrap();
    assert_eq!(buffer.readable(), b"hello");
    buffer.consume(2).unwrap();
    assert_eq!(buffer.readable(), b"llo");
    buffer.consume(3).unwrap();
    assert!(buffer.is_empty());
    // Fully drained buffers rewind their cursors.
    assert_eq!(buffer.len(), 0);
  }

  #[test]
  fn commit_past_capacity_is_rejected() {
    let mut buffer = FixedBuffer::new();
    let writable = buffer.writable().len();
    assert_eq!(buffer.commit(writable + 1), Err(Error::InvalidArgument));
  }

  #[test]
  fn grows_past_inline_capacity() {
    let mut buffer = FixedBuffer::new();
    let chunk = vec![0xA5u8; DEFAULT_INLINE_CAPACITY];
    buffer.append(&chunk).unwrap();
    buffer.append(&chunk).unwrap();
    assert_eq!(buffer.len(), 2 * DEFAULT_INLINE_CAPACITY);
    assert!(buffer.capacity() >= 2 * DEFAULT_INLINE_CAPACITY);
    assert!(buffer.readable().iter().all(|b| *b == 0xA5));
  }

  #[test]
  fn refuses_to_grow_past_ceiling() {
    let mut buffer = FixedBuffer::with_max_capacity(DEFAULT_INLINE_CAPACITY);
    let chunk = vec![0u8; DEFAULT_INLINE_CAPACITY + 1];
    assert_eq!(buffer.append(&chunk), Err(Error::BufferOverflow));
  }

  #[test]
  fn compact_reclaims_consumed_space() {
    let mut buffer = FixedBuffer::with_max_capacity(DEFAULT_INLINE_CAPACITY);
    buffer.append(&vec![1u8; DEFAULT_INLINE_CAPACITY - 4]).unwrap();
    buffer.consume(DEFAULT_INLINE_CAPACITY - 8).unwrap();
    // Without compaction this append would not fit in the tail space.
    buffer.append(&[2u8; 16]).unwrap();
    assert_eq!(buffer.len(), 4 + 16);
  }
}
