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

//! # SYSTEM BYTES ALLOCATOR

use secs_core::Error;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// ## SYSTEM BYTES
///
/// Allocates the 32-bit transaction identifiers carried in message headers
/// to pair primaries with secondaries.
///
/// - Zero is reserved and never allocated.
/// - No two concurrently outstanding allocations collide.
/// - Released values are reused, oldest first.
/// - The counter wraps past the 32-bit ceiling back to 1.
///
/// The allocator guarantees uniqueness only among identifiers this entity
/// allocated; it makes no attempt at global agreement with the peer.
/// Internally mutexed, so any thread of the session may allocate.
#[derive(Debug, Default)]
pub struct SystemBytes {
  state: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
  next: u32,
  free: VecDeque<u32>,
  in_use: HashSet<u32>,
}
impl Default for AllocatorState {
  fn default() -> Self {
    AllocatorState {
      next: 1,
      free: VecDeque::new(),
      in_use: HashSet::new(),
    }
  }
}
impl AllocatorState {
  fn next_candidate(&mut self) -> u32 {
    let current = self.next;
    self.next = match self.next {
      u32::MAX => 1,
      next => next + 1,
    };
    current
  }
}

impl SystemBytes {
  /// ### NEW ALLOCATOR
  ///
  /// Creates an allocator whose counter starts at `initial` (zero is
  /// bumped to 1).
  pub fn new(initial: u32) -> Self {
    SystemBytes {
      state: Mutex::new(AllocatorState {
        next: initial.max(1),
        ..AllocatorState::default()
      }),
    }
  }

  /// ### ALLOCATE
  ///
  /// Returns a value not currently in use: a released value when one is
  /// queued, the next counter value otherwise. [Buffer Overflow] signals
  /// an exhausted identifier space.
  ///
  /// [Buffer Overflow]: secs_core::Error::BufferOverflow
  pub fn allocate(&self) -> Result<u32, Error> {
    let mut state = self.state.lock().unwrap();
    if let Some(value) = state.free.pop_front() {
      state.in_use.insert(value);
      return Ok(value);
    }
    // In practice in_use is small, so the free value is found within
    // in_use.len() + 2 probes unless the space is genuinely exhausted.
    if state.in_use.len() as u64 >= u64::from(u32::MAX) - 1 {
      return Err(Error::BufferOverflow);
    }
    let attempts = state.in_use.len() + 2;
    for _ in 0..attempts {
      let candidate = state.next_candidate();
      if state.in_use.insert(candidate) {
        return Ok(candidate);
      }
    }
    Err(Error::BufferOverflow)
  }

  /// ### RELEASE
  ///
  /// Returns a value to the free queue. Releasing zero or a value not in
  /// use is a no-op, so double release is harmless.
  pub fn release(&self, system_bytes: u32) {
    if system_bytes == 0 {
      return;
    }
    let mut state = self.state.lock().unwrap();
    if state.in_use.remove(&system_bytes) {
      state.free.push_back(system_bytes);
    }
  }

  /// ### IN USE
  pub fn is_in_use(&self, system_bytes: u32) -> bool {
    self.state.lock().unwrap().in_use.contains(&system_bytes)
  }

  /// ### IN USE COUNT
  pub fn in_use_count(&self) -> usize {
    self.state.lock().unwrap().in_use.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocations_are_unique_and_nonzero() {
    let allocator = SystemBytes::new(1);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
      let value = allocator.allocate().unwrap();
      assert_ne!(value, 0);
      assert!(seen.insert(value));
    }
    assert_eq!(allocator.in_use_count(), 1000);
  }

  #[test]
  fn released_values_are_reused_oldest_first() {
    let allocator = SystemBytes::new(1);
    let a = allocator.allocate().unwrap();
    let b = allocator.allocate().unwrap();
    allocator.release(a);
    allocator.release(b);
    assert_eq!(allocator.allocate().unwrap(), a);
    assert_eq!(allocator.allocate().unwrap(), b);
  }

  #[test]
  fn release_of_unknown_value_is_a_no_op() {
    let allocator = SystemBytes::new(1);
    allocator.release(0);
    allocator.release(42);
    let value = allocator.allocate().unwrap();
    allocator.release(value);
    allocator.release(value);
    // The double release must not have queued the value twice.
    assert_eq!(allocator.allocate().unwrap(), value);
    let next = allocator.allocate().unwrap();
    assert_ne!(next, value);
  }

  #[test]
  fn counter_wraps_past_the_ceiling_skipping_zero() {
    let allocator = SystemBytes::new(u32::MAX);
    assert_eq!(allocator.allocate().unwrap(), u32::MAX);
    assert_eq!(allocator.allocate().unwrap(), 1);
    assert_eq!(allocator.allocate().unwrap(), 2);
  }

  #[test]
  fn occupied_candidates_are_skipped() {
    let allocator = SystemBytes::new(1);
    let first = allocator.allocate().unwrap();
    assert_eq!(first, 1);
    // Force the counter to revisit 1 by wrapping it around.
    let wrapped = SystemBytes::new(u32::MAX);
    let top = wrapped.allocate().unwrap();
    assert_eq!(top, u32::MAX);
    let after_wrap = wrapped.allocate().unwrap();
    assert_eq!(after_wrap, 1);
    let skipping = wrapped.allocate().unwrap();
    assert_eq!(skipping, 2);
    assert!(wrapped.is_in_use(1));
  }
}
