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

//! # HANDLER ROUTER

use crate::Error;
use secs_core::DataMessage;
use std::collections::HashMap;
use std::sync::Arc;

/// ## HANDLER
///
/// Answers an inbound primary message. A handler returning `Ok` may supply
/// the encoded body of the secondary reply; when the primary carried the
/// W-bit the [Session] transmits that reply automatically (an absent body
/// becomes an empty one). A handler returning `Err` suppresses the reply
/// and leaves the peer to its T3.
///
/// [Session]: crate::Session
pub type Handler = Arc<dyn Fn(&DataMessage) -> Result<Option<Vec<u8>>, Error> + Send + Sync>;

/// ## ROUTER
///
/// Dispatches inbound primaries by (stream, function), with an optional
/// default handler for everything unmatched.
#[derive(Default)]
pub struct Router {
  handlers: HashMap<(u8, u8), Handler>,
  default: Option<Handler>,
}

impl Router {
  /// ### NEW ROUTER
  pub fn new() -> Self {
    Router::default()
  }

  /// ### SET HANDLER
  ///
  /// Installs the handler for a (stream, function), replacing any previous
  /// one.
  pub fn set(&mut self, stream: u8, function: u8, handler: Handler) {
    self.handlers.insert((stream, function), handler);
  }

  /// ### ERASE HANDLER
  pub fn erase(&mut self, stream: u8, function: u8) {
    self.handlers.remove(&(stream, function));
  }

  /// ### SET DEFAULT HANDLER
  pub fn set_default(&mut self, handler: Handler) {
    self.default = Some(handler);
  }

  /// ### CLEAR DEFAULT HANDLER
  pub fn clear_default(&mut self) {
    self.default = None;
  }

  /// ### FIND HANDLER
  ///
  /// The handler for a (stream, function): the exact match when installed,
  /// the default otherwise.
  pub fn find(&self, stream: u8, function: u8) -> Option<Handler> {
    self
      .handlers
      .get(&(stream, function))
      .or(self.default.as_ref())
      .cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn message(stream: u8, function: u8) -> DataMessage {
    DataMessage {
      stream,
      function,
      w_bit: true,
      system_bytes: 1,
      body: vec![],
    }
  }

  #[test]
  fn exact_match_wins_over_default() {
    let mut router = Router::new();
    router.set(1, 13, Arc::new(|_| Ok(Some(vec![1]))));
    router.set_default(Arc::new(|_| Ok(Some(vec![2]))));
    let handler = router.find(1, 13).unwrap();
    assert_eq!(handler(&message(1, 13)).unwrap(), Some(vec![1]));
    let fallback = router.find(9, 1).unwrap();
    assert_eq!(fallback(&message(9, 1)).unwrap(), Some(vec![2]));
  }

  #[test]
  fn erased_handler_falls_back_to_default_or_nothing() {
    let mut router = Router::new();
    router.set(1, 13, Arc::new(|_| Ok(None)));
    router.erase(1, 13);
    assert!(router.find(1, 13).is_none());
    router.set_default(Arc::new(|_| Ok(None)));
    assert!(router.find(1, 13).is_some());
    router.clear_default();
    assert!(router.find(1, 13).is_none());
  }
}
