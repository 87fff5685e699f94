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

//! In-memory byte link: a crossed pair of channels standing in for the
//! serial line.

use secs_core::{Error, Link};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub struct ChannelLink {
  tx: Sender<u8>,
  rx: Receiver<u8>,
}

impl Link for ChannelLink {
  fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
    for byte in bytes {
      self.tx.send(*byte).map_err(|_| Error::Cancelled)?;
    }
    Ok(())
  }

  fn read_byte(&mut self, timeout: Option<Duration>) -> Result<u8, Error> {
    match timeout {
      Some(duration) => self.rx.recv_timeout(duration).map_err(|error| match error {
        RecvTimeoutError::Timeout => Error::Timeout,
        RecvTimeoutError::Disconnected => Error::Cancelled,
      }),
      None => self.rx.recv().map_err(|_| Error::Cancelled),
    }
  }
}

impl ChannelLink {
  /// Reads exactly `n` bytes, panicking on timeout. Scripted peers use
  /// this to assert the engine's wire behavior.
  pub fn read_exact(&mut self, n: usize) -> Vec<u8> {
    (0..n)
      .map(|_| self.read_byte(Some(Duration::from_secs(2))).expect("byte due from engine"))
      .collect()
  }
}

/// A crossed pair: what one side writes, the other reads.
pub fn link_pair() -> (ChannelLink, ChannelLink) {
  let (a_tx, b_rx) = channel::<u8>();
  let (b_tx, a_rx) = channel::<u8>();
  (ChannelLink { tx: a_tx, rx: a_rx }, ChannelLink { tx: b_tx, rx: b_rx })
}
