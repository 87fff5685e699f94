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

//! # LINK & DATA MESSAGE

use crate::Error;
use std::time::Duration;

/// ## LINK
/// **Based on SEMI E4§5**
///
/// The byte-level contract consumed by the SECS-I transport. A [Link] is
/// typically backed by a serial port, but any half-duplex byte pipe will do:
/// the transport requires only whole-buffer writes and single-byte reads
/// with an optional deadline.
///
/// Implementations must be [Send]: the transport moves its [Link] onto the
/// thread which owns the half-duplex state machine.
///
/// [Link]: Link
pub trait Link: Send {
  /// ### WRITE
  ///
  /// Writes the entire buffer to the line.
  fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

  /// ### READ BYTE
  ///
  /// Reads a single byte, waiting up to `timeout` for it to arrive.
  /// [None] waits indefinitely. Returns [Timeout] when the deadline elapses
  /// without receipt.
  ///
  /// [Timeout]: Error::Timeout
  fn read_byte(&mut self, timeout: Option<Duration>) -> Result<u8, Error>;
}

/// ## DATA MESSAGE
///
/// The transport-agnostic form of a SECS-II data message: the header fields
/// shared by the SECS-I block header and the HSMS message header, and the
/// raw encoded SECS-II body. The body is deliberately kept as bytes here;
/// decoding it into an item tree is the business of whichever layer needs
/// the structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataMessage {
  /// ### STREAM
  ///
  /// Message category, 0 through 127.
  pub stream: u8,

  /// ### FUNCTION
  ///
  /// Message within the category. Odd functions are primary messages, even
  /// functions are secondary (reply) messages.
  pub function: u8,

  /// ### REPLY BIT
  ///
  /// True when the sender of a primary message expects a secondary reply.
  pub w_bit: bool,

  /// ### SYSTEM BYTES
  ///
  /// Identifies a transaction uniquely among the set of open transactions.
  /// A secondary message echoes the system bytes of its primary.
  pub system_bytes: u32,

  /// ### BODY
  ///
  /// Raw encoded SECS-II item data. May be empty, which is the conventional
  /// encoding of a header-only message.
  pub body: Vec<u8>,
}
impl DataMessage {
  /// ### PRIMARY MESSAGE
  ///
  /// Whether this message is a primary (odd-functioned) message.
  pub fn is_primary(&self) -> bool {
    self.function % 2 == 1
  }

  /// ### REPLY FUNCTION
  ///
  /// The function number of the secondary message answering this primary.
  pub fn reply_function(&self) -> u8 {
    self.function.wrapping_add(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parity_identifies_primaries() {
    let message = DataMessage {
      stream: 1,
      function: 13,
      w_bit: true,
      system_bytes: 7,
      body: vec![],
    };
    assert!(message.is_primary());
    assert_eq!(message.reply_function(), 14);
  }
}
