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

//! # SECS-II ITEM CODEC
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! **Based on:**
//! - **[SEMI E5]-0712**
//!
//! ---------------------------------------------------------------------------
//!
//! SECS-II is the data format used by the SECS-I ([SEMI E4]) and HSMS
//! ([SEMI E37]) protocols to exchange structured data between semiconductor
//! equipment.
//!
//! This crate provides:
//!
//! - The [Item], a tagged tree of fourteen typed data formats.
//! - [Item Encoding], producing the length-prefixed binary form.
//! - [Item Decoding], a bounded, non-recursive parser governed by
//!   [Decode Limits] so hostile input cannot exhaust the decoder.
//! - The [Message], pairing a stream, function, and reply bit with an
//!   optional [Item] body.
//!
//! [SEMI E4]:  https://store-us.semi.org/products/e00400-semi-e4-specification-for-semi-equipment-communications-standard-1-message-transfer-secs-i
//! [SEMI E5]:  https://store-us.semi.org/products/e00500-semi-e5-specification-for-semi-equipment-communications-standard-2-message-content-secs-ii
//! [SEMI E37]: https://store-us.semi.org/products/e03700-semi-e37-high-speed-secs-message-services-hsms-generic-services
//!
//! [Item]:          Item
//! [Item Encoding]: Item::encode
//! [Item Decoding]: decode_one
//! [Decode Limits]: DecodeLimits
//! [Message]:       Message

mod decode;
mod item;

pub use decode::{decode, decode_one, DecodeLimits};
pub use item::{format, Item};

use secs_core::DataMessage;
use thiserror::Error;

/// ## ERROR
///
/// Failure modes of the item codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
  /// ### TRUNCATED
  ///
  /// The input ended before the bytes declared by an item header arrived.
  #[error("truncated item data")]
  Truncated,

  /// ### INVALID HEADER
  ///
  /// A format byte carried an unknown format code, zero length bytes, or a
  /// payload length inconsistent with the element width.
  #[error("invalid item header")]
  InvalidHeader,

  /// ### LIMIT EXCEEDED
  ///
  /// A configured [Decode Limits] bound, or the 3-byte length ceiling during
  /// encoding, was exceeded. Oversized data is rejected, never truncated.
  ///
  /// [Decode Limits]: DecodeLimits
  #[error("item limit exceeded")]
  LimitExceeded,

  /// ### CORE
  #[error(transparent)]
  Core(#[from] secs_core::Error),
}

/// ## MESSAGE
/// **Based on SEMI E5§6**
///
/// A SECS-II message: the (stream, function) pair identifying its category,
/// the reply bit, and an optional [Item] body. The transports carry the body
/// in encoded form; this type is the decoded view used at API edges.
///
/// [Item]: Item
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
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

  /// ### BODY
  ///
  /// The message body. [None] encodes to an empty body, the conventional
  /// form of a header-only message.
  pub body: Option<Item>,
}
impl Message {
  /// ### MESSAGE -> DATA MESSAGE
  ///
  /// Encodes the body and attaches the given system bytes, producing the
  /// transport-agnostic form.
  pub fn to_data_message(&self, system_bytes: u32) -> Result<DataMessage, Error> {
    Ok(DataMessage {
      stream: self.stream,
      function: self.function,
      w_bit: self.w_bit,
      system_bytes,
      body: match &self.body {
        Some(item) => item.encode()?,
        None => vec![],
      },
    })
  }

  /// ### DATA MESSAGE -> MESSAGE
  ///
  /// Decodes the body of a transport-level data message. An empty body
  /// becomes [None].
  pub fn from_data_message(message: &DataMessage, limits: &DecodeLimits) -> Result<Message, Error> {
    Ok(Message {
      stream: message.stream,
      function: message.function,
      w_bit: message.w_bit,
      body: if message.body.is_empty() {
        None
      } else {
        Some(decode(&message.body, limits)?)
      },
    })
  }
}
