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

//! # BOUNDED ITEM DECODING

use crate::item::{format, Item, MAX_ITEM_LENGTH};
use crate::Error;
use num_enum::TryFromPrimitive;
use tracing::trace;

/// ## DECODE LIMITS
///
/// Bounds enforced while decoding. Input arrives from the network, so every
/// quantity a header declares is checked against these before any storage
/// for it is allocated.
#[derive(Clone, Copy, Debug)]
pub struct DecodeLimits {
  /// ### MAXIMUM LIST NESTING DEPTH
  pub max_depth: usize,

  /// ### MAXIMUM ELEMENTS PER LIST
  pub max_list_items: usize,

  /// ### MAXIMUM PAYLOAD BYTES PER ITEM
  pub max_payload_bytes: usize,

  /// ### MAXIMUM ITEMS PER DECODE
  ///
  /// Cumulative over the whole tree, nested items included.
  pub max_total_items: usize,

  /// ### MAXIMUM BYTES PER DECODE
  ///
  /// Cumulative bytes consumed, headers included.
  pub max_total_bytes: usize,
}
impl Default for DecodeLimits {
  fn default() -> Self {
    DecodeLimits {
      max_depth: 64,
      max_list_items: 65_535,
      max_payload_bytes: MAX_ITEM_LENGTH,
      max_total_items: 1_000_000,
      max_total_bytes: 16 * 1024 * 1024,
    }
  }
}

/// ## FORMAT CODE
///
/// The unshifted six-bit format codes, used to validate inbound format
/// bytes. The pre-shifted forms live in [format].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
enum FormatCode {
  List = format::LIST >> 2,
  Bin = format::BIN >> 2,
  Bool = format::BOOL >> 2,
  Ascii = format::ASCII >> 2,
  I8 = format::I8 >> 2,
  I1 = format::I1 >> 2,
  I2 = format::I2 >> 2,
  I4 = format::I4 >> 2,
  F8 = format::F8 >> 2,
  F4 = format::F4 >> 2,
  U8 = format::U8 >> 2,
  U1 = format::U1 >> 2,
  U2 = format::U2 >> 2,
  U4 = format::U4 >> 2,
}

/// ## BINARY DATA -> ITEM
/// **Based on SEMI E5§9.2-9.3**
///
/// Decodes one [Item] from the front of `bytes`, returning it along with the
/// number of bytes consumed. Trailing bytes are left for the caller.
///
/// The walk is iterative: nested lists are tracked on an explicit stack
/// rather than the call stack, so hostile nesting depth cannot overflow it,
/// and every declared quantity is validated against `limits` before any
/// allocation occurs.
///
/// [Item]: Item
pub fn decode_one(bytes: &[u8], limits: &DecodeLimits) -> Result<(Item, usize), Error> {
  let mut pos: usize = 0;
  let mut total_items: usize = 0;
  // Lists whose elements are still arriving: collected elements plus the
  // declared element count.
  let mut stack: Vec<(Vec<Item>, usize)> = vec![];

  loop {
    // ITEM HEADER
    //
    // Format byte, then 1 to 3 big-endian length bytes. Zero length bytes
    // is expressly invalid, which also rejects the 0xFF format byte.
    if pos >= bytes.len() {
      return Err(Error::Truncated);
    }
    let format_byte = bytes[pos];
    let length_bytes = (format_byte & 0b000000_11) as usize;
    if length_bytes == 0 {
      return Err(Error::InvalidHeader);
    }
    let code = FormatCode::try_from(format_byte >> 2).map_err(|_| Error::InvalidHeader)?;
    if pos + 1 + length_bytes > bytes.len() {
      return Err(Error::Truncated);
    }
    let mut length: usize = 0;
    for byte in &bytes[pos + 1..pos + 1 + length_bytes] {
      length = (length << 8) | *byte as usize;
    }
    pos += 1 + length_bytes;

    total_items += 1;
    if total_items > limits.max_total_items {
      return Err(Error::LimitExceeded);
    }
    if pos > limits.max_total_bytes {
      return Err(Error::LimitExceeded);
    }

    // ITEM BODY
    //
    // A non-empty list opens a new stack level and produces no item yet;
    // everything else completes an item immediately.
    let completed: Item = match code {
      FormatCode::List => {
        if length > limits.max_list_items {
          return Err(Error::LimitExceeded);
        }
        if length > 0 {
          if stack.len() + 1 > limits.max_depth {
            return Err(Error::LimitExceeded);
          }
          stack.push((Vec::with_capacity(length), length));
          continue;
        }
        Item::List(vec![])
      },
      _ => {
        if length > limits.max_payload_bytes {
          return Err(Error::LimitExceeded);
        }
        if pos + length > bytes.len() {
          return Err(Error::Truncated);
        }
        if pos + length > limits.max_total_bytes {
          return Err(Error::LimitExceeded);
        }
        let payload = &bytes[pos..pos + length];
        pos += length;
        parse_scalar(code, payload)?
      },
    };

    // ITEM COMPLETION
    //
    // A completed item either finishes the decode, or joins the innermost
    // open list, possibly completing that list, and so on outward.
    let mut item = completed;
    loop {
      match stack.last_mut() {
        None => {
          trace!(target: "secs_ii", consumed = pos, total_items, "item decoded");
          return Ok((item, pos));
        },
        Some((elements, declared)) => {
          elements.push(item);
          if elements.len() < *declared {
            break;
          }
          let (elements, _declared) = stack.pop().unwrap();
          item = Item::List(elements);
        },
      }
    }
  }
}

/// ## BINARY DATA -> ITEM, FULLY CONSUMED
///
/// As [decode_one], additionally requiring that the item occupies the whole
/// input. Trailing bytes are an [Invalid Header] error.
///
/// [Invalid Header]: Error::InvalidHeader
pub fn decode(bytes: &[u8], limits: &DecodeLimits) -> Result<Item, Error> {
  let (item, consumed) = decode_one(bytes, limits)?;
  if consumed != bytes.len() {
    return Err(Error::InvalidHeader);
  }
  Ok(item)
}

/// Parses a non-list payload. Byte lengths not divisible by the element
/// width are header errors.
fn parse_scalar(code: FormatCode, payload: &[u8]) -> Result<Item, Error> {
  Ok(match code {
    FormatCode::List => unreachable!("lists are handled by the decode loop"),
    FormatCode::Ascii => Item::Ascii(payload.to_vec()),
    FormatCode::Bin => Item::Bin(payload.to_vec()),
    FormatCode::Bool => Item::Bool(payload.iter().map(|b| *b > 0).collect()),
    FormatCode::I1 => Item::I1(payload.iter().map(|b| *b as i8).collect()),
    FormatCode::U1 => Item::U1(payload.to_vec()),
    FormatCode::I2 => Item::I2(parse_array(payload, i16::from_be_bytes)?),
    FormatCode::I4 => Item::I4(parse_array(payload, i32::from_be_bytes)?),
    FormatCode::I8 => Item::I8(parse_array(payload, i64::from_be_bytes)?),
    FormatCode::U2 => Item::U2(parse_array(payload, u16::from_be_bytes)?),
    FormatCode::U4 => Item::U4(parse_array(payload, u32::from_be_bytes)?),
    FormatCode::U8 => Item::U8(parse_array(payload, u64::from_be_bytes)?),
    FormatCode::F4 => Item::F4(parse_array(payload, f32::from_be_bytes)?),
    FormatCode::F8 => Item::F8(parse_array(payload, f64::from_be_bytes)?),
  })
}

fn parse_array<const W: usize, T>(
  payload: &[u8],
  from_be_bytes: fn([u8; W]) -> T,
) -> Result<Vec<T>, Error> {
  if payload.len() % W != 0 {
    return Err(Error::InvalidHeader);
  }
  Ok(
    payload
      .chunks_exact(W)
      .map(|chunk| {
        let mut bytes = [0u8; W];
        bytes.copy_from_slice(chunk);
        from_be_bytes(bytes)
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn nested_sample() -> Item {
    Item::List(vec![
      Item::u4(123),
      Item::ascii("HELLO"),
      Item::List(vec![Item::U1(vec![1, 2, 3])]),
    ])
  }

  #[test]
  fn nested_list_round_trips_with_expected_bytes() {
    let encoded = nested_sample().encode().unwrap();
    assert_eq!(
      encoded,
      vec![
        0x01, 0x03, // L[3]
        0xB1, 0x04, 0x00, 0x00, 0x00, 0x7B, // U4 123
        0x41, 0x05, 0x48, 0x45, 0x4C, 0x4C, 0x4F, // A "HELLO"
        0x01, 0x01, // L[1]
        0xA5, 0x03, 0x01, 0x02, 0x03, // U1 1 2 3
      ]
    );
    let (decoded, consumed) = decode_one(&encoded, &DecodeLimits::default()).unwrap();
    assert_eq!(decoded, nested_sample());
    assert_eq!(consumed, encoded.len());
  }

  #[test]
  fn zero_length_bytes_is_invalid_header() {
    assert_eq!(
      decode_one(&[format::BIN, 0x00], &DecodeLimits::default()),
      Err(Error::InvalidHeader)
    );
  }

  #[test]
  fn format_byte_ff_is_invalid_header() {
    assert_eq!(
      decode_one(&[0xFF, 0x00, 0x00, 0x00], &DecodeLimits::default()),
      Err(Error::InvalidHeader)
    );
  }

  #[test]
  fn declared_length_past_input_is_truncated() {
    assert_eq!(
      decode_one(&[format::BIN | 1, 10, 0xAA], &DecodeLimits::default()),
      Err(Error::Truncated)
    );
  }

  #[test]
  fn declared_length_past_payload_limit_is_limit_exceeded() {
    let limits = DecodeLimits {
      max_payload_bytes: 4,
      ..DecodeLimits::default()
    };
    let encoded = Item::Bin(vec![0; 5]).encode().unwrap();
    assert_eq!(decode_one(&encoded, &limits), Err(Error::LimitExceeded));
  }

  #[test]
  fn nesting_past_depth_limit_is_limit_exceeded() {
    let mut item = Item::U1(vec![1]);
    for _ in 0..5 {
      item = Item::List(vec![item]);
    }
    let encoded = item.encode().unwrap();
    let deep_enough = DecodeLimits {
      max_depth: 5,
      ..DecodeLimits::default()
    };
    assert!(decode_one(&encoded, &deep_enough).is_ok());
    let too_shallow = DecodeLimits {
      max_depth: 4,
      ..DecodeLimits::default()
    };
    assert_eq!(decode_one(&encoded, &too_shallow), Err(Error::LimitExceeded));
  }

  #[test]
  fn list_element_count_limit_is_enforced_before_allocation() {
    // A list header declaring 2^24-1 elements followed by no data at all:
    // the limit check must fire without trying to collect the elements.
    let bytes = [format::LIST | 3, 0xFF, 0xFF, 0xFF];
    let limits = DecodeLimits {
      max_list_items: 100,
      ..DecodeLimits::default()
    };
    assert_eq!(decode_one(&bytes, &limits), Err(Error::LimitExceeded));
  }

  #[test]
  fn total_item_count_limit_is_enforced() {
    let item = Item::List(vec![Item::u1(1), Item::u1(2), Item::u1(3)]);
    let encoded = item.encode().unwrap();
    let limits = DecodeLimits {
      max_total_items: 3,
      ..DecodeLimits::default()
    };
    assert_eq!(decode_one(&encoded, &limits), Err(Error::LimitExceeded));
  }

  #[test]
  fn odd_numeric_payload_is_invalid_header() {
    assert_eq!(
      decode_one(&[format::U2 | 1, 3, 0, 1, 2], &DecodeLimits::default()),
      Err(Error::InvalidHeader)
    );
  }

  #[test]
  fn decode_rejects_trailing_bytes() {
    let mut encoded = Item::u1(7).encode().unwrap();
    encoded.push(0x00);
    assert_eq!(decode(&encoded, &DecodeLimits::default()), Err(Error::InvalidHeader));
  }

  #[test]
  fn decode_one_reports_consumed_before_trailing_bytes() {
    let mut encoded = Item::u1(7).encode().unwrap();
    let expected = encoded.len();
    encoded.extend_from_slice(&[1, 2, 3]);
    let (item, consumed) = decode_one(&encoded, &DecodeLimits::default()).unwrap();
    assert_eq!(item, Item::u1(7));
    assert_eq!(consumed, expected);
  }

  #[test]
  fn empty_input_is_truncated() {
    assert_eq!(decode_one(&[], &DecodeLimits::default()), Err(Error::Truncated));
  }
}
