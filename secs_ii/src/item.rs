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

//! # GENERIC ITEM

use crate::Error;

/// Items longer than this cannot express their length in the 3 length bytes
/// the item header affords.
pub const MAX_ITEM_LENGTH: usize = 0xFF_FFFF;

/// ## ITEM FORMAT
/// **Based on SEMI E5§9.2.2**
///
/// Format codes, pre-shifted into the upper six bits of the format byte.
/// The lower two bits of the format byte carry the number of length bytes.
pub mod format {
  /// ### LIST
  ///
  /// **Format Code 0o00**
  pub const LIST: u8 = 0b000000_00;

  /// ### BINARY
  ///
  /// **Format Code 0o10**
  pub const BIN: u8 = 0b001000_00;

  /// ### BOOLEAN
  ///
  /// **Format Code 0o11**
  pub const BOOL: u8 = 0b001001_00;

  /// ### ASCII
  ///
  /// **Format Code 0o20**
  pub const ASCII: u8 = 0b010000_00;

  /// ### 8-BYTE SIGNED INTEGER
  ///
  /// **Format Code 0o30**
  pub const I8: u8 = 0b011000_00;

  /// ### 1-BYTE SIGNED INTEGER
  ///
  /// **Format Code 0o31**
  pub const I1: u8 = 0b011001_00;

  /// ### 2-BYTE SIGNED INTEGER
  ///
  /// **Format Code 0o32**
  pub const I2: u8 = 0b011010_00;

  /// ### 4-BYTE SIGNED INTEGER
  ///
  /// **Format Code 0o34**
  pub const I4: u8 = 0b011100_00;

  /// ### 8-BYTE FLOATING POINT NUMBER
  ///
  /// **Format Code 0o40**
  pub const F8: u8 = 0b100000_00;

  /// ### 4-BYTE FLOATING POINT NUMBER
  ///
  /// **Format Code 0o44**
  pub const F4: u8 = 0b100100_00;

  /// ### 8-BYTE UNSIGNED INTEGER
  ///
  /// **Format Code 0o50**
  pub const U8: u8 = 0b101000_00;

  /// ### 1-BYTE UNSIGNED INTEGER
  ///
  /// **Format Code 0o51**
  pub const U1: u8 = 0b101001_00;

  /// ### 2-BYTE UNSIGNED INTEGER
  ///
  /// **Format Code 0o52**
  pub const U2: u8 = 0b101010_00;

  /// ### 4-BYTE UNSIGNED INTEGER
  ///
  /// **Format Code 0o54**
  pub const U4: u8 = 0b101100_00;
}

/// ## GENERIC ITEM
/// **Based on SEMI E5§9**
///
/// An [Item] is an information packet with a header of 2 to 4 bytes:
///
/// - Bits 1 to 2 of the format byte tell how many of the following bytes
///   carry the item length, big-endian.
/// - Bits 3 to 8 of the format byte carry the format code.
/// - The item length counts the bytes of the item body, except for a
///   [List], where it counts the number of contained [Item]s.
///
/// Numeric array formats pack their elements big-endian; the element count
/// is the byte length divided by the element width.
///
/// [Item]: Item
/// [List]: Item::List
#[repr(u8)]
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
  /// ### LIST
  /// **Based on SEMI E5§9.3**
  ///
  /// An ordered set of elements, where elements are [Item]s.
  ///
  /// [Item]: Item
  List(Vec<Item>) = format::LIST,

  /// ### ASCII
  ///
  /// ASCII character string, kept as raw bytes.
  Ascii(Vec<u8>) = format::ASCII,

  /// ### BINARY
  ///
  /// Single-byte quantity where the value can be anything and does not
  /// otherwise have a strictly defined meaning.
  Bin(Vec<u8>) = format::BIN,

  /// ### BOOLEAN
  ///
  /// Single-byte quantity where 0 is 'false' and any non-zero value is
  /// 'true'. The encoder emits 0 and 1.
  Bool(Vec<bool>) = format::BOOL,

  /// ### 1-BYTE SIGNED INTEGER
  I1(Vec<i8>) = format::I1,

  /// ### 2-BYTE SIGNED INTEGER
  I2(Vec<i16>) = format::I2,

  /// ### 4-BYTE SIGNED INTEGER
  I4(Vec<i32>) = format::I4,

  /// ### 8-BYTE SIGNED INTEGER
  I8(Vec<i64>) = format::I8,

  /// ### 1-BYTE UNSIGNED INTEGER
  U1(Vec<u8>) = format::U1,

  /// ### 2-BYTE UNSIGNED INTEGER
  U2(Vec<u16>) = format::U2,

  /// ### 4-BYTE UNSIGNED INTEGER
  U4(Vec<u32>) = format::U4,

  /// ### 8-BYTE UNSIGNED INTEGER
  U8(Vec<u64>) = format::U8,

  /// ### 4-BYTE FLOATING POINT NUMBER
  ///
  /// IEEE-754 single precision.
  F4(Vec<f32>) = format::F4,

  /// ### 8-BYTE FLOATING POINT NUMBER
  ///
  /// IEEE-754 double precision.
  F8(Vec<f64>) = format::F8,
}

/// ## SINGLE-VALUE CONSTRUCTORS
///
/// Most item payloads in practice hold a single value; these constructors
/// provide convenient syntax for that case.
impl Item {
  /// ### ASCII ITEM FROM STRING DATA
  pub fn ascii(value: impl Into<Vec<u8>>) -> Self {
    Self::Ascii(value.into())
  }

  /// ### SINGLE BINARY ITEM
  pub fn bin(value: u8) -> Self {
    Self::Bin(vec![value])
  }

  /// ### SINGLE BOOLEAN ITEM
  pub fn bool(value: bool) -> Self {
    Self::Bool(vec![value])
  }

  /// ### SINGLE 1-BYTE SIGNED INTEGER ITEM
  pub fn i1(value: i8) -> Self {
    Self::I1(vec![value])
  }

  /// ### SINGLE 2-BYTE SIGNED INTEGER ITEM
  pub fn i2(value: i16) -> Self {
    Self::I2(vec![value])
  }

  /// ### SINGLE 4-BYTE SIGNED INTEGER ITEM
  pub fn i4(value: i32) -> Self {
    Self::I4(vec![value])
  }

  /// ### SINGLE 8-BYTE SIGNED INTEGER ITEM
  pub fn i8(value: i64) -> Self {
    Self::I8(vec![value])
  }

  /// ### SINGLE 1-BYTE UNSIGNED INTEGER ITEM
  pub fn u1(value: u8) -> Self {
    Self::U1(vec![value])
  }

  /// ### SINGLE 2-BYTE UNSIGNED INTEGER ITEM
  pub fn u2(value: u16) -> Self {
    Self::U2(vec![value])
  }

  /// ### SINGLE 4-BYTE UNSIGNED INTEGER ITEM
  pub fn u4(value: u32) -> Self {
    Self::U4(vec![value])
  }

  /// ### SINGLE 8-BYTE UNSIGNED INTEGER ITEM
  pub fn u8(value: u64) -> Self {
    Self::U8(vec![value])
  }

  /// ### SINGLE 4-BYTE FLOATING POINT NUMBER ITEM
  pub fn f4(value: f32) -> Self {
    Self::F4(vec![value])
  }

  /// ### SINGLE 8-BYTE FLOATING POINT NUMBER ITEM
  pub fn f8(value: f64) -> Self {
    Self::F8(vec![value])
  }

  /// ### LIST ITEM FROM ELEMENTS
  pub fn list(items: impl Into<Vec<Item>>) -> Self {
    Self::List(items.into())
  }
}

impl Item {
  /// ### FORMAT CODE
  ///
  /// The pre-shifted [Item Format] code of this item.
  ///
  /// [Item Format]: format
  pub fn format_code(&self) -> u8 {
    match self {
      Item::List(_) => format::LIST,
      Item::Ascii(_) => format::ASCII,
      Item::Bin(_) => format::BIN,
      Item::Bool(_) => format::BOOL,
      Item::I1(_) => format::I1,
      Item::I2(_) => format::I2,
      Item::I4(_) => format::I4,
      Item::I8(_) => format::I8,
      Item::U1(_) => format::U1,
      Item::U2(_) => format::U2,
      Item::U4(_) => format::U4,
      Item::U8(_) => format::U8,
      Item::F4(_) => format::F4,
      Item::F8(_) => format::F8,
    }
  }

  /// ### ITEM -> BINARY DATA
  /// **Based on SEMI E5§9.2-9.3**
  ///
  /// Encodes this item and all nested items into the length-prefixed binary
  /// form. Items whose length cannot be expressed in 3 length bytes are
  /// rejected with [Limit Exceeded] rather than truncated.
  ///
  /// [Limit Exceeded]: crate::Error::LimitExceeded
  pub fn encode(&self) -> Result<Vec<u8>, Error> {
    let mut vec: Vec<u8> = vec![];
    self.encode_into(&mut vec)?;
    Ok(vec)
  }

  fn encode_into(&self, vec: &mut Vec<u8>) -> Result<(), Error> {
    match self {
      // List: the length counts elements, and each element encodes itself
      // behind the header.
      Item::List(item_vec) => {
        push_header(vec, format::LIST, item_vec.len())?;
        for item in item_vec {
          item.encode_into(vec)?;
        }
      },
      Item::Ascii(ascii_vec) => {
        push_header(vec, format::ASCII, ascii_vec.len())?;
        vec.extend_from_slice(ascii_vec);
      },
      Item::Bin(bin_vec) => {
        push_header(vec, format::BIN, bin_vec.len())?;
        vec.extend_from_slice(bin_vec);
      },
      Item::Bool(bool_vec) => {
        push_header(vec, format::BOOL, bool_vec.len())?;
        for value in bool_vec {
          vec.push(*value as u8);
        }
      },
      Item::I1(i1_vec) => {
        push_header(vec, format::I1, i1_vec.len())?;
        for value in i1_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::I2(i2_vec) => {
        push_header(vec, format::I2, i2_vec.len() * 2)?;
        for value in i2_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::I4(i4_vec) => {
        push_header(vec, format::I4, i4_vec.len() * 4)?;
        for value in i4_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::I8(i8_vec) => {
        push_header(vec, format::I8, i8_vec.len() * 8)?;
        for value in i8_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::U1(u1_vec) => {
        push_header(vec, format::U1, u1_vec.len())?;
        vec.extend_from_slice(u1_vec);
      },
      Item::U2(u2_vec) => {
        push_header(vec, format::U2, u2_vec.len() * 2)?;
        for value in u2_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::U4(u4_vec) => {
        push_header(vec, format::U4, u4_vec.len() * 4)?;
        for value in u4_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::U8(u8_vec) => {
        push_header(vec, format::U8, u8_vec.len() * 8)?;
        for value in u8_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::F4(f4_vec) => {
        push_header(vec, format::F4, f4_vec.len() * 4)?;
        for value in f4_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
      Item::F8(f8_vec) => {
        push_header(vec, format::F8, f8_vec.len() * 8)?;
        for value in f8_vec {
          vec.extend_from_slice(&value.to_be_bytes());
        }
      },
    }
    Ok(())
  }
}

/// Pushes a format byte and the shortest length encoding able to carry
/// `length`.
fn push_header(vec: &mut Vec<u8>, format_code: u8, length: usize) -> Result<(), Error> {
  if length > MAX_ITEM_LENGTH {
    return Err(Error::LimitExceeded);
  }
  if length < 256 {
    vec.push(format_code | 1);
    vec.push(length as u8);
  } else if length < 65536 {
    vec.push(format_code | 2);
    vec.extend_from_slice(&(length as u16).to_be_bytes());
  } else {
    vec.push(format_code | 3);
    vec.extend_from_slice(&(length as u32).to_be_bytes()[1..4]);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_uses_shortest_length_encoding() {
    assert_eq!(Item::Bin(vec![0; 255]).encode().unwrap()[0], format::BIN | 1);
    assert_eq!(Item::Bin(vec![0; 256]).encode().unwrap()[0], format::BIN | 2);
    assert_eq!(Item::Bin(vec![0; 65536]).encode().unwrap()[0], format::BIN | 3);
  }

  #[test]
  fn oversized_item_is_rejected_not_truncated() {
    let item = Item::Bin(vec![0; MAX_ITEM_LENGTH + 1]);
    assert_eq!(item.encode(), Err(Error::LimitExceeded));
  }

  #[test]
  fn empty_list_encodes_to_bare_header() {
    assert_eq!(Item::List(vec![]).encode().unwrap(), vec![format::LIST | 1, 0]);
  }

  #[test]
  fn booleans_encode_as_zero_and_one() {
    let encoded = Item::Bool(vec![true, false, true]).encode().unwrap();
    assert_eq!(encoded, vec![format::BOOL | 1, 3, 1, 0, 1]);
  }

  #[test]
  fn numeric_arrays_pack_big_endian() {
    let encoded = Item::U2(vec![0x1234, 0xABCD]).encode().unwrap();
    assert_eq!(encoded, vec![format::U2 | 1, 4, 0x12, 0x34, 0xAB, 0xCD]);
  }
}
