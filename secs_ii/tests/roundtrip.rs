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

//! Property test: any well-formed item within the default limits survives
//! encode-then-decode exactly, and decoding consumes exactly the encoding.

use proptest::collection::vec;
use proptest::prelude::*;
use secs_ii::{decode_one, DecodeLimits, Item};

/// Leaf items over all thirteen non-list formats. Float values are drawn
/// from ranges so NaN never enters the comparison.
fn arb_leaf() -> impl Strategy<Value = Item> {
  prop_oneof![
    vec(any::<u8>(), 0..24).prop_map(Item::Ascii),
    vec(any::<u8>(), 0..24).prop_map(Item::Bin),
    vec(any::<bool>(), 0..24).prop_map(Item::Bool),
    vec(any::<i8>(), 0..24).prop_map(Item::I1),
    vec(any::<i16>(), 0..24).prop_map(Item::I2),
    vec(any::<i32>(), 0..24).prop_map(Item::I4),
    vec(any::<i64>(), 0..24).prop_map(Item::I8),
    vec(any::<u8>(), 0..24).prop_map(Item::U1),
    vec(any::<u16>(), 0..24).prop_map(Item::U2),
    vec(any::<u32>(), 0..24).prop_map(Item::U4),
    vec(any::<u64>(), 0..24).prop_map(Item::U8),
    vec(-1.0e30f32..1.0e30f32, 0..24).prop_map(Item::F4),
    vec(-1.0e300f64..1.0e300f64, 0..24).prop_map(Item::F8),
  ]
}

fn arb_item() -> impl Strategy<Value = Item> {
  arb_leaf().prop_recursive(6, 64, 8, |inner| {
    vec(inner, 0..8).prop_map(Item::List)
  })
}

proptest! {
  #[test]
  fn encode_then_decode_is_identity(item in arb_item()) {
    let encoded = item.encode().unwrap();
    let (decoded, consumed) = decode_one(&encoded, &DecodeLimits::default()).unwrap();
    prop_assert_eq!(decoded, item);
    prop_assert_eq!(consumed, encoded.len());
  }
}
