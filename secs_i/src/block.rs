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

//! # BLOCK CODEC, SEGMENTATION & REASSEMBLY

use crate::{Error, Role};
use secs_core::DataMessage;

/// ## HANDSHAKE BYTES
/// **Based on SEMI E4§5.4**
///
/// The single-byte handshake tokens of the half-duplex line protocol.
pub const ENQ: u8 = 0x05;
/// See [ENQ].
pub const EOT: u8 = 0x04;
/// See [ENQ].
pub const ACK: u8 = 0x06;
/// See [ENQ].
pub const NAK: u8 = 0x15;

/// ## MAXIMUM BLOCK TEXT
/// **Based on SEMI E4§7.2**
///
/// A block carries at most 244 text bytes: the length byte counts the
/// 10-byte header plus text and must not exceed 254.
pub const MAX_BLOCK_TEXT: usize = 244;

/// The highest block number expressible in the 15-bit field.
const MAX_BLOCK_NUMBER: u16 = 0x7FFF;

/// ## BLOCK HEADER
/// **Based on SEMI E4§7.3**
///
/// The 10-byte header leading every block:
///
/// ```text
/// R|DeviceID-hi, DeviceID-lo, W|Stream, Function,
/// E|BlockNum-hi, BlockNum-lo, SystemBytes (4, big-endian)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
  /// ### R-BIT
  ///
  /// Direction: set when the block travels from equipment to host.
  pub r_bit: bool,

  /// ### DEVICE ID
  ///
  /// 15-bit equipment identifier.
  pub device_id: u16,

  /// ### REPLY BIT
  pub w_bit: bool,

  /// ### STREAM
  pub stream: u8,

  /// ### FUNCTION
  pub function: u8,

  /// ### E-BIT
  ///
  /// Set on the final block of a message.
  pub e_bit: bool,

  /// ### BLOCK NUMBER
  ///
  /// 15-bit counter, starting at 1 for the first block of each message.
  pub block_number: u16,

  /// ### SYSTEM BYTES
  ///
  /// Shared by every block of one message.
  pub system_bytes: u32,
}
impl From<BlockHeader> for [u8; 10] {
  /// ### SERIALIZE BLOCK HEADER
  fn from(val: BlockHeader) -> Self {
    let mut bytes: [u8; 10] = [0; 10];
    bytes[0] = ((val.r_bit as u8) << 7) | ((val.device_id >> 8) as u8 & 0x7F);
    bytes[1] = val.device_id as u8;
    bytes[2] = ((val.w_bit as u8) << 7) | (val.stream & 0x7F);
    bytes[3] = val.function;
    bytes[4] = ((val.e_bit as u8) << 7) | ((val.block_number >> 8) as u8 & 0x7F);
    bytes[5] = val.block_number as u8;
    bytes[6..10].copy_from_slice(&val.system_bytes.to_be_bytes());
    bytes
  }
}
impl From<[u8; 10]> for BlockHeader {
  /// ### DESERIALIZE BLOCK HEADER
  fn from(bytes: [u8; 10]) -> Self {
    BlockHeader {
      r_bit: bytes[0] & 0x80 > 0,
      device_id: (((bytes[0] & 0x7F) as u16) << 8) | bytes[1] as u16,
      w_bit: bytes[2] & 0x80 > 0,
      stream: bytes[2] & 0x7F,
      function: bytes[3],
      e_bit: bytes[4] & 0x80 > 0,
      block_number: (((bytes[4] & 0x7F) as u16) << 8) | bytes[5] as u16,
      system_bytes: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
    }
  }
}

/// ## CHECKSUM
/// **Based on SEMI E4§7.4**
///
/// The unsigned 16-bit sum of the length-counted region (header plus text),
/// modulo 2^16.
pub fn checksum(region: &[u8]) -> u16 {
  region.iter().fold(0u16, |sum, byte| sum.wrapping_add(*byte as u16))
}

/// ## NEXT BLOCK NUMBER
///
/// Block numbers are 15 bits wide and skip zero when wrapping.
pub fn next_block_number(block_number: u16) -> u16 {
  if block_number >= MAX_BLOCK_NUMBER {
    1
  } else {
    block_number + 1
  }
}

/// ## ENCODE BLOCK
/// **Based on SEMI E4§7.2-7.4**
///
/// Produces the on-wire form of one block: length byte, header, text, and
/// big-endian checksum. The text must fit a single block.
pub fn encode_block(header: BlockHeader, text: &[u8]) -> Vec<u8> {
  debug_assert!(text.len() <= MAX_BLOCK_TEXT);
  let mut vec: Vec<u8> = Vec::with_capacity(1 + 10 + text.len() + 2);
  vec.push((10 + text.len()) as u8);
  let header_bytes: [u8; 10] = header.into();
  vec.extend_from_slice(&header_bytes);
  vec.extend_from_slice(text);
  let sum = checksum(&vec[1..]);
  vec.extend_from_slice(&sum.to_be_bytes());
  vec
}

/// ## SEGMENT MESSAGE INTO BLOCKS
/// **Based on SEMI E4§8.2**
///
/// Splits a message body into consecutive encoded blocks of at most
/// [MAX BLOCK TEXT] bytes. Block numbers are contiguous from 1 and only the
/// final block carries the E-bit; all blocks share the message's system
/// bytes. An empty body still produces one (empty) block.
///
/// [MAX BLOCK TEXT]: MAX_BLOCK_TEXT
pub fn segment(message: &DataMessage, role: Role, device_id: u16) -> Vec<Vec<u8>> {
  let chunks: Vec<&[u8]> = if message.body.is_empty() {
    vec![&[] as &[u8]]
  } else {
    message.body.chunks(MAX_BLOCK_TEXT).collect()
  };
  let last = chunks.len() - 1;
  let mut block_number: u16 = 1;
  let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(chunks.len());
  for (index, chunk) in chunks.iter().enumerate() {
    let header = BlockHeader {
      r_bit: role.r_bit(),
      device_id,
      w_bit: message.w_bit,
      stream: message.stream,
      function: message.function,
      e_bit: index == last,
      block_number,
      system_bytes: message.system_bytes,
    };
    blocks.push(encode_block(header, chunk));
    block_number = next_block_number(block_number);
  }
  blocks
}

/// ## ASSEMBLER
/// **Based on SEMI E4§8.3**
///
/// Reassembles the blocks of one message in block-number order. Gaps,
/// duplicates, and header fields disagreeing with the first block abort the
/// assembly.
#[derive(Debug, Default)]
pub struct Assembler {
  text: Vec<u8>,
  open: Option<OpenAssembly>,
}

#[derive(Debug)]
struct OpenAssembly {
  first: BlockHeader,
  next_block_number: u16,
}

impl Assembler {
  /// ### NEW ASSEMBLER
  pub fn new() -> Self {
    Assembler::default()
  }

  /// ### IN PROGRESS
  ///
  /// Whether a multi-block message is partially assembled.
  pub fn in_progress(&self) -> bool {
    self.open.is_some()
  }

  /// ### PUSH BLOCK
  ///
  /// Accepts the next verified block. Returns the completed message and its
  /// device identifier when the block carried the E-bit. Any reassembly
  /// failure clears the assembly before returning the error.
  pub fn push(
    &mut self,
    header: BlockHeader,
    text: &[u8],
  ) -> Result<Option<(u16, DataMessage)>, Error> {
    match &self.open {
      None => {
        // The first block of a message is number 1, or 0, which some
        // implementations emit for single-block messages.
        if header.block_number > 1 {
          return Err(Error::ReassemblyError);
        }
        self.open = Some(OpenAssembly {
          first: header,
          next_block_number: next_block_number(header.block_number),
        });
      },
      Some(open) => {
        let first = open.first;
        if header.system_bytes != first.system_bytes
          || header.stream != first.stream
          || header.function != first.function
          || header.w_bit != first.w_bit
          || header.device_id != first.device_id
        {
          self.reset();
          return Err(Error::ReassemblyError);
        }
        if header.block_number != open.next_block_number {
          self.reset();
          return Err(Error::ReassemblyError);
        }
        if let Some(open) = &mut self.open {
          open.next_block_number = next_block_number(header.block_number);
        }
      },
    }
    self.text.extend_from_slice(text);
    if !header.e_bit {
      return Ok(None);
    }
    let first = match self.open.take() {
      Some(open) => open.first,
      None => header,
    };
    let text = std::mem::take(&mut self.text);
    Ok(Some((
      first.device_id,
      DataMessage {
        stream: first.stream,
        function: first.function,
        w_bit: first.w_bit,
        system_bytes: first.system_bytes,
        body: text,
      },
    )))
  }

  /// ### RESET
  ///
  /// Discards any partial assembly.
  pub fn reset(&mut self) {
    self.text.clear();
    self.open = None;
  }
}
