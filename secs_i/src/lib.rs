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

//! # SECS-I MESSAGE TRANSFER
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! **Based on:**
//! - **[SEMI E4]-0699**
//!
//! ---------------------------------------------------------------------------
//!
//! SECS-I is a protocol designed to facilitate the reliable transmission of
//! messages between semiconductor equipment over a half-duplex serial line.
//!
//! The protocol is a handshake of single control bytes (ENQ, EOT, ACK, NAK)
//! around checksummed blocks of at most 244 text bytes; messages larger than
//! one block are segmented and reassembled by block number.
//!
//! This crate provides:
//!
//! - The [Block] codec: the 10-byte block header, length byte, and checksum.
//! - [Segmentation] of a message into blocks, and the [Assembler] which
//!   reverses it.
//! - The [Client], which owns a [Link] and runs the half-duplex transaction
//!   state machine on a dedicated thread: callers submit messages with the
//!   [Send Procedure] and drain received messages with the
//!   [Receive Procedure].
//!
//! [SEMI E4]: https://store-us.semi.org/products/e00400-semi-e4-specification-for-semi-equipment-communications-standard-1-message-transfer-secs-i
//!
//! [Link]:              secs_core::Link
//! [Block]:             BlockHeader
//! [Segmentation]:      segment
//! [Assembler]:         Assembler
//! [Client]:            Client
//! [Send Procedure]:    Client::send
//! [Receive Procedure]: Client::receive

mod block;
mod client;

pub use block::{
  checksum, encode_block, next_block_number, segment, Assembler, BlockHeader, ACK, ENQ, EOT,
  MAX_BLOCK_TEXT, NAK,
};
pub use client::{Client, ReceivedMessage};

use std::time::Duration;
use thiserror::Error;

/// ## ERROR
///
/// Failure modes of the SECS-I transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
  /// ### INVALID BLOCK
  ///
  /// A received length byte was outside 10 through 254.
  #[error("invalid block")]
  InvalidBlock,

  /// ### CHECKSUM ERROR
  ///
  /// A received block failed its checksum and the peer exhausted its
  /// retransmissions.
  #[error("checksum error")]
  ChecksumError,

  /// ### NAK EXHAUSTED
  ///
  /// The peer refused a transmitted block with NAK more times than the
  /// retry limit allows.
  #[error("nak exhausted")]
  NakExhausted,

  /// ### PROTOCOL ERROR
  ///
  /// An unexpected handshake byte arrived where only ACK or NAK is valid.
  #[error("protocol error")]
  ProtocolError,

  /// ### REASSEMBLY ERROR
  ///
  /// Blocks of a multi-block message arrived with a gap, a duplicate, or
  /// header fields disagreeing with the first block.
  #[error("reassembly error")]
  ReassemblyError,

  /// ### CORE
  #[error(transparent)]
  Core(#[from] secs_core::Error),
}

/// ## ROLE
/// **Based on SEMI E4§4**
///
/// Which end of the line this entity is. The role determines the R-bit
/// placed in transmitted block headers, and who yields when both entities
/// request the line at once: the equipment defers to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
  /// ### HOST
  Host,

  /// ### EQUIPMENT
  Equipment,
}
impl Role {
  /// ### R-BIT
  ///
  /// The direction bit placed in transmitted block headers: set when the
  /// block travels from equipment to host.
  pub fn r_bit(self) -> bool {
    matches!(self, Role::Equipment)
  }
}

/// ## PARAMETER SETTINGS
/// **Based on SEMI E4§9**
///
/// The configurable timeouts and behaviors of the [Client].
///
/// [Client]: Client
#[derive(Clone, Copy, Debug)]
pub struct ParameterSettings {
  /// ### ROLE
  ///
  /// Host or equipment. Defaults to equipment.
  pub role: Role,

  /// ### DEVICE ID
  ///
  /// The device identifier placed in transmitted block headers.
  pub device_id: u16,

  /// ### EXPECTED DEVICE ID
  ///
  /// When set, received blocks carrying a different device identifier are
  /// noted in the log; the message is still delivered, with its device
  /// identifier attached, for the embedder to judge.
  pub expected_device_id: Option<u16>,

  /// ### T1: INTER-CHARACTER TIMEOUT
  ///
  /// Maximum gap between two characters of a block. Default 500 ms.
  pub t1: Duration,

  /// ### T2: PROTOCOL TIMEOUT
  ///
  /// Maximum gap between ENQ and EOT, between EOT and the first block byte,
  /// and between a block and its ACK or NAK. Default 10 s.
  pub t2: Duration,

  /// ### T3: REPLY TIMEOUT
  ///
  /// Maximum wait for the secondary message answering a primary sent with
  /// the reply bit. Enforced by the layer driving this transport, not by
  /// the block-transfer machine. Default 45 s.
  pub t3: Duration,

  /// ### T4: INTER-BLOCK TIMEOUT
  ///
  /// Maximum gap between consecutive blocks of a multi-block message.
  /// Default 45 s.
  pub t4: Duration,

  /// ### RETRY LIMIT
  ///
  /// How many times a block or an unanswered ENQ is retransmitted before
  /// the transfer fails. Default 3.
  pub retry_limit: u32,

  /// ### POLL INTERVAL
  ///
  /// How long the idle state listens for an inbound ENQ before checking
  /// for queued send requests and a stop request. Default 25 ms.
  pub poll_interval: Duration,
}
impl Default for ParameterSettings {
  fn default() -> Self {
    ParameterSettings {
      role: Role::Equipment,
      device_id: 0,
      expected_device_id: None,
      t1: Duration::from_millis(500),
      t2: Duration::from_secs(10),
      t3: Duration::from_secs(45),
      t4: Duration::from_secs(45),
      retry_limit: 3,
      poll_interval: Duration::from_millis(25),
    }
  }
}
