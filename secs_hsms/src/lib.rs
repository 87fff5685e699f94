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

//! # HIGH-SPEED SECS MESSAGE SERVICES (HSMS)
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! **Based on:**
//! - **[SEMI E37]-1109**
//!
//! ---------------------------------------------------------------------------
//!
//! HSMS is a protocol designed to facilitate the reliable transmission of
//! messages between semiconductor equipment over TCP/IP.
//!
//! For ease of programming and extension, the functionality of the protocol
//! has been divided into two subsets:
//!
//! - The [Primitive Services] manage the TCP/IP connection, the framing of
//!   messages with properly formatted headers, the T8 inter-character
//!   timeout, and the serialized writer which drains control messages ahead
//!   of data messages.
//! - The [Generic Services] manage the sending of messages of particular
//!   types at particular times as allowed by the protocol: the selection
//!   state machine, the Select, Deselect, Linktest, Separate, and Reject
//!   procedures, periodic link testing, and automatic reconnection.
//!
//! [SEMI E37]: https://store-us.semi.org/products/e03700-semi-e37-high-speed-secs-message-services-hsms-generic-services
//!
//! [Primitive Services]: primitive
//! [Generic Services]:   generic

pub mod generic;
pub mod primitive;

use std::time::Duration;
use thiserror::Error;

/// ## ERROR
///
/// Failure modes of the HSMS session layer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
  /// ### REJECT RECEIVED
  ///
  /// The peer answered a transaction with Reject.req; the payload is the
  /// reason code it supplied.
  #[error("reject received (reason {0})")]
  RejectReceived(u8),

  /// ### SELECT FAILED
  ///
  /// The peer answered Select.req with a nonzero status; the payload is
  /// that status.
  #[error("select failed (status {0})")]
  SelectFailed(u8),

  /// ### NOT SELECTED
  ///
  /// A data operation was attempted outside the SELECTED state.
  #[error("not selected")]
  NotSelected,

  /// ### CORE
  #[error(transparent)]
  Core(#[from] secs_core::Error),
}

/// ## CONNECTION MODE
/// **Based on SEMI E37-1109§6.3.2**
///
/// How the TCP/IP connection is established: [PASSIVE] listens for and
/// accepts the connection when initiated by the remote entity, [ACTIVE]
/// initiates it and waits up to [T5] for the remote entity to respond.
///
/// [PASSIVE]: ConnectionMode::Passive
/// [ACTIVE]:  ConnectionMode::Active
/// [T5]:      ParameterSettings::t5
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
  /// ### PASSIVE
  #[default]
  Passive,

  /// ### ACTIVE
  Active,
}

/// ## PARAMETER SETTINGS
/// **Based on SEMI E37-1109§10.2**
///
/// The configurable timeouts and behaviors of the [Generic Client].
///
/// [Generic Client]: generic::Client
#[derive(Clone, Copy, Debug)]
pub struct ParameterSettings {
  /// ### CONNECT MODE
  ///
  /// [PASSIVE] or [ACTIVE] connection establishment. Default [PASSIVE].
  ///
  /// [PASSIVE]: ConnectionMode::Passive
  /// [ACTIVE]:  ConnectionMode::Active
  pub connect_mode: ConnectionMode,

  /// ### SESSION ID
  ///
  /// The session identifier exchanged by the Select procedure and carried
  /// by data messages.
  pub session_id: u16,

  /// ### T3: REPLY TIMEOUT
  ///
  /// Maximum wait for the secondary message answering a data transaction.
  /// Default 45 s.
  pub t3: Duration,

  /// ### T5: CONNECT SEPARATION TIMEOUT
  ///
  /// Time between connection attempts, and the reconnect backoff when
  /// [Auto Reconnect] is enabled. Default 10 s.
  ///
  /// [Auto Reconnect]: ParameterSettings::auto_reconnect
  pub t5: Duration,

  /// ### T6: CONTROL TRANSACTION TIMEOUT
  ///
  /// Maximum wait for the response to Select.req, Deselect.req, or
  /// Linktest.req. Default 5 s.
  pub t6: Duration,

  /// ### T7: NOT SELECTED TIMEOUT
  ///
  /// How long a passive connection may sit established without being
  /// selected. Default 10 s.
  pub t7: Duration,

  /// ### T8: NETWORK INTERCHARACTER TIMEOUT
  ///
  /// Maximum gap between two bytes within a single frame. Default 5 s.
  pub t8: Duration,

  /// ### LINKTEST INTERVAL
  ///
  /// Period of automatic link testing while selected. Zero disables the
  /// loop. Default zero.
  pub linktest_interval: Duration,

  /// ### LINKTEST MAXIMUM CONSECUTIVE FAILURES
  ///
  /// How many linktests may fail in a row before the connection is
  /// considered dead and torn down. Default 3.
  pub linktest_max_consecutive_failures: u32,

  /// ### AUTO RECONNECT
  ///
  /// Whether [Run Active] re-opens the connection after T5 once it
  /// disconnects. Default false.
  ///
  /// [Run Active]: generic::Client::run_active
  pub auto_reconnect: bool,

  /// ### PASSIVE ACCEPT SELECT
  ///
  /// Whether a passive entity accepts Select.req for its session id. When
  /// false every Select.req is refused and the connection closed. Default
  /// true.
  pub passive_accept_select: bool,

  /// ### MAXIMUM PAYLOAD BYTES
  ///
  /// Ceiling on the payload (header plus body) of a single frame, in both
  /// directions. Default 16 MiB.
  pub max_payload_bytes: usize,
}
impl Default for ParameterSettings {
  /// ### DEFAULT PARAMETER SETTINGS
  /// **Based on SEMI E37-1109§10.4**
  fn default() -> Self {
    ParameterSettings {
      connect_mode: ConnectionMode::default(),
      session_id: 0xFFFF,
      t3: Duration::from_secs(45),
      t5: Duration::from_secs(10),
      t6: Duration::from_secs(5),
      t7: Duration::from_secs(10),
      t8: Duration::from_secs(5),
      linktest_interval: Duration::ZERO,
      linktest_max_consecutive_failures: 3,
      auto_reconnect: false,
      passive_accept_select: true,
      max_payload_bytes: 16 * 1024 * 1024,
    }
  }
}
