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

//! # PROTOCOL SESSION
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! The transport-agnostic request/response layer over SECS-I ([SEMI E4]) and
//! HSMS ([SEMI E37]):
//!
//! - The [System Bytes] allocator: unique 32-bit transaction identifiers
//!   with free-list reuse.
//! - The [Router]: per-(stream, function) message handlers with an optional
//!   default.
//! - The [Session]: primary/secondary correlation over any [Transport],
//!   automatic replies for handlers answering W-bit primaries, request
//!   timeouts, and cancellation on disconnect.
//!
//! [SEMI E4]:  https://store-us.semi.org/products/e00400-semi-e4-specification-for-semi-equipment-communications-standard-1-message-transfer-secs-i
//! [SEMI E37]: https://store-us.semi.org/products/e03700-semi-e37-high-speed-secs-message-services-hsms-generic-services
//!
//! [System Bytes]: SystemBytes
//! [Router]:       Router
//! [Session]:      Session
//! [Transport]:    Transport

mod router;
mod session;
mod system_bytes;

pub use router::{Handler, Router};
pub use session::{Session, Transport};
pub use system_bytes::SystemBytes;

use secs_core::DataMessage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;

/// ## ERROR
///
/// Failure modes of the protocol session: the shared taxonomy plus
/// whichever transport sits underneath.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
  /// ### CORE
  #[error(transparent)]
  Core(#[from] secs_core::Error),

  /// ### HSMS TRANSPORT
  #[error(transparent)]
  Hsms(#[from] secs_hsms::Error),

  /// ### SECS-I TRANSPORT
  #[error(transparent)]
  SecsI(#[from] secs_i::Error),

  /// ### ITEM CODEC
  ///
  /// Handlers and embedders decoding message bodies surface codec
  /// failures through this.
  #[error(transparent)]
  Ii(#[from] secs_ii::Error),
}
impl Error {
  /// The shared-taxonomy error underneath, when there is one.
  fn core(&self) -> Option<&secs_core::Error> {
    match self {
      Error::Core(core) => Some(core),
      Error::Hsms(secs_hsms::Error::Core(core)) => Some(core),
      Error::SecsI(secs_i::Error::Core(core)) => Some(core),
      _ => None,
    }
  }

  /// ### TIMEOUT-KINDED
  ///
  /// Whether this error is a deadline expiry at any layer.
  pub fn is_timeout(&self) -> bool {
    matches!(self.core(), Some(secs_core::Error::Timeout))
  }

  /// ### CANCELLED-KINDED
  ///
  /// Whether this error reports a stopped session or broken transport at
  /// any layer.
  pub fn is_cancelled(&self) -> bool {
    matches!(self.core(), Some(secs_core::Error::Cancelled))
  }
}

/// ## DUMP DIRECTION
///
/// Which way a message dumped to the [Dump Sink] was traveling.
///
/// [Dump Sink]: DumpSink
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpDirection {
  /// ### TRANSMITTED
  Tx,

  /// ### RECEIVED
  Rx,
}

/// ## DUMP FLAGS
///
/// Which directions the [Dump Sink] observes.
///
/// [Dump Sink]: DumpSink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpFlags {
  pub tx: bool,
  pub rx: bool,
}
impl DumpFlags {
  /// ### ALL DIRECTIONS
  pub const ALL: DumpFlags = DumpFlags { tx: true, rx: true };
}

/// ## DUMP SINK
///
/// A diagnostic callback observing every data message the [Session]
/// transmits or receives, before normal processing.
///
/// [Session]: Session
pub type DumpSink = Arc<dyn Fn(DumpDirection, &DataMessage) + Send + Sync>;

/// ## OPTIONS
///
/// The configurable behaviors of the [Session].
///
/// [Session]: Session
#[derive(Clone, Default)]
pub struct Options {
  /// ### T3: REPLY TIMEOUT
  ///
  /// Default deadline of the [Request Procedure] when the caller does not
  /// supply one. Defaults to 45 s.
  ///
  /// [Request Procedure]: Session::request
  pub t3: Option<Duration>,

  /// ### POLL INTERVAL
  ///
  /// How long one turn of the [Run Procedure] waits for an inbound message
  /// before checking for a stop request. Defaults to 25 ms.
  ///
  /// [Run Procedure]: Session::run
  pub poll_interval: Option<Duration>,

  /// ### MAXIMUM PENDING REQUESTS
  ///
  /// Cap on concurrently outstanding requests; exceeding it fails with
  /// [Resource Exhausted]. [None] means unbounded.
  ///
  /// [Resource Exhausted]: secs_core::Error::ResourceExhausted
  pub max_pending_requests: Option<usize>,

  /// ### DUMP SINK
  pub dump_sink: Option<DumpSink>,

  /// ### DUMP FLAGS
  pub dump_flags: DumpFlags,
}
impl std::fmt::Debug for Options {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Options")
      .field("t3", &self.t3)
      .field("poll_interval", &self.poll_interval)
      .field("max_pending_requests", &self.max_pending_requests)
      .field("dump_sink", &self.dump_sink.is_some())
      .field("dump_flags", &self.dump_flags)
      .finish()
  }
}
