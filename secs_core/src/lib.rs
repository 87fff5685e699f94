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

//! # SECS CORE PRIMITIVES
//!
//! Copyright © 2024 Nathaniel Hardesty, Licensed under the MIT License
//!
//! This software is created by a third-party and not endorsed or supported by
//! SEMI.
//!
//! ---------------------------------------------------------------------------
//!
//! Shared primitives underneath the SECS-I ([SEMI E4]), SECS-II ([SEMI E5]),
//! and HSMS ([SEMI E37]) crates of this workspace:
//!
//! - The [Error] taxonomy common to every layer.
//! - The [Fixed Buffer], a growing byte buffer with an inline region.
//! - The [Link] trait, the byte-level contract consumed by the SECS-I
//!   transport.
//! - The [Data Message], the transport-agnostic form of a SECS-II data
//!   message moved between the transports and the protocol session.
//! - The [Log Level] control shared by embedders which do not install their
//!   own [tracing] subscriber.
//!
//! [SEMI E4]:  https://store-us.semi.org/products/e00400-semi-e4-specification-for-semi-equipment-communications-standard-1-message-transfer-secs-i
//! [SEMI E5]:  https://store-us.semi.org/products/e00500-semi-e5-specification-for-semi-equipment-communications-standard-2-message-content-secs-ii
//! [SEMI E37]: https://store-us.semi.org/products/e03700-semi-e37-high-speed-secs-message-services-hsms-generic-services
//!
//! [Error]:        Error
//! [Fixed Buffer]: FixedBuffer
//! [Link]:         Link
//! [Data Message]: DataMessage
//! [Log Level]:    LogLevel

mod buffer;
mod link;

pub use buffer::FixedBuffer;
pub use link::{DataMessage, Link};

use std::sync::atomic::{AtomicU8, Ordering::Relaxed};
use std::time::Duration;
use thiserror::Error;

/// ## ERROR
///
/// The error taxonomy shared by every layer of the workspace. Layer-specific
/// failure modes (malformed items, checksum failures, rejected selections)
/// are defined by the crates which produce them and convert from this type
/// where they propagate it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
  /// ### TIMEOUT
  ///
  /// A deadline elapsed before the awaited event occurred. Which deadline
  /// (T1 through T8, a reply timeout, a reconnect backoff) is determined by
  /// the operation which returned this.
  #[error("timed out")]
  Timeout,

  /// ### CANCELLED
  ///
  /// The operation was abandoned because its session was stopped or its
  /// connection was torn down while it was waiting.
  #[error("cancelled")]
  Cancelled,

  /// ### BUFFER OVERFLOW
  ///
  /// A buffer, queue, or identifier space reached its configured capacity.
  #[error("buffer overflow")]
  BufferOverflow,

  /// ### INVALID ARGUMENT
  ///
  /// A caller-supplied value violated a precondition of the operation.
  #[error("invalid argument")]
  InvalidArgument,

  /// ### OUT OF MEMORY
  ///
  /// An allocation required by the operation could not be satisfied.
  #[error("out of memory")]
  OutOfMemory,

  /// ### RESOURCE EXHAUSTED
  ///
  /// A configured limit on concurrently outstanding work was reached.
  #[error("resource exhausted")]
  ResourceExhausted,

  /// ### I/O FAILURE
  ///
  /// The underlying byte transport failed. Timeout-kinded I/O errors are
  /// converted to [Timeout] instead.
  ///
  /// [Timeout]: Error::Timeout
  #[error("i/o failure: {0}")]
  Io(String),
}
impl From<std::io::Error> for Error {
  fn from(error: std::io::Error) -> Self {
    match error.kind() {
      std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
      std::io::ErrorKind::OutOfMemory => Error::OutOfMemory,
      kind => Error::Io(kind.to_string()),
    }
  }
}

/// ## LOG LEVEL
///
/// Process-wide log verbosity for embedders which do not install their own
/// [tracing] subscriber. The library itself only emits [tracing] events; this
/// value is advisory and read with the [Log Level] function by whichever
/// subscriber the embedder installs through [Level Filter].
///
/// [Log Level]:    log_level
/// [Level Filter]: LogLevel::level_filter
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
  Trace = 0,
  Debug = 1,
  Info = 2,
  Warn = 3,
  Error = 4,
  Off = 5,
}
impl LogLevel {
  /// ### LEVEL FILTER
  ///
  /// Converts this level into the equivalent [tracing] filter.
  pub fn level_filter(self) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;
    match self {
      LogLevel::Trace => LevelFilter::TRACE,
      LogLevel::Debug => LevelFilter::DEBUG,
      LogLevel::Info => LevelFilter::INFO,
      LogLevel::Warn => LevelFilter::WARN,
      LogLevel::Error => LevelFilter::ERROR,
      LogLevel::Off => LevelFilter::OFF,
    }
  }
}

/// Global level storage, defaulting to [LogLevel::Info].
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// ## SET LOG LEVEL
///
/// Stores the process-wide [Log Level].
///
/// [Log Level]: LogLevel
pub fn set_log_level(level: LogLevel) {
  LOG_LEVEL.store(level as u8, Relaxed);
}

/// ## LOG LEVEL
///
/// Reads the process-wide [Log Level].
///
/// [Log Level]: LogLevel
pub fn log_level() -> LogLevel {
  match LOG_LEVEL.load(Relaxed) {
    0 => LogLevel::Trace,
    1 => LogLevel::Debug,
    2 => LogLevel::Info,
    3 => LogLevel::Warn,
    4 => LogLevel::Error,
    _ => LogLevel::Off,
  }
}

/// ## DEADLINE AFTER
///
/// Converts an optional timeout into an absolute deadline for blocking
/// waits. [None] means wait forever.
pub fn deadline_after(timeout: Option<Duration>) -> Option<std::time::Instant> {
  timeout.map(|d| std::time::Instant::now() + d)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_timeout_converts_to_timeout() {
    let error = std::io::Error::new(std::io::ErrorKind::TimedOut, "t8");
    assert_eq!(Error::from(error), Error::Timeout);
  }

  #[test]
  fn io_failure_preserves_kind() {
    let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer");
    assert_eq!(Error::from(error), Error::Io("connection reset".to_string()));
  }

  #[test]
  fn log_level_round_trips_through_global() {
    set_log_level(LogLevel::Debug);
    assert_eq!(log_level(), LogLevel::Debug);
    set_log_level(LogLevel::Info);
  }
}
