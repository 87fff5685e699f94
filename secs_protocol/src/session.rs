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

use crate::{DumpDirection, Error, Options, Router, SystemBytes};
use secs_core::DataMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Fallback reply deadline when neither the caller nor the options supply
/// one.
const DEFAULT_T3: Duration = Duration::from_secs(45);

/// Fallback turn length of the run loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// ## TRANSPORT
///
/// The capability set the [Session] requires of a transport: transmit a
/// data message, pop the next inbound data message, and stop. Both the
/// HSMS generic client and the SECS-I client provide it.
///
/// [Session]: Session
pub trait Transport: Send + Sync + 'static {
  /// ### SEND
  fn send(&self, message: DataMessage) -> Result<(), Error>;

  /// ### RECEIVE
  ///
  /// Pops the next inbound data message, waiting up to `timeout` ([None]
  /// waits indefinitely). A timeout surfaces as a timeout-kinded error; a
  /// stopped or disconnected transport as a cancelled-kinded one.
  fn receive(&self, timeout: Option<Duration>) -> Result<DataMessage, Error>;

  /// ### STOP
  fn stop(&self);
}

impl Transport for Arc<secs_hsms::generic::Client> {
  fn send(&self, message: DataMessage) -> Result<(), Error> {
    self.send_data(message).map_err(Error::from)
  }

  fn receive(&self, timeout: Option<Duration>) -> Result<DataMessage, Error> {
    self.receive_data(timeout).map_err(Error::from)
  }

  fn stop(&self) {
    secs_hsms::generic::Client::stop(self);
  }
}

impl Transport for Arc<secs_i::Client> {
  fn send(&self, message: DataMessage) -> Result<(), Error> {
    secs_i::Client::send(self, message).map_err(Error::from)
  }

  fn receive(&self, timeout: Option<Duration>) -> Result<DataMessage, Error> {
    secs_i::Client::receive(self, timeout)
      .map(|received| received.message)
      .map_err(Error::from)
  }

  fn stop(&self) {
    secs_i::Client::stop(self);
  }
}

/// An outstanding request: the secondary it expects and who is waiting.
struct PendingRequest {
  stream: u8,
  function: u8,
  done: oneshot::Sender<Result<DataMessage, Error>>,
}

/// ## SESSION
///
/// The transport-agnostic protocol session: primary/secondary correlation
/// via system bytes, a handler [Router] for inbound primaries, automatic
/// replies for W-bit primaries, request deadlines, and cancellation on
/// stop.
///
/// One thread, conventionally spawned by the embedder, drives the
/// [Run Procedure], which dispatches every inbound message; requests may
/// be issued from any other thread.
///
/// [Router]:        Router
/// [Run Procedure]: Session::run
pub struct Session<T: Transport> {
  options: Options,
  transport: T,
  allocator: SystemBytes,
  router: Mutex<Router>,
  pending: Mutex<HashMap<u32, PendingRequest>>,
  stop_requested: AtomicBool,
}

impl<T: Transport> Session<T> {
  /// ### NEW SESSION
  pub fn new(transport: T, options: Options) -> Arc<Self> {
    Arc::new(Session {
      options,
      transport,
      allocator: SystemBytes::new(1),
      router: Mutex::new(Router::new()),
      pending: Mutex::new(HashMap::new()),
      stop_requested: AtomicBool::new(false),
    })
  }

  /// ### ROUTER
  ///
  /// Access to the handler table.
  pub fn router(&self) -> MutexGuard<'_, Router> {
    self.router.lock().unwrap()
  }

  /// ### OUTSTANDING REQUESTS
  pub fn outstanding_requests(&self) -> usize {
    self.pending.lock().unwrap().len()
  }

  /// ### SEND PROCEDURE
  ///
  /// Transmits a primary message without expecting a reply: the function
  /// must be odd and not 0xFF, the W-bit is clear, and the system bytes
  /// value is allocated for the transmission and released immediately
  /// after it.
  pub fn send(&self, stream: u8, function: u8, body: Vec<u8>) -> Result<(), Error> {
    if function % 2 == 0 || function == 0xFF {
      return Err(Error::Core(secs_core::Error::InvalidArgument));
    }
    let system_bytes = self.allocator.allocate()?;
    let message = DataMessage {
      stream,
      function,
      w_bit: false,
      system_bytes,
      body,
    };
    self.dump(DumpDirection::Tx, &message);
    let result = self.transport.send(message);
    self.allocator.release(system_bytes);
    result
  }

  /// ### REPLY PROCEDURE
  ///
  /// Transmits the secondary answering `primary`: function plus one, W-bit
  /// clear, the primary's system bytes. Handlers installed on the
  /// [Router] get this for free; this procedure serves replies composed
  /// outside the dispatch loop.
  ///
  /// [Router]: Router
  pub fn send_reply(&self, primary: &DataMessage, body: Vec<u8>) -> Result<(), Error> {
    if !primary.is_primary() {
      return Err(Error::Core(secs_core::Error::InvalidArgument));
    }
    let message = DataMessage {
      stream: primary.stream,
      function: primary.reply_function(),
      w_bit: false,
      system_bytes: primary.system_bytes,
      body,
    };
    self.dump(DumpDirection::Tx, &message);
    self.transport.send(message)
  }

  /// ### REQUEST PROCEDURE
  ///
  /// Transmits a primary with the W-bit and waits for the correlated
  /// secondary: same system bytes, same stream, function plus one. Waits
  /// up to `timeout`, falling back to the configured T3. On expiry the
  /// pending entry is erased, the system bytes value is released, and
  /// [Timeout] returned; the session remains usable.
  ///
  /// [Timeout]: secs_core::Error::Timeout
  pub fn request(
    &self,
    stream: u8,
    function: u8,
    body: Vec<u8>,
    timeout: Option<Duration>,
  ) -> Result<DataMessage, Error> {
    if function % 2 == 0 || function == 0xFF {
      return Err(Error::Core(secs_core::Error::InvalidArgument));
    }
    if let Some(max) = self.options.max_pending_requests {
      if self.pending.lock().unwrap().len() >= max {
        return Err(Error::Core(secs_core::Error::ResourceExhausted));
      }
    }
    let system_bytes = self.allocator.allocate()?;
    let (done, reply) = oneshot::channel();
    // The pending entry is registered before the message leaves, so the
    // dispatch loop can never observe the secondary first.
    self.pending.lock().unwrap().insert(
      system_bytes,
      PendingRequest {
        stream,
        function: function.wrapping_add(1),
        done,
      },
    );
    let message = DataMessage {
      stream,
      function,
      w_bit: true,
      system_bytes,
      body,
    };
    self.dump(DumpDirection::Tx, &message);
    if let Err(error) = self.transport.send(message) {
      self.pending.lock().unwrap().remove(&system_bytes);
      self.allocator.release(system_bytes);
      return Err(error);
    }
    let deadline = timeout.or(self.options.t3).unwrap_or(DEFAULT_T3);
    let outcome = match reply.recv_timeout(deadline) {
      Ok(result) => result,
      Err(oneshot::RecvTimeoutError::Timeout) => {
        self.pending.lock().unwrap().remove(&system_bytes);
        Err(Error::Core(secs_core::Error::Timeout))
      },
      Err(oneshot::RecvTimeoutError::Disconnected) => {
        self.pending.lock().unwrap().remove(&system_bytes);
        Err(Error::Core(secs_core::Error::Cancelled))
      },
    };
    self.allocator.release(system_bytes);
    outcome
  }

  /// ### POLL PROCEDURE
  ///
  /// Performs one turn of the dispatch loop: waits up to `timeout` for an
  /// inbound message and dispatches it. Returns whether a message was
  /// processed; a mere timeout is `Ok(false)`.
  pub fn poll_once(&self, timeout: Option<Duration>) -> Result<bool, Error> {
    match self.transport.receive(timeout) {
      Ok(message) => {
        self.dispatch(message);
        Ok(true)
      },
      Err(error) if error.is_timeout() => Ok(false),
      Err(error) => Err(error),
    }
  }

  /// ### RUN PROCEDURE
  ///
  /// The inbound dispatch loop: polls until stopped or the transport
  /// fails, then cancels every outstanding request.
  pub fn run(&self) -> Result<(), Error> {
    debug!(target: "secs_protocol", "dispatch loop start");
    let poll_interval = self.options.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
    let result = loop {
      if self.stop_requested.load(Relaxed) {
        break Ok(());
      }
      match self.poll_once(Some(poll_interval)) {
        Ok(_) => {},
        Err(error) if error.is_cancelled() => break Ok(()),
        Err(error) => {
          warn!(target: "secs_protocol", %error, "transport failed");
          break Err(error);
        },
      }
    };
    self.cancel_all(Error::Core(secs_core::Error::Cancelled));
    debug!(target: "secs_protocol", "dispatch loop end");
    result
  }

  /// ### STOP PROCEDURE
  ///
  /// Stops the transport and the dispatch loop; outstanding requests
  /// complete with [Cancelled].
  ///
  /// [Cancelled]: secs_core::Error::Cancelled
  pub fn stop(&self) {
    self.stop_requested.store(true, Relaxed);
    self.transport.stop();
    self.cancel_all(Error::Core(secs_core::Error::Cancelled));
  }

  /// Routes one inbound message: a correlated secondary completes its
  /// request, everything else goes through the handler table.
  fn dispatch(&self, message: DataMessage) {
    self.dump(DumpDirection::Rx, &message);

    if !message.is_primary() {
      // Correlation demands the system bytes match and the (stream,
      // function) equal the expectation; anything else is treated as an
      // unrelated message and routed.
      let entry = {
        let mut pending = self.pending.lock().unwrap();
        let matches = pending
          .get(&message.system_bytes)
          .map(|entry| entry.stream == message.stream && entry.function == message.function)
          .unwrap_or(false);
        if matches {
          pending.remove(&message.system_bytes)
        } else {
          None
        }
      };
      if let Some(entry) = entry {
        trace!(
          target: "secs_protocol",
          system_bytes = message.system_bytes,
          "request completed"
        );
        let _ = entry.done.send(Ok(message));
        return;
      }
    }

    let handler = self
      .router
      .lock()
      .unwrap()
      .find(message.stream, message.function);
    let handler = match handler {
      Some(handler) => handler,
      None => {
        warn!(
          target: "secs_protocol",
          stream = message.stream,
          function = message.function,
          "no handler for inbound message"
        );
        return;
      },
    };
    match handler(&message) {
      Ok(reply_body) => {
        if message.w_bit && message.is_primary() {
          let reply = DataMessage {
            stream: message.stream,
            function: message.reply_function(),
            w_bit: false,
            system_bytes: message.system_bytes,
            body: reply_body.unwrap_or_default(),
          };
          self.dump(DumpDirection::Tx, &reply);
          if let Err(error) = self.transport.send(reply) {
            warn!(target: "secs_protocol", %error, "auto-reply failed");
          }
        }
      },
      Err(error) => {
        // No reply: the peer's T3 governs.
        warn!(
          target: "secs_protocol",
          stream = message.stream,
          function = message.function,
          %error,
          "handler failed"
        );
      },
    }
  }

  /// Completes every outstanding request with `reason`.
  fn cancel_all(&self, reason: Error) {
    for (_, entry) in self.pending.lock().unwrap().drain() {
      let _ = entry.done.send(Err(reason.clone()));
    }
  }

  /// Feeds the dump sink when the direction is enabled.
  fn dump(&self, direction: DumpDirection, message: &DataMessage) {
    let enabled = match direction {
      DumpDirection::Tx => self.options.dump_flags.tx,
      DumpDirection::Rx => self.options.dump_flags.rx,
    };
    if !enabled {
      return;
    }
    if let Some(sink) = &self.options.dump_sink {
      sink(direction, message);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::DumpFlags;
  use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
  use std::thread;

  /// A transport made of two channels, with the far ends held by the
  /// test.
  struct MockTransport {
    inbound: Mutex<Receiver<DataMessage>>,
    outbound: Mutex<Sender<DataMessage>>,
    stopped: AtomicBool,
  }
  impl Transport for MockTransport {
    fn send(&self, message: DataMessage) -> Result<(), Error> {
      self
        .outbound
        .lock()
        .unwrap()
        .send(message)
        .map_err(|_| Error::Core(secs_core::Error::Cancelled))
    }

    fn receive(&self, timeout: Option<Duration>) -> Result<DataMessage, Error> {
      if self.stopped.load(Relaxed) {
        return Err(Error::Core(secs_core::Error::Cancelled));
      }
      let receiver = self.inbound.lock().unwrap();
      match timeout {
        Some(duration) => receiver.recv_timeout(duration).map_err(|error| match error {
          RecvTimeoutError::Timeout => Error::Core(secs_core::Error::Timeout),
          RecvTimeoutError::Disconnected => Error::Core(secs_core::Error::Cancelled),
        }),
        None => receiver
          .recv()
          .map_err(|_| Error::Core(secs_core::Error::Cancelled)),
      }
    }

    fn stop(&self) {
      self.stopped.store(true, Relaxed);
    }
  }

  /// Session plus the test-side channel ends.
  fn harness(options: Options) -> (Arc<Session<MockTransport>>, Sender<DataMessage>, Receiver<DataMessage>) {
    let (feed, inbound) = channel();
    let (outbound, wire) = channel();
    let session = Session::new(
      MockTransport {
        inbound: Mutex::new(inbound),
        outbound: Mutex::new(outbound),
        stopped: AtomicBool::new(false),
      },
      options,
    );
    (session, feed, wire)
  }

  fn primary(stream: u8, function: u8, system_bytes: u32, w_bit: bool) -> DataMessage {
    DataMessage {
      stream,
      function,
      w_bit,
      system_bytes,
      body: vec![0xAA],
    }
  }

  #[test]
  fn w_bit_primary_with_handler_gets_exactly_one_auto_reply() {
    let (session, feed, wire) = harness(Options::default());
    session
      .router()
      .set(1, 13, Arc::new(|message| Ok(Some(message.body.clone()))));

    feed.send(primary(1, 13, 77, true)).unwrap();
    assert!(session.poll_once(Some(Duration::from_secs(1))).unwrap());

    let reply = wire.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(reply.stream, 1);
    assert_eq!(reply.function, 14);
    assert!(!reply.w_bit);
    assert_eq!(reply.system_bytes, 77);
    assert_eq!(reply.body, vec![0xAA]);
    assert_eq!(wire.try_recv().unwrap_err(), TryRecvError::Empty);
  }

  #[test]
  fn handler_without_body_replies_with_empty_body() {
    let (session, feed, wire) = harness(Options::default());
    session.router().set(1, 13, Arc::new(|_| Ok(None)));
    feed.send(primary(1, 13, 5, true)).unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    let reply = wire.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(reply.function, 14);
    assert!(reply.body.is_empty());
  }

  #[test]
  fn handler_error_suppresses_the_reply() {
    let (session, feed, wire) = harness(Options::default());
    session.router().set(
      1,
      13,
      Arc::new(|_| Err(Error::Core(secs_core::Error::InvalidArgument))),
    );
    feed.send(primary(1, 13, 5, true)).unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(wire.try_recv().unwrap_err(), TryRecvError::Empty);
  }

  #[test]
  fn primary_without_w_bit_is_routed_without_reply() {
    let (session, feed, wire) = harness(Options::default());
    let hits = Arc::new(AtomicBool::new(false));
    let hits_clone = hits.clone();
    session.router().set(
      5,
      1,
      Arc::new(move |_| {
        hits_clone.store(true, Relaxed);
        Ok(Some(vec![1, 2, 3]))
      }),
    );
    feed.send(primary(5, 1, 9, false)).unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    assert!(hits.load(Relaxed));
    assert_eq!(wire.try_recv().unwrap_err(), TryRecvError::Empty);
  }

  #[test]
  fn request_times_out_erases_pending_and_reuses_system_bytes() {
    let (session, _feed, wire) = harness(Options::default());
    let result = session.request(1, 1, vec![], Some(Duration::from_millis(50)));
    assert_eq!(result, Err(Error::Core(secs_core::Error::Timeout)));
    assert_eq!(session.outstanding_requests(), 0);

    let first = wire.recv_timeout(Duration::from_secs(1)).unwrap();
    // The released value comes back out of the free list for the next
    // request.
    let session_clone = session.clone();
    let second_request =
      thread::spawn(move || session_clone.request(1, 1, vec![], Some(Duration::from_millis(50))));
    let second = wire.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.system_bytes, first.system_bytes);
    let _ = second_request.join().unwrap();
  }

  #[test]
  fn secondary_with_wrong_function_is_routed_not_correlated() {
    let (session, feed, wire) = harness(Options::default());
    let routed = Arc::new(AtomicBool::new(false));
    let routed_clone = routed.clone();
    session.router().set_default(Arc::new(move |_| {
      routed_clone.store(true, Relaxed);
      Ok(None)
    }));

    let session_clone = session.clone();
    let requester =
      thread::spawn(move || session_clone.request(1, 13, vec![], Some(Duration::from_secs(2))));
    let sent = wire.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(sent.w_bit);

    // Same system bytes, wrong function: must not complete the pending.
    feed
      .send(DataMessage {
        stream: 1,
        function: 16,
        w_bit: false,
        system_bytes: sent.system_bytes,
        body: vec![],
      })
      .unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    assert!(routed.load(Relaxed));
    assert_eq!(session.outstanding_requests(), 1);

    // The true secondary completes it.
    feed
      .send(DataMessage {
        stream: 1,
        function: 14,
        w_bit: false,
        system_bytes: sent.system_bytes,
        body: vec![0x5A],
      })
      .unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    let reply = requester.join().unwrap().unwrap();
    assert_eq!(reply.function, 14);
    assert_eq!(reply.system_bytes, sent.system_bytes);
    assert_eq!(reply.body, vec![0x5A]);
  }

  #[test]
  fn parity_and_reserved_function_are_validated() {
    let (session, _feed, _wire) = harness(Options::default());
    assert_eq!(
      session.send(1, 2, vec![]),
      Err(Error::Core(secs_core::Error::InvalidArgument))
    );
    assert_eq!(
      session.request(1, 0xFF, vec![], None),
      Err(Error::Core(secs_core::Error::InvalidArgument))
    );
  }

  #[test]
  fn max_pending_requests_is_enforced() {
    let (session, _feed, _wire) = harness(Options {
      max_pending_requests: Some(0),
      ..Options::default()
    });
    assert_eq!(
      session.request(1, 1, vec![], Some(Duration::from_millis(10))),
      Err(Error::Core(secs_core::Error::ResourceExhausted))
    );
  }

  #[test]
  fn stop_cancels_outstanding_requests() {
    let (session, _feed, _wire) = harness(Options::default());
    let session_clone = session.clone();
    let requester =
      thread::spawn(move || session_clone.request(1, 1, vec![], Some(Duration::from_secs(10))));
    // Wait for the request to register.
    while session.outstanding_requests() == 0 {
      thread::sleep(Duration::from_millis(5));
    }
    session.stop();
    assert_eq!(
      requester.join().unwrap(),
      Err(Error::Core(secs_core::Error::Cancelled))
    );
    assert_eq!(session.outstanding_requests(), 0);
  }

  #[test]
  fn dump_sink_observes_both_directions() {
    let seen: Arc<Mutex<Vec<(DumpDirection, u8)>>> = Arc::new(Mutex::new(vec![]));
    let seen_clone = seen.clone();
    let (session, feed, _wire) = harness(Options {
      dump_sink: Some(Arc::new(move |direction, message| {
        seen_clone.lock().unwrap().push((direction, message.function));
      })),
      dump_flags: DumpFlags::ALL,
      ..Options::default()
    });
    session.router().set(1, 13, Arc::new(|_| Ok(None)));
    feed.send(primary(1, 13, 3, true)).unwrap();
    session.poll_once(Some(Duration::from_secs(1))).unwrap();
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&(DumpDirection::Rx, 13)));
    assert!(seen.contains(&(DumpDirection::Tx, 14)));
  }
}
