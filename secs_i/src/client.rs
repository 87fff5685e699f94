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

//! # HALF-DUPLEX TRANSACTION CLIENT

use crate::block::{checksum, segment, Assembler, BlockHeader, ACK, ENQ, EOT, NAK};
use crate::{Error, ParameterSettings, Role};
use secs_core::{DataMessage, Link};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// ## RECEIVED MESSAGE
///
/// A fully reassembled inbound message along with the device identifier its
/// blocks carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
  /// ### DEVICE ID
  pub device_id: u16,

  /// ### MESSAGE
  pub message: DataMessage,
}

/// A queued send and the handle its caller is waiting on.
struct SendRequest {
  message: DataMessage,
  done: oneshot::Sender<Result<(), Error>>,
}

/// ## CLIENT
/// **Based on SEMI E4§6-8**
///
/// Encapsulates the SECS-I protocol over a [Link].
///
/// The line is half-duplex, so exactly one thread, spawned by
/// [New Client], owns the [Link] and the transaction state machine.
/// Callers interact with it through channels:
///
/// - The [Send Procedure] queues a message and blocks until the transfer
///   completes or fails; [Submit Procedure] is its non-blocking form.
/// - The [Receive Procedure] drains messages the state machine reassembled.
/// - The [Stop Procedure] winds the thread down, failing queued sends.
///
/// A send requested while the machine is mid-reception waits its turn in
/// the queue; the machine never interleaves the two roles.
///
/// [Link]:              secs_core::Link
/// [New Client]:        Client::spawn
/// [Send Procedure]:    Client::send
/// [Submit Procedure]:  Client::submit
/// [Receive Procedure]: Client::receive
/// [Stop Procedure]:    Client::stop
pub struct Client {
  settings: ParameterSettings,
  commands: Sender<SendRequest>,
  inbound: Mutex<Receiver<ReceivedMessage>>,
  stop: Arc<AtomicBool>,
}

impl Client {
  /// ### NEW CLIENT
  ///
  /// Spawns the transaction thread around the provided [Link] and returns
  /// the handle used to exchange messages with it.
  ///
  /// [Link]: secs_core::Link
  pub fn spawn(link: impl Link + 'static, settings: ParameterSettings) -> Arc<Self> {
    let (command_sender, command_receiver) = channel::<SendRequest>();
    let (inbound_sender, inbound_receiver) = channel::<ReceivedMessage>();
    let stop = Arc::new(AtomicBool::new(false));
    let engine = Engine {
      link,
      settings,
      commands: command_receiver,
      inbound: inbound_sender,
      stop: stop.clone(),
    };
    thread::spawn(move || engine.run());
    Arc::new(Client {
      settings,
      commands: command_sender,
      inbound: Mutex::new(inbound_receiver),
      stop,
    })
  }

  /// ### PARAMETER SETTINGS
  pub fn settings(&self) -> &ParameterSettings {
    &self.settings
  }

  /// ### SEND PROCEDURE
  ///
  /// Queues the message for transmission and blocks until every block has
  /// been acknowledged, retries are exhausted, or the client stops.
  pub fn send(&self, message: DataMessage) -> Result<(), Error> {
    let receiver = self.submit(message)?;
    match receiver.recv() {
      Ok(result) => result,
      Err(_) => Err(Error::Core(secs_core::Error::Cancelled)),
    }
  }

  /// ### SUBMIT PROCEDURE
  ///
  /// Queues the message for transmission and returns the completion handle
  /// without waiting on it.
  pub fn submit(
    &self,
    message: DataMessage,
  ) -> Result<oneshot::Receiver<Result<(), Error>>, Error> {
    let (done, receiver) = oneshot::channel();
    self
      .commands
      .send(SendRequest { message, done })
      .map_err(|_| Error::Core(secs_core::Error::Cancelled))?;
    Ok(receiver)
  }

  /// ### RECEIVE PROCEDURE
  ///
  /// Pops the next reassembled inbound message, waiting up to `timeout`
  /// ([None] waits indefinitely).
  pub fn receive(&self, timeout: Option<Duration>) -> Result<ReceivedMessage, Error> {
    let receiver = self.inbound.lock().unwrap();
    match timeout {
      Some(duration) => receiver.recv_timeout(duration).map_err(|error| match error {
        std::sync::mpsc::RecvTimeoutError::Timeout => Error::Core(secs_core::Error::Timeout),
        std::sync::mpsc::RecvTimeoutError::Disconnected => {
          Error::Core(secs_core::Error::Cancelled)
        },
      }),
      None => receiver
        .recv()
        .map_err(|_| Error::Core(secs_core::Error::Cancelled)),
    }
  }

  /// ### STOP PROCEDURE
  ///
  /// Asks the transaction thread to wind down. Queued sends complete with
  /// [Cancelled]; the thread notices within one poll interval.
  ///
  /// [Cancelled]: secs_core::Error::Cancelled
  pub fn stop(&self) {
    self.stop.store(true, Relaxed);
  }
}

/// The line-owning side of the [Client]: the state machine thread.
struct Engine<L: Link> {
  link: L,
  settings: ParameterSettings,
  commands: Receiver<SendRequest>,
  inbound: Sender<ReceivedMessage>,
  stop: Arc<AtomicBool>,
}

/// Outcome of one ENQ round of the send handshake.
enum Handshake {
  /// EOT received, the line is ours.
  Granted,
  /// Simultaneous ENQ and this entity is the equipment: service the host
  /// first, then retry.
  Yield,
  /// T2 elapsed with no EOT.
  Timeout,
}

impl<L: Link> Engine<L> {
  /// ### STATE MACHINE LOOP
  ///
  /// The idle state: alternately checks the send queue and listens for an
  /// inbound ENQ, until stopped or the link dies.
  fn run(mut self) {
    debug!(target: "secs_i", "transaction engine start");
    loop {
      if self.stop.load(Relaxed) {
        break;
      }
      match self.commands.try_recv() {
        Ok(request) => {
          let result = self.perform_send(&request.message);
          if let Err(error) = &result {
            warn!(target: "secs_i", %error, "send failed");
          }
          let _ = request.done.send(result);
          continue;
        },
        Err(TryRecvError::Empty) => {},
        // Every client handle is gone; nobody can queue work or drain
        // inbound messages anymore.
        Err(TryRecvError::Disconnected) => break,
      }
      match self.link.read_byte(Some(self.settings.poll_interval)) {
        Ok(ENQ) => {
          if let Err(error) = self.respond_and_receive() {
            warn!(target: "secs_i", %error, "receive failed");
          }
        },
        Ok(byte) => {
          // Spurious byte outside any transaction.
          trace!(target: "secs_i", byte, "ignoring byte in idle state");
        },
        Err(secs_core::Error::Timeout) => {},
        Err(error) => {
          warn!(target: "secs_i", %error, "link failed in idle state");
          break;
        },
      }
    }
    // Fail whatever never got a turn.
    while let Ok(request) = self.commands.try_recv() {
      let _ = request
        .done
        .send(Err(Error::Core(secs_core::Error::Cancelled)));
    }
    debug!(target: "secs_i", "transaction engine end");
  }

  /// Reads one byte, bounded by the remaining time before `deadline`.
  fn read_until(&mut self, deadline: Instant) -> Result<u8, secs_core::Error> {
    let now = Instant::now();
    if now >= deadline {
      return Err(secs_core::Error::Timeout);
    }
    self.link.read_byte(Some(deadline - now))
  }

  /// ### SEND TRANSACTION
  /// **Based on SEMI E4§6.2, §8.2**
  ///
  /// ENQ/EOT handshake, then each block in turn, each awaiting ACK within
  /// T2 and retransmitted on NAK or timeout up to the retry limit.
  fn perform_send(&mut self, message: &DataMessage) -> Result<(), Error> {
    let blocks = segment(message, self.settings.role, self.settings.device_id);

    // HANDSHAKE
    //
    // Write ENQ and wait up to T2 for EOT. A simultaneous ENQ from the
    // peer is line contention: the equipment yields by servicing the
    // host's message first, the host keeps waiting for its EOT.
    let mut enq_attempts: u32 = 0;
    loop {
      if self.stop.load(Relaxed) {
        return Err(Error::Core(secs_core::Error::Cancelled));
      }
      self.link.write(&[ENQ]).map_err(Error::Core)?;
      let deadline = Instant::now() + self.settings.t2;
      let outcome = loop {
        match self.read_until(deadline) {
          Ok(EOT) => break Handshake::Granted,
          Ok(ENQ) => {
            if self.settings.role == Role::Equipment {
              break Handshake::Yield;
            }
            trace!(target: "secs_i", "contention: host holds the line request");
          },
          Ok(byte) => {
            trace!(target: "secs_i", byte, "ignoring byte while awaiting EOT");
          },
          Err(secs_core::Error::Timeout) => break Handshake::Timeout,
          Err(error) => return Err(error.into()),
        }
      };
      match outcome {
        Handshake::Granted => break,
        Handshake::Yield => {
          debug!(target: "secs_i", "contention: equipment yields to host");
          if let Err(error) = self.respond_and_receive() {
            warn!(target: "secs_i", %error, "receive during contention failed");
          }
        },
        Handshake::Timeout => {
          enq_attempts += 1;
          if enq_attempts > self.settings.retry_limit {
            return Err(Error::Core(secs_core::Error::Timeout));
          }
          debug!(target: "secs_i", attempt = enq_attempts, "ENQ unanswered, retrying");
        },
      }
    }

    // BLOCK TRANSFER
    //
    // Each block awaits its checksum verdict within T2. NAK and silence
    // both consume a retry; any other byte here is a protocol error.
    for (index, block) in blocks.iter().enumerate() {
      let mut attempts: u32 = 0;
      loop {
        self.link.write(block).map_err(Error::Core)?;
        let deadline = Instant::now() + self.settings.t2;
        match self.read_until(deadline) {
          Ok(ACK) => break,
          Ok(NAK) => {
            attempts += 1;
            if attempts > self.settings.retry_limit {
              return Err(Error::NakExhausted);
            }
            debug!(target: "secs_i", block = index + 1, attempt = attempts, "block refused, retrying");
          },
          Ok(byte) => {
            warn!(target: "secs_i", byte, "unexpected byte while awaiting checksum verdict");
            return Err(Error::ProtocolError);
          },
          Err(secs_core::Error::Timeout) => {
            attempts += 1;
            if attempts > self.settings.retry_limit {
              return Err(Error::Core(secs_core::Error::Timeout));
            }
            debug!(target: "secs_i", block = index + 1, attempt = attempts, "verdict timed out, retrying");
          },
          Err(error) => return Err(error.into()),
        }
      }
    }
    trace!(target: "secs_i", blocks = blocks.len(), "send transaction complete");
    Ok(())
  }

  /// ### RECEIVE TRANSACTION
  /// **Based on SEMI E4§6.3, §8.3**
  ///
  /// Entered after an inbound ENQ: grant the line with EOT, then read
  /// blocks until the E-bit, honoring T1 between characters, T2 for the
  /// first block, and T4 between blocks.
  fn respond_and_receive(&mut self) -> Result<(), Error> {
    self.link.write(&[EOT]).map_err(Error::Core)?;

    let mut assembler = Assembler::new();
    let mut nak_count: u32 = 0;
    // T2 governs the first block byte; after a NAK the retransmission is
    // also due within T2; between accepted blocks T4 applies.
    let mut block_timeout = self.settings.t2;
    loop {
      let length = self.link.read_byte(Some(block_timeout)).map_err(Error::Core)?;
      if !(10..=254).contains(&length) {
        warn!(target: "secs_i", length, "discarding block with invalid length byte");
        return Err(Error::InvalidBlock);
      }

      // Remainder of the block: header + text + checksum, T1 per
      // character.
      let mut buffer = vec![0u8; length as usize + 2];
      for slot in buffer.iter_mut() {
        *slot = self
          .link
          .read_byte(Some(self.settings.t1))
          .map_err(Error::Core)?;
      }
      let counted = length as usize;
      let received_sum = u16::from_be_bytes([buffer[counted], buffer[counted + 1]]);
      let computed_sum = checksum(&buffer[..counted]);

      if computed_sum != received_sum {
        debug!(target: "secs_i", received_sum, computed_sum, "block checksum mismatch");
        self.link.write(&[NAK]).map_err(Error::Core)?;
        nak_count += 1;
        if nak_count > self.settings.retry_limit {
          return Err(Error::ChecksumError);
        }
        block_timeout = self.settings.t2;
        continue;
      }

      self.link.write(&[ACK]).map_err(Error::Core)?;
      let header = BlockHeader::from(<[u8; 10]>::try_from(&buffer[..10]).unwrap());
      if let Some(expected) = self.settings.expected_device_id {
        if header.device_id != expected {
          warn!(
            target: "secs_i",
            device_id = header.device_id,
            expected,
            "block carries unexpected device id"
          );
        }
      }
      match assembler.push(header, &buffer[10..counted])? {
        Some((device_id, message)) => {
          trace!(
            target: "secs_i",
            stream = message.stream,
            function = message.function,
            "message reassembled"
          );
          return self
            .inbound
            .send(ReceivedMessage { device_id, message })
            .map_err(|_| Error::Core(secs_core::Error::Cancelled));
        },
        None => {
          block_timeout = self.settings.t4;
        },
      }
    }
  }
}
