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

//! # PRIMITIVE SERVICES
//!
//! Defines the most agnostic form in which data can be exchanged persuant to
//! the [HSMS] protocol: managing the creation and breaking of the TCP/IP
//! connection, framing messages with properly formatted headers, enforcing
//! the T8 intercharacter timeout within a frame, and serializing all writes
//! through a single writer which drains control messages ahead of data
//! messages.
//!
//! ---------------------------------------------------------------------------
//!
//! To use the [Primitive Services]:
//!
//! - Build [Message]s which use [Message Header]s.
//! - Create a [Client] with the [New Client] function.
//! - Manage the [Connection State] with the [Connect Procedure] and
//!   [Disconnect Procedure].
//! - Receive [Message]s with the hook provided by the [Connect Procedure].
//! - Transmit [Message]s with the [Transmit Procedure].
//!
//! [HSMS]:                 crate
//! [Primitive Services]:   crate::primitive
//! [Client]:               Client
//! [New Client]:           Client::new
//! [Connect Procedure]:    Client::connect
//! [Disconnect Procedure]: Client::disconnect
//! [Transmit Procedure]:   Client::transmit
//! [Message]:              Message
//! [Message Header]:       MessageHeader
//! [Connection State]:     ConnectionState

use crate::{ConnectionMode, Error};
use secs_core::FixedBuffer;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// ## LENGTH FIELD SIZE
///
/// Every frame leads with a 4-byte big-endian payload length.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// ## HEADER SIZE
/// **Based on SEMI E37-1109§8.2.5**
pub const HEADER_SIZE: usize = 10;

/// ## MESSAGE
/// **Based on SEMI E37-1109§8.2**
///
/// Data using the [HSMS] defined structure, but not enforcing compliance
/// with the standards for how its fields are filled and what they mean.
///
/// Note that the Message Length field is not included, as it exists only
/// transiently while a message is received or transmitted by the [Client].
///
/// [HSMS]:   crate
/// [Client]: Client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// ### MESSAGE HEADER
  pub header: MessageHeader,

  /// ### MESSAGE TEXT
  ///
  /// The message body, whose layout is determined by the [Presentation
  /// Type] and [Session Type].
  ///
  /// [Presentation Type]: MessageHeader::presentation_type
  /// [Session Type]:      MessageHeader::session_type
  pub text: Vec<u8>,
}

/// ## MESSAGE HEADER
/// **Based on SEMI E37-1109§8.2.5-8.2.6**
///
/// A 10 byte field describing the contents of a [Message].
///
/// [Message]: Message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
  /// ### SESSION ID
  /// **Based on SEMI E37-1109§8.2.6.1**
  ///
  /// Provides an association between [Message]s across multiple
  /// transactions.
  ///
  /// [Message]: Message
  pub session_id: u16,

  /// ### HEADER BYTE 2
  /// **Based on SEMI E37-1109§8.2.6.2**
  ///
  /// For data messages: the W-bit in the top bit and the stream in the
  /// lower seven. For Select.rsp and Deselect.rsp: the status. For
  /// Reject.req: the reason code.
  pub byte_2: u8,

  /// ### HEADER BYTE 3
  /// **Based on SEMI E37-1109§8.2.6.3**
  ///
  /// For data messages: the function.
  pub byte_3: u8,

  /// ### PRESENTATION TYPE
  /// **Based on SEMI E37-1109§8.2.6.4**
  ///
  /// Only 0x00 (SECS-II) is supported.
  pub presentation_type: u8,

  /// ### SESSION TYPE
  /// **Based on SEMI E37-1109§8.2.6.5-8.2.6.6**
  ///
  /// The specific type of [HSMS] message being represented.
  ///
  /// [HSMS]: crate
  pub session_type: u8,

  /// ### SYSTEM BYTES
  /// **Based on SEMI E37-1109§8.2.6.7**
  ///
  /// Identifies a transaction uniquely among the set of open transactions.
  pub system: u32,
}
impl From<MessageHeader> for [u8; 10] {
  /// ### SERIALIZE MESSAGE HEADER
  fn from(val: MessageHeader) -> Self {
    let mut bytes: [u8; 10] = [0; 10];
    bytes[0..2].copy_from_slice(&val.session_id.to_be_bytes());
    bytes[2] = val.byte_2;
    bytes[3] = val.byte_3;
    bytes[4] = val.presentation_type;
    bytes[5] = val.session_type;
    bytes[6..10].copy_from_slice(&val.system.to_be_bytes());
    bytes
  }
}
impl From<[u8; 10]> for MessageHeader {
  /// ### DESERIALIZE MESSAGE HEADER
  fn from(bytes: [u8; 10]) -> Self {
    MessageHeader {
      session_id: u16::from_be_bytes([bytes[0], bytes[1]]),
      byte_2: bytes[2],
      byte_3: bytes[3],
      presentation_type: bytes[4],
      session_type: bytes[5],
      system: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
    }
  }
}

/// ## ENCODE FRAME
/// **Based on SEMI E37-1109§8.2**
///
/// Produces the on-wire form of a [Message]: the 4-byte big-endian payload
/// length, the 10-byte header, and the body.
///
/// A presentation type other than 0x00 is an [Invalid Argument]; a body
/// larger than `max_payload_bytes` minus the header is a [Buffer Overflow].
///
/// [Message]:          Message
/// [Invalid Argument]: secs_core::Error::InvalidArgument
/// [Buffer Overflow]:  secs_core::Error::BufferOverflow
pub fn encode_frame(message: &Message, max_payload_bytes: usize) -> Result<Vec<u8>, Error> {
  if message.header.presentation_type != 0 {
    return Err(Error::Core(secs_core::Error::InvalidArgument));
  }
  let payload_length = HEADER_SIZE + message.text.len();
  if payload_length > max_payload_bytes {
    return Err(Error::Core(secs_core::Error::BufferOverflow));
  }
  let mut frame: Vec<u8> = Vec::with_capacity(LENGTH_FIELD_SIZE + payload_length);
  frame.extend_from_slice(&(payload_length as u32).to_be_bytes());
  let header_bytes: [u8; 10] = message.header.into();
  frame.extend_from_slice(&header_bytes);
  frame.extend_from_slice(&message.text);
  Ok(frame)
}

/// ## DECODE PAYLOAD
///
/// Parses a frame payload (header plus body, the length field already
/// stripped) into a [Message]. Payloads shorter than the header are an
/// [Invalid Argument].
///
/// [Message]:          Message
/// [Invalid Argument]: secs_core::Error::InvalidArgument
pub fn decode_payload(payload: &[u8]) -> Result<Message, Error> {
  if payload.len() < HEADER_SIZE {
    return Err(Error::Core(secs_core::Error::InvalidArgument));
  }
  let header_bytes: [u8; 10] = payload[0..10].try_into().unwrap();
  Ok(Message {
    header: MessageHeader::from(header_bytes),
    text: payload[10..].to_vec(),
  })
}

/// ## WRITE CLASS
///
/// Which writer queue a frame is placed on. The writer drains the control
/// queue to empty before each data frame, so control messages queued
/// concurrently with a data backlog still reach the wire first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteClass {
  /// ### CONTROL
  Control,

  /// ### DATA
  Data,
}

/// A frame awaiting the writer, and the handle its caller is waiting on.
struct WriteJob {
  frame: Vec<u8>,
  done: oneshot::Sender<Result<(), Error>>,
}

/// The two write queues and their gate flags, shared between the writer
/// thread and the callers of the transmit procedure.
struct WriterQueues {
  control: VecDeque<WriteJob>,
  data: VecDeque<WriteJob>,
  data_writes_enabled: bool,
  data_failure: Option<Error>,
  closed: bool,
}

struct WriterState {
  queues: Mutex<WriterQueues>,
  ready: Condvar,
}
impl WriterState {
  fn new() -> Arc<Self> {
    Arc::new(WriterState {
      queues: Mutex::new(WriterQueues {
        control: VecDeque::new(),
        data: VecDeque::new(),
        data_writes_enabled: true,
        data_failure: None,
        closed: false,
      }),
      ready: Condvar::new(),
    })
  }

  /// Fails every queued job and refuses future ones.
  fn close(&self, reason: Error) {
    let mut queues = self.queues.lock().unwrap();
    queues.closed = true;
    for job in queues.control.drain(..) {
      let _ = job.done.send(Err(reason.clone()));
    }
    for job in queues.data.drain(..) {
      let _ = job.done.send(Err(reason.clone()));
    }
    self.ready.notify_all();
  }
}

/// ## CONNECTION STATE
/// **Based on SEMI E37-1109§5.4-5.5**
///
/// In the [HSMS] protocol, two [Connection State]s exist, [NOT CONNECTED]
/// and [CONNECTED]. The [Client] moves between them based on whether it has
/// established a TCP/IP connection to a remote entity, and the integrity of
/// that connection.
///
/// [HSMS]:             crate
/// [Client]:           Client
/// [Connection State]: ConnectionState
/// [NOT CONNECTED]:    ConnectionState::NotConnected
/// [CONNECTED]:        ConnectionState::Connected
#[derive(Debug, Default)]
pub enum ConnectionState {
  /// ### NOT CONNECTED
  #[default]
  NotConnected,

  /// ### CONNECTED
  Connected(TcpStream),
}

/// ## CLIENT
///
/// Encapsulates the [Primitive Services] of the [HSMS] protocol.
///
/// [HSMS]:               crate
/// [Primitive Services]: crate::primitive
pub struct Client {
  connection_state: RwLock<ConnectionState>,
  writer: Mutex<Option<Arc<WriterState>>>,
  max_payload_bytes: usize,
}

/// ## CLIENT: CONNECTION PROCEDURES
/// **Based on SEMI E37-1109§6.3-6.5**
impl Client {
  /// ### NEW CLIENT
  ///
  /// Creates a [Client] in the [NOT CONNECTED] state, ready to initiate
  /// the [Connect Procedure].
  ///
  /// [Client]:            Client
  /// [Connect Procedure]: Client::connect
  /// [NOT CONNECTED]:     ConnectionState::NotConnected
  pub fn new(max_payload_bytes: usize) -> Arc<Self> {
    Arc::new(Client {
      connection_state: Default::default(),
      writer: Default::default(),
      max_payload_bytes,
    })
  }

  /// ### CONNECT PROCEDURE
  /// **Based on SEMI E37-1109§6.3.4-6.3.7**
  ///
  /// Connects the [Client] to the remote entity.
  ///
  /// -------------------------------------------------------------------------
  ///
  /// The [Connection State] must be [NOT CONNECTED] to use this procedure.
  ///
  /// With [PASSIVE] the socket address of the local entity must be
  /// provided, and the [Client] listens for and accepts the connection when
  /// initiated by the remote entity. With [ACTIVE] the socket address of
  /// the remote entity must be provided, and the [Client] initiates the
  /// connection, waiting up to `t5` for the remote entity to respond.
  ///
  /// Upon completion the reader and writer threads are running, `t8` is the
  /// read timeout within a frame, and the [CONNECTED] state is entered.
  /// Received [Message]s arrive through the returned hook until the
  /// connection breaks.
  ///
  /// [Client]:           Client
  /// [Message]:          Message
  /// [Connection State]: ConnectionState
  /// [NOT CONNECTED]:    ConnectionState::NotConnected
  /// [CONNECTED]:        ConnectionState::Connected
  /// [PASSIVE]:          crate::ConnectionMode::Passive
  /// [ACTIVE]:           crate::ConnectionMode::Active
  pub fn connect(
    self: &Arc<Self>,
    entity: &str,
    connection_mode: ConnectionMode,
    t5: Duration,
    t8: Duration,
  ) -> Result<(SocketAddr, Receiver<Message>), Error> {
    let stream: TcpStream = {
      match &*self.connection_state.read().unwrap() {
        ConnectionState::NotConnected => match connection_mode {
          ConnectionMode::Passive => {
            let listener = TcpListener::bind(entity).map_err(secs_core::Error::from)?;
            let (stream, socket) = listener.accept().map_err(secs_core::Error::from)?;
            debug!(target: "secs_hsms", %socket, "accepted connection");
            stream
          },
          ConnectionMode::Active => {
            let address = entity
              .to_socket_addrs()
              .map_err(secs_core::Error::from)?
              .next()
              .ok_or(Error::Core(secs_core::Error::InvalidArgument))?;
            let stream =
              TcpStream::connect_timeout(&address, t5).map_err(secs_core::Error::from)?;
            debug!(target: "secs_hsms", %address, "connected");
            stream
          },
        },
        ConnectionState::Connected(_) => {
          return Err(Error::Core(secs_core::Error::InvalidArgument))
        },
      }
    };
    let socket = stream.peer_addr().map_err(secs_core::Error::from)?;
    stream.set_nodelay(true).map_err(secs_core::Error::from)?;
    // T8 governs the gap between bytes within one frame; the reader treats
    // a timeout with an empty buffer as idleness rather than failure.
    stream
      .set_read_timeout(Some(t8))
      .map_err(secs_core::Error::from)?;

    let reader_stream = stream.try_clone().map_err(secs_core::Error::from)?;
    let writer_stream = stream.try_clone().map_err(secs_core::Error::from)?;
    *self.connection_state.write().unwrap() = ConnectionState::Connected(stream);

    let writer_state = WriterState::new();
    *self.writer.lock().unwrap() = Some(writer_state.clone());
    thread::spawn(move || writer_loop(writer_stream, writer_state));

    let (rx_sender, rx_receiver) = channel::<Message>();
    let rx_clone: Arc<Client> = self.clone();
    let max_payload_bytes = self.max_payload_bytes;
    thread::spawn(move || rx_clone.reader_loop(reader_stream, rx_sender, max_payload_bytes));

    Ok((socket, rx_receiver))
  }

  /// ### DISCONNECT PROCEDURE
  /// **Based on SEMI E37-1109§6.4-6.5**
  ///
  /// Severs the TCP/IP connection, failing queued writes, and enters the
  /// [NOT CONNECTED] state.
  ///
  /// [NOT CONNECTED]: ConnectionState::NotConnected
  pub fn disconnect(self: &Arc<Self>) -> Result<(), Error> {
    if let Some(writer) = self.writer.lock().unwrap().take() {
      writer.close(Error::Core(secs_core::Error::Cancelled));
    }
    let mut state = self.connection_state.write().unwrap();
    match &*state {
      ConnectionState::Connected(stream) => {
        debug!(target: "secs_hsms", "disconnecting");
        let _ = stream.shutdown(Shutdown::Both);
        *state = ConnectionState::NotConnected;
        Ok(())
      },
      ConnectionState::NotConnected => Err(Error::Core(secs_core::Error::InvalidArgument)),
    }
  }

  /// ### CONNECTED
  pub fn is_connected(&self) -> bool {
    matches!(
      &*self.connection_state.read().unwrap(),
      ConnectionState::Connected(_)
    )
  }
}

/// ## CLIENT: MESSAGE EXCHANGE PROCEDURES
/// **Based on SEMI E37-1109§7**
impl Client {
  /// ### TRANSMIT PROCEDURE
  /// **Based on SEMI E37-1109§7.2**
  ///
  /// Frames the [Message] and places it on the writer queue selected by
  /// `class`, blocking until the writer has put it on the wire or failed.
  ///
  /// Data frames are refused immediately when data writes are disabled.
  ///
  /// [Message]: Message
  pub fn transmit(self: &Arc<Self>, message: Message, class: WriteClass) -> Result<(), Error> {
    let frame = encode_frame(&message, self.max_payload_bytes)?;
    let writer = match &*self.writer.lock().unwrap() {
      Some(writer) => writer.clone(),
      None => return Err(Error::Core(secs_core::Error::InvalidArgument)),
    };
    let (done, receiver) = oneshot::channel();
    {
      let mut queues = writer.queues.lock().unwrap();
      if queues.closed {
        return Err(Error::Core(secs_core::Error::Cancelled));
      }
      match class {
        WriteClass::Control => queues.control.push_back(WriteJob { frame, done }),
        WriteClass::Data => {
          if !queues.data_writes_enabled {
            return Err(
              queues
                .data_failure
                .clone()
                .unwrap_or(Error::Core(secs_core::Error::Cancelled)),
            );
          }
          queues.data.push_back(WriteJob { frame, done });
        },
      }
      writer.ready.notify_all();
    }
    match receiver.recv() {
      Ok(result) => result,
      Err(_) => Err(Error::Core(secs_core::Error::Cancelled)),
    }
  }

  /// ### DISABLE DATA WRITES
  ///
  /// Drains the data queue with `reason` and refuses further data frames
  /// with it. Used when leaving the SELECTED state so control sequencing
  /// cannot be raced by a data backlog. Writes are re-enabled by the next
  /// [Connect Procedure].
  ///
  /// [Connect Procedure]: Client::connect
  pub fn disable_data_writes(self: &Arc<Self>, reason: Error) {
    if let Some(writer) = &*self.writer.lock().unwrap() {
      let mut queues = writer.queues.lock().unwrap();
      queues.data_writes_enabled = false;
      queues.data_failure = Some(reason.clone());
      for job in queues.data.drain(..) {
        let _ = job.done.send(Err(reason.clone()));
      }
      writer.ready.notify_all();
    }
  }

  /// ### RECEPTION HANDLER
  ///
  /// A [Client] in the [CONNECTED] state automatically receives frames,
  /// buffering partial reads, and sends parsed [Message]s to the hook
  /// provided by the [Connect Procedure].
  ///
  /// Exceeding T8 between two bytes of a frame, a malformed length field,
  /// or any read failure closes the connection.
  ///
  /// [Client]:            Client
  /// [Message]:           Message
  /// [Connect Procedure]: Client::connect
  /// [CONNECTED]:         ConnectionState::Connected
  fn reader_loop(
    self: Arc<Self>,
    mut stream: TcpStream,
    rx_sender: Sender<Message>,
    max_payload_bytes: usize,
  ) {
    debug!(target: "secs_hsms", "reader start");
    let mut buffer = FixedBuffer::with_max_capacity(max_payload_bytes + LENGTH_FIELD_SIZE + 16);
    'read: loop {
      // Drain every complete frame currently buffered.
      loop {
        let readable = buffer.readable();
        if readable.len() < LENGTH_FIELD_SIZE {
          break;
        }
        let length =
          u32::from_be_bytes([readable[0], readable[1], readable[2], readable[3]]) as usize;
        if !(HEADER_SIZE..=max_payload_bytes).contains(&length) {
          warn!(target: "secs_hsms", length, "invalid frame length");
          break 'read;
        }
        if readable.len() < LENGTH_FIELD_SIZE + length {
          break;
        }
        let message = match decode_payload(&readable[LENGTH_FIELD_SIZE..LENGTH_FIELD_SIZE + length])
        {
          Ok(message) => message,
          Err(error) => {
            warn!(target: "secs_hsms", %error, "invalid frame payload");
            break 'read;
          },
        };
        buffer.consume(LENGTH_FIELD_SIZE + length).unwrap();
        trace!(
          target: "secs_hsms",
          session_type = message.header.session_type,
          system = message.header.system,
          "frame received"
        );
        if rx_sender.send(message).is_err() {
          break 'read;
        }
      }

      // Refill. A read timeout with nothing buffered is mere idleness; with
      // a partial frame buffered it is a T8 violation.
      buffer.compact();
      if buffer.writable().is_empty() {
        let target = (buffer.len() + 64 * 1024).min(max_payload_bytes + LENGTH_FIELD_SIZE + 16);
        if buffer.reserve(target).is_err() || buffer.writable().is_empty() {
          warn!(target: "secs_hsms", "frame exceeds receive buffer");
          break 'read;
        }
      }
      match stream.read(buffer.writable()) {
        Ok(0) => {
          debug!(target: "secs_hsms", "connection closed by peer");
          break 'read;
        },
        Ok(n) => buffer.commit(n).unwrap(),
        Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {},
        Err(error)
          if error.kind() == std::io::ErrorKind::WouldBlock
            || error.kind() == std::io::ErrorKind::TimedOut =>
        {
          if !buffer.is_empty() {
            warn!(target: "secs_hsms", "T8 expired within a frame");
            break 'read;
          }
        },
        Err(error) => {
          debug!(target: "secs_hsms", %error, "read failed");
          break 'read;
        },
      }
    }
    let _ = self.disconnect();
    debug!(target: "secs_hsms", "reader end");
  }
}

/// ## WRITER LOOP
///
/// The single thread with the right to write to the stream. Control frames
/// are drained to empty before each data frame; disabled data frames are
/// failed with the configured reason; a write failure fails everything
/// queued and stops the writer.
fn writer_loop(mut stream: TcpStream, state: Arc<WriterState>) {
  debug!(target: "secs_hsms", "writer start");
  loop {
    let job: WriteJob = {
      let mut queues = state.queues.lock().unwrap();
      loop {
        if queues.closed {
          drop(queues);
          state.close(Error::Core(secs_core::Error::Cancelled));
          debug!(target: "secs_hsms", "writer end");
          return;
        }
        if let Some(job) = queues.control.pop_front() {
          break job;
        }
        if queues.data_writes_enabled {
          if let Some(job) = queues.data.pop_front() {
            break job;
          }
        } else if let Some(job) = queues.data.pop_front() {
          let reason = queues
            .data_failure
            .clone()
            .unwrap_or(Error::Core(secs_core::Error::Cancelled));
          let _ = job.done.send(Err(reason));
          continue;
        }
        queues = state.ready.wait(queues).unwrap();
      }
    };
    match stream.write_all(&job.frame) {
      Ok(()) => {
        let _ = job.done.send(Ok(()));
      },
      Err(error) => {
        warn!(target: "secs_hsms", %error, "write failed");
        let _ = job.done.send(Err(Error::Core(secs_core::Error::from(error))));
        state.close(Error::Core(secs_core::Error::Cancelled));
        debug!(target: "secs_hsms", "writer end");
        return;
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_message() -> Message {
    Message {
      header: MessageHeader {
        session_id: 0x0001,
        byte_2: 0x81,
        byte_3: 0x0D,
        presentation_type: 0,
        session_type: 0,
        system: 0x01020304,
      },
      text: vec![0xAA, 0xBB],
    }
  }

  #[test]
  fn frame_layout_is_length_header_body() {
    let frame = encode_frame(&sample_message(), 1024).unwrap();
    assert_eq!(
      frame,
      vec![
        0x00, 0x00, 0x00, 0x0C, // length = 10 + 2
        0x00, 0x01, 0x81, 0x0D, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, // header
        0xAA, 0xBB, // body
      ]
    );
  }

  #[test]
  fn frame_round_trips_through_decode_payload() {
    let message = sample_message();
    let frame = encode_frame(&message, 1024).unwrap();
    let decoded = decode_payload(&frame[LENGTH_FIELD_SIZE..]).unwrap();
    assert_eq!(decoded, message);
  }

  #[test]
  fn nonzero_presentation_type_is_rejected() {
    let mut message = sample_message();
    message.header.presentation_type = 1;
    assert_eq!(
      encode_frame(&message, 1024),
      Err(Error::Core(secs_core::Error::InvalidArgument))
    );
  }

  #[test]
  fn oversized_body_is_rejected() {
    let mut message = sample_message();
    message.text = vec![0; 1024];
    assert_eq!(
      encode_frame(&message, 1024),
      Err(Error::Core(secs_core::Error::BufferOverflow))
    );
  }

  #[test]
  fn short_payload_is_rejected() {
    assert_eq!(
      decode_payload(&[0u8; 9]),
      Err(Error::Core(secs_core::Error::InvalidArgument))
    );
  }
}
