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

//! # GENERIC SERVICES
//!
//! Defines the full functionality of the [HSMS] protocol: the selection
//! state machine layered over the [Primitive Services], the Select,
//! Deselect, Linktest, Separate, and Reject procedures, periodic link
//! testing, and automatic reconnection.
//!
//! ---------------------------------------------------------------------------
//!
//! To use the [Generic Services]:
//!
//! - Create a [Client] by providing the [New Client] function with
//!   [Parameter Settings].
//! - Manage the [Connection State] with the [Connect Procedure],
//!   [Run Active Procedure], and [Disconnect Procedure].
//! - Exchange data with the [Data Send Procedure], [Data Receive
//!   Procedure], and [Data Request Procedure].
//! - Test connection integrity with the [Linktest Procedure].
//! - Release or break the session with the [Deselect Procedure] and
//!   [Separate Procedure].
//!
//! [HSMS]:                   crate
//! [Primitive Services]:     crate::primitive
//! [Generic Services]:       crate::generic
//! [Parameter Settings]:     crate::ParameterSettings
//! [Client]:                 Client
//! [New Client]:             Client::new
//! [Connect Procedure]:      Client::connect
//! [Run Active Procedure]:   Client::run_active
//! [Disconnect Procedure]:   Client::disconnect
//! [Data Send Procedure]:    Client::send_data
//! [Data Receive Procedure]: Client::receive_data
//! [Data Request Procedure]: Client::request_data
//! [Linktest Procedure]:     Client::linktest
//! [Deselect Procedure]:     Client::deselect
//! [Separate Procedure]:     Client::separate
//! [Connection State]:       crate::primitive::ConnectionState

use crate::primitive::{self, MessageHeader, WriteClass};
use crate::{ConnectionMode, Error, ParameterSettings};
use atomic::Atomic;
use bytemuck::NoUninit;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use secs_core::DataMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// ## SESSION TYPE
/// **Based on SEMI E37-1109§8.2.6.5**
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SessionType {
  DataMessage = 0,
  SelectRequest = 1,
  SelectResponse = 2,
  DeselectRequest = 3,
  DeselectResponse = 4,
  LinktestRequest = 5,
  LinktestResponse = 6,
  RejectRequest = 7,
  SeparateRequest = 9,
}

/// ## SELECT STATUS
/// **Based on SEMI E37-1109§8.3.7**
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum SelectStatus {
  /// ### SELECT COMPLETED
  Ok = 0,

  /// ### COMMUNICATION ALREADY ACTIVE
  AlreadyActive = 1,

  /// ### CONNECTION NOT READY
  NotReady = 2,

  /// ### CONNECTION EXHAUSTED
  Exhausted = 3,
}

/// ## REJECT REASON
/// **Based on SEMI E37-1109§8.3.21**
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum RejectReason {
  /// ### SESSION TYPE NOT SUPPORTED
  STypeNotSupported = 1,

  /// ### PRESENTATION TYPE NOT SUPPORTED
  PTypeNotSupported = 2,

  /// ### TRANSACTION NOT OPEN
  ///
  /// A response message was received without a corresponding open
  /// transaction.
  TransactionNotOpen = 3,

  /// ### ENTITY NOT SELECTED
  ///
  /// A data message was received outside the SELECTED state.
  EntityNotSelected = 4,

  /// ### ALREADY SELECTED
  ///
  /// Local extension: a Select.req was received while the session was
  /// already selected.
  AlreadySelected = 5,
}

/// ## SELECTION STATE
/// **Based on SEMI E37-1109§5.5.2**
///
/// The sub-state of a [CONNECTED] client: data messages may only be
/// exchanged while [SELECTED].
///
/// [CONNECTED]: crate::primitive::ConnectionState::Connected
/// [SELECTED]:  SelectionState::Selected
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, NoUninit)]
pub enum SelectionState {
  /// ### NOT SELECTED
  #[default]
  NotSelected = 0,

  /// ### SELECTED
  Selected = 1,
}

/// ## MESSAGE ID
/// **Based on SEMI E37-1109§8.2**
///
/// The uniquely identifying components of a [Message] in forming a valid
/// transaction: the [Session ID] and [System Bytes].
///
/// [Message]:      Message
/// [Session ID]:   MessageID::session
/// [System Bytes]: MessageID::system
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageID {
  /// ### SESSION ID
  pub session: u16,

  /// ### SYSTEM BYTES
  pub system: u32,
}

/// ## MESSAGE CONTENTS
/// **Based on SEMI E37-1109§8.3.1-8.3.21**
///
/// The contents of a [Message], broken down by [Session Type].
///
/// [Message]:      Message
/// [Session Type]: SessionType
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContents {
  /// ### DATA MESSAGE
  ///
  /// A SECS-II data message; the body is kept in encoded form.
  DataMessage {
    stream: u8,
    function: u8,
    w_bit: bool,
    body: Vec<u8>,
  },

  /// ### SELECT REQUEST
  SelectRequest,

  /// ### SELECT RESPONSE
  ///
  /// Carries the [Select Status] in header byte 2.
  ///
  /// [Select Status]: SelectStatus
  SelectResponse(u8),

  /// ### DESELECT REQUEST
  DeselectRequest,

  /// ### DESELECT RESPONSE
  DeselectResponse(u8),

  /// ### LINKTEST REQUEST
  LinktestRequest,

  /// ### LINKTEST RESPONSE
  LinktestResponse,

  /// ### REJECT REQUEST
  ///
  /// Carries the [Reject Reason] in header byte 2; the body echoes the
  /// 10-byte header of the rejected message.
  ///
  /// [Reject Reason]: RejectReason
  RejectRequest(u8, Vec<u8>),

  /// ### SEPARATE REQUEST
  SeparateRequest,
}

/// ## MESSAGE
/// **Based on SEMI E37-1109§8.2-8.3**
///
/// A [Primitive Message] with a presentation type of 0, broken down into
/// its [Message ID] and [Message Contents].
///
/// [Primitive Message]: crate::primitive::Message
/// [Message ID]:        MessageID
/// [Message Contents]:  MessageContents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  pub id: MessageID,
  pub contents: MessageContents,
}
impl From<Message> for primitive::Message {
  /// ### MESSAGE -> PRIMITIVE MESSAGE
  ///
  /// Valid messages are a subset of valid primitive messages, so this
  /// operation is infallible.
  fn from(message: Message) -> Self {
    let (byte_2, byte_3, session_type, text): (u8, u8, SessionType, Vec<u8>) =
      match message.contents {
        MessageContents::DataMessage {
          stream,
          function,
          w_bit,
          body,
        } => (
          ((w_bit as u8) << 7) | (stream & 0x7F),
          function,
          SessionType::DataMessage,
          body,
        ),
        MessageContents::SelectRequest => (0, 0, SessionType::SelectRequest, vec![]),
        MessageContents::SelectResponse(status) => {
          (status, 0, SessionType::SelectResponse, vec![])
        },
        MessageContents::DeselectRequest => (0, 0, SessionType::DeselectRequest, vec![]),
        MessageContents::DeselectResponse(status) => {
          (status, 0, SessionType::DeselectResponse, vec![])
        },
        MessageContents::LinktestRequest => (0, 0, SessionType::LinktestRequest, vec![]),
        MessageContents::LinktestResponse => (0, 0, SessionType::LinktestResponse, vec![]),
        MessageContents::RejectRequest(reason, echoed_header) => {
          (reason, 0, SessionType::RejectRequest, echoed_header)
        },
        MessageContents::SeparateRequest => (0, 0, SessionType::SeparateRequest, vec![]),
      };
    primitive::Message {
      header: MessageHeader {
        session_id: message.id.session,
        byte_2,
        byte_3,
        presentation_type: 0,
        session_type: session_type.into(),
        system: message.id.system,
      },
      text,
    }
  }
}
impl TryFrom<primitive::Message> for Message {
  type Error = RejectReason;

  /// ### PRIMITIVE MESSAGE -> MESSAGE
  ///
  /// Valid messages are a subset of valid primitive messages, so this
  /// operation fails, carrying the [Reject Reason] to answer with, when
  /// the primitive message is not one.
  ///
  /// [Reject Reason]: RejectReason
  fn try_from(message: primitive::Message) -> Result<Self, Self::Error> {
    if message.header.presentation_type != 0 {
      return Err(RejectReason::PTypeNotSupported);
    }
    let session_type = SessionType::try_from(message.header.session_type)
      .map_err(|_| RejectReason::STypeNotSupported)?;
    let contents = match session_type {
      SessionType::DataMessage => MessageContents::DataMessage {
        stream: message.header.byte_2 & 0x7F,
        function: message.header.byte_3,
        w_bit: message.header.byte_2 & 0x80 > 0,
        body: message.text,
      },
      SessionType::SelectRequest => MessageContents::SelectRequest,
      SessionType::SelectResponse => MessageContents::SelectResponse(message.header.byte_2),
      SessionType::DeselectRequest => MessageContents::DeselectRequest,
      SessionType::DeselectResponse => MessageContents::DeselectResponse(message.header.byte_2),
      SessionType::LinktestRequest => MessageContents::LinktestRequest,
      SessionType::LinktestResponse => MessageContents::LinktestResponse,
      SessionType::RejectRequest => {
        MessageContents::RejectRequest(message.header.byte_2, message.text)
      },
      SessionType::SeparateRequest => MessageContents::SeparateRequest,
    };
    Ok(Message {
      id: MessageID {
        session: message.header.session_id,
        system: message.header.system,
      },
      contents,
    })
  }
}

/// What an open transaction in the outbox is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExpectedReply {
  /// A control response of the given session type.
  Control(SessionType),
  /// A secondary data message with this exact stream and function.
  Data { stream: u8, function: u8 },
}
impl ExpectedReply {
  fn matches(&self, contents: &MessageContents) -> bool {
    match (self, contents) {
      (ExpectedReply::Control(expected), _) => match contents {
        MessageContents::SelectResponse(_) => *expected == SessionType::SelectResponse,
        MessageContents::DeselectResponse(_) => *expected == SessionType::DeselectResponse,
        MessageContents::LinktestResponse => *expected == SessionType::LinktestResponse,
        _ => false,
      },
      (
        ExpectedReply::Data { stream, function },
        MessageContents::DataMessage {
          stream: got_stream,
          function: got_function,
          ..
        },
      ) => stream == got_stream && function == got_function,
      _ => false,
    }
  }
}

/// An open transaction: what it expects and who is waiting on it.
struct PendingEntry {
  expected: ExpectedReply,
  done: oneshot::Sender<Result<Message, Error>>,
}

/// A settable, waitable flag: the thread-model rendition of the event
/// primitive the session state machine is described in terms of.
struct Event {
  state: Mutex<bool>,
  condvar: Condvar,
}
impl Event {
  fn new() -> Self {
    Event {
      state: Mutex::new(false),
      condvar: Condvar::new(),
    }
  }

  fn set(&self) {
    *self.state.lock().unwrap() = true;
    self.condvar.notify_all();
  }

  fn reset(&self) {
    *self.state.lock().unwrap() = false;
  }

  fn wait(&self, timeout: Option<Duration>) -> Result<(), secs_core::Error> {
    let deadline = secs_core::deadline_after(timeout);
    let mut state = self.state.lock().unwrap();
    while !*state {
      match deadline {
        None => state = self.condvar.wait(state).unwrap(),
        Some(deadline) => {
          let now = std::time::Instant::now();
          if now >= deadline {
            return Err(secs_core::Error::Timeout);
          }
          let (next, _) = self.condvar.wait_timeout(state, deadline - now).unwrap();
          state = next;
        },
      }
    }
    Ok(())
  }
}

/// ## CLIENT
///
/// Encapsulates the full functionality of the [HSMS] protocol, known as
/// the [Generic Services].
///
/// [HSMS]:             crate
/// [Generic Services]: crate::generic
pub struct Client {
  /// ### PARAMETER SETTINGS
  pub parameter_settings: ParameterSettings,

  primitive_client: Arc<primitive::Client>,
  selection_state: Atomic<SelectionState>,
  selection_mutex: Mutex<()>,
  outbox: Mutex<HashMap<u32, PendingEntry>>,
  inbound_sender: Mutex<Option<Sender<DataMessage>>>,
  inbound_receiver: Mutex<Option<Receiver<DataMessage>>>,
  system: Mutex<u32>,
  stop_requested: AtomicBool,
  selected_event: Event,
  disconnected_event: Event,
  selected_generation: AtomicU64,
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
  /// [NOT CONNECTED]:     crate::primitive::ConnectionState::NotConnected
  pub fn new(parameter_settings: ParameterSettings) -> Arc<Self> {
    Arc::new(Client {
      primitive_client: primitive::Client::new(parameter_settings.max_payload_bytes),
      parameter_settings,
      selection_state: Default::default(),
      selection_mutex: Default::default(),
      outbox: Default::default(),
      inbound_sender: Default::default(),
      inbound_receiver: Default::default(),
      system: Mutex::new(1),
      stop_requested: AtomicBool::new(false),
      selected_event: Event::new(),
      disconnected_event: Event::new(),
      selected_generation: AtomicU64::new(0),
    })
  }

  /// ### CONNECT PROCEDURE
  /// **Based on SEMI E37-1109§6.3.4-6.3.7, §7.3-7.4**
  ///
  /// Connects the [Client] to the remote entity and establishes the
  /// session:
  ///
  /// - [ACTIVE]: connect, transmit Select.req, and await Select.rsp within
  ///   [T6]. A nonzero status closes the connection and fails with
  ///   [Select Failed].
  /// - [PASSIVE]: accept a connection and wait up to [T7] for the remote
  ///   entity to complete the Select procedure.
  ///
  /// Upon completion the [SELECTED] state has been entered and, when a
  /// [Linktest Interval] is configured, the periodic linktest loop is
  /// running.
  ///
  /// [Client]:            Client
  /// [ACTIVE]:            crate::ConnectionMode::Active
  /// [PASSIVE]:           crate::ConnectionMode::Passive
  /// [SELECTED]:          SelectionState::Selected
  /// [Select Failed]:     crate::Error::SelectFailed
  /// [T6]:                crate::ParameterSettings::t6
  /// [T7]:                crate::ParameterSettings::t7
  /// [Linktest Interval]: crate::ParameterSettings::linktest_interval
  pub fn connect(self: &Arc<Self>, entity: &str) -> Result<SocketAddr, Error> {
    if self.stop_requested.load(Relaxed) {
      return Err(Error::Core(secs_core::Error::Cancelled));
    }
    let (socket, rx_receiver) = self.primitive_client.connect(
      entity,
      self.parameter_settings.connect_mode,
      self.parameter_settings.t5,
      self.parameter_settings.t8,
    )?;

    let (data_sender, data_receiver) = channel::<DataMessage>();
    *self.inbound_sender.lock().unwrap() = Some(data_sender.clone());
    *self.inbound_receiver.lock().unwrap() = Some(data_receiver);
    self.selected_event.reset();
    self.disconnected_event.reset();

    let clone: Arc<Client> = self.clone();
    thread::spawn(move || clone.receive_loop(rx_receiver, data_sender));

    match self.parameter_settings.connect_mode {
      ConnectionMode::Active => {
        if let Err(error) = self.select() {
          return Err(error);
        }
      },
      ConnectionMode::Passive => {
        if let Err(error) = self.selected_event.wait(Some(self.parameter_settings.t7)) {
          warn!(target: "secs_hsms", "T7 expired before selection");
          self.disconnect_with(Error::Core(error.clone()));
          return Err(Error::Core(error));
        }
      },
    }
    Ok(socket)
  }

  /// ### DISCONNECT PROCEDURE
  /// **Based on SEMI E37-1109§6.4-6.5**
  ///
  /// Severs the connection: open transactions complete with [Cancelled],
  /// the inbound queue is flushed, and the [NOT SELECTED] state is
  /// entered.
  ///
  /// [Cancelled]:    secs_core::Error::Cancelled
  /// [NOT SELECTED]: SelectionState::NotSelected
  pub fn disconnect(self: &Arc<Self>) {
    self.disconnect_with(Error::Core(secs_core::Error::Cancelled));
  }

  /// ### STOP PROCEDURE
  ///
  /// As the [Disconnect Procedure], and additionally prevents this client
  /// from ever reconnecting: [Run Active Procedure] loops observe the stop
  /// between attempts.
  ///
  /// [Disconnect Procedure]: Client::disconnect
  /// [Run Active Procedure]: Client::run_active
  pub fn stop(self: &Arc<Self>) {
    self.stop_requested.store(true, Relaxed);
    self.disconnect_with(Error::Core(secs_core::Error::Cancelled));
  }

  /// ### RUN ACTIVE PROCEDURE
  ///
  /// Performs the [Connect Procedure] in [ACTIVE] mode and blocks until
  /// the session disconnects. With [Auto Reconnect] enabled, re-opens a
  /// new connection after a [T5] backoff each time the session ends,
  /// until stopped.
  ///
  /// [Connect Procedure]: Client::connect
  /// [ACTIVE]:            crate::ConnectionMode::Active
  /// [Auto Reconnect]:    crate::ParameterSettings::auto_reconnect
  /// [T5]:                crate::ParameterSettings::t5
  pub fn run_active(self: &Arc<Self>, entity: &str) -> Result<(), Error> {
    loop {
      if self.stop_requested.load(Relaxed) {
        return Ok(());
      }
      match self.connect(entity) {
        Ok(_socket) => {
          let _ = self.disconnected_event.wait(None);
          if !self.parameter_settings.auto_reconnect || self.stop_requested.load(Relaxed) {
            return Ok(());
          }
        },
        Err(error) => {
          if !self.parameter_settings.auto_reconnect || self.stop_requested.load(Relaxed) {
            return Err(error);
          }
          debug!(target: "secs_hsms", %error, "connection attempt failed, backing off");
        },
      }
      thread::sleep(self.parameter_settings.t5);
    }
  }

  /// ### SELECTED
  pub fn is_selected(&self) -> bool {
    self.selection_state.load(Relaxed) == SelectionState::Selected
  }

  /// ### CONNECTED
  pub fn is_connected(&self) -> bool {
    self.primitive_client.is_connected()
  }
}

/// ## CLIENT: MESSAGE EXCHANGE PROCEDURES
/// **Based on SEMI E37-1109§7**
impl Client {
  /// ### DATA SEND PROCEDURE
  /// **Based on SEMI E37-1109§7.5-7.6**
  ///
  /// Transmits a data message without awaiting any reply. The [Selection
  /// State] must be [SELECTED].
  ///
  /// [Selection State]: SelectionState
  /// [SELECTED]:        SelectionState::Selected
  pub fn send_data(self: &Arc<Self>, data: DataMessage) -> Result<(), Error> {
    if !self.is_selected() {
      return Err(Error::NotSelected);
    }
    self.transmit(
      Message {
        id: MessageID {
          session: self.parameter_settings.session_id,
          system: data.system_bytes,
        },
        contents: MessageContents::DataMessage {
          stream: data.stream,
          function: data.function,
          w_bit: data.w_bit,
          body: data.body,
        },
      },
      WriteClass::Data,
    )
  }

  /// ### DATA RECEIVE PROCEDURE
  ///
  /// Pops the next inbound data message, waiting up to `timeout` ([None]
  /// waits indefinitely). Control messages are handled inline by the
  /// reception handler and never surface here. Returns [Cancelled] once
  /// the session disconnects.
  ///
  /// [Cancelled]: secs_core::Error::Cancelled
  pub fn receive_data(&self, timeout: Option<Duration>) -> Result<DataMessage, Error> {
    let receiver_guard = self.inbound_receiver.lock().unwrap();
    let receiver = match &*receiver_guard {
      Some(receiver) => receiver,
      None => return Err(Error::Core(secs_core::Error::Cancelled)),
    };
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

  /// ### DATA REQUEST PROCEDURE
  /// **Based on SEMI E37-1109§7.5-7.6**
  ///
  /// Transmits a primary data message with the reply bit and waits for the
  /// correlated secondary: same system bytes, stream, and function plus
  /// one. Waits up to `timeout`, defaulting to [T3]; on expiry the open
  /// transaction is erased and [Timeout] returned.
  ///
  /// [T3]:      crate::ParameterSettings::t3
  /// [Timeout]: secs_core::Error::Timeout
  pub fn request_data(
    self: &Arc<Self>,
    stream: u8,
    function: u8,
    body: Vec<u8>,
    timeout: Option<Duration>,
  ) -> Result<DataMessage, Error> {
    if !self.is_selected() {
      return Err(Error::NotSelected);
    }
    if function % 2 == 0 || function == 0xFF {
      return Err(Error::Core(secs_core::Error::InvalidArgument));
    }
    let system = self.next_system();
    let (done, reply) = oneshot::channel();
    self.outbox.lock().unwrap().insert(
      system,
      PendingEntry {
        expected: ExpectedReply::Data {
          stream,
          function: function + 1,
        },
        done,
      },
    );
    let transmit_result = self.transmit(
      Message {
        id: MessageID {
          session: self.parameter_settings.session_id,
          system,
        },
        contents: MessageContents::DataMessage {
          stream,
          function,
          w_bit: true,
          body,
        },
      },
      WriteClass::Data,
    );
    if let Err(error) = transmit_result {
      self.outbox.lock().unwrap().remove(&system);
      return Err(error);
    }
    let duration = timeout.unwrap_or(self.parameter_settings.t3);
    match reply.recv_timeout(duration) {
      Ok(Ok(message)) => match message.contents {
        MessageContents::DataMessage {
          stream,
          function,
          w_bit,
          body,
        } => Ok(DataMessage {
          stream,
          function,
          w_bit,
          system_bytes: message.id.system,
          body,
        }),
        _ => Err(Error::Core(secs_core::Error::InvalidArgument)),
      },
      Ok(Err(error)) => Err(error),
      Err(oneshot::RecvTimeoutError::Timeout) => {
        self.outbox.lock().unwrap().remove(&system);
        Err(Error::Core(secs_core::Error::Timeout))
      },
      Err(oneshot::RecvTimeoutError::Disconnected) => {
        self.outbox.lock().unwrap().remove(&system);
        Err(Error::Core(secs_core::Error::Cancelled))
      },
    }
  }

  /// ### LINKTEST PROCEDURE
  /// **Based on SEMI E37-1109§7.8**
  ///
  /// Transmits Linktest.req and waits up to [T6] for Linktest.rsp. A
  /// failure here does not itself tear the session down; the periodic
  /// linktest loop counts consecutive failures against the configured
  /// threshold.
  ///
  /// [T6]: crate::ParameterSettings::t6
  pub fn linktest(self: &Arc<Self>) -> Result<(), Error> {
    if !self.is_selected() {
      return Err(Error::NotSelected);
    }
    let reply = self.control_transaction(
      MessageContents::LinktestRequest,
      SessionType::LinktestResponse,
      self.parameter_settings.t6,
    )?;
    match reply.contents {
      MessageContents::LinktestResponse => Ok(()),
      _ => Err(Error::Core(secs_core::Error::InvalidArgument)),
    }
  }

  /// ### DESELECT PROCEDURE
  /// **Based on SEMI E37-1109§7.7**
  ///
  /// Transmits Deselect.req, waits up to [T6] for Deselect.rsp, and tears
  /// the session down.
  ///
  /// [T6]: crate::ParameterSettings::t6
  pub fn deselect(self: &Arc<Self>) -> Result<(), Error> {
    if !self.is_selected() {
      return Err(Error::NotSelected);
    }
    let reply = self.control_transaction(
      MessageContents::DeselectRequest,
      SessionType::DeselectResponse,
      self.parameter_settings.t6,
    );
    self.disconnect_with(Error::Core(secs_core::Error::Cancelled));
    match reply?.contents {
      MessageContents::DeselectResponse(0) => Ok(()),
      MessageContents::DeselectResponse(status) => Err(Error::SelectFailed(status)),
      _ => Err(Error::Core(secs_core::Error::InvalidArgument)),
    }
  }

  /// ### SEPARATE PROCEDURE
  /// **Based on SEMI E37-1109§7.9**
  ///
  /// Transmits Separate.req, which has no response, and tears the
  /// session down.
  pub fn separate(self: &Arc<Self>) -> Result<(), Error> {
    if !self.is_selected() {
      return Err(Error::NotSelected);
    }
    let system = self.next_system();
    let result = self.transmit(
      Message {
        id: MessageID {
          session: self.parameter_settings.session_id,
          system,
        },
        contents: MessageContents::SeparateRequest,
      },
      WriteClass::Control,
    );
    self.disconnect_with(Error::Core(secs_core::Error::Cancelled));
    result
  }
}

/// ## CLIENT: INTERNALS
impl Client {
  /// Allocates the next control-transaction system bytes value, skipping
  /// zero on wrap.
  fn next_system(&self) -> u32 {
    let mut system = self.system.lock().unwrap();
    let value = *system;
    *system = match system.wrapping_add(1) {
      0 => 1,
      next => next,
    };
    value
  }

  /// Builds and transmits a message on the chosen writer queue.
  fn transmit(self: &Arc<Self>, message: Message, class: WriteClass) -> Result<(), Error> {
    self.primitive_client.transmit(message.into(), class)
  }

  /// ### SELECT PROCEDURE (INITIATOR SIDE)
  /// **Based on SEMI E37-1109§7.3-7.4**
  ///
  /// Transmits Select.req and waits up to T6 for Select.rsp. A timeout or
  /// a nonzero status closes the connection.
  fn select(self: &Arc<Self>) -> Result<(), Error> {
    let reply = match self.control_transaction(
      MessageContents::SelectRequest,
      SessionType::SelectResponse,
      self.parameter_settings.t6,
    ) {
      Ok(reply) => reply,
      Err(error) => {
        self.disconnect_with(error.clone());
        return Err(error);
      },
    };
    match reply.contents {
      MessageContents::SelectResponse(0) => {
        let _guard: MutexGuard<'_, ()> = self.selection_mutex.lock().unwrap();
        self.set_selected();
        Ok(())
      },
      MessageContents::SelectResponse(status) => {
        self.disconnect_with(Error::SelectFailed(status));
        Err(Error::SelectFailed(status))
      },
      _ => Err(Error::Core(secs_core::Error::InvalidArgument)),
    }
  }

  /// Registers an open transaction, transmits the control message, and
  /// waits for the matching response.
  fn control_transaction(
    self: &Arc<Self>,
    contents: MessageContents,
    expected: SessionType,
    timeout: Duration,
  ) -> Result<Message, Error> {
    let system = self.next_system();
    let (done, reply) = oneshot::channel();
    self.outbox.lock().unwrap().insert(
      system,
      PendingEntry {
        expected: ExpectedReply::Control(expected),
        done,
      },
    );
    let transmit_result = self.transmit(
      Message {
        id: MessageID {
          session: self.parameter_settings.session_id,
          system,
        },
        contents,
      },
      WriteClass::Control,
    );
    if let Err(error) = transmit_result {
      self.outbox.lock().unwrap().remove(&system);
      return Err(error);
    }
    match reply.recv_timeout(timeout) {
      Ok(result) => result,
      Err(oneshot::RecvTimeoutError::Timeout) => {
        self.outbox.lock().unwrap().remove(&system);
        Err(Error::Core(secs_core::Error::Timeout))
      },
      Err(oneshot::RecvTimeoutError::Disconnected) => {
        self.outbox.lock().unwrap().remove(&system);
        Err(Error::Core(secs_core::Error::Cancelled))
      },
    }
  }

  /// Completes the open transaction matching this message, if any.
  fn fulfill_pending(&self, message: Message) -> bool {
    let mut outbox = self.outbox.lock().unwrap();
    let matches = outbox
      .get(&message.id.system)
      .map(|entry| entry.expected.matches(&message.contents))
      .unwrap_or(false);
    if !matches {
      return false;
    }
    let entry = outbox.remove(&message.id.system).unwrap();
    drop(outbox);
    let _ = entry.done.send(Ok(message));
    true
  }

  /// Enters the SELECTED state and starts the periodic linktest loop.
  /// Caller holds the selection mutex.
  fn set_selected(self: &Arc<Self>) {
    if self.selection_state.swap(SelectionState::Selected, Relaxed) == SelectionState::Selected {
      return;
    }
    let generation = self.selected_generation.fetch_add(1, Relaxed) + 1;
    self.selected_event.set();
    debug!(target: "secs_hsms", "selected");
    if !self.parameter_settings.linktest_interval.is_zero() {
      let clone: Arc<Client> = self.clone();
      thread::spawn(move || clone.linktest_loop(generation));
    }
  }

  /// ### PERIODIC LINKTEST LOOP
  ///
  /// Issues Linktest.req every interval while this selection generation is
  /// current. Consecutive failures reaching the configured threshold tear
  /// the session down; any success resets the count.
  fn linktest_loop(self: Arc<Self>, generation: u64) {
    let mut consecutive_failures: u32 = 0;
    loop {
      thread::sleep(self.parameter_settings.linktest_interval);
      if self.stop_requested.load(Relaxed)
        || self.selected_generation.load(Relaxed) != generation
        || !self.is_selected()
      {
        return;
      }
      match self.linktest() {
        Ok(()) => consecutive_failures = 0,
        Err(error) => {
          consecutive_failures += 1;
          warn!(
            target: "secs_hsms",
            %error,
            consecutive_failures,
            "linktest failed"
          );
          if consecutive_failures >= self.parameter_settings.linktest_max_consecutive_failures {
            warn!(target: "secs_hsms", "linktest failure threshold reached");
            self.disconnect_with(Error::Core(secs_core::Error::Timeout));
            return;
          }
        },
      }
    }
  }

  /// Sends Reject.req answering the message whose header is echoed.
  fn transmit_reject(self: &Arc<Self>, header: MessageHeader, reason: RejectReason) {
    let echoed: [u8; 10] = header.into();
    let result = self.transmit(
      Message {
        id: MessageID {
          session: header.session_id,
          system: header.system,
        },
        contents: MessageContents::RejectRequest(reason.into(), echoed.to_vec()),
      },
      WriteClass::Control,
    );
    if let Err(error) = result {
      debug!(target: "secs_hsms", %error, "failed to transmit Reject.req");
    }
  }

  /// Tears the session down: data writes are gated off, the connection is
  /// closed, open transactions complete with `reason`, the inbound queue
  /// is flushed, and waiters are woken.
  fn disconnect_with(self: &Arc<Self>, reason: Error) {
    self.primitive_client.disable_data_writes(Error::NotSelected);
    let _ = self.primitive_client.disconnect();

    let _guard: MutexGuard<'_, ()> = self.selection_mutex.lock().unwrap();
    self.selection_state.store(SelectionState::NotSelected, Relaxed);
    self.selected_event.reset();
    for (_, entry) in self.outbox.lock().unwrap().drain() {
      let _ = entry.done.send(Err(reason.clone()));
    }
    *self.inbound_sender.lock().unwrap() = None;
    // A receiver blocked in receive_data holds this lock; it will drain on
    // its own once the senders are gone, so only flush when it is free.
    if let Ok(receiver_guard) = self.inbound_receiver.try_lock() {
      if let Some(receiver) = &*receiver_guard {
        while receiver.try_recv().is_ok() {}
      }
    }
    self.disconnected_event.set();
  }

  /// ### RECEPTION HANDLER
  /// **Based on SEMI E37-1109§7**
  ///
  /// A [Client] in the [CONNECTED] state automatically receives messages
  /// and responds based on their contents and the current [Selection
  /// State]:
  ///
  /// - Primary data messages are queued for the [Data Receive Procedure];
  ///   secondaries complete the open transaction they correlate to, and
  ///   uncorrelated secondaries are queued like primaries. Data received
  ///   outside the [SELECTED] state is answered with Reject.req.
  /// - Select.req is accepted with Select.rsp(0), entering [SELECTED]
  ///   before any subsequent data message is dispatched, when this entity
  ///   accepts selects, is not yet selected, and the session id matches.
  ///   A mismatched session id is answered with a nonzero Select.rsp and
  ///   the connection closed; a Select.req while already selected is
  ///   answered with Reject.req and the session kept.
  /// - Linktest.req is answered with Linktest.rsp inline.
  /// - Deselect.req is answered with Deselect.rsp(0) and the session torn
  ///   down; Separate.req tears the session down silently.
  /// - Control responses complete the open transaction they correlate to;
  ///   without one they are answered with Reject.req.
  /// - Reject.req fails the open transaction it correlates to with
  ///   [Reject Received].
  /// - Messages with an unsupported presentation or session type are
  ///   answered with Reject.req.
  ///
  /// [Client]:                 Client
  /// [CONNECTED]:              crate::primitive::ConnectionState::Connected
  /// [Selection State]:        SelectionState
  /// [SELECTED]:               SelectionState::Selected
  /// [Data Receive Procedure]: Client::receive_data
  /// [Reject Received]:        crate::Error::RejectReceived
  fn receive_loop(
    self: Arc<Self>,
    rx_receiver: Receiver<primitive::Message>,
    data_sender: Sender<DataMessage>,
  ) {
    debug!(target: "secs_hsms", "reception handler start");
    let mut teardown_reason = Error::Core(secs_core::Error::Cancelled);
    for primitive_message in rx_receiver {
      let primitive_header = primitive_message.header;
      let message = match Message::try_from(primitive_message) {
        Err(reject_reason) => {
          self.transmit_reject(primitive_header, reject_reason);
          continue;
        },
        Ok(message) => message,
      };
      match message.contents {
        MessageContents::DataMessage {
          stream,
          function,
          w_bit,
          body,
        } => {
          if !self.is_selected() {
            self.transmit_reject(primitive_header, RejectReason::EntityNotSelected);
            continue;
          }
          // A correlated secondary (matching system bytes and the exact
          // expected stream and function) completes its open transaction.
          let entry = {
            let mut outbox = self.outbox.lock().unwrap();
            let matches = outbox
              .get(&message.id.system)
              .map(|entry| {
                entry.expected
                  == ExpectedReply::Data {
                    stream,
                    function,
                  }
              })
              .unwrap_or(false);
            if matches {
              outbox.remove(&message.id.system)
            } else {
              None
            }
          };
          if let Some(entry) = entry {
            let _ = entry.done.send(Ok(Message {
              id: message.id,
              contents: MessageContents::DataMessage {
                stream,
                function,
                w_bit,
                body,
              },
            }));
            continue;
          }
          // Anything else, primaries and uncorrelated secondaries alike,
          // surfaces through the inbound queue; the layer above decides
          // what an unsolicited secondary means.
          let delivery = data_sender.send(DataMessage {
            stream,
            function,
            w_bit,
            system_bytes: message.id.system,
            body,
          });
          if delivery.is_err() {
            break;
          }
        },

        MessageContents::SelectRequest => {
          enum Verdict {
            Accept,
            AlreadySelected,
            Refuse(SelectStatus),
            MismatchedSession,
          }
          let verdict = {
            let _guard: MutexGuard<'_, ()> = self.selection_mutex.lock().unwrap();
            if !self.parameter_settings.passive_accept_select {
              Verdict::Refuse(SelectStatus::NotReady)
            } else if self.is_selected() {
              Verdict::AlreadySelected
            } else if message.id.session != self.parameter_settings.session_id {
              Verdict::MismatchedSession
            } else {
              self.set_selected();
              Verdict::Accept
            }
          };
          match verdict {
            Verdict::Accept => {
              let _ = self.transmit(
                Message {
                  id: message.id,
                  contents: MessageContents::SelectResponse(SelectStatus::Ok.into()),
                },
                WriteClass::Control,
              );
            },
            Verdict::AlreadySelected => {
              self.transmit_reject(primitive_header, RejectReason::AlreadySelected);
            },
            Verdict::Refuse(status) => {
              let _ = self.transmit(
                Message {
                  id: message.id,
                  contents: MessageContents::SelectResponse(status.into()),
                },
                WriteClass::Control,
              );
              teardown_reason = Error::Core(secs_core::Error::InvalidArgument);
              break;
            },
            Verdict::MismatchedSession => {
              warn!(
                target: "secs_hsms",
                session = message.id.session,
                expected = self.parameter_settings.session_id,
                "select with mismatched session id"
              );
              let _ = self.transmit(
                Message {
                  id: message.id,
                  contents: MessageContents::SelectResponse(SelectStatus::NotReady.into()),
                },
                WriteClass::Control,
              );
              teardown_reason = Error::Core(secs_core::Error::InvalidArgument);
              break;
            },
          }
        },

        MessageContents::SelectResponse(_)
        | MessageContents::DeselectResponse(_)
        | MessageContents::LinktestResponse => {
          if !self.fulfill_pending(message) {
            self.transmit_reject(primitive_header, RejectReason::TransactionNotOpen);
          }
        },

        MessageContents::DeselectRequest => {
          let _ = self.transmit(
            Message {
              id: message.id,
              contents: MessageContents::DeselectResponse(0),
            },
            WriteClass::Control,
          );
          teardown_reason = Error::Core(secs_core::Error::Cancelled);
          break;
        },

        MessageContents::LinktestRequest => {
          let _ = self.transmit(
            Message {
              id: message.id,
              contents: MessageContents::LinktestResponse,
            },
            WriteClass::Control,
          );
        },

        MessageContents::RejectRequest(reason, _echoed_header) => {
          let mut outbox = self.outbox.lock().unwrap();
          match outbox.remove(&message.id.system) {
            Some(entry) => {
              drop(outbox);
              let _ = entry.done.send(Err(Error::RejectReceived(reason)));
            },
            None => {
              warn!(target: "secs_hsms", reason, "uncorrelated Reject.req received");
            },
          }
        },

        MessageContents::SeparateRequest => {
          debug!(target: "secs_hsms", "separate received");
          teardown_reason = Error::Core(secs_core::Error::Cancelled);
          break;
        },
      }
    }
    // Dropping the inbound sender first lets a blocked receiver observe
    // the closed channel while the teardown takes the session locks.
    drop(data_sender);
    self.disconnect_with(teardown_reason);
    trace!(target: "secs_hsms", "reception handler end");
  }
}
